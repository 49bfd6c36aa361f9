use asr_datapipe::{InMemoryDataset, Utterance};
use ndarray::Array2;

/// Builds a dataset of `n` utterances with deliberately unsorted frame
/// counts. Utterance `i` carries transcript `[i]` so batches can be traced
/// back to their source indices, and its features are filled with `i + 1`.
pub fn synthetic_dataset(n: usize, feat_dim: usize) -> (InMemoryDataset, Vec<usize>) {
    let frame_counts: Vec<usize> = (0..n).map(|i| (i * 7 + 3) % (n + 5) + 1).collect();
    let utterances = frame_counts
        .iter()
        .enumerate()
        .map(|(i, &frames)| {
            Utterance::new(
                Array2::from_elem((frames, feat_dim), (i + 1) as f32),
                vec![i as i32],
            )
        })
        .collect();
    (InMemoryDataset::new(utterances), frame_counts)
}

/// Installs a test subscriber once so `RUST_LOG` can surface loader traces.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
