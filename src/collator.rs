use crate::batch::PaddedBatch;
use crate::utterance::Utterance;
use anyhow::{bail, Result};
use ndarray::{s, Array1, Array3};

/// A `Collator` combines the utterances of one bucket into a [`PaddedBatch`].
pub trait Collator: Send + Sync {
    fn collate(&self, utterances: &[Utterance]) -> Result<PaddedBatch>;
}

/// Pads variable-length feature sequences to the longest utterance in the
/// batch and flattens the transcripts.
///
/// Utterances are ordered longest-first within the batch before padding, so
/// downstream consumers that require length-sorted batches (packed RNN
/// sequences) get them for free. `input_percentages` records how much of
/// each padded row is real data.
#[derive(Debug, Clone, Default)]
pub struct PaddingCollator;

impl Collator for PaddingCollator {
    fn collate(&self, utterances: &[Utterance]) -> Result<PaddedBatch> {
        if utterances.is_empty() {
            bail!("Cannot collate an empty bucket");
        }

        let feat_dim = utterances[0].feat_dim();
        for (i, utt) in utterances.iter().enumerate().skip(1) {
            if utt.feat_dim() != feat_dim {
                bail!(
                    "Feature dimension mismatch in utterance {}: expected {}, got {}",
                    i,
                    feat_dim,
                    utt.feat_dim()
                );
            }
        }

        // Longest first within the batch.
        let mut order: Vec<usize> = (0..utterances.len()).collect();
        order.sort_by(|&a, &b| utterances[b].num_frames().cmp(&utterances[a].num_frames()));

        let max_frames = utterances[order[0]].num_frames();
        if max_frames == 0 {
            bail!("Cannot collate a bucket where every utterance has zero frames");
        }

        let batch_size = utterances.len();
        let mut inputs = Array3::<f32>::zeros((batch_size, max_frames, feat_dim));
        let mut input_percentages = Array1::<f32>::zeros(batch_size);
        let mut targets = Vec::new();
        let mut target_sizes = Vec::with_capacity(batch_size);

        for (slot, &source) in order.iter().enumerate() {
            let utt = &utterances[source];
            let frames = utt.num_frames();
            inputs
                .slice_mut(s![slot, ..frames, ..])
                .assign(&utt.features);
            input_percentages[slot] = frames as f32 / max_frames as f32;
            targets.extend_from_slice(&utt.transcript);
            target_sizes.push(utt.transcript.len());
        }

        Ok(PaddedBatch {
            inputs,
            input_percentages,
            targets,
            target_sizes,
        })
    }
}
