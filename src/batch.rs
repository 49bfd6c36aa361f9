use anyhow::{anyhow, Result};
use ndarray::{Array1, Array3};

/// A collated batch of utterances, ready to hand to the trainer.
///
/// Fields are fixed and named rather than positional so the loader/trainer
/// boundary can be tested directly:
/// - `inputs`: padded features, shape `[batch, max_frames, feat_dim]`.
///   Every row beyond an utterance's real frame count is zero.
/// - `input_percentages`: per-utterance fill ratio `frames / max_frames`,
///   shape `[batch]`. Multiplying by `max_frames()` recovers the true
///   sequence lengths after padding.
/// - `targets`: all transcripts concatenated in batch order.
/// - `target_sizes`: transcript length per utterance, so `targets` can be
///   split back apart.
#[derive(Debug, Clone)]
pub struct PaddedBatch {
    pub inputs: Array3<f32>,
    pub input_percentages: Array1<f32>,
    pub targets: Vec<i32>,
    pub target_sizes: Vec<usize>,
}

impl PaddedBatch {
    pub fn batch_size(&self) -> usize {
        self.inputs.shape()[0]
    }

    pub fn max_frames(&self) -> usize {
        self.inputs.shape()[1]
    }

    pub fn feat_dim(&self) -> usize {
        self.inputs.shape()[2]
    }

    /// True frame count per utterance, recovered from the fill ratios.
    pub fn input_sizes(&self) -> Vec<usize> {
        let max_frames = self.max_frames() as f32;
        self.input_percentages
            .iter()
            .map(|&pct| (pct * max_frames).round() as usize)
            .collect()
    }

    /// Splits the flattened target buffer back into per-utterance slices.
    pub fn split_targets(&self) -> Result<Vec<&[i32]>> {
        let mut out = Vec::with_capacity(self.target_sizes.len());
        let mut offset = 0;
        for &size in &self.target_sizes {
            let end = offset + size;
            let slice = self
                .targets
                .get(offset..end)
                .ok_or_else(|| anyhow!("target_sizes exceed flattened target buffer"))?;
            out.push(slice);
            offset = end;
        }
        Ok(out)
    }
}
