use ndarray::Array2;

/// A single training example: a variable-length acoustic feature sequence
/// plus its transcript encoded as label indices.
///
/// The feature matrix is laid out as `[frames, feat_dim]`, where `frames`
/// varies per utterance and `feat_dim` is fixed across a dataset (e.g. 161
/// spectrogram bins). The transcript holds one label id per output symbol.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub features: Array2<f32>,
    pub transcript: Vec<i32>,
}

impl Utterance {
    pub fn new(features: Array2<f32>, transcript: Vec<i32>) -> Self {
        Self {
            features,
            transcript,
        }
    }

    /// Number of feature frames (the length metric used for bucketing
    /// when no external duration is available).
    pub fn num_frames(&self) -> usize {
        self.features.nrows()
    }

    /// Width of each feature frame.
    pub fn feat_dim(&self) -> usize {
        self.features.ncols()
    }
}

#[cfg(test)]
mod utterance_tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn reports_frame_and_feature_dimensions() {
        let utt = Utterance::new(Array2::zeros((7, 13)), vec![1, 2, 3]);
        assert_eq!(utt.num_frames(), 7);
        assert_eq!(utt.feat_dim(), 13);
        assert_eq!(utt.transcript.len(), 3);
    }
}
