use crate::manifest::ManifestEntry;
use crate::utterance::Utterance;
use anyhow::{ensure, Result};
use std::sync::Arc;

/// An `AudioDataset` provides the two views the data pipeline needs:
///
/// - a cheap per-index length metric (`duration`), which is all the
///   bucketing samplers ever read, and
/// - the actual payload (`fetch`), which only the loading layer touches.
///
/// Implementations must be `Send + Sync` so one dataset instance can be
/// shared across loader worker threads behind an `Arc`.
pub trait AudioDataset: Send + Sync {
    /// Total number of utterances.
    fn len(&self) -> usize;

    /// Length metric for one utterance (seconds or frame count; the
    /// samplers only compare values, they never interpret the unit).
    ///
    /// Must return the same value for the same index every call; a dataset
    /// that cannot report a length for an index is misconfigured and should
    /// error here.
    fn duration(&self, index: usize) -> Result<f32>;

    /// Fetches the utterance payload for collation.
    fn fetch(&self, index: usize) -> Result<Utterance>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Converts a manifest entry into an utterance.
///
/// This is the seam to the feature-extraction collaborator: decoding audio
/// and computing spectrograms happens behind this trait, outside the crate.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, entry: &ManifestEntry) -> Result<Utterance>;
}

/// A dataset that holds every utterance in RAM.
///
/// Cloning only bumps the `Arc` counter, so the same dataset can be handed
/// to a pool of loader workers without copying feature matrices. The length
/// metric is the feature frame count.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    utterances: Arc<[Utterance]>,
}

impl InMemoryDataset {
    pub fn new(utterances: Vec<Utterance>) -> Self {
        Self {
            utterances: utterances.into(),
        }
    }
}

impl AudioDataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.utterances.len()
    }

    fn duration(&self, index: usize) -> Result<f32> {
        let utt = self
            .utterances
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("Index {} out of bounds for dataset", index))?;
        Ok(utt.num_frames() as f32)
    }

    fn fetch(&self, index: usize) -> Result<Utterance> {
        self.utterances
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Index {} out of bounds for dataset", index))
    }
}

/// A dataset backed by a manifest file plus a feature-extraction
/// collaborator.
///
/// Durations come straight from the manifest, so the samplers can build
/// their bin lists without touching any audio. Payloads are produced on
/// demand by the extractor when the loading layer fetches a bucket.
pub struct ManifestDataset<E> {
    entries: Arc<[ManifestEntry]>,
    extractor: E,
}

impl<E: FeatureExtractor> ManifestDataset<E> {
    /// Builds a dataset from parsed manifest entries.
    ///
    /// Durations are re-checked here so a `ManifestDataset` constructed from
    /// entries that did not come through [`read_manifest`] still fails fast
    /// on bad length metadata.
    ///
    /// [`read_manifest`]: crate::manifest::read_manifest
    pub fn new(entries: Vec<ManifestEntry>, extractor: E) -> Result<Self> {
        for (index, entry) in entries.iter().enumerate() {
            ensure!(
                entry.duration_secs.is_finite() && entry.duration_secs >= 0.0,
                "Manifest entry {} has invalid duration {}",
                index,
                entry.duration_secs,
            );
        }
        Ok(Self {
            entries: entries.into(),
            extractor,
        })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }
}

impl<E: FeatureExtractor> AudioDataset for ManifestDataset<E> {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn duration(&self, index: usize) -> Result<f32> {
        self.entries
            .get(index)
            .map(|e| e.duration_secs)
            .ok_or_else(|| anyhow::anyhow!("Index {} out of bounds for manifest", index))
    }

    fn fetch(&self, index: usize) -> Result<Utterance> {
        let entry = self
            .entries
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("Index {} out of bounds for manifest", index))?;
        self.extractor.extract(entry)
    }
}
