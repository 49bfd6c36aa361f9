//! Length-bucketed batch sampling and data loading for speech-recognition
//! training.
//!
//! Variable-length utterances padded to a common batch shape waste compute
//! on silence; this crate groups similarly-sized utterances into buckets,
//! reshuffles bucket order deterministically each epoch, and (optionally)
//! shards the bucket sequence across distributed replicas, all from a
//! shared seed, with no cross-process coordination.

pub mod batch;
pub mod collator;
pub mod dataloader;
pub mod dataset;
pub mod manifest;
pub mod sampler;
pub mod utterance;

pub use batch::PaddedBatch;
pub use collator::{Collator, PaddingCollator};
pub use dataloader::{AudioDataLoader, LoaderConfig};
pub use dataset::{AudioDataset, FeatureExtractor, InMemoryDataset, ManifestDataset};
pub use manifest::{read_manifest, ManifestEntry};
pub use sampler::{
    BatchSampler, BucketingSampler, DistributedBucketingSampler, SequentialBatchSampler,
};
pub use utterance::Utterance;
