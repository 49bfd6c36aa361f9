//! Batch loading for speech-recognition training.
//!
//! ```text
//!                 ┌──────────────┐
//!                 │ AudioDataset │  (durations + fetch)
//!                 └──────┬───────┘
//!                        │ duration(index) only
//!                        ↓
//!                 ┌──────────────┐
//!                 │ BatchSampler │  (length-bucketed index groups)
//!                 └──────┬───────┘
//!                        │ Vec<usize> per batch
//!                        ↓
//!               ┌─────────────────┐
//!               │ AudioDataLoader │ ←── LoaderConfig (built once)
//!               └────────┬────────┘
//!                        │ fetch + collate (inline or worker pool)
//!                        ↓
//!                 ┌─────────────┐
//!                 │ PaddedBatch │  (ready for the trainer)
//!                 └─────────────┘
//! ```
//!
//! The sampler layer is pure index arithmetic; all I/O happens in this
//! module, on the control thread or on the epoch's worker pool.

mod config;
mod loader;
mod workers;

pub use config::{LoaderConfig, LoaderConfigBuilder};
pub use loader::{AudioDataLoader, EpochIter};
