//! Configuration for loader behaviour.
//!
//! `LoaderConfig` is built once via the builder and consumed immutably
//! thereafter: there is no global state and nothing gets re-parsed after
//! construction.
//!
//! Example:
//! ```ignore
//! let config = LoaderConfig::builder()
//!     .batch_size(32)
//!     .num_workers(4)
//!     .shuffle(true)
//!     .seed(42)
//!     .build();
//! ```

use std::time::Duration;

/// Configuration for [`AudioDataLoader`](crate::dataloader::AudioDataLoader).
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Number of utterances per bucket (defaults to 1 if not specified).
    pub batch_size: Option<usize>,
    /// Number of parallel fetch/collate workers (0 = single-threaded).
    pub num_workers: usize,
    /// Whether to discard a short trailing bucket (defaults to false).
    /// Applied identically in training and evaluation; there is no
    /// loop-local skip.
    pub drop_last: Option<bool>,
    /// Whether bucket order is reshuffled each epoch (defaults to false).
    pub shuffle: Option<bool>,
    /// Base RNG seed for epoch shuffling. In a distributed job every
    /// replica must use the same value.
    pub seed: Option<u64>,
    /// Number of buckets kept in flight per worker (must be > 0 when
    /// workers are used).
    pub prefetch_factor: usize,
    /// Maximum time to wait for a batch from the workers before assuming
    /// they are stuck. Default: 30s.
    pub timeout: Duration,
    /// How often idle workers check for shutdown. A polling interval, not
    /// an error timeout. Default: 100ms.
    pub worker_timeout: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            num_workers: 0,
            drop_last: None,
            shuffle: None,
            seed: None,
            prefetch_factor: 2,
            timeout: Duration::from_secs(30),
            worker_timeout: Duration::from_millis(100),
        }
    }
}

impl LoaderConfig {
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::default()
    }
}

/// Builder for [`LoaderConfig`] with method chaining.
#[derive(Default)]
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    /// Set the bucket size (must be > 0).
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = Some(size);
        self
    }

    /// Set the number of workers.
    pub fn num_workers(mut self, workers: usize) -> Self {
        self.config.num_workers = workers;
        self
    }

    /// Set whether to drop a short trailing bucket.
    pub fn drop_last(mut self, drop: bool) -> Self {
        self.config.drop_last = Some(drop);
        self
    }

    /// Set whether to reshuffle bucket order every epoch.
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.config.shuffle = Some(shuffle);
        self
    }

    /// Set the base seed for reproducible epoch shuffling.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Set how many buckets each worker keeps in flight.
    pub fn prefetch_factor(mut self, factor: usize) -> Self {
        self.config.prefetch_factor = factor;
        self
    }

    /// Set the stuck-worker timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the worker polling interval.
    pub fn worker_timeout(mut self, worker_timeout: Duration) -> Self {
        self.config.worker_timeout = worker_timeout;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> LoaderConfig {
        self.config
    }
}
