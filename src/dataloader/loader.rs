//! The `AudioDataLoader` coordinates a dataset, a batch sampler and a
//! collator into an epoch-by-epoch stream of [`PaddedBatch`]es.
//!
//! # Constructor Overview
//!
//! - `new()`: builds a [`BucketingSampler`] from the config (single
//!   process) and uses the default [`PaddingCollator`].
//! - `new_distributed()`: same, but with a [`DistributedBucketingSampler`]
//!   sharded by `(num_replicas, rank)`.
//! - `with_batch_sampler()`: user-provided sampler (e.g. a
//!   [`SequentialBatchSampler`](crate::sampler::SequentialBatchSampler) for
//!   an evaluation loader); the sampler then controls batch size, order and
//!   the drop-last policy.
//!
//! The sampler only ever yields index groups; fetching payloads and padding
//! them happens here, either inline (`num_workers = 0`) or on a pool of
//! worker threads that preserves sampler order.

use crate::batch::PaddedBatch;
use crate::collator::{Collator, PaddingCollator};
use crate::dataset::AudioDataset;
use crate::sampler::{BatchSampler, BucketingSampler, DistributedBucketingSampler};
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::config::LoaderConfig;
use super::workers::WorkerPool;

/// Coordinates sampling, fetching and collation for one dataset.
///
/// # Thread safety
/// - The loader itself is `Send + Sync`; the dataset sits behind an `Arc`
///   and is shared zero-copy with worker threads.
/// - Iterators returned by [`iter`](Self::iter) are single-threaded; create
///   one per epoch on the control thread.
///
/// # Type parameters
/// - `D`: Dataset type.
/// - `C`: Collator type (defaults to [`PaddingCollator`]).
pub struct AudioDataLoader<D, C = PaddingCollator> {
    dataset: Arc<D>,
    collator: C,
    config: LoaderConfig,
    batch_sampler: Box<dyn BatchSampler>,
    current_epoch: AtomicUsize,
}

impl<D> AudioDataLoader<D, PaddingCollator>
where
    D: AudioDataset + 'static,
{
    /// Creates a loader with a config-driven [`BucketingSampler`] and the
    /// default [`PaddingCollator`].
    pub fn new(dataset: D, config: LoaderConfig) -> Result<Self> {
        Self::with_collator(dataset, config, PaddingCollator)
    }

    /// Creates a loader whose sampler shards buckets across a distributed
    /// job. When shuffling, `config.seed` is required and must be set to the
    /// same value on every replica; construction fails if it is missing.
    pub fn new_distributed(
        dataset: D,
        config: LoaderConfig,
        num_replicas: usize,
        rank: usize,
    ) -> Result<Self> {
        Self::distributed_with_collator(dataset, config, num_replicas, rank, PaddingCollator)
    }
}

impl<D, C> AudioDataLoader<D, C>
where
    D: AudioDataset + 'static,
    C: Collator + Clone + 'static,
{
    /// Creates a loader with a config-driven [`BucketingSampler`] and a
    /// custom collator.
    ///
    /// # Errors
    /// - `batch_size == 0`
    /// - `prefetch_factor == 0` while `num_workers > 0`
    /// - the dataset reports an invalid length for any index
    pub fn with_collator(dataset: D, config: LoaderConfig, collator: C) -> Result<Self> {
        let (config, seed) = Self::resolve_config(config)?;
        let sampler = BucketingSampler::new(
            &dataset,
            config.batch_size.unwrap(),
            config.drop_last.unwrap(),
            config.shuffle.unwrap(),
            seed,
        )
        .context("Failed to build bucketing sampler")?;
        Self::from_parts(dataset, config, collator, Box::new(sampler))
    }

    /// Creates a loader with a [`DistributedBucketingSampler`] and a custom
    /// collator.
    ///
    /// # Errors
    /// All of [`with_collator`](Self::with_collator)'s, plus
    /// `num_replicas == 0`, `rank >= num_replicas`, and shuffling
    /// requested without an explicit `config.seed`.
    pub fn distributed_with_collator(
        dataset: D,
        config: LoaderConfig,
        num_replicas: usize,
        rank: usize,
        collator: C,
    ) -> Result<Self> {
        // Replicas only agree on the per-epoch bucket order if they derive it
        // from the same base seed. A randomly drawn fallback seed would differ
        // per process and silently duplicate/lose buckets across the shards.
        if config.shuffle == Some(true) && config.seed.is_none() {
            return Err(anyhow!(
                "Distributed shuffling requires config.seed to be set.\n\
                Every replica must be given the same seed so they compute \
                identical bucket orders without communicating."
            ));
        }
        let (config, seed) = Self::resolve_config(config)?;
        let sampler = DistributedBucketingSampler::new(
            &dataset,
            config.batch_size.unwrap(),
            num_replicas,
            rank,
            config.drop_last.unwrap(),
            config.shuffle.unwrap(),
            seed,
        )
        .context("Failed to build distributed bucketing sampler")?;
        Self::from_parts(dataset, config, collator, Box::new(sampler))
    }

    /// Creates a loader around a user-provided batch sampler.
    ///
    /// The sampler owns batching, so `config.batch_size`, `config.drop_last`
    /// and `config.shuffle` must be left unset here; specifying them would
    /// silently conflict with the sampler's own policy.
    pub fn with_batch_sampler(
        dataset: D,
        batch_sampler: impl BatchSampler + 'static,
        config: LoaderConfig,
        collator: C,
    ) -> Result<Self> {
        if config.batch_size.is_some() {
            return Err(anyhow!(
                "batch_size must not be specified when providing a batch sampler.\n\
                The batch sampler controls batch size."
            ));
        }
        if config.drop_last.is_some() {
            return Err(anyhow!(
                "drop_last must not be specified when providing a batch sampler.\n\
                The batch sampler controls whether to drop the last batch."
            ));
        }
        if let Some(true) = config.shuffle {
            return Err(anyhow!(
                "Cannot specify shuffle = true when providing a batch sampler.\n\
                The batch sampler handles its own shuffling."
            ));
        }

        // Coordinate seeds between the sampler and the config.
        if let (Some(sampler_seed), Some(config_seed)) = (batch_sampler.seed(), config.seed) {
            if sampler_seed != config_seed {
                return Err(anyhow!(
                    "Seed mismatch: batch sampler uses seed {} but config.seed is {}.\n\
                    Use the same seed value for both.",
                    sampler_seed,
                    config_seed,
                ));
            }
        }

        if config.prefetch_factor == 0 && config.num_workers > 0 {
            return Err(anyhow!(
                "Prefetch factor must be > 0 when using {} workers",
                config.num_workers
            ));
        }

        Self::from_parts(dataset, config, collator, Box::new(batch_sampler))
    }

    /// Fills in config defaults and picks the effective base seed.
    fn resolve_config(mut config: LoaderConfig) -> Result<(LoaderConfig, u64)> {
        config.batch_size = Some(config.batch_size.unwrap_or(1));
        config.drop_last = Some(config.drop_last.unwrap_or(false));
        config.shuffle = Some(config.shuffle.unwrap_or(false));

        if config.prefetch_factor == 0 && config.num_workers > 0 {
            return Err(anyhow!(
                "Prefetch factor must be > 0 when using {} workers",
                config.num_workers
            ));
        }

        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        config.seed = Some(seed);
        Ok((config, seed))
    }

    fn from_parts(
        dataset: D,
        config: LoaderConfig,
        collator: C,
        batch_sampler: Box<dyn BatchSampler>,
    ) -> Result<Self> {
        debug!(
            num_batches = batch_sampler.num_batches(),
            num_workers = config.num_workers,
            "constructed audio data loader"
        );
        Ok(Self {
            dataset: Arc::new(dataset),
            collator,
            config,
            batch_sampler,
            current_epoch: AtomicUsize::new(0),
        })
    }

    /// Number of batches one epoch yields; training loops use this to bound
    /// iteration.
    pub fn num_batches(&self) -> usize {
        self.batch_sampler.num_batches()
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    /// Creates the iterator for the next epoch.
    ///
    /// Each call advances the internal epoch counter, so consecutive calls
    /// see consecutive epoch shuffles. With `num_workers > 0` a fresh worker
    /// pool is spawned for the epoch and joined when the iterator drops.
    pub fn iter(&self) -> Result<EpochIter<'_, D, C>> {
        let epoch = self.current_epoch.fetch_add(1, Ordering::SeqCst);
        debug!(epoch, "starting epoch");
        let buckets = self.batch_sampler.iter(epoch);

        let inner = if self.config.num_workers == 0 {
            IterImpl::Single {
                dataset: self.dataset.as_ref(),
                collator: &self.collator,
                buckets,
            }
        } else {
            let pool = self.spawn_epoch_workers()?;
            IterImpl::Multi {
                max_in_flight: self.config.num_workers * self.config.prefetch_factor,
                timeout: self.config.timeout,
                pool,
                buckets,
                dispatched: 0,
                collected: 0,
            }
        };

        Ok(EpochIter { inner })
    }

    /// Spawns fresh fetch/collate workers for one epoch.
    fn spawn_epoch_workers(&self) -> Result<WorkerPool<Vec<usize>, Result<PaddedBatch>>> {
        let worker_timeout = self.config.worker_timeout;
        let dataset = self.dataset.clone();
        let collator = self.collator.clone();

        WorkerPool::new(
            self.config.num_workers,
            self.config.prefetch_factor,
            move |worker_id, task_rx: Receiver<Vec<usize>>, output_tx, shutdown| {
                while !shutdown.load(Ordering::Relaxed) {
                    match task_rx.recv_timeout(worker_timeout) {
                        Ok(indices) => {
                            let result =
                                fetch_and_collate(dataset.as_ref(), &indices, &collator)
                                    .with_context(|| {
                                        format!(
                                            "Worker {} failed to load bucket of {} utterances",
                                            worker_id,
                                            indices.len()
                                        )
                                    });
                            if output_tx.send(result).is_err() {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            },
        )
        .context("Failed to create epoch worker pool")
    }
}

/// Fetches every utterance of a bucket and collates them into one batch.
fn fetch_and_collate<D, C>(dataset: &D, indices: &[usize], collator: &C) -> Result<PaddedBatch>
where
    D: AudioDataset + ?Sized,
    C: Collator,
{
    let utterances = indices
        .iter()
        .map(|&index| {
            dataset
                .fetch(index)
                .with_context(|| format!("Failed to fetch utterance {}", index))
        })
        .collect::<Result<Vec<_>>>()?;
    collator.collate(&utterances)
}

/// Iterator over one epoch's batches, in sampler order.
pub struct EpochIter<'a, D, C> {
    inner: IterImpl<'a, D, C>,
}

enum IterImpl<'a, D, C> {
    Single {
        dataset: &'a D,
        collator: &'a C,
        buckets: Box<dyn Iterator<Item = Vec<usize>> + Send + 'a>,
    },
    Multi {
        pool: WorkerPool<Vec<usize>, Result<PaddedBatch>>,
        buckets: Box<dyn Iterator<Item = Vec<usize>> + Send + 'a>,
        dispatched: usize,
        collected: usize,
        max_in_flight: usize,
        timeout: Duration,
    },
}

impl<D, C> Iterator for EpochIter<'_, D, C>
where
    D: AudioDataset,
    C: Collator,
{
    type Item = Result<PaddedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            IterImpl::Single {
                dataset,
                collator,
                buckets,
            } => {
                let indices = buckets.next()?;
                Some(fetch_and_collate(*dataset, &indices, *collator))
            }
            IterImpl::Multi {
                pool,
                buckets,
                dispatched,
                collected,
                max_in_flight,
                timeout,
            } => {
                let num_workers = pool.num_workers();

                // Keep each worker's queue topped up. Bucket k always goes
                // to worker k mod num_workers; collecting in the same order
                // preserves the sampler's sequence.
                while *dispatched - *collected < *max_in_flight {
                    match buckets.next() {
                        Some(indices) => {
                            if let Err(err) = pool.send(*dispatched % num_workers, indices) {
                                return Some(Err(err));
                            }
                            *dispatched += 1;
                        }
                        None => break,
                    }
                }

                if *collected == *dispatched {
                    return None; // All buckets dispatched and collected.
                }

                let output = pool.recv(*collected % num_workers, *timeout);
                *collected += 1;
                Some(output.and_then(|result| result))
            }
        }
    }
}
