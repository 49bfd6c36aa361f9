use crate::dataset::AudioDataset;
use anyhow::{ensure, Result};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use tracing::warn;

/// A `BatchSampler` defines the order in which index groups (batches) are
/// drawn from a dataset.
///
/// # Method
/// - `iter(epoch)`: returns the batch sequence for that epoch. Samplers that
///   shuffle derive their RNG from a base seed combined with `epoch`, so the
///   order is reproducible across runs and re-iterable within a run: calling
///   `iter` twice with the same epoch yields the same sequence.
/// - `num_batches()`: number of batches one epoch yields. Training loops use
///   it to bound iteration.
///
/// Implementations must be `Send + Sync` so the same sampler instance can be
/// shared with loader worker threads.
pub trait BatchSampler: Send + Sync {
    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Vec<usize>> + Send + '_>;

    fn num_batches(&self) -> usize;

    /// The base RNG seed, if this sampler shuffles. Used by the loader to
    /// coordinate seeds when both sides are given one.
    fn seed(&self) -> Option<u64> {
        None
    }
}

/// ============================================================================
/// Yields batches of consecutive indices in dataset order.
///
/// No sorting, no shuffling. This is the evaluation-loader default, where
/// reproducible file order matters more than padding efficiency.
///
/// # Arguments:
/// - `dataset_size`: Total number of utterances.
/// - `batch_size`: Indices per batch (must be >= 1).
/// - `drop_last`: If `true`, a short trailing batch is discarded.
#[derive(Debug, Clone)]
pub struct SequentialBatchSampler {
    dataset_size: usize,
    batch_size: usize,
    drop_last: bool,
}

impl SequentialBatchSampler {
    pub fn new(dataset_size: usize, batch_size: usize, drop_last: bool) -> Result<Self> {
        ensure!(
            batch_size > 0,
            "batch_size must be >= 1, but got batch_size={}",
            batch_size
        );
        Ok(Self {
            dataset_size,
            batch_size,
            drop_last,
        })
    }
}

impl BatchSampler for SequentialBatchSampler {
    fn iter(&self, _epoch: usize) -> Box<dyn Iterator<Item = Vec<usize>> + Send + '_> {
        let batch_size = self.batch_size;
        let dataset_size = self.dataset_size;
        let count = self.num_batches();
        Box::new((0..count).map(move |k| {
            let start = k * batch_size;
            let end = (start + batch_size).min(dataset_size);
            (start..end).collect()
        }))
    }

    fn num_batches(&self) -> usize {
        if self.drop_last {
            self.dataset_size / self.batch_size
        } else {
            self.dataset_size.div_ceil(self.batch_size)
        }
    }
}

/// ============================================================================
/// Groups dataset indices into length-sorted buckets of `batch_size` and
/// yields the bucket list under a per-epoch permutation.
///
/// Feeding similarly-sized utterances together minimizes the padding wasted
/// when a batch is collated to its longest member. The trade-off is that
/// bucket membership never changes: randomization happens only at the
/// bucket-order level.
///
/// # Construction
/// 1. Enumerate indices `0..N` and read each utterance's length metric from
///    the dataset. A non-finite or negative length is a fatal configuration
///    error: it cannot be sorted and must not be treated as zero.
/// 2. Stably sort the indices by length, ascending.
/// 3. Slice the sorted list into consecutive buckets of `batch_size`; the
///    last bucket holds `N mod batch_size` indices when that is nonzero and
///    is discarded up front if `drop_last` is set.
///
/// The bin list is built exactly once. `iter(epoch)` only permutes bucket
/// order: O(number of buckets) per call, never a re-sort.
///
/// # Shuffling
/// With `shuffle = true`, the bucket order for an epoch comes from an RNG
/// seeded with `base_seed + epoch`: the same `(base_seed, epoch)` pair always
/// reproduces the same order, and no other state feeds the permutation. With
/// `shuffle = false`, buckets come out in sorted (shortest-first) order.
///
/// # Edge cases
/// - `N == 0` builds an empty bin list; iteration completes immediately.
/// - With `drop_last = false`, callers must tolerate a final batch smaller
///   than `batch_size`. Making the policy a construction flag keeps it
///   uniform between training and evaluation instead of an ad hoc skip
///   inside one of the loops.
#[derive(Debug, Clone)]
pub struct BucketingSampler {
    bins: Vec<Vec<usize>>,
    shuffle: bool,
    base_seed: u64,
}

impl BucketingSampler {
    /// Builds the bin list from the dataset's length metric.
    ///
    /// # Arguments:
    /// - `dataset`: Supplies `len()` and `duration(index)`. Payloads are
    ///   never read here.
    /// - `batch_size`: Indices per bucket (must be >= 1).
    /// - `drop_last`: If `true`, a short trailing bucket is discarded at
    ///   construction time.
    /// - `shuffle`: Whether `iter(epoch)` permutes bucket order.
    /// - `base_seed`: Base RNG seed, shared by every replica in a
    ///   distributed job.
    pub fn new<D: AudioDataset + ?Sized>(
        dataset: &D,
        batch_size: usize,
        drop_last: bool,
        shuffle: bool,
        base_seed: u64,
    ) -> Result<Self> {
        let durations = (0..dataset.len())
            .map(|index| dataset.duration(index))
            .collect::<Result<Vec<_>>>()?;
        Self::from_durations(&durations, batch_size, drop_last, shuffle, base_seed)
    }

    /// Builds the bin list from a precomputed length metric per index.
    pub fn from_durations(
        durations: &[f32],
        batch_size: usize,
        drop_last: bool,
        shuffle: bool,
        base_seed: u64,
    ) -> Result<Self> {
        ensure!(
            batch_size > 0,
            "batch_size must be >= 1, but got batch_size={}",
            batch_size
        );
        for (index, &duration) in durations.iter().enumerate() {
            ensure!(
                duration.is_finite() && duration >= 0.0,
                "Dataset reports invalid length {} for index {}; cannot sort",
                duration,
                index,
            );
        }

        // Stable sort keeps equal-length utterances in dataset order, so the
        // bin list is identical on every replica that sees the same dataset.
        let mut indices: Vec<usize> = (0..durations.len()).collect();
        indices.sort_by(|&a, &b| durations[a].total_cmp(&durations[b]));

        let mut bins: Vec<Vec<usize>> = indices
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        if drop_last {
            if let Some(last) = bins.last() {
                if last.len() < batch_size {
                    let dropped = bins.pop().map(|b| b.len()).unwrap_or(0);
                    warn!(dropped, batch_size, "dropping short trailing bucket");
                }
            }
        }

        Ok(Self {
            bins,
            shuffle,
            base_seed,
        })
    }

    /// The bin list in its unshuffled (length-sorted) order.
    pub fn bins(&self) -> &[Vec<usize>] {
        &self.bins
    }

    #[inline]
    fn derive_rng_for_epoch(&self, epoch: usize) -> StdRng {
        StdRng::seed_from_u64(self.base_seed.wrapping_add(epoch as u64))
    }

    /// Bucket order for one epoch. A pure function of `(base_seed, epoch)`
    /// so distributed replicas compute it identically without communicating.
    fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.bins.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.derive_rng_for_epoch(epoch));
        }
        order
    }
}

impl BatchSampler for BucketingSampler {
    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Vec<usize>> + Send + '_> {
        let order = self.epoch_order(epoch);
        Box::new(order.into_iter().map(move |bin| self.bins[bin].clone()))
    }

    fn num_batches(&self) -> usize {
        self.bins.len()
    }

    fn seed(&self) -> Option<u64> {
        Some(self.base_seed)
    }
}

/// ============================================================================
/// A `BucketingSampler` sharded across the replicas of a distributed
/// training job.
///
/// Every replica builds the identical bin list (same stable sort, same seed
/// policy) and then keeps only the buckets assigned to its `rank`:
///
/// ```text
/// 5 buckets, 2 replicas:
///   global order: [b0, b1, b2, b3, b4]
///   rank 0 owns:  [b0,     b2,     b4]
///   rank 1 owns:  [    b1,     b3    ]
/// ```
///
/// Bucket `k` of the epoch's global order goes to replica `k mod
/// num_replicas`, so the shards are disjoint and their union is the full bin
/// list: no duplication, no loss. When the bucket count does not divide
/// evenly, lower ranks receive one extra bucket; the split is a deterministic
/// local computation on every replica.
///
/// The epoch permutation is seeded from `base_seed + epoch` and never from
/// `rank`: all replicas agree on the global order before sharding, which is
/// the whole synchronization story: no barrier or message passing per epoch.
#[derive(Debug, Clone)]
pub struct DistributedBucketingSampler {
    inner: BucketingSampler,
    num_replicas: usize,
    rank: usize,
}

impl DistributedBucketingSampler {
    /// # Arguments:
    /// - `dataset`, `batch_size`, `drop_last`, `shuffle`, `base_seed`: as for
    ///   [`BucketingSampler`]. `base_seed` must be the same value on every
    ///   replica.
    /// - `num_replicas`: Total participants in the job (must be >= 1).
    /// - `rank`: This replica's 0-indexed id (must be < `num_replicas`).
    #[allow(clippy::too_many_arguments)]
    pub fn new<D: AudioDataset + ?Sized>(
        dataset: &D,
        batch_size: usize,
        num_replicas: usize,
        rank: usize,
        drop_last: bool,
        shuffle: bool,
        base_seed: u64,
    ) -> Result<Self> {
        ensure!(num_replicas > 0, "num_replicas must be >= 1");
        ensure!(
            rank < num_replicas,
            "Invalid rank {}, rank should be in the interval [0, {}]",
            rank,
            num_replicas - 1
        );
        let inner = BucketingSampler::new(dataset, batch_size, drop_last, shuffle, base_seed)?;
        Ok(Self {
            inner,
            num_replicas,
            rank,
        })
    }

    pub fn num_replicas(&self) -> usize {
        self.num_replicas
    }

    pub fn rank(&self) -> usize {
        self.rank
    }
}

impl BatchSampler for DistributedBucketingSampler {
    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Vec<usize>> + Send + '_> {
        // Every replica computes the same global order, then picks every
        // `num_replicas`th bucket starting at its own rank.
        Box::new(
            self.inner
                .iter(epoch)
                .skip(self.rank)
                .step_by(self.num_replicas),
        )
    }

    fn num_batches(&self) -> usize {
        self.inner
            .num_batches()
            .saturating_sub(self.rank)
            .div_ceil(self.num_replicas)
    }

    fn seed(&self) -> Option<u64> {
        self.inner.seed()
    }
}

/// ============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemoryDataset;
    use crate::utterance::Utterance;
    use ndarray::Array2;
    use std::collections::HashSet;

    const TEST_SEED: u64 = 42;

    /// Dataset whose utterance at index `i` has `frame_counts[i]` frames.
    fn make_dataset(frame_counts: &[usize]) -> InMemoryDataset {
        InMemoryDataset::new(
            frame_counts
                .iter()
                .map(|&frames| Utterance::new(Array2::zeros((frames, 2)), vec![0]))
                .collect(),
        )
    }

    /// Frame counts that are deliberately unsorted.
    fn scrambled_frame_counts(n: usize) -> Vec<usize> {
        (0..n).map(|i| (i * 7 + 3) % (n + 5) + 1).collect()
    }

    mod sequential_batch_sampler_tests {
        use super::*;

        #[test]
        fn yields_consecutive_chunks() -> Result<()> {
            let sampler = SequentialBatchSampler::new(7, 3, false)?;
            let batches: Vec<_> = sampler.iter(0).collect();
            assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
            assert_eq!(sampler.num_batches(), 3);
            Ok(())
        }

        #[test]
        fn drop_last_discards_short_batch() -> Result<()> {
            let sampler = SequentialBatchSampler::new(7, 3, true)?;
            let batches: Vec<_> = sampler.iter(0).collect();
            assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5]]);
            assert_eq!(sampler.num_batches(), 2);
            Ok(())
        }

        #[test]
        fn rejects_zero_batch_size() {
            assert!(SequentialBatchSampler::new(10, 0, false).is_err());
        }
    }

    mod bucketing_sampler_tests {
        use super::*;

        #[test]
        fn rejects_zero_batch_size() {
            let dataset = make_dataset(&[1, 2, 3]);
            assert!(BucketingSampler::new(&dataset, 0, false, false, TEST_SEED).is_err());
        }

        #[test]
        fn rejects_invalid_lengths() {
            assert!(
                BucketingSampler::from_durations(&[1.0, f32::NAN], 2, false, false, TEST_SEED)
                    .is_err()
            );
            assert!(BucketingSampler::from_durations(
                &[1.0, f32::INFINITY],
                2,
                false,
                false,
                TEST_SEED
            )
            .is_err());
            assert!(
                BucketingSampler::from_durations(&[1.0, -0.5], 2, false, false, TEST_SEED)
                    .is_err()
            );
        }

        #[test]
        fn buckets_partition_all_indices_exactly_once() -> Result<()> {
            let dataset = make_dataset(&scrambled_frame_counts(23));
            let sampler = BucketingSampler::new(&dataset, 5, false, true, TEST_SEED)?;

            let all: Vec<usize> = sampler.iter(3).flatten().collect();
            assert_eq!(all.len(), 23);
            let unique: HashSet<_> = all.iter().copied().collect();
            assert_eq!(unique, (0..23).collect::<HashSet<_>>());
            Ok(())
        }

        #[test]
        fn bucket_sizes_match_spec_example() -> Result<()> {
            // N=23, B=5 -> 5 buckets of sizes [5, 5, 5, 5, 3]
            let dataset = make_dataset(&scrambled_frame_counts(23));
            let sampler = BucketingSampler::new(&dataset, 5, false, false, TEST_SEED)?;

            assert_eq!(sampler.num_batches(), 5);
            let sizes: Vec<usize> = sampler.iter(0).map(|b| b.len()).collect();
            assert_eq!(sizes, vec![5, 5, 5, 5, 3]);
            Ok(())
        }

        #[test]
        fn exact_multiple_has_no_short_bucket() -> Result<()> {
            let dataset = make_dataset(&scrambled_frame_counts(20));
            let sampler = BucketingSampler::new(&dataset, 5, false, false, TEST_SEED)?;
            let sizes: Vec<usize> = sampler.iter(0).map(|b| b.len()).collect();
            assert_eq!(sizes, vec![5, 5, 5, 5]);
            Ok(())
        }

        #[test]
        fn drop_last_removes_short_trailing_bucket() -> Result<()> {
            let dataset = make_dataset(&scrambled_frame_counts(23));
            let sampler = BucketingSampler::new(&dataset, 5, true, false, TEST_SEED)?;
            assert_eq!(sampler.num_batches(), 4);
            let all: Vec<usize> = sampler.iter(0).flatten().collect();
            assert_eq!(all.len(), 20);
            Ok(())
        }

        #[test]
        fn unshuffled_concatenation_is_nondecreasing_in_length() -> Result<()> {
            let frame_counts = scrambled_frame_counts(37);
            let dataset = make_dataset(&frame_counts);
            let sampler = BucketingSampler::new(&dataset, 4, false, false, TEST_SEED)?;

            let lengths: Vec<usize> = sampler
                .iter(0)
                .flatten()
                .map(|index| frame_counts[index])
                .collect();
            assert!(lengths.windows(2).all(|w| w[0] <= w[1]));
            Ok(())
        }

        #[test]
        fn shuffle_preserves_bucket_membership() -> Result<()> {
            let dataset = make_dataset(&scrambled_frame_counts(23));
            let unshuffled = BucketingSampler::new(&dataset, 5, false, false, TEST_SEED)?;
            let shuffled = BucketingSampler::new(&dataset, 5, false, true, TEST_SEED)?;

            let reference: HashSet<Vec<usize>> = unshuffled.iter(0).collect();
            for epoch in 0..5 {
                let permuted: HashSet<Vec<usize>> = shuffled.iter(epoch).collect();
                assert_eq!(permuted, reference);
            }
            Ok(())
        }

        #[test]
        fn shuffle_is_deterministic_per_epoch() -> Result<()> {
            let dataset = make_dataset(&scrambled_frame_counts(50));
            let sampler = BucketingSampler::new(&dataset, 5, false, true, TEST_SEED)?;

            let epoch1: Vec<_> = sampler.iter(1).collect();
            assert_eq!(epoch1, sampler.iter(1).collect::<Vec<_>>());
            assert_ne!(epoch1, sampler.iter(2).collect::<Vec<_>>());
            Ok(())
        }

        #[test]
        fn stable_sort_keeps_equal_lengths_in_dataset_order() -> Result<()> {
            let sampler = BucketingSampler::from_durations(
                &[2.0, 1.0, 2.0, 1.0, 2.0],
                5,
                false,
                false,
                TEST_SEED,
            )?;
            let all: Vec<usize> = sampler.iter(0).flatten().collect();
            assert_eq!(all, vec![1, 3, 0, 2, 4]);
            Ok(())
        }

        #[test]
        fn empty_dataset_yields_zero_buckets() -> Result<()> {
            let dataset = make_dataset(&[]);
            let sampler = BucketingSampler::new(&dataset, 5, false, true, TEST_SEED)?;
            assert_eq!(sampler.num_batches(), 0);
            assert_eq!(sampler.iter(0).count(), 0);
            Ok(())
        }
    }

    mod distributed_bucketing_sampler_tests {
        use super::*;

        fn make_replicas(
            frame_counts: &[usize],
            batch_size: usize,
            num_replicas: usize,
        ) -> Vec<DistributedBucketingSampler> {
            let dataset = make_dataset(frame_counts);
            (0..num_replicas)
                .map(|rank| {
                    DistributedBucketingSampler::new(
                        &dataset,
                        batch_size,
                        num_replicas,
                        rank,
                        false,
                        true,
                        TEST_SEED,
                    )
                    .unwrap()
                })
                .collect()
        }

        #[test]
        fn rejects_invalid_replica_args() {
            let dataset = make_dataset(&[1, 2, 3]);
            // num_replicas = 0
            assert!(
                DistributedBucketingSampler::new(&dataset, 2, 0, 0, false, true, TEST_SEED)
                    .is_err()
            );
            // rank >= num_replicas
            assert!(
                DistributedBucketingSampler::new(&dataset, 2, 2, 2, false, true, TEST_SEED)
                    .is_err()
            );
            // batch_size = 0
            assert!(
                DistributedBucketingSampler::new(&dataset, 0, 2, 0, false, true, TEST_SEED)
                    .is_err()
            );
        }

        #[test]
        fn spec_example_split_is_three_and_two() {
            // N=23, B=5 -> 5 buckets; R=2 -> ranks own 3 and 2 buckets
            let replicas = make_replicas(&scrambled_frame_counts(23), 5, 2);
            assert_eq!(replicas[0].num_batches(), 3);
            assert_eq!(replicas[1].num_batches(), 2);
            assert_eq!(replicas[0].iter(0).count(), 3);
            assert_eq!(replicas[1].iter(0).count(), 2);
        }

        #[test]
        fn shards_cover_every_bucket_exactly_once() {
            let frame_counts = scrambled_frame_counts(23);
            let replicas = make_replicas(&frame_counts, 5, 3);

            for epoch in 0..4 {
                let mut all_indices = Vec::new();
                let mut total_buckets = 0;
                for replica in &replicas {
                    for bucket in replica.iter(epoch) {
                        total_buckets += 1;
                        all_indices.extend(bucket);
                    }
                }
                assert_eq!(total_buckets, 5);
                assert_eq!(all_indices.len(), 23);
                let unique: HashSet<_> = all_indices.into_iter().collect();
                assert_eq!(unique, (0..23).collect::<HashSet<_>>());
            }
        }

        #[test]
        fn replicas_agree_on_global_order_without_communicating() {
            // Interleaving the two shards of a 2-replica job must reproduce
            // the single-process bucket order for the same seed and epoch.
            let frame_counts = scrambled_frame_counts(40);
            let dataset = make_dataset(&frame_counts);
            let global = BucketingSampler::new(&dataset, 4, false, true, TEST_SEED).unwrap();
            let replicas = make_replicas(&frame_counts, 4, 2);

            for epoch in 0..3 {
                let expected: Vec<Vec<usize>> = global.iter(epoch).collect();
                let shard0: Vec<Vec<usize>> = replicas[0].iter(epoch).collect();
                let shard1: Vec<Vec<usize>> = replicas[1].iter(epoch).collect();

                let mut interleaved = Vec::new();
                let mut s0 = shard0.into_iter();
                let mut s1 = shard1.into_iter();
                loop {
                    match (s0.next(), s1.next()) {
                        (None, None) => break,
                        (a, b) => {
                            interleaved.extend(a);
                            interleaved.extend(b);
                        }
                    }
                }
                assert_eq!(interleaved, expected);
            }
        }

        #[test]
        fn shard_is_deterministic_per_epoch() {
            let replicas = make_replicas(&scrambled_frame_counts(30), 3, 2);
            let epoch1: Vec<_> = replicas[0].iter(1).collect();
            assert_eq!(epoch1, replicas[0].iter(1).collect::<Vec<_>>());
            assert_ne!(epoch1, replicas[0].iter(2).collect::<Vec<_>>());
        }

        #[test]
        fn single_replica_owns_every_bucket() {
            let frame_counts = scrambled_frame_counts(23);
            let replicas = make_replicas(&frame_counts, 5, 1);
            assert_eq!(replicas[0].num_batches(), 5);
            let all: Vec<usize> = replicas[0].iter(0).flatten().collect();
            assert_eq!(all.len(), 23);
        }

        #[test]
        fn more_replicas_than_buckets_leaves_some_ranks_empty() {
            // 5 indices, batch 5 -> one bucket; ranks 1 and 2 get nothing.
            let replicas = make_replicas(&scrambled_frame_counts(5), 5, 3);
            assert_eq!(replicas[0].num_batches(), 1);
            assert_eq!(replicas[1].num_batches(), 0);
            assert_eq!(replicas[2].num_batches(), 0);
            assert_eq!(replicas[1].iter(0).count(), 0);
        }

        #[test]
        fn empty_dataset_iterates_cleanly_on_every_rank() {
            let replicas = make_replicas(&[], 5, 2);
            for replica in &replicas {
                assert_eq!(replica.num_batches(), 0);
                assert_eq!(replica.iter(0).count(), 0);
            }
        }
    }
}
