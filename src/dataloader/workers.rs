//! Worker pool for parallel bucket fetching and collation.
//!
//! Each worker owns its own bounded task and output channel pair. The main
//! thread dispatches bucket `k` to worker `k mod num_workers` and collects
//! outputs in the same round-robin order; since every worker processes its
//! queue FIFO, batches come back in exactly the order the sampler yielded
//! them, with no reordering buffer.
//!
//! Shutdown is cooperative: dropping the pool sets a shared flag, closes the
//! task channels and joins every thread.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Thread pool with per-worker channels and order-preserving collection.
///
/// # Type Parameters
/// - `Task`: Work items sent to workers (bucket index lists).
/// - `Output`: Results returned from workers (collated batches).
pub(crate) struct WorkerPool<Task, Output> {
    workers: Vec<thread::JoinHandle<()>>,
    task_txs: Vec<Sender<Task>>,
    output_rxs: Vec<Receiver<Output>>,
    shutdown: Arc<AtomicBool>,
}

impl<Task, Output> WorkerPool<Task, Output>
where
    Task: Send + 'static,
    Output: Send + 'static,
{
    /// Spawns `num_workers` threads, each running `worker_fn` over its own
    /// task receiver until the channel closes or shutdown is signalled.
    pub(crate) fn new<F>(num_workers: usize, buffer_size: usize, worker_fn: F) -> Result<Self>
    where
        F: Fn(usize, Receiver<Task>, Sender<Output>, Arc<AtomicBool>) + Send + Sync + 'static,
    {
        if num_workers == 0 {
            return Err(anyhow!(
                "Cannot create WorkerPool with 0 workers. \
                Either set num_workers > 0 or use single-threaded mode."
            ));
        }
        if buffer_size == 0 {
            return Err(anyhow!(
                "Cannot create WorkerPool with buffer_size 0. \
                Buffer size must be > 0 to prevent deadlocks."
            ));
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_fn = Arc::new(worker_fn);
        let mut workers = Vec::with_capacity(num_workers);
        let mut task_txs = Vec::with_capacity(num_workers);
        let mut output_rxs = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (task_tx, task_rx) = bounded(buffer_size);
            let (output_tx, output_rx) = bounded(buffer_size);
            let shutdown_clone = shutdown.clone();
            let worker_fn_clone = worker_fn.clone();

            let handle = thread::Builder::new()
                .name(format!("datapipe-worker-{}", worker_id))
                .spawn(move || {
                    worker_fn_clone(worker_id, task_rx, output_tx, shutdown_clone);
                })
                .with_context(|| format!("Failed to spawn worker thread {}", worker_id))?;

            workers.push(handle);
            task_txs.push(task_tx);
            output_rxs.push(output_rx);
        }

        Ok(Self {
            workers,
            task_txs,
            output_rxs,
            shutdown,
        })
    }

    pub(crate) fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Queues a task on one worker. Blocks when that worker's queue is full,
    /// which is the backpressure that bounds prefetch memory.
    pub(crate) fn send(&self, worker: usize, task: Task) -> Result<()> {
        self.task_txs[worker]
            .send(task)
            .map_err(|_| anyhow!("Worker {} has shut down; cannot dispatch task", worker))
    }

    /// Receives the next output from one worker.
    pub(crate) fn recv(&self, worker: usize, timeout: Duration) -> Result<Output> {
        use crossbeam_channel::RecvTimeoutError;
        self.output_rxs[worker]
            .recv_timeout(timeout)
            .map_err(|err| match err {
                RecvTimeoutError::Timeout => anyhow!(
                    "Timed out after {:?} waiting for a batch from worker {}",
                    timeout,
                    worker
                ),
                RecvTimeoutError::Disconnected => {
                    anyhow!("Worker {} shut down before delivering its batch", worker)
                }
            })
    }
}

impl<Task, Output> Drop for WorkerPool<Task, Output> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // Close the task channels so blocked workers wake up.
        self.task_txs.clear();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod worker_pool_tests {
    use super::*;
    use crossbeam_channel::RecvTimeoutError;

    fn echo_pool(num_workers: usize) -> WorkerPool<usize, usize> {
        WorkerPool::new(num_workers, 4, |_, task_rx, output_tx, shutdown| {
            while !shutdown.load(Ordering::Relaxed) {
                match task_rx.recv_timeout(Duration::from_millis(10)) {
                    Ok(task) => {
                        if output_tx.send(task * 2).is_err() {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .unwrap()
    }

    #[test]
    fn rejects_zero_workers_and_zero_buffer() {
        assert!(WorkerPool::<usize, usize>::new(0, 4, |_, _, _, _| {}).is_err());
        assert!(WorkerPool::<usize, usize>::new(2, 0, |_, _, _, _| {}).is_err());
    }

    #[test]
    fn round_robin_collection_preserves_dispatch_order() -> Result<()> {
        let pool = echo_pool(3);
        for k in 0..9usize {
            pool.send(k % 3, k)?;
        }
        let mut outputs = Vec::new();
        for k in 0..9usize {
            outputs.push(pool.recv(k % 3, Duration::from_secs(5))?);
        }
        assert_eq!(outputs, (0..9).map(|k| k * 2).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn drop_joins_workers() {
        let pool = echo_pool(2);
        drop(pool); // Must not hang.
    }
}
