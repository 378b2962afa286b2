//! Partitioned worker pool for pass-scoped parallel work.
//!
//! Items are routed to a fixed worker by a hash of their partition key, so
//! every item sharing a key lands on the same named thread. Each worker owns
//! a bounded job queue; results travel back tagged with their input index
//! and are returned in input order, which keeps the pass output independent
//! of thread scheduling.

use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::debug;

use crate::error::ExecutionError;

/// Pool shape.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Name prefix of worker threads.
    pub name: &'static str,
    pub workers: usize,
    /// Maximum queued items per worker.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "recon",
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

/// Runs pass work on scoped, partitioned worker threads.
#[derive(Debug, Clone, Default)]
pub struct PartitionedPool {
    config: PoolConfig,
}

impl PartitionedPool {
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.config.workers.max(1)
    }

    /// Applies `work` to every item and returns the results in input order.
    ///
    /// # Errors
    ///
    /// Fails if a worker cannot be spawned, panics, or drops its result
    /// channel before finishing.
    pub fn run<T, R, K, F>(&self, items: Vec<T>, key: K, work: F) -> Result<Vec<R>, ExecutionError>
    where
        T: Send,
        R: Send,
        K: Fn(&T) -> &str,
        F: Fn(T) -> R + Sync,
    {
        let total = items.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let workers = self.workers().min(total);
        let queue_capacity = self.config.queue_capacity.max(1);
        let work = &work;

        thread::scope(|scope| {
            let (result_tx, result_rx) = unbounded::<(usize, R)>();
            let mut senders: Vec<Sender<(usize, T)>> = Vec::with_capacity(workers);
            let mut handles = Vec::with_capacity(workers);

            for idx in 0..workers {
                let (tx, rx): (Sender<(usize, T)>, Receiver<(usize, T)>) = bounded(queue_capacity);
                let result_tx = result_tx.clone();
                let worker = format!("{}-{idx}", self.config.name);
                let handle = thread::Builder::new()
                    .name(worker.clone())
                    .spawn_scoped(scope, move || {
                        let mut done = 0usize;
                        for (pos, item) in rx {
                            if result_tx.send((pos, work(item))).is_err() {
                                break;
                            }
                            done += 1;
                        }
                        done
                    })
                    .map_err(|e| ExecutionError::SpawnFailed {
                        worker: worker.clone(),
                        reason: e.to_string(),
                    })?;
                senders.push(tx);
                handles.push((worker, handle));
            }
            drop(result_tx);

            let mut disconnected = false;
            for (pos, item) in items.into_iter().enumerate() {
                let partition = partition_of(key(&item), workers);
                if senders[partition].send((pos, item)).is_err() {
                    disconnected = true;
                    break;
                }
            }
            drop(senders);

            let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
            for (pos, result) in result_rx {
                slots[pos] = Some(result);
            }

            // Join every worker so a panic never escapes the scope.
            let mut panicked = None;
            for (worker, handle) in handles {
                match handle.join() {
                    Ok(done) => debug!(worker = %worker, done, "worker finished"),
                    Err(_) => {
                        panicked.get_or_insert(worker);
                    }
                }
            }
            if let Some(worker) = panicked {
                return Err(ExecutionError::WorkerPanicked { worker });
            }
            if disconnected {
                return Err(ExecutionError::Disconnected {
                    pool: self.config.name.to_string(),
                });
            }

            slots
                .into_iter()
                .collect::<Option<Vec<R>>>()
                .ok_or_else(|| ExecutionError::Disconnected {
                    pool: self.config.name.to_string(),
                })
        })
    }
}

/// Stable partition of `key` among `workers`.
#[must_use]
pub fn partition_of(key: &str, workers: usize) -> usize {
    let digest = blake3::hash(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    let workers = u64::try_from(workers.max(1)).unwrap_or(1);
    usize::try_from(u64::from_le_bytes(head) % workers).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_results_in_input_order() {
        let pool = PartitionedPool::new(PoolConfig {
            name: "test",
            workers: 3,
            queue_capacity: 2,
        });
        let items: Vec<String> = (0..50).map(|i| format!("key-{i}")).collect();
        let out = pool.run(items.clone(), String::as_str, |s| s.len()).unwrap();
        let expected: Vec<usize> = items.iter().map(String::len).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_same_key_same_thread() {
        let pool = PartitionedPool::new(PoolConfig {
            name: "part",
            workers: 4,
            queue_capacity: 8,
        });
        let seen: Mutex<HashMap<String, String>> = Mutex::new(HashMap::new());
        let items: Vec<String> = (0..40).map(|i| format!("k{}", i % 5)).collect();
        pool.run(items, String::as_str, |k| {
            let name = thread::current().name().unwrap_or_default().to_string();
            let mut seen = seen.lock().unwrap();
            let first = seen.entry(k).or_insert_with(|| name.clone());
            assert_eq!(*first, name);
        })
        .unwrap();
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let pool = PartitionedPool::default();
        let result = pool.run(vec!["boom".to_string()], String::as_str, |s| {
            if s == "boom" {
                panic!("worker failure");
            }
            s
        });
        assert!(matches!(
            result,
            Err(ExecutionError::WorkerPanicked { .. }) | Err(ExecutionError::Disconnected { .. })
        ));
    }

    #[test]
    fn test_partition_is_stable() {
        assert_eq!(partition_of("jsmith", 8), partition_of("jsmith", 8));
        assert!(partition_of("jsmith", 3) < 3);
        assert_eq!(partition_of("anything", 0), 0);
    }

    #[test]
    fn test_partitions_cover_every_worker() {
        let mut seen = [0usize; 4];
        for i in 0..400 {
            seen[partition_of(&format!("host-{i}"), 4)] += 1;
        }
        assert!(seen.iter().all(|&n| n > 0), "{seen:?}");
        assert_eq!(partition_of("host-1", usize::MAX), partition_of("host-1", usize::MAX));
    }
}
