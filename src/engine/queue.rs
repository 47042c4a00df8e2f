//! Scan queue
//!
//! Process-wide semaphore bounding how many scans run at once. Counter
//! mutations sit under their own mutex so `status` is a consistent snapshot.

use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::Semaphore;

static GLOBAL_QUEUE: OnceLock<Arc<ScanQueue>> = OnceLock::new();

/// Snapshot of queue occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct QueueStatus {
    pub running: usize,
    pub queued: usize,
    pub capacity: usize,
}

#[derive(Default)]
struct Counters {
    running: usize,
    queued: usize,
}

pub struct ScanQueue {
    semaphore: Semaphore,
    capacity: usize,
    counters: Mutex<Counters>,
}

impl ScanQueue {
    pub fn new(max_concurrent: usize) -> Self {
        let capacity = max_concurrent.max(1);
        Self {
            semaphore: Semaphore::new(capacity),
            capacity,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// First call wins; later calls are no-ops.
    pub fn init_global(max_concurrent: usize) -> Arc<ScanQueue> {
        GLOBAL_QUEUE
            .get_or_init(|| Arc::new(ScanQueue::new(max_concurrent)))
            .clone()
    }

    /// The process-wide queue, capacity 1 if `init_global` never ran.
    #[allow(dead_code)] // API completeness
    pub fn global() -> Arc<ScanQueue> {
        GLOBAL_QUEUE
            .get_or_init(|| Arc::new(ScanQueue::new(1)))
            .clone()
    }

    /// Wait for a slot, then run `f` while holding it.
    pub async fn execute<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.counters.lock().unwrap().queued += 1;

        // The semaphore is never closed, so acquire cannot fail.
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("scan queue semaphore closed");

        {
            let mut counters = self.counters.lock().unwrap();
            counters.queued -= 1;
            counters.running += 1;
        }

        let result = f().await;

        drop(permit);
        self.counters.lock().unwrap().running -= 1;

        result
    }

    pub fn status(&self) -> QueueStatus {
        let counters = self.counters.lock().unwrap();
        QueueStatus {
            running: counters.running,
            queued: counters.queued,
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn capacity_one_serialises_scans() {
        let queue = Arc::new(ScanQueue::new(1));

        let first_end = Arc::new(Mutex::new(None::<Instant>));
        let second_start = Arc::new(Mutex::new(None::<Instant>));

        let q1 = queue.clone();
        let fe = first_end.clone();
        let first = tokio::spawn(async move {
            q1.execute(|| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                *fe.lock().unwrap() = Some(Instant::now());
            })
            .await;
        });

        // Give the first task time to take the slot.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let q2 = queue.clone();
        let ss = second_start.clone();
        let second = tokio::spawn(async move {
            q2.execute(|| async move {
                *ss.lock().unwrap() = Some(Instant::now());
            })
            .await;
        });

        first.await.unwrap();
        second.await.unwrap();

        let end = first_end.lock().unwrap().unwrap();
        let start = second_start.lock().unwrap().unwrap();
        assert!(start >= end);
    }

    #[tokio::test]
    async fn capacity_two_bounds_concurrency() {
        let queue = Arc::new(ScanQueue::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let start = Instant::now();
        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                let running = running.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    queue
                        .execute(|| async move {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            running.fetch_sub(1, Ordering::SeqCst);
                        })
                        .await;
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(400), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(700), "elapsed {elapsed:?}");
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn status_reflects_occupancy() {
        let queue = Arc::new(ScanQueue::new(1));
        assert_eq!(
            queue.status(),
            QueueStatus {
                running: 0,
                queued: 0,
                capacity: 1
            }
        );

        let q = queue.clone();
        let task = tokio::spawn(async move {
            q.execute(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
            })
            .await;
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(queue.status().running, 1);
        task.await.unwrap();
        assert_eq!(queue.status().running, 0);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let queue = ScanQueue::new(0);
        assert_eq!(queue.status().capacity, 1);
    }
}
