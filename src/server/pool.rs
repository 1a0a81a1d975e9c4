//! Bounded worker pools.
//!
//! A [`WorkerPool`] runs submitted futures on at most `max` concurrent
//! workers. The queue in front of the workers is unbounded, so submission
//! never waits. Workers are added on demand while none is idle and retire
//! after `keep_alive` without work, down to `min`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Shared {
    name: &'static str,
    min: usize,
    max: usize,
    keep_alive: Duration,
    receiver: Mutex<mpsc::UnboundedReceiver<Job>>,
    workers: AtomicUsize,
    idle: AtomicUsize,
    queued: AtomicUsize,
}

/// Fixed-bound pool of async workers with an unbounded queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    sender: mpsc::UnboundedSender<Job>,
}

impl WorkerPool {
    /// Create a pool and start `min` workers.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(name: &'static str, min: usize, max: usize, keep_alive: Duration) -> Self {
        let max = max.max(1);
        let min = min.min(max);
        let (sender, receiver) = mpsc::unbounded_channel();

        let pool = Self {
            shared: Arc::new(Shared {
                name,
                min,
                max,
                keep_alive,
                receiver: Mutex::new(receiver),
                workers: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
            }),
            sender,
        };

        for _ in 0..min {
            spawn_worker(&pool.shared);
        }
        pool
    }

    /// Queue a job. Never blocks.
    pub fn submit<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(Box::pin(job)).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        if backlogged(&self.shared) {
            spawn_worker(&self.shared);
        }
    }

    /// Number of live workers.
    pub fn worker_count(&self) -> usize {
        self.shared.workers.load(Ordering::SeqCst)
    }

    /// Workers waiting for a job.
    pub fn idle_count(&self) -> usize {
        self.shared.idle.load(Ordering::SeqCst)
    }

    /// Jobs submitted but not yet picked up.
    pub fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    /// Upper bound on live workers.
    pub fn max_workers(&self) -> usize {
        self.shared.max
    }
}

/// More queued jobs than idle workers to take them.
fn backlogged(shared: &Shared) -> bool {
    shared.idle.load(Ordering::SeqCst) < shared.queued.load(Ordering::SeqCst)
}

/// Start one worker unless the pool is at `max`.
fn spawn_worker(shared: &Arc<Shared>) {
    let mut current = shared.workers.load(Ordering::SeqCst);
    loop {
        if current >= shared.max {
            return;
        }
        match shared.workers.compare_exchange(
            current,
            current + 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }

    tokio::spawn(worker_loop(Arc::clone(shared)));
}

async fn worker_loop(shared: Arc<Shared>) {
    loop {
        shared.idle.fetch_add(1, Ordering::SeqCst);
        let next = tokio::time::timeout(shared.keep_alive, async {
            shared.receiver.lock().await.recv().await
        })
        .await;
        shared.idle.fetch_sub(1, Ordering::SeqCst);

        let job = match next {
            Ok(Some(job)) => job,
            // Pool dropped
            Ok(None) => break,
            Err(_) => {
                if retire_idle_worker(&shared) {
                    return;
                }
                continue;
            }
        };

        shared.queued.fetch_sub(1, Ordering::SeqCst);
        if let Err(e) = tokio::spawn(job).await {
            tracing::error!("{} pool job failed: {}", shared.name, e);
        }
    }

    shared.workers.fetch_sub(1, Ordering::SeqCst);
}

/// Called by a worker whose keep-alive expired. Returns `true` if the worker
/// must exit.
///
/// A job submitted while this worker still counted as idle skipped spawning,
/// so once the worker is gone the backlog is checked again.
fn retire_idle_worker(shared: &Arc<Shared>) -> bool {
    if !retire(shared) {
        return false;
    }
    tracing::trace!("{} pool worker retired after idle timeout", shared.name);
    if backlogged(shared) {
        spawn_worker(shared);
    }
    true
}

/// Drop one worker if above the minimum.
fn retire(shared: &Shared) -> bool {
    let mut current = shared.workers.load(Ordering::SeqCst);
    loop {
        if current <= shared.min {
            return false;
        }
        match shared.workers.compare_exchange(
            current,
            current - 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => return true,
            Err(actual) => current = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::{oneshot, Barrier};
    use tokio::time::{sleep, timeout};

    #[tokio::test]
    async fn test_min_workers_started() {
        let pool = WorkerPool::new("test", 2, 4, Duration::from_secs(60));
        assert_eq!(pool.worker_count(), 2);
        assert_eq!(pool.max_workers(), 4);
    }

    #[tokio::test]
    async fn test_runs_jobs() {
        let pool = WorkerPool::new("test", 1, 4, Duration::from_secs(60));
        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send(42);
        });
        assert_eq!(timeout(Duration::from_secs(5), rx).await.unwrap().unwrap(), 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bounded_by_max() {
        let pool = WorkerPool::new("test", 1, 3, Duration::from_secs(60));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        for _ in 0..10 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done_tx = done_tx.clone();
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                let _ = done_tx.send(());
            });
        }

        for _ in 0..10 {
            timeout(Duration::from_secs(5), done_rx.recv()).await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(pool.worker_count() <= 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_grows_to_max_for_blocked_jobs() {
        let pool = WorkerPool::new("test", 1, 3, Duration::from_secs(60));
        let barrier = Arc::new(Barrier::new(4));

        for _ in 0..3 {
            let barrier = Arc::clone(&barrier);
            pool.submit(async move {
                barrier.wait().await;
            });
        }

        // All three jobs must be running at once for the barrier to release
        timeout(Duration::from_secs(5), barrier.wait()).await.unwrap();
        assert_eq!(pool.worker_count(), 3);
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn test_idle_workers_retire_to_min() {
        let pool = WorkerPool::new("test", 1, 4, Duration::from_millis(50));
        let barrier = Arc::new(Barrier::new(5));
        for _ in 0..4 {
            let barrier = Arc::clone(&barrier);
            pool.submit(async move {
                barrier.wait().await;
            });
        }
        timeout(Duration::from_secs(5), barrier.wait()).await.unwrap();
        assert_eq!(pool.worker_count(), 4);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while pool.worker_count() > 1 && tokio::time::Instant::now() < deadline {
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(pool.worker_count(), 1);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn test_idle_and_queued_counts() {
        let pool = WorkerPool::new("test", 1, 1, Duration::from_secs(60));

        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        pool.submit(async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
        });
        timeout(Duration::from_secs(5), started_rx).await.unwrap().unwrap();
        assert_eq!(pool.idle_count(), 0);

        let (done_tx, done_rx) = oneshot::channel();
        pool.submit(async move {
            let _ = done_tx.send(());
        });
        assert_eq!(pool.queued(), 1);
        assert_eq!(pool.worker_count(), 1);

        let _ = release_tx.send(());
        timeout(Duration::from_secs(5), done_rx).await.unwrap().unwrap();
        assert_eq!(pool.queued(), 0);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while pool.idle_count() == 0 && tokio::time::Instant::now() < deadline {
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_retired_worker_replaced_when_backlogged() {
        let pool = WorkerPool::new("test", 0, 2, Duration::from_secs(60));
        assert_eq!(pool.worker_count(), 0);

        // A worker whose keep-alive just expired, still counted as idle
        pool.shared.workers.fetch_add(1, Ordering::SeqCst);
        pool.shared.idle.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send(());
        });
        assert_eq!(pool.worker_count(), 1);
        assert_eq!(pool.queued(), 1);

        pool.shared.idle.fetch_sub(1, Ordering::SeqCst);
        assert!(retire_idle_worker(&pool.shared));

        timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        assert_eq!(pool.worker_count(), 1);
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn test_panicking_job_keeps_worker() {
        let pool = WorkerPool::new("test", 1, 1, Duration::from_secs(60));
        pool.submit(async { panic!("boom") });

        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send(());
        });
        timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        assert_eq!(pool.worker_count(), 1);
    }
}
