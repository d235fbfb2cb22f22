//! Executors that run listener jobs off the clock thread.
//!
//! [`WorkerPool`] is a fixed set of OS threads draining a bounded queue.
//! Submission never blocks: when the queue is full or the pool has shut
//! down the job is handed back as a [`SubmitError`] and the caller decides
//! what to do with it (the listener registry drops and counts it).
//!
//! [`InlineExecutor`] runs each job on the submitting thread. It exists for
//! deterministic tests and single-threaded replays.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info};

/// A unit of listener work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Reasons a job was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The executor no longer accepts work.
    #[error("executor has shut down")]
    ShutDown,

    /// The bounded queue is full.
    #[error("executor queue is full (capacity {capacity})")]
    QueueFull {
        /// Queue capacity.
        capacity: usize,
    },
}

/// Errors that can occur when starting a worker pool.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {source}")]
    Spawn {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The pool must have at least one worker.
    #[error("worker pool concurrency must be at least 1, got {value}")]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },

    /// The queue must hold at least one job.
    #[error("worker pool queue capacity must be at least 1, got {value}")]
    InvalidCapacity {
        /// The rejected value.
        value: usize,
    },
}

/// Port for running listener jobs.
pub trait TaskExecutor: Send + Sync {
    /// Accept a job for execution without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError`] if the job was not accepted.
    fn execute(&self, job: Job) -> Result<(), SubmitError>;

    /// Whether the executor has stopped accepting work.
    fn is_shutdown(&self) -> bool;
}

/// Runs each job immediately on the submitting thread.
#[derive(Debug, Default)]
pub struct InlineExecutor {
    shutdown: AtomicBool,
}

impl InlineExecutor {
    /// Create an accepting executor.
    pub const fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
        }
    }

    /// Stop accepting work.
    pub fn shutdown_now(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

impl TaskExecutor for InlineExecutor {
    fn execute(&self, job: Job) -> Result<(), SubmitError> {
        if self.is_shutdown() {
            return Err(SubmitError::ShutDown);
        }
        job();
        Ok(())
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Fixed-size pool of worker threads behind a bounded queue.
#[derive(Debug)]
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    shutdown: Arc<AtomicBool>,
    completed: Arc<AtomicU64>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    concurrency: usize,
    capacity: usize,
}

impl WorkerPool {
    /// Start `concurrency` workers sharing a queue of `capacity` jobs.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] if either size is zero or a thread could
    /// not be spawned. Workers already started are shut down in that case.
    pub fn start(concurrency: usize, capacity: usize) -> Result<Self, ExecutorError> {
        if concurrency == 0 {
            return Err(ExecutorError::InvalidConcurrency { value: concurrency });
        }
        if capacity == 0 {
            return Err(ExecutorError::InvalidCapacity { value: capacity });
        }

        let (tx, rx) = mpsc::channel::<Job>(capacity);
        let receiver = Arc::new(Mutex::new(rx));
        let pool = Self {
            sender: Mutex::new(Some(tx)),
            shutdown: Arc::new(AtomicBool::new(false)),
            completed: Arc::new(AtomicU64::new(0)),
            workers: Mutex::new(Vec::with_capacity(concurrency)),
            concurrency,
            capacity,
        };

        for index in 0..concurrency {
            let receiver = Arc::clone(&receiver);
            let shutdown = Arc::clone(&pool.shutdown);
            let completed = Arc::clone(&pool.completed);
            let handle = std::thread::Builder::new()
                .name(format!("marsim-listener-{index}"))
                .spawn(move || worker_loop(index, &receiver, &shutdown, &completed))?;
            pool.lock_workers().push(handle);
        }

        info!(concurrency, capacity, "Listener worker pool started");
        Ok(pool)
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop accepting work and discard queued jobs. Jobs already running
    /// are not waited for.
    pub fn shutdown_now(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let pending = self.pending_jobs();
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!(
            discarded = pending,
            completed = self.completed_jobs(),
            "Listener worker pool shut down"
        );
    }

    /// Wait for every worker thread to exit. Call after
    /// [`shutdown_now`](Self::shutdown_now); blocks until running jobs
    /// return.
    pub fn join(&self) {
        let handles: Vec<_> = self.lock_workers().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("Listener worker thread panicked");
            }
        }
    }

    /// Jobs that have run to completion.
    pub fn completed_jobs(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Jobs waiting in the queue.
    pub fn pending_jobs(&self) -> usize {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |tx| tx.max_capacity().saturating_sub(tx.capacity()))
    }

    /// Number of worker threads.
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Queue capacity.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl TaskExecutor for WorkerPool {
    fn execute(&self, job: Job) -> Result<(), SubmitError> {
        if self.is_shutdown() {
            return Err(SubmitError::ShutDown);
        }
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(SubmitError::ShutDown);
        };
        tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::QueueFull {
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => SubmitError::ShutDown,
        })
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

fn worker_loop(
    index: usize,
    receiver: &Mutex<mpsc::Receiver<Job>>,
    shutdown: &AtomicBool,
    completed: &AtomicU64,
) {
    debug!(worker = index, "Listener worker started");
    loop {
        let job = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .blocking_recv();
        let Some(job) = job else {
            break;
        };
        if shutdown.load(Ordering::Acquire) {
            // Queued before shutdown; discarded.
            continue;
        }
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(worker = index, "Listener job panicked");
        }
        completed.fetch_add(1, Ordering::AcqRel);
    }
    debug!(worker = index, "Listener worker exiting");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn rejects_zero_sizes() {
        assert!(matches!(
            WorkerPool::start(0, 8),
            Err(ExecutorError::InvalidConcurrency { value: 0 })
        ));
        assert!(matches!(
            WorkerPool::start(1, 0),
            Err(ExecutorError::InvalidCapacity { value: 0 })
        ));
    }

    #[test]
    fn runs_jobs_on_workers() {
        let pool = WorkerPool::start(2, 16).unwrap();
        let (tx, rx) = std_mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            pool.execute(Box::new(move || tx.send(i).unwrap())).unwrap();
        }
        let mut seen: Vec<i32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());

        pool.shutdown_now();
        pool.join();
        assert_eq!(pool.completed_jobs(), 10);
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let pool = WorkerPool::start(1, 1).unwrap();
        let (started_tx, started_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel::<()>();

        // Occupy the only worker.
        pool.execute(Box::new(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Fill the queue, then overflow it.
        pool.execute(Box::new(|| {})).unwrap();
        assert_eq!(
            pool.execute(Box::new(|| {})),
            Err(SubmitError::QueueFull { capacity: 1 })
        );

        release_tx.send(()).unwrap();
        pool.shutdown_now();
        pool.join();
    }

    #[test]
    fn shutdown_rejects_and_discards() {
        let pool = WorkerPool::start(1, 4).unwrap();
        let (started_tx, started_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let ran = Arc::new(AtomicU64::new(0));

        pool.execute(Box::new(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            pool.execute(Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        assert_eq!(pool.pending_jobs(), 3);

        pool.shutdown_now();
        assert!(pool.is_shutdown());
        assert_eq!(pool.execute(Box::new(|| {})), Err(SubmitError::ShutDown));

        release_tx.send(()).unwrap();
        pool.join();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(pool.completed_jobs(), 1);
    }

    #[test]
    fn panicking_job_keeps_worker_alive() {
        let pool = WorkerPool::start(1, 4).unwrap();
        let (tx, rx) = std_mpsc::channel();
        #[allow(clippy::panic)]
        pool.execute(Box::new(|| panic!("boom"))).unwrap();
        pool.execute(Box::new(move || tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pool.shutdown_now();
        pool.join();
    }

    #[test]
    fn inline_executor_runs_immediately() {
        let executor = InlineExecutor::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        executor
            .execute(Box::new(move || flag.store(true, Ordering::SeqCst)))
            .unwrap();
        assert!(ran.load(Ordering::SeqCst));
        executor.shutdown_now();
        assert_eq!(executor.execute(Box::new(|| {})), Err(SubmitError::ShutDown));
    }
}
