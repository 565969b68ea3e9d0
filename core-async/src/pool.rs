//! Dynamically scaling worker pool.
//!
//! Core workers live until the pool is cancelled or its intake is closed.
//! Transient workers are started when the intake is full and retire after
//! `idle_timeout` without work. The number of running tasks can never exceed
//! the number of live workers, which is capped at `max_workers`.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{PoolError, Result, TaskError};

pub type TaskResult<T> = std::result::Result<T, TaskError>;

type Job<T> = Pin<Box<dyn Future<Output = TaskResult<T>> + Send>>;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Workers started at construction that never retire on idleness
    pub min_workers: usize,
    /// Upper bound on live workers, and therefore on concurrently running tasks
    pub max_workers: usize,
    /// How long a transient worker waits for work before exiting
    pub idle_timeout: Duration,
    /// Tasks that may wait in the intake before submitters block
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 8,
            idle_timeout: Duration::from_secs(30),
            queue_capacity: 64,
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(min_workers: usize, max_workers: usize) -> Self {
        Self {
            min_workers,
            max_workers,
            ..Default::default()
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Core workers actually started: `min_workers` clamped to `1..=max_workers`.
    pub fn core_workers(&self) -> usize {
        self.min_workers.clamp(1, self.max_workers.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(PoolError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(PoolError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerKind {
    Core,
    Transient,
}

enum NextJob<T> {
    Job(Job<T>),
    Idle,
    Closed,
}

/// State shared between the pool handle and its workers.
struct Shared<T> {
    receiver: Mutex<mpsc::Receiver<Job<T>>>,
    results: mpsc::UnboundedSender<TaskResult<T>>,
    live_workers: AtomicUsize,
    running_tasks: AtomicUsize,
    cancel: CancellationToken,
    idle_timeout: Duration,
}

impl<T: Send + 'static> Shared<T> {
    async fn next_job(&self, idle_timeout: Option<Duration>) -> NextJob<T> {
        let receive = async {
            let mut receiver = self.receiver.lock().await;
            if self.cancel.is_cancelled() {
                return drain_one(&mut receiver);
            }
            tokio::select! {
                job = receiver.recv() => {
                    return match job {
                        Some(job) => NextJob::Job(job),
                        None => NextJob::Closed,
                    };
                }
                _ = self.cancel.cancelled() => {}
            }
            drain_one(&mut receiver)
        };

        match idle_timeout {
            Some(timeout) => tokio::time::timeout(timeout, receive)
                .await
                .unwrap_or(NextJob::Idle),
            None => receive.await,
        }
    }

    async fn execute(&self, job: Job<T>) {
        self.running_tasks.fetch_add(1, Ordering::SeqCst);
        let result = job.await;
        self.running_tasks.fetch_sub(1, Ordering::SeqCst);
        // The receiver lives as long as the pool handle.
        let _ = self.results.send(result);
    }
}

fn drain_one<T>(receiver: &mut mpsc::Receiver<Job<T>>) -> NextJob<T> {
    match receiver.try_recv() {
        Ok(job) => NextJob::Job(job),
        Err(_) => NextJob::Closed,
    }
}

async fn run_worker<T: Send + 'static>(shared: Arc<Shared<T>>, kind: WorkerKind) {
    let idle_timeout = match kind {
        WorkerKind::Core => None,
        WorkerKind::Transient => Some(shared.idle_timeout),
    };

    loop {
        match shared.next_job(idle_timeout).await {
            NextJob::Job(job) => shared.execute(job).await,
            NextJob::Idle => {
                debug!("Transient worker idle, retiring");
                break;
            }
            NextJob::Closed => break,
        }
    }

    shared.live_workers.fetch_sub(1, Ordering::SeqCst);
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn lock<V>(mutex: &StdMutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Generic bounded-concurrency executor.
///
/// Results are collected by [`WorkerPool::wait`] in completion order. A task
/// that returns an error or panics only affects its own result.
pub struct WorkerPool<T> {
    config: WorkerPoolConfig,
    shared: Arc<Shared<T>>,
    intake: StdMutex<Option<mpsc::Sender<Job<T>>>>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
    results: StdMutex<mpsc::UnboundedReceiver<TaskResult<T>>>,
    accepted: AtomicUsize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create the pool and start [`WorkerPoolConfig::core_workers`] core workers.
    ///
    /// The pool observes `cancel` but cancelling the pool itself does not
    /// propagate upwards. Must be called from within a tokio runtime.
    pub fn new(config: WorkerPoolConfig, cancel: CancellationToken) -> Result<Self> {
        config.validate()?;

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let pool = Self {
            shared: Arc::new(Shared {
                receiver: Mutex::new(receiver),
                results: results_tx,
                live_workers: AtomicUsize::new(0),
                running_tasks: AtomicUsize::new(0),
                cancel: cancel.child_token(),
                idle_timeout: config.idle_timeout,
            }),
            intake: StdMutex::new(Some(sender)),
            workers: StdMutex::new(Vec::new()),
            results: StdMutex::new(results_rx),
            accepted: AtomicUsize::new(0),
            config,
        };

        for _ in 0..pool.config.core_workers() {
            pool.spawn_worker(WorkerKind::Core);
        }

        debug!(
            core_workers = pool.config.core_workers(),
            max_workers = pool.config.max_workers,
            "Worker pool started"
        );

        Ok(pool)
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Workers currently alive, core and transient.
    pub fn live_workers(&self) -> usize {
        self.shared.live_workers.load(Ordering::SeqCst)
    }

    /// Tasks executing right now.
    pub fn running_tasks(&self) -> usize {
        self.shared.running_tasks.load(Ordering::SeqCst)
    }

    /// Tasks accepted into the intake so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Stop accepting work. Tasks already queued still run.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Enqueue a task.
    ///
    /// Silently drops the task when the pool is cancelled or already waiting.
    /// Blocks while both the intake and the worker limit are exhausted.
    pub async fn submit<F, Fut>(&self, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if self.shared.cancel.is_cancelled() {
            debug!("Worker pool cancelled, dropping task");
            return;
        }

        let Some(sender) = lock(&self.intake).clone() else {
            debug!("Worker pool intake closed, dropping task");
            return;
        };

        let job: Job<T> = Box::pin(
            AssertUnwindSafe(async move { task().await })
                .catch_unwind()
                .map(|outcome| match outcome {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(error)) => Err(TaskError::Failed(error)),
                    Err(payload) => Err(TaskError::Panicked(panic_message(payload))),
                }),
        );

        match sender.try_send(job) {
            Ok(()) => {
                if self.live_workers() == 0 {
                    self.spawn_worker(WorkerKind::Transient);
                }
            }
            Err(TrySendError::Full(job)) => {
                self.spawn_worker(WorkerKind::Transient);
                tokio::select! {
                    biased;
                    _ = self.shared.cancel.cancelled() => {
                        debug!("Worker pool cancelled while task was waiting for capacity");
                        return;
                    }
                    sent = sender.send(job) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(TrySendError::Closed(_)) => return,
        }

        self.accepted.fetch_add(1, Ordering::SeqCst);
    }

    /// Close the intake, wait for every accepted task and return all results.
    pub async fn wait(&self) -> Vec<TaskResult<T>> {
        lock(&self.intake).take();

        loop {
            let handles = std::mem::take(&mut *lock(&self.workers));

            if handles.is_empty() {
                // Every worker retired; pick up anything that slipped in behind them.
                let leftover = !self.shared.receiver.lock().await.is_empty();
                if leftover && self.spawn_worker(WorkerKind::Core) {
                    continue;
                }
                break;
            }

            for handle in handles {
                if let Err(error) = handle.await {
                    warn!(error = %error, "Worker terminated abnormally");
                }
            }
        }

        let mut receiver = lock(&self.results);
        let mut results = Vec::with_capacity(self.accepted());
        while let Ok(result) = receiver.try_recv() {
            results.push(result);
        }

        debug!(results = results.len(), "Worker pool drained");
        results
    }

    /// Reserve a worker slot and start a worker. Returns false at capacity.
    fn spawn_worker(&self, kind: WorkerKind) -> bool {
        let reserved = self.shared.live_workers.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |live| (live < self.config.max_workers).then_some(live + 1),
        );
        if reserved.is_err() {
            return false;
        }

        let handle = tokio::spawn(run_worker(Arc::clone(&self.shared), kind));
        lock(&self.workers).push(handle);

        if kind == WorkerKind::Transient {
            debug!(live_workers = self.live_workers(), "Started transient worker");
        }
        true
    }
}
