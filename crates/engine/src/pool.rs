//! Fixed-size worker pool.
//!
//! A single `Mutex`-guarded FIFO queue feeds `worker_count` long-lived OS
//! threads. Each worker blocks until the queue is non-empty or the pool is
//! stopping, claims at most one task under the lock, and runs it outside the
//! lock. Workers exit only once the pool is stopping AND the queue is empty,
//! so everything submitted before [`WorkerPool::stop`] completes before `stop`
//! returns.
//!
//! The queue is unbounded: `submit` never blocks on capacity.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::error::PoolError;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    jobs: VecDeque<Job>,
    stopping: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    available: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Jobs never run under this lock, so a poisoned guard still holds a
        // consistent queue.
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    running: AtomicBool,
}

impl WorkerPool {
    /// Start a pool with `worker_count` worker threads.
    pub fn new(worker_count: usize) -> Result<Self, PoolError> {
        if worker_count == 0 {
            return Err(PoolError::InvalidWorkerCount);
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                stopping: false,
            }),
            available: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("switchboard-worker-{id}"))
                .spawn(move || worker_loop(id, &worker_shared));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Release the workers that did start before bailing out.
                    shared.lock().stopping = true;
                    shared.available.notify_all();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Spawn(e));
                }
            }
        }

        info!(workers = worker_count, "Worker pool started");
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            worker_count,
            running: AtomicBool::new(true),
        })
    }

    /// Queue `task` for execution and return a handle to its result.
    ///
    /// Only waits for the queue lock. Fails with [`PoolError::Stopped`] once
    /// [`stop`](Self::stop) has been called; the task is dropped unrun.
    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            // The caller may have dropped its handle.
            let _ = tx.send(task());
        });

        {
            let mut queue = self.shared.lock();
            if queue.stopping {
                return Err(PoolError::Stopped);
            }
            queue.jobs.push_back(job);
        }
        self.shared.available.notify_one();

        Ok(TaskHandle { rx })
    }

    /// Stop accepting work, let the workers drain the queue, and join them.
    ///
    /// Idempotent: later calls return immediately.
    pub fn stop(&self) {
        let pending = {
            let mut queue = self.shared.lock();
            if queue.stopping {
                return;
            }
            queue.stopping = true;
            queue.jobs.len()
        };
        info!(pending, "Stopping worker pool");
        self.shared.available.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        let current = thread::current().id();
        for handle in workers {
            // A task that owns the last reference to the pool ends up here.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Worker pool stopped");
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Tasks queued but not yet claimed by a worker.
    pub fn pending_task_count(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether `submit` would still queue work. Turns false as soon as
    /// [`stop`](Self::stop) begins, before the queue has drained.
    pub fn is_accepting(&self) -> bool {
        !self.shared.lock().stopping
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .field("pending", &self.pending_task_count())
            .field("running", &self.is_running())
            .finish()
    }
}

fn worker_loop(id: usize, shared: &Shared) {
    debug!(worker = id, "Worker started");
    loop {
        let job = {
            let queue = shared.lock();
            let mut queue = shared
                .available
                .wait_while(queue, |q| q.jobs.is_empty() && !q.stopping)
                .unwrap_or_else(|e| e.into_inner());
            match queue.jobs.pop_front() {
                Some(job) => job,
                // stopping and drained
                None => break,
            }
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(
                worker = id,
                reason = %panic_message(payload.as_ref()),
                "Task panicked, worker continues"
            );
        }
    }
    debug!(worker = id, "Worker exited");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ── TaskHandle ──────────────────────────────────────────────────────

/// Eventual result of a submitted task.
///
/// Block on it with [`wait`](Self::wait) from a plain thread, or `.await` it
/// from async code. A task that panicked resolves to
/// [`PoolError::TaskPanicked`].
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block the calling thread until the task finishes.
    ///
    /// Must not be called from inside an async runtime; `.await` the handle
    /// there instead.
    pub fn wait(self) -> Result<T, PoolError> {
        self.rx.blocking_recv().map_err(|_| PoolError::TaskPanicked)
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| PoolError::TaskPanicked))
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").finish_non_exhaustive()
    }
}
