//! Session runner: a blocking facade over a single-threaded async worker.
//!
//! Each runner owns one background thread that drives a current-thread tokio
//! runtime inside a [`LocalSet`]. Operations are submitted as closures that
//! build a future on the worker, so the futures themselves never cross threads.
//!
//! ## Guarantees
//!
//! - At most one submitted operation runs at a time; operations run in
//!   submission order.
//! - `submit` blocks the caller for at most its timeout (plus scheduling noise).
//! - When the caller's timeout passes, the operation's [`CancelToken`] fires and
//!   the worker drops the operation at its next await point. Operations still in
//!   the queue are skipped once cancelled.
//! - The job queue is bounded by [`RunnerConfig::queue_depth`]; `submit` fails
//!   with [`RunnerError::QueueFull`] instead of growing it.
//!
//! Background tasks spawned with `tokio::task::spawn_local` from inside an
//! operation (notification pumps) keep running between operations, whenever the
//! worker is idle or awaiting.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::LocalSet;
use tracing::{debug, error, trace, warn};

use crate::config::RunnerConfig;
use crate::error::RunnerError;

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag shared between a caller and a worker-side operation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        CancelToken { flag: Arc::new(flag) }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives in `self`, so `wait_for` can only return once the flag is set.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Runner
// ============================================================================

type LocalJob = Pin<Box<dyn Future<Output = ()>>>;

/// Work item sent to the worker: builds its future on the worker thread.
type Job = Box<dyn FnOnce() -> LocalJob + Send>;

struct Worker {
    thread: JoinHandle<()>,
    exited: Receiver<()>,
}

/// A dedicated background worker that executes async operations for one device.
pub struct SessionRunner {
    name: String,
    jobs: mpsc::Sender<Job>,
    queue_depth: usize,
    shutdown: CancelToken,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
    join_timeout: Duration,
}

impl SessionRunner {
    /// Spawn the worker and block until it is ready.
    ///
    /// Fails with [`RunnerError::Startup`] if the worker does not report ready
    /// within `config.startup_timeout`.
    pub fn start(config: &RunnerConfig) -> Result<Self, RunnerError> {
        let queue_depth = config.queue_depth.max(1);
        let (job_tx, job_rx) = mpsc::channel::<Job>(queue_depth);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let (exit_tx, exit_rx) = crossbeam_channel::bounded::<()>(1);
        let shutdown = CancelToken::new();
        let running = Arc::new(AtomicBool::new(false));

        let thread = thread::Builder::new()
            .name(format!("session-{}", config.name))
            .spawn({
                let shutdown = shutdown.clone();
                let running = running.clone();
                move || {
                    worker_main(job_rx, shutdown, running, ready_tx);
                    let _ = exit_tx.send(());
                }
            })
            .map_err(|e| RunnerError::Startup(e.to_string()))?;

        match ready_rx.recv_timeout(config.startup_timeout) {
            Ok(Ok(())) => {}
            Ok(Err(msg)) => return Err(RunnerError::Startup(msg)),
            Err(_) => {
                shutdown.cancel();
                return Err(RunnerError::Startup(format!(
                    "worker not ready after {:?}",
                    config.startup_timeout
                )));
            }
        }

        debug!(runner = %config.name, "session worker started");

        Ok(SessionRunner {
            name: config.name.clone(),
            jobs: job_tx,
            queue_depth,
            shutdown,
            running,
            worker: Mutex::new(Some(Worker {
                thread,
                exited: exit_rx,
            })),
            join_timeout: config.join_timeout,
        })
    }

    /// Get the runner name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the worker is accepting operations.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    /// Run `op` on the worker and block until it finishes or `timeout` passes.
    ///
    /// `op` is called on the worker thread with the operation's cancel token; the
    /// future it returns does not need to be `Send`.
    pub fn submit<F, Fut, R>(&self, timeout: Duration, op: F) -> Result<R, RunnerError>
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = R> + 'static,
        R: Send + 'static,
    {
        if !self.is_running() {
            return Err(RunnerError::NotRunning);
        }

        let (reply_tx, reply_rx) = crossbeam_channel::bounded::<R>(1);
        let cancel = CancelToken::new();
        let token = cancel.clone();

        let job: Job = Box::new(move || {
            Box::pin(async move {
                if token.is_cancelled() {
                    trace!("skipping operation cancelled while queued");
                    return;
                }
                let work = op(token.clone());
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {}
                    out = work => {
                        let _ = reply_tx.send(out);
                    }
                }
            })
        });

        self.jobs.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RunnerError::QueueFull(self.queue_depth),
            mpsc::error::TrySendError::Closed(_) => RunnerError::NotRunning,
        })?;

        wait_for_reply(&reply_rx, &cancel, timeout, &self.name).map_err(|e| match e {
            RunnerError::Cancelled if !self.is_running() => RunnerError::NotRunning,
            other => other,
        })
    }

    /// Stop the worker and join its thread within the configured grace period.
    ///
    /// The running operation (if any) is dropped at its next await point and
    /// queued operations are discarded. Idempotent.
    pub fn terminate(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        self.shutdown.cancel();

        match worker.exited.recv_timeout(self.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.thread.join().is_err() {
                    error!(runner = %self.name, "session worker panicked");
                } else {
                    debug!(runner = %self.name, "session worker stopped");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    runner = %self.name,
                    grace = ?self.join_timeout,
                    "session worker did not stop in time; detaching"
                );
            }
        }
    }
}

impl Drop for SessionRunner {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl std::fmt::Debug for SessionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRunner")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("queue_depth", &self.queue_depth)
            .finish()
    }
}

fn wait_for_reply<R>(
    reply_rx: &Receiver<R>,
    cancel: &CancelToken,
    timeout: Duration,
    runner: &str,
) -> Result<R, RunnerError> {
    match reply_rx.recv_timeout(timeout) {
        Ok(out) => Ok(out),
        Err(RecvTimeoutError::Timeout) => {
            cancel.cancel();
            warn!(runner, ?timeout, "operation timed out; cancelling on worker");
            Err(RunnerError::Timeout(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => Err(RunnerError::Cancelled),
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Entry point of the worker thread.
fn worker_main(
    jobs: mpsc::Receiver<Job>,
    shutdown: CancelToken,
    running: Arc<AtomicBool>,
    ready_tx: Sender<Result<(), String>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }
    };

    let local = LocalSet::new();
    local.block_on(&runtime, async move {
        running.store(true, Ordering::SeqCst);
        let _ = ready_tx.send(Ok(()));
        worker_loop(jobs, &shutdown).await;
        running.store(false, Ordering::SeqCst);
    });
}

/// Pull jobs one at a time until shutdown or until every sender is gone.
async fn worker_loop(mut jobs: mpsc::Receiver<Job>, shutdown: &CancelToken) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = job() => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
