use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::broadcaster::CallbackBroadcaster;
use crate::error::{panic_message, PoolError, TaskError};
use crate::exit::{join_with_grace, ExitCoordinator};
use crate::primary::PrimaryRelay;
use crate::task::{ManagedTask, TaskFn};

lazy_static::lazy_static! {
  static ref NEXT_POOL_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Worker count used by [`ThreadPoolManager::with_default_workers`], sized
/// for I/O-bound work such as network lookups.
pub const DEFAULT_WORKER_COUNT: usize = 8;

/// A fixed-size pool of OS threads that runs submitted functions in the
/// background and reports each outcome through the submission's
/// [`CallbackBroadcaster`].
///
/// The manager also owns the [`PrimaryRelay`] and the process shutdown
/// sequence, so it is the one object the rest of an application needs to
/// hold. The [`ExitCoordinator`] is injected at construction: every worker
/// polls it before and after running a task, and once it is set, finished
/// outcomes are dropped silently instead of reaching their subscribers:
/// callbacks must never touch a primary context that may already be torn
/// down.
pub struct ThreadPoolManager<R: Send + 'static> {
  pool_name: Arc<String>,
  worker_count: usize,
  task_queue_tx: Mutex<Option<Sender<ManagedTask<R>>>>,
  worker_handles: Mutex<Vec<JoinHandle<()>>>,
  active_count: Arc<AtomicUsize>,
  exit: Arc<ExitCoordinator>,
  primary: Arc<PrimaryRelay>,
}

impl<R: Send + 'static> ThreadPoolManager<R> {
  pub fn new(worker_count: usize, pool_name: &str, exit: Arc<ExitCoordinator>) -> Arc<Self> {
    let worker_count = worker_count.max(1);
    let (tx, rx) = unbounded::<ManagedTask<R>>();
    let pool_name_arc = Arc::new(pool_name.to_string());
    let active_count = Arc::new(AtomicUsize::new(0));
    let primary = PrimaryRelay::new(pool_name, Arc::clone(&exit));

    let mut worker_handles = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
      let worker_rx = rx.clone();
      let worker_pool_name = Arc::clone(&pool_name_arc);
      let worker_exit = Arc::clone(&exit);
      let worker_active_count = Arc::clone(&active_count);

      let handle = thread::Builder::new()
        .name(format!("{}-worker-{}", pool_name, worker_id))
        .spawn(move || {
          Self::run_worker_loop(
            worker_id,
            worker_pool_name,
            worker_rx,
            worker_exit,
            worker_active_count,
          )
        })
        .expect("failed to spawn pool worker thread");
      worker_handles.push(handle);
    }

    info!(pool_name = %pool_name_arc, workers = worker_count, "Thread pool started.");

    Arc::new(Self {
      pool_name: pool_name_arc,
      worker_count,
      task_queue_tx: Mutex::new(Some(tx)),
      worker_handles: Mutex::new(worker_handles),
      active_count,
      exit,
      primary,
    })
  }

  /// Creates a pool with [`DEFAULT_WORKER_COUNT`] workers.
  pub fn with_default_workers(pool_name: &str, exit: Arc<ExitCoordinator>) -> Arc<Self> {
    Self::new(DEFAULT_WORKER_COUNT, pool_name, exit)
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn worker_count(&self) -> usize {
    self.worker_count
  }

  /// Number of tasks currently executing on worker threads.
  pub fn active_task_count(&self) -> usize {
    self.active_count.load(AtomicOrdering::Relaxed)
  }

  /// Number of tasks in the pending queue.
  pub fn queued_task_count(&self) -> usize {
    self.task_queue_tx.lock().as_ref().map_or(0, |tx| tx.len())
  }

  /// The relay for marshaling calls onto the primary thread.
  pub fn primary(&self) -> Arc<PrimaryRelay> {
    Arc::clone(&self.primary)
  }

  /// Enqueues `task_fn` for background execution and returns immediately;
  /// the submitting thread is never blocked. The outcome is delivered
  /// through `callbacks` on the worker thread that ran the task.
  pub fn submit(
    &self,
    task_fn: TaskFn<R>,
    callbacks: CallbackBroadcaster<R>,
  ) -> Result<(), PoolError> {
    if self.exit.is_exiting() {
      warn!(pool_name = %self.pool_name, "Submit: Attempted to submit task to a pool that is shutting down.");
      return Err(PoolError::PoolShuttingDown);
    }

    let task_id = NEXT_POOL_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let task = ManagedTask {
      task_id,
      task_fn,
      broadcaster: callbacks,
    };

    let guard = self.task_queue_tx.lock();
    match guard.as_ref() {
      Some(tx) => match tx.send(task) {
        Ok(()) => {
          debug!(pool_name = %self.pool_name, %task_id, "Submitted task to queue.");
          Ok(())
        }
        Err(_) => {
          error!(pool_name = %self.pool_name, %task_id, "Submit: Task queue disconnected with workers gone.");
          Err(PoolError::QueueSendChannelClosed)
        }
      },
      None => {
        warn!(pool_name = %self.pool_name, %task_id, "Submit: Task queue already closed by shutdown.");
        Err(PoolError::PoolShuttingDown)
      }
    }
  }

  /// Stops the pool and the primary pump.
  ///
  /// Sets the exit flag, closes the submission queue, waits up to `grace`
  /// for in-flight workers, then stops and joins the pump with the same
  /// bound. Workers or pump still running after their grace period are
  /// detached with a warning, never a failure. Safe to call more than once;
  /// later calls return quickly.
  pub fn shutdown(&self, grace: Duration) {
    if self.exit.request_exit() {
      info!(pool_name = %self.pool_name, "Initiating pool shutdown.");
    } else {
      info!(pool_name = %self.pool_name, "Shutdown already in progress or completed.");
    }

    // Dropping the only sender disconnects the queue: idle workers wake up
    // and drain out, queued tasks are discarded by the exit-flag check.
    self.task_queue_tx.lock().take();

    let handles: Vec<JoinHandle<()>> = {
      let mut guard = self.worker_handles.lock();
      guard.drain(..).collect()
    };
    if !handles.is_empty() {
      info!(
        pool_name = %self.pool_name,
        "Waiting up to {:?} for {} worker(s) to finish.",
        grace,
        handles.len()
      );
      let deadline = Instant::now() + grace;
      let worker_label = format!("{}-worker", self.pool_name);
      for handle in handles {
        let remaining = deadline.saturating_duration_since(Instant::now());
        join_with_grace(handle, remaining, &worker_label);
      }
    }

    self.primary.shutdown(grace);
    info!(pool_name = %self.pool_name, "Pool shutdown sequence finished.");
  }

  fn run_worker_loop(
    worker_id: usize,
    pool_name: Arc<String>,
    task_queue_rx: Receiver<ManagedTask<R>>,
    exit: Arc<ExitCoordinator>,
    active_count: Arc<AtomicUsize>,
  ) {
    info!(pool_name = %pool_name, worker = worker_id, "Worker started.");

    while let Ok(task) = task_queue_rx.recv() {
      let ManagedTask {
        task_id,
        task_fn,
        broadcaster,
      } = task;

      if exit.is_exiting() {
        debug!(pool_name = %pool_name, worker = worker_id, %task_id, "Exit requested before task ran. Discarding task.");
        continue;
      }

      trace!(pool_name = %pool_name, worker = worker_id, %task_id, "Dequeued task.");
      active_count.fetch_add(1, AtomicOrdering::Relaxed);
      let outcome = catch_unwind(AssertUnwindSafe(task_fn));
      active_count.fetch_sub(1, AtomicOrdering::Relaxed);

      if exit.is_exiting() {
        debug!(pool_name = %pool_name, worker = worker_id, %task_id, "Exit requested while task ran. Discarding outcome.");
        continue;
      }

      match outcome {
        Ok(Ok(value)) => {
          trace!(pool_name = %pool_name, worker = worker_id, %task_id, "Task executed successfully.");
          broadcaster.emit_success(&value);
        }
        Ok(Err(source)) => {
          debug!(pool_name = %pool_name, worker = worker_id, %task_id, "Task returned an error: {source}");
          broadcaster.emit_error(&TaskError::Failed(source));
        }
        Err(payload) => {
          error!(pool_name = %pool_name, worker = worker_id, %task_id, "Task panicked during execution.");
          broadcaster.emit_error(&TaskError::Panicked(panic_message(payload)));
        }
      }
    }

    info!(pool_name = %pool_name, worker = worker_id, "Worker stopped.");
  }
}

impl<R: Send + 'static> Drop for ThreadPoolManager<R> {
  fn drop(&mut self) {
    // Signal only, never join: drop must not block on in-flight work. The
    // pump notices the exit flag within one poll interval, and the relay's
    // own Drop nudges it with a sentinel.
    if self.exit.request_exit() {
      info!(
        pool_name = %self.pool_name,
        "ThreadPoolManager dropped without explicit shutdown. Signaling exit and closing queue."
      );
      self.task_queue_tx.lock().take();
    } else {
      trace!(pool_name = %self.pool_name, "Drop: shutdown already initiated, nothing to signal.");
    }
  }
}
