use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::error::{panic_message, MarshalError};
use crate::exit::{join_with_grace, ExitCoordinator};

/// How long the pump blocks on an empty queue before re-checking the exit
/// flag. Bounds how stale a shutdown observation can be.
const PUMP_POLL_INTERVAL: Duration = Duration::from_millis(100);

type PumpJob = Box<dyn FnOnce() + Send + 'static>;

enum PumpMessage {
  Run(PumpJob),
  Shutdown,
}

/// Marshals closures onto the primary thread and blocks the caller until
/// they have run there.
///
/// The relay spawns a dedicated pump thread at construction and that thread
/// *is* the primary context: closures handed to [`call`](Self::call) from
/// any other thread execute on it, in FIFO order, one at a time. A call made
/// from the pump thread itself runs inline with no queueing, so primary-side
/// code can use the same wrapper it hands to workers without deadlocking.
///
/// `call` waits indefinitely for the pump; if the pump has stopped it fails
/// fast instead of blocking forever. [`call_timeout`](Self::call_timeout) is
/// the bounded alternative for callers that cannot tolerate an unresponsive
/// primary thread at the cost of possibly abandoning a closure that is still
/// going to run.
pub struct PrimaryRelay {
  name: Arc<String>,
  primary_id: ThreadId,
  queue_tx: Sender<PumpMessage>,
  pump_handle: Mutex<Option<JoinHandle<()>>>,
  exit: Arc<ExitCoordinator>,
}

impl PrimaryRelay {
  pub fn new(name: &str, exit: Arc<ExitCoordinator>) -> Arc<Self> {
    let (tx, rx) = unbounded::<PumpMessage>();
    let relay_name = Arc::new(name.to_string());

    let pump_name = Arc::clone(&relay_name);
    let pump_exit = Arc::clone(&exit);
    let handle = thread::Builder::new()
      .name(format!("{}-pump", name))
      .spawn(move || Self::run_pump_loop(pump_name, rx, pump_exit))
      .expect("failed to spawn primary pump thread");

    let primary_id = handle.thread().id();

    Arc::new(Self {
      name: relay_name,
      primary_id,
      queue_tx: tx,
      pump_handle: Mutex::new(Some(handle)),
      exit,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Whether the calling thread is the primary context.
  pub fn is_primary_thread(&self) -> bool {
    thread::current().id() == self.primary_id
  }

  /// Number of closures waiting to be serviced by the pump.
  pub fn queued_call_count(&self) -> usize {
    self.queue_tx.len()
  }

  /// Whether the pump thread is still servicing calls.
  pub fn is_running(&self) -> bool {
    self
      .pump_handle
      .lock()
      .as_ref()
      .map_or(false, |handle| !handle.is_finished())
  }

  /// Runs `f` on the primary thread and blocks until it has produced a
  /// result, which is returned as if the call had been local.
  ///
  /// On the primary thread itself `f` runs inline, nothing is enqueued. A
  /// panic inside `f` is captured on the primary side and surfaces here as
  /// [`MarshalError::ClosurePanicked`]; the pump itself never dies from it.
  pub fn call<R, F>(&self, f: F) -> Result<R, MarshalError>
  where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
  {
    if self.is_primary_thread() {
      return Self::run_inline(f);
    }
    let result_rx = self.enqueue_call(f)?;
    match result_rx.recv() {
      Ok(outcome) => outcome,
      Err(_) => Err(MarshalError::PumpShuttingDown),
    }
  }

  /// Like [`call`](Self::call), but gives up after `timeout`.
  ///
  /// On expiry the closure may still run later on the primary thread; its
  /// result is then discarded.
  pub fn call_timeout<R, F>(&self, f: F, timeout: Duration) -> Result<R, MarshalError>
  where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
  {
    if self.is_primary_thread() {
      return Self::run_inline(f);
    }
    let result_rx = self.enqueue_call(f)?;
    match result_rx.recv_timeout(timeout) {
      Ok(outcome) => outcome,
      Err(RecvTimeoutError::Timeout) => {
        warn!(
          relay = %self.name,
          "Primary thread did not service a marshaled call within {:?}.", timeout
        );
        Err(MarshalError::Timeout(timeout))
      }
      Err(RecvTimeoutError::Disconnected) => Err(MarshalError::PumpShuttingDown),
    }
  }

  /// Enqueues `f` for the primary thread without waiting for it to run.
  ///
  /// Panics inside a posted closure are caught and logged by the pump.
  /// During shutdown the closure is silently dropped.
  pub fn post<F>(&self, f: F)
  where
    F: FnOnce() + Send + 'static,
  {
    if self.is_primary_thread() {
      if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(relay = %self.name, "A posted closure panicked on the primary thread.");
      }
      return;
    }
    if self.exit.is_exiting() {
      trace!(relay = %self.name, "Dropping posted closure, shutdown in progress.");
      return;
    }
    let relay_name = Arc::clone(&self.name);
    let job: PumpJob = Box::new(move || {
      if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(relay = %relay_name, "A posted closure panicked on the primary thread.");
      }
    });
    if self.queue_tx.send(PumpMessage::Run(job)).is_err() {
      trace!(relay = %self.name, "Dropping posted closure, pump is gone.");
    }
  }

  /// Wraps `f` into a callable that behaves like a local synchronous call
  /// from any thread: invoked off the primary thread it marshals through the
  /// queue and blocks for the result, invoked on it it runs inline.
  pub fn wrap<A, R, F>(self: Arc<Self>, f: F) -> impl Fn(A) -> Result<R, MarshalError>
  where
    A: Send + 'static,
    R: Send + 'static,
    F: Fn(A) -> R + Send + Sync + 'static,
  {
    let relay = self;
    let f = Arc::new(f);
    move |arg: A| {
      let f = Arc::clone(&f);
      relay.call(move || f(arg))
    }
  }

  /// Stops the pump: sends the shutdown sentinel, then joins the pump thread
  /// up to `grace`, logging (not failing) on overrun. Idempotent.
  pub fn shutdown(&self, grace: Duration) {
    if self.queue_tx.send(PumpMessage::Shutdown).is_err() {
      trace!(relay = %self.name, "Pump already gone, no sentinel needed.");
    }
    let handle = self.pump_handle.lock().take();
    if let Some(handle) = handle {
      info!(relay = %self.name, "Waiting for primary pump to stop.");
      if join_with_grace(handle, grace, "primary-pump") {
        debug!(relay = %self.name, "Primary pump joined.");
      }
    } else {
      trace!(relay = %self.name, "Pump handle already taken by an earlier shutdown.");
    }
  }

  fn run_inline<R, F>(f: F) -> Result<R, MarshalError>
  where
    F: FnOnce() -> R,
  {
    catch_unwind(AssertUnwindSafe(f))
      .map_err(|payload| MarshalError::ClosurePanicked(panic_message(payload)))
  }

  fn enqueue_call<R, F>(&self, f: F) -> Result<Receiver<Result<R, MarshalError>>, MarshalError>
  where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
  {
    if self.exit.is_exiting() {
      return Err(MarshalError::PumpShuttingDown);
    }

    let (result_tx, result_rx) = bounded::<Result<R, MarshalError>>(1);
    let job: PumpJob = Box::new(move || {
      let outcome = catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| MarshalError::ClosurePanicked(panic_message(payload)));
      if result_tx.send(outcome).is_err() {
        trace!("Caller abandoned a marshaled call before its result was ready.");
      }
    });

    match self.queue_tx.send(PumpMessage::Run(job)) {
      Ok(()) => Ok(result_rx),
      Err(_) => Err(MarshalError::PumpShuttingDown),
    }
  }

  fn run_pump_loop(name: Arc<String>, queue_rx: Receiver<PumpMessage>, exit: Arc<ExitCoordinator>) {
    info!(relay = %name, "Primary pump started.");

    loop {
      if exit.is_exiting() {
        info!(relay = %name, "Exit requested. Primary pump terminating.");
        break;
      }

      match queue_rx.recv_timeout(PUMP_POLL_INTERVAL) {
        Ok(PumpMessage::Run(job)) => {
          trace!(relay = %name, "Servicing a marshaled call.");
          job();
        }
        Ok(PumpMessage::Shutdown) => {
          info!(relay = %name, "Shutdown sentinel received. Primary pump terminating.");
          break;
        }
        Err(RecvTimeoutError::Timeout) => continue,
        Err(RecvTimeoutError::Disconnected) => {
          info!(relay = %name, "Queue senders gone. Primary pump terminating.");
          break;
        }
      }
    }

    info!(
      relay = %name,
      "Primary pump stopped. Calls left unserviced: {}.",
      queue_rx.len()
    );
  }
}

impl Drop for PrimaryRelay {
  fn drop(&mut self) {
    // Non-blocking: nudge the pump so its thread does not linger after the
    // last relay handle is gone. An explicit shutdown() has already taken
    // the join handle and sent the sentinel itself.
    if self.pump_handle.lock().is_some() {
      debug!(relay = %self.name, "Relay dropped without explicit shutdown, stopping pump.");
      let _ = self.queue_tx.send(PumpMessage::Shutdown);
    }
  }
}
