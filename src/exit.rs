use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{error, warn};

/// Process-wide cooperative cancellation flag.
///
/// The flag is monotonic: once set it is never cleared. It is also
/// advisory: a worker already inside a long-running function is not
/// interrupted, it is merely prevented from reporting its outcome once it
/// finishes. Construct one per dispatch core and hand a clone of the `Arc`
/// to every component so the core stays testable in isolation.
#[derive(Debug, Default)]
pub struct ExitCoordinator {
  exiting: AtomicBool,
}

impl ExitCoordinator {
  pub fn new() -> Self {
    Self {
      exiting: AtomicBool::new(false),
    }
  }

  /// Sets the exit flag. Idempotent; returns `true` only for the call that
  /// performed the transition.
  pub fn request_exit(&self) -> bool {
    !self.exiting.swap(true, AtomicOrdering::AcqRel)
  }

  /// Cheap lock-free read, safe to poll from hot worker loops.
  pub fn is_exiting(&self) -> bool {
    self.exiting.load(AtomicOrdering::Acquire)
  }
}

/// Joins a thread, giving up after `grace` and detaching it.
///
/// Returns `true` if the thread was joined. An overrun is logged as a
/// warning, never escalated, since the process is already on its way out
/// when this runs.
pub(crate) fn join_with_grace(handle: JoinHandle<()>, grace: Duration, what: &str) -> bool {
  let deadline = Instant::now() + grace;
  while !handle.is_finished() {
    if Instant::now() >= deadline {
      warn!(thread = what, "Thread did not stop within {:?}, detaching it.", grace);
      return false;
    }
    std::thread::sleep(Duration::from_millis(5));
  }
  if handle.join().is_err() {
    error!(thread = what, "Thread had panicked before it could be joined.");
  }
  true
}
