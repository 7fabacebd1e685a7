use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error, trace};

use crate::error::TaskError;

/// A success subscriber. Receives a shared reference because every
/// subscriber on the list observes the same result value.
pub type SuccessCallback<R> = Box<dyn Fn(&R) + Send + 'static>;

/// An error subscriber.
pub type ErrorCallback = Box<dyn Fn(&TaskError) + Send + 'static>;

/// Ordered success and error subscriber lists for one submission.
///
/// Subscribers are registered before the task is handed to the pool; moving
/// the broadcaster into `submit` is what freezes the lists, so no locking is
/// needed when a worker fires them. Exactly one of the two lists fires per
/// task, in registration order, unless shutdown was requested first, in
/// which case neither does.
///
/// A subscriber that panics is caught and logged; it can never take down a
/// sibling subscriber or the worker thread that fired it.
pub struct CallbackBroadcaster<R> {
  success_callbacks: Vec<SuccessCallback<R>>,
  error_callbacks: Vec<ErrorCallback>,
}

impl<R> Default for CallbackBroadcaster<R> {
  fn default() -> Self {
    Self::new()
  }
}

impl<R> fmt::Debug for CallbackBroadcaster<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CallbackBroadcaster")
      .field("success_callbacks", &self.success_callbacks.len())
      .field("error_callbacks", &self.error_callbacks.len())
      .finish()
  }
}

impl<R> CallbackBroadcaster<R> {
  pub fn new() -> Self {
    Self {
      success_callbacks: Vec::new(),
      error_callbacks: Vec::new(),
    }
  }

  /// Appends a success subscriber. Subscribers fire in registration order.
  pub fn on_success(mut self, callback: impl Fn(&R) + Send + 'static) -> Self {
    self.success_callbacks.push(Box::new(callback));
    self
  }

  /// Appends an error subscriber. Subscribers fire in registration order.
  pub fn on_error(mut self, callback: impl Fn(&TaskError) + Send + 'static) -> Self {
    self.error_callbacks.push(Box::new(callback));
    self
  }

  pub fn success_subscriber_count(&self) -> usize {
    self.success_callbacks.len()
  }

  pub fn error_subscriber_count(&self) -> usize {
    self.error_callbacks.len()
  }

  /// Fires every success subscriber with `value`, in registration order.
  pub fn emit_success(&self, value: &R) {
    if self.success_callbacks.is_empty() {
      trace!("No success subscribers registered, dropping result.");
      return;
    }
    debug!(
      "Dispatching success to {} subscribers.",
      self.success_callbacks.len()
    );
    for callback in &self.success_callbacks {
      if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
        error!("A success subscriber panicked; continuing with remaining subscribers.");
      }
    }
  }

  /// Fires every error subscriber with `err`, in registration order.
  pub fn emit_error(&self, err: &TaskError) {
    if self.error_callbacks.is_empty() {
      trace!("No error subscribers registered, dropping error: {err}");
      return;
    }
    debug!(
      "Dispatching error to {} subscribers.",
      self.error_callbacks.len()
    );
    for callback in &self.error_callbacks {
      if catch_unwind(AssertUnwindSafe(|| callback(err))).is_err() {
        error!("An error subscriber panicked; continuing with remaining subscribers.");
      }
    }
  }
}
