use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// Boxed error type produced by submitted task functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur on the submission surface of the pool.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
  #[error("Pool is shutting down or already shut down, cannot accept new tasks")]
  PoolShuttingDown,

  #[error("Pool's internal task queue (sender side) was closed unexpectedly")]
  QueueSendChannelClosed,
}

/// The failure value delivered to error subscribers of a task.
///
/// Both failure surfaces of a task function end up here: an `Err` returned
/// by the function itself, and a panic caught at the worker boundary.
#[derive(Error, Debug)]
pub enum TaskError {
  #[error("{0}")]
  Failed(BoxError),

  #[error("Task panicked during execution: {0}")]
  Panicked(String),
}

/// Errors that can occur while marshaling a call onto the primary thread.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MarshalError {
  #[error("Primary pump is shutting down or stopped, call could not be serviced")]
  PumpShuttingDown,

  #[error("Primary thread did not service the call within {0:?}")]
  Timeout(Duration),

  #[error("Marshaled closure panicked on the primary thread: {0}")]
  ClosurePanicked(String),
}

/// Best-effort extraction of a panic payload into something loggable.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&'static str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
