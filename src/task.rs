use crate::broadcaster::CallbackBroadcaster;
use crate::error::BoxError;

/// The type of function that the pool executes.
///
/// Arguments are pre-bound at submission time by closure capture; the pool
/// only ever sees a zero-argument unit of work.
pub type TaskFn<R> = Box<dyn FnOnce() -> Result<R, BoxError> + Send + 'static>;

/// Internal representation of a task managed by the pool.
pub(crate) struct ManagedTask<R: Send + 'static> {
  pub(crate) task_id: u64,
  pub(crate) task_fn: TaskFn<R>,
  pub(crate) broadcaster: CallbackBroadcaster<R>,
}
