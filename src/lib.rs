//! A thread-based pool for running blocking work off a primary thread,
//! with per-submission completion callbacks, primary-thread marshaling and
//! cooperative shutdown.

mod broadcaster;
mod error;
mod exit;
mod manager;
mod primary;
mod task;

pub use broadcaster::{CallbackBroadcaster, ErrorCallback, SuccessCallback};
pub use error::{BoxError, MarshalError, PoolError, TaskError};
pub use exit::ExitCoordinator;
pub use manager::{ThreadPoolManager, DEFAULT_WORKER_COUNT};
pub use primary::PrimaryRelay;
pub use task::TaskFn;
