use thread_orchestra::{CallbackBroadcaster, ExitCoordinator, TaskFn, ThreadPoolManager};

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::info;

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Graceful Shutdown Example ---");

  let exit = Arc::new(ExitCoordinator::new());
  let manager = ThreadPoolManager::<&'static str>::new(2, "shutdown_pool", exit);

  // Two tasks get workers immediately, the third stays queued and will be
  // discarded once shutdown closes the queue.
  for (i, delay_ms) in [(1usize, 300u64), (2, 400), (3, 100)] {
    let task_fn: TaskFn<&'static str> = Box::new(move || {
      info!("Task {} running for {}ms", i, delay_ms);
      thread::sleep(Duration::from_millis(delay_ms));
      Ok("done")
    });
    let callbacks = CallbackBroadcaster::new()
      .on_success(move |result: &&'static str| info!("Task {} reported: {}", i, result));
    manager.submit(task_fn, callbacks).expect("submit failed");
  }

  thread::sleep(Duration::from_millis(50));
  info!(
    "Before shutdown: {} active, {} queued",
    manager.active_task_count(),
    manager.queued_task_count()
  );

  // In-flight tasks run to completion within the grace period, but their
  // outcomes are dropped because the exit flag is already set; the queued
  // task never starts.
  info!("Initiating shutdown.");
  manager.shutdown(Duration::from_secs(2));
  info!("Shutdown returned.");

  if manager.submit(Box::new(|| Ok("late")), CallbackBroadcaster::new()).is_err() {
    info!("Submissions after shutdown are rejected, as expected.");
  }

  info!("--- Graceful Shutdown Example End ---");
}
