use thread_orchestra::{CallbackBroadcaster, ExitCoordinator, TaskError, TaskFn, ThreadPoolManager};

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::info;

fn lookup(id: usize, delay_ms: u64) -> String {
  info!("Task {} starting, will block for {}ms", id, delay_ms);
  thread::sleep(Duration::from_millis(delay_ms));
  format!("Task {} finished successfully after {}ms", id, delay_ms)
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let exit = Arc::new(ExitCoordinator::new());
  let manager = ThreadPoolManager::<String>::new(2, "basic_pool", exit);

  for i in 0..5 {
    // Alternate delays for variety
    let delay_ms: u64 = 200 + (i as u64 % 3 * 100);
    let task_fn: TaskFn<String> = Box::new(move || Ok(lookup(i, delay_ms)));

    let callbacks = CallbackBroadcaster::new()
      .on_success(move |result: &String| info!("Callback for task {}: {}", i, result))
      .on_error(move |err: &TaskError| tracing::error!("Error for task {}: {}", i, err));

    match manager.submit(task_fn, callbacks) {
      Ok(()) => info!("Submitted task {}", i),
      Err(e) => tracing::error!("Failed to submit task {}: {:?}", i, e),
    }
  }

  info!("All tasks submitted. Callbacks will fire on worker threads.");
  thread::sleep(Duration::from_secs(2));

  info!("Shutting down pool.");
  manager.shutdown(Duration::from_secs(2));
  info!("Pool shutdown complete.");
  info!("--- Basic Usage Example End ---");
}
