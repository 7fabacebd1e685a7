use thread_orchestra::{CallbackBroadcaster, ExitCoordinator, TaskFn, ThreadPoolManager};

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info};

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Primary Marshal Example ---");
  info!("Main thread is {:?}", thread::current().id());

  let exit = Arc::new(ExitCoordinator::new());
  let manager = ThreadPoolManager::<u32>::new(4, "marshal_pool", exit);
  let relay = manager.primary();

  // Anything routed through the wrapper runs on the primary (pump) thread,
  // no matter which worker invokes it.
  let apply_on_primary = Arc::new(relay.wrap(|value: u32| {
    info!(
      "Applying value {} on primary thread {:?}",
      value,
      thread::current().id()
    );
    value * 2
  }));

  for i in 1..=3u32 {
    let apply = apply_on_primary.clone();
    let task_fn: TaskFn<u32> = Box::new(move || {
      info!("Task {} running on worker {:?}", i, thread::current().id());
      thread::sleep(Duration::from_millis(100 * u64::from(i)));
      Ok(i * 10)
    });

    let callbacks = CallbackBroadcaster::new().on_success(move |value: &u32| {
      match (*apply)(*value) {
        Ok(doubled) => info!("Primary thread produced {} from {}", doubled, value),
        Err(e) => error!("Marshaled call failed: {}", e),
      }
    });

    manager.submit(task_fn, callbacks).expect("submit failed");
  }

  thread::sleep(Duration::from_secs(1));

  info!("Shutting down.");
  manager.shutdown(Duration::from_secs(2));
  info!("--- Primary Marshal Example End ---");
}
