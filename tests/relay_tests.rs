use thread_orchestra::{ExitCoordinator, MarshalError, PrimaryRelay};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use parking_lot::Mutex;

// Helper to initialize tracing for tests (call once per test run, not per test function)
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter =
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,thread_orchestra=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

#[test]
fn test_call_runs_on_primary_thread_and_returns_value() {
  setup_tracing_for_test();
  let relay_name = "test_relay_basic_call";
  tracing::info!("Starting test: {}", relay_name);

  let exit = Arc::new(ExitCoordinator::new());
  let relay = PrimaryRelay::new(relay_name, exit);

  let caller_id = thread::current().id();
  let (primary_id, value) = relay.call(move || (thread::current().id(), 42)).unwrap();

  assert_eq!(value, 42);
  assert_ne!(
    primary_id, caller_id,
    "The closure must run on the pump thread, not the caller."
  );

  relay.shutdown(Duration::from_secs(1));
  tracing::info!("Finished test: {}", relay_name);
}

#[test]
fn test_call_from_primary_thread_runs_inline_without_enqueueing() {
  setup_tracing_for_test();
  let relay_name = "test_relay_inline_call";
  tracing::info!("Starting test: {}", relay_name);

  let exit = Arc::new(ExitCoordinator::new());
  let relay = PrimaryRelay::new(relay_name, exit);

  let inner_relay = relay.clone();
  let observed = relay
    .call_timeout(
      move || {
        // We are on the pump thread now; a nested call must not go through
        // the queue (it would deadlock the single pump if it did).
        let on_primary = inner_relay.is_primary_thread();
        let queued_before = inner_relay.queued_call_count();
        let inner = inner_relay.call(|| 7).unwrap();
        (on_primary, queued_before, inner_relay.queued_call_count(), inner)
      },
      Duration::from_secs(2),
    )
    .unwrap();

  assert_eq!(
    observed,
    (true, 0, 0, 7),
    "Nested call from the primary thread must run inline with queue length 0."
  );

  relay.shutdown(Duration::from_secs(1));
  tracing::info!("Finished test: {}", relay_name);
}

#[test]
fn test_wrapped_probe_reports_primary_id_from_any_thread() {
  setup_tracing_for_test();
  let relay_name = "test_relay_wrap_identity";
  tracing::info!("Starting test: {}", relay_name);

  let exit = Arc::new(ExitCoordinator::new());
  let relay = PrimaryRelay::new(relay_name, exit);

  let probe = Arc::new(relay.clone().wrap(|_: ()| thread::current().id()));

  let mut joins = Vec::new();
  for _ in 0..2 {
    let probe = probe.clone();
    joins.push(thread::spawn(move || {
      let my_id = thread::current().id();
      let seen_id = (*probe)(()).unwrap();
      (my_id, seen_id)
    }));
  }

  let results: Vec<_> = joins.into_iter().map(|j| j.join().unwrap()).collect();
  assert_eq!(
    results[0].1, results[1].1,
    "Both callers must observe the same primary thread id."
  );
  for (my_id, seen_id) in results {
    assert_ne!(my_id, seen_id, "A caller must not observe its own thread id.");
  }

  relay.shutdown(Duration::from_secs(1));
  tracing::info!("Finished test: {}", relay_name);
}

#[test]
fn test_concurrent_calls_have_no_crosstalk() {
  setup_tracing_for_test();
  let relay_name = "test_relay_no_crosstalk";
  tracing::info!("Starting test: {}", relay_name);

  let exit = Arc::new(ExitCoordinator::new());
  let relay = PrimaryRelay::new(relay_name, exit);
  let executed = Arc::new(AtomicUsize::new(0));

  let mut joins = Vec::new();
  for i in 0..8usize {
    let relay = relay.clone();
    let executed = executed.clone();
    joins.push(thread::spawn(move || {
      let got = relay
        .call(move || {
          executed.fetch_add(1, Ordering::SeqCst);
          i * 10
        })
        .unwrap();
      (i, got)
    }));
  }

  for join in joins {
    let (i, got) = join.join().unwrap();
    assert_eq!(got, i * 10, "Each caller must receive precisely its own result.");
  }
  assert_eq!(
    executed.load(Ordering::SeqCst),
    8,
    "The pump must execute exactly one closure per caller."
  );

  relay.shutdown(Duration::from_secs(1));
  tracing::info!("Finished test: {}", relay_name);
}

#[test]
fn test_call_timeout_expires_while_pump_is_busy() {
  setup_tracing_for_test();
  let relay_name = "test_relay_call_timeout";
  tracing::info!("Starting test: {}", relay_name);

  let exit = Arc::new(ExitCoordinator::new());
  let relay = PrimaryRelay::new(relay_name, exit);

  let (block_tx, block_rx) = bounded::<()>(1);
  relay.post(move || {
    let _ = block_rx.recv_timeout(Duration::from_secs(2));
  });

  // Let the pump pick the blocker up before timing a call against it.
  thread::sleep(Duration::from_millis(100));
  let timeout = Duration::from_millis(50);
  let result = relay.call_timeout(|| 1, timeout);
  assert_eq!(result, Err(MarshalError::Timeout(timeout)));

  block_tx.send(()).unwrap();
  // The pump recovers once the blocker finishes; the abandoned closure's
  // result is discarded without disturbing later calls.
  assert_eq!(relay.call(|| 2).unwrap(), 2);

  relay.shutdown(Duration::from_secs(1));
  tracing::info!("Finished test: {}", relay_name);
}

#[test]
fn test_closure_panic_is_captured_and_pump_survives() {
  setup_tracing_for_test();
  let relay_name = "test_relay_closure_panic";
  tracing::info!("Starting test: {}", relay_name);

  let exit = Arc::new(ExitCoordinator::new());
  let relay = PrimaryRelay::new(relay_name, exit);

  let err = relay.call(|| -> i32 { panic!("kaboom") }).unwrap_err();
  match err {
    MarshalError::ClosurePanicked(message) => {
      assert!(message.contains("kaboom"), "Panic payload lost, got: {}", message);
    }
    other => panic!("Expected ClosurePanicked, got {:?}", other),
  }

  assert_eq!(relay.call(|| 5).unwrap(), 5, "Pump must survive a panicking closure.");

  relay.shutdown(Duration::from_secs(1));
  tracing::info!("Finished test: {}", relay_name);
}

#[test]
fn test_posted_closures_run_in_fifo_order() {
  setup_tracing_for_test();
  let relay_name = "test_relay_fifo_order";
  tracing::info!("Starting test: {}", relay_name);

  let exit = Arc::new(ExitCoordinator::new());
  let relay = PrimaryRelay::new(relay_name, exit);

  let order = Arc::new(Mutex::new(Vec::new()));
  for i in 0..5 {
    let order = order.clone();
    relay.post(move || order.lock().push(i));
  }

  // A blocking call enqueued after the posts acts as a barrier: FIFO order
  // means every post has run by the time it returns.
  relay.call(|| ()).unwrap();
  assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);

  relay.shutdown(Duration::from_secs(1));
  tracing::info!("Finished test: {}", relay_name);
}

#[test]
fn test_shutdown_stops_pump_and_later_calls_fail_fast() {
  setup_tracing_for_test();
  let relay_name = "test_relay_shutdown";
  tracing::info!("Starting test: {}", relay_name);

  let exit = Arc::new(ExitCoordinator::new());
  let relay = PrimaryRelay::new(relay_name, exit);

  relay.shutdown(Duration::from_secs(1));
  assert!(!relay.is_running(), "Pump must not be running after shutdown.");

  let result = relay.call_timeout(|| 1, Duration::from_millis(100));
  assert_eq!(result, Err(MarshalError::PumpShuttingDown));

  let started = Instant::now();
  relay.shutdown(Duration::from_secs(1));
  assert!(
    started.elapsed() < Duration::from_millis(500),
    "Second shutdown should return without blocking, took {:?}",
    started.elapsed()
  );

  tracing::info!("Finished test: {}", relay_name);
}

#[test]
fn test_exit_flag_alone_stops_pump_within_poll_interval() {
  setup_tracing_for_test();
  let relay_name = "test_relay_exit_flag";
  tracing::info!("Starting test: {}", relay_name);

  let exit = Arc::new(ExitCoordinator::new());
  let relay = PrimaryRelay::new(relay_name, exit.clone());
  assert!(relay.is_running());

  exit.request_exit();

  let deadline = Instant::now() + Duration::from_secs(2);
  while relay.is_running() && Instant::now() < deadline {
    thread::sleep(Duration::from_millis(20));
  }
  assert!(
    !relay.is_running(),
    "Pump must observe the exit flag within one poll interval."
  );

  tracing::info!("Finished test: {}", relay_name);
}
