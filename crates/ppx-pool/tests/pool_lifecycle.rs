use std::sync::Arc;
use std::time::Duration;

use ppx_core::{Command, ProcessLaunchSpec, ProcessManager, Submission};
use ppx_pool::{Pool, PoolConfig};

/// Hosts a tiny POSIX-shell "tick server": each instruction of the form
/// `tick:N` sleeps for `N` short ticks, then replies `done`. Used in place
/// of a real long-running tool across this file's scenarios.
struct TickManager {
    starts_up_instantly: bool,
}

impl TickManager {
    fn new() -> Self {
        Self { starts_up_instantly: true }
    }

    fn delayed_startup() -> Self {
        Self { starts_up_instantly: false }
    }
}

const TICK_SERVER_SCRIPT: &str = r#"
while IFS= read -r line; do
  case "$line" in
    tick:*)
      n="${line#tick:}"
      i=0
      while [ "$i" -lt "$n" ]; do
        sleep 0.01
        i=$((i + 1))
      done
      echo "done:$line"
      ;;
    *)
      echo "done:$line"
      ;;
  esac
done
"#;

const DELAYED_TICK_SERVER_SCRIPT: &str = r#"
sleep 0.05
echo READY
while IFS= read -r line; do
  case "$line" in
    tick:*)
      n="${line#tick:}"
      i=0
      while [ "$i" -lt "$n" ]; do
        sleep 0.01
        i=$((i + 1))
      done
      echo "done:$line"
      ;;
    *)
      echo "done:$line"
      ;;
  esac
done
"#;

impl ProcessManager for TickManager {
    fn new_process(&self) -> ProcessLaunchSpec {
        let script = if self.starts_up_instantly { TICK_SERVER_SCRIPT } else { DELAYED_TICK_SERVER_SCRIPT };
        ProcessLaunchSpec::new("sh").arg("-c").arg(script)
    }

    fn starts_up_instantly(&self) -> bool {
        self.starts_up_instantly
    }

    fn is_started_up(&self, line: &str, _is_stdout: bool) -> bool {
        line == "READY"
    }
}

fn tick(n: u32) -> Command {
    let expect = format!("done:tick:{n}");
    Command::new(format!("tick:{n}"), move |line, _| line == expect)
}

#[test]
fn size_bounds_are_respected_after_startup() {
    let pool = Pool::new(Arc::new(TickManager::new()), PoolConfig::new(2, 6, 1, 0)).expect("pool should construct");
    let stats = pool.stats();
    assert!(stats.num_processes >= 2 && stats.num_processes <= 6);
    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
    assert_eq!(pool.num_processes(), 0);
}

#[test]
fn reserve_idle_executors_are_kept_when_queue_is_empty() {
    let pool = Pool::new(Arc::new(TickManager::new()), PoolConfig::new(0, 5, 2, 0)).expect("pool should construct");
    let stats = pool.stats();
    assert!(stats.num_idle >= 2, "expected at least reserve idle executors, got {stats:?}");
    pool.force_shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn fifo_dispatch_with_a_single_executor() {
    let pool = Pool::new(Arc::new(TickManager::new()), PoolConfig::new(1, 1, 0, 0)).expect("pool should construct");

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let order_a = Arc::clone(&order);
    let order_b = Arc::clone(&order);

    let a = Submission::new_void(vec![tick(2)]).with_on_started(move || order_a.lock().unwrap().push("a"));
    let b = Submission::new_void(vec![tick(2)]).with_on_started(move || order_b.lock().unwrap().push("b"));

    let handle_a = pool.submit(a).expect("submit a");
    let handle_b = pool.submit(b).expect("submit b");

    handle_a.wait_timeout(Duration::from_secs(5)).expect("a completes");
    handle_b.wait_timeout(Duration::from_secs(5)).expect("b completes");

    assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn commands_complete_in_order_with_isolated_output_buffers() {
    let pool = Pool::new(Arc::new(TickManager::new()), PoolConfig::new(1, 1, 0, 0)).expect("pool should construct");

    let submission = Submission::new(vec![tick(1), tick(1), tick(1)], |cmds| {
        cmds.iter().map(|c| c.stdout_lines().to_vec()).collect::<Vec<_>>()
    });
    let handle = pool.submit(submission).expect("submit");
    let outputs = handle.wait_timeout(Duration::from_secs(5)).expect("submission completes");

    assert_eq!(outputs.len(), 3);
    assert_eq!(outputs[0], vec!["done:tick:1"]);
    assert_eq!(outputs[1], vec!["done:tick:1"]);
    assert_eq!(outputs[2], vec!["done:tick:1"]);

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn forced_cancel_aborts_a_running_submission_and_destroys_its_process() {
    let pool = Pool::new(Arc::new(TickManager::new()), PoolConfig::new(1, 1, 0, 0)).expect("pool should construct");

    let submission = Submission::new_void(vec![tick(50)]);
    let handle = pool.submit(submission).expect("submit");

    std::thread::sleep(Duration::from_millis(50));
    handle.cancel(true);

    let result = handle.wait_timeout(Duration::from_secs(5));
    assert!(result.is_err());
    assert!(handle.is_cancelled());

    pool.force_shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
    assert_eq!(pool.num_processes(), 0);
}

#[test]
fn cooperative_cancel_lets_the_in_flight_command_finish_but_skips_the_rest() {
    let pool = Pool::new(Arc::new(TickManager::new()), PoolConfig::new(1, 1, 0, 0)).expect("pool should construct");

    let submission = Submission::new(vec![tick(2), tick(50)], |cmds| cmds[1].stdout_lines().len());
    let handle = pool.submit(submission).expect("submit");

    std::thread::sleep(Duration::from_millis(10));
    handle.cancel(false);

    let result = handle.wait_timeout(Duration::from_secs(5));
    assert!(matches!(result, Err(ppx_core::PoolError::Cancelled)));

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn cancel_is_idempotent_across_repeated_calls() {
    let pool = Pool::new(Arc::new(TickManager::new()), PoolConfig::new(1, 1, 0, 0)).expect("pool should construct");

    let submission = Submission::new_void(vec![tick(20)]);
    let handle = pool.submit(submission).expect("submit");

    handle.cancel(true);
    handle.cancel(true);
    handle.cancel(false);

    let result = handle.wait_timeout(Duration::from_secs(5));
    assert!(result.is_err());
    assert!(handle.is_cancelled());

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn wait_timeout_reports_timeout_while_work_continues() {
    let pool = Pool::new(Arc::new(TickManager::new()), PoolConfig::new(1, 1, 0, 0)).expect("pool should construct");

    let submission = Submission::new_void(vec![tick(20)]);
    let handle = pool.submit(submission).expect("submit");

    let early = handle.wait_timeout(Duration::from_millis(10));
    assert!(matches!(early, Err(ppx_core::PoolError::Timeout)));

    let finished = handle.wait_timeout(Duration::from_secs(5));
    assert!(finished.is_ok());

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn startup_verification_delays_first_dispatch_until_ready() {
    let pool = Pool::new(Arc::new(TickManager::delayed_startup()), PoolConfig::new(1, 1, 0, 0)).expect("pool should construct");

    let submission = Submission::new_void(vec![tick(1)]);
    let handle = pool.submit(submission).expect("submit");
    let result = handle.wait_timeout(Duration::from_secs(5));
    assert!(result.is_ok(), "submission should complete once startup verification passes");

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn force_shutdown_releases_every_child_process() {
    let pool = Pool::new(Arc::new(TickManager::new()), PoolConfig::new(3, 5, 1, 0)).expect("pool should construct");
    let drained = pool.force_shutdown();
    assert_eq!(drained, 0, "nothing was queued yet");
    assert!(pool.await_termination(Duration::from_secs(5)));
    assert_eq!(pool.num_processes(), 0);
}

#[test]
fn force_shutdown_cancels_queued_submissions_that_never_ran() {
    let pool = Pool::new(Arc::new(TickManager::new()), PoolConfig::new(1, 1, 0, 0)).expect("pool should construct");

    let blocker = pool.submit(Submission::new_void(vec![tick(50)])).expect("submit blocker");
    let queued = pool.submit(Submission::new_void(vec![tick(1)])).expect("submit queued");

    std::thread::sleep(Duration::from_millis(20));
    let drained = pool.force_shutdown();
    assert_eq!(drained, 1);

    assert!(blocker.wait_timeout(Duration::from_secs(5)).is_err());
    assert!(queued.is_cancelled());
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn configuration_rejection_is_surfaced_at_construction() {
    let manager: Arc<dyn ProcessManager> = Arc::new(TickManager::new());
    assert!(Pool::new(Arc::clone(&manager), PoolConfig::new(-1, 10, 0, 0)).is_err());
    assert!(Pool::new(Arc::clone(&manager), PoolConfig::new(0, 0, 0, 0)).is_err());
    assert!(Pool::new(Arc::clone(&manager), PoolConfig::new(10, 5, 0, 0)).is_err());
    assert!(Pool::new(Arc::clone(&manager), PoolConfig::new(0, 10, -1, 0)).is_err());
    assert!(Pool::new(Arc::clone(&manager), PoolConfig::new(0, 10, 10, 0)).is_err());
}

#[test]
fn interrupting_construction_reaps_partially_spawned_processes() {
    let cancel = ppx_core::CancelToken::new();
    let cancel_trigger = cancel.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(5));
        cancel_trigger.cancel();
    });

    let result = Pool::new_cancellable(Arc::new(TickManager::new()), PoolConfig::new(20, 40, 5, 0), &cancel);
    assert!(matches!(result, Err(ppx_core::PoolError::Interrupted)));
}

#[test]
fn await_termination_cancellable_reports_interrupted_without_stopping_shutdown() {
    let pool = Pool::new(Arc::new(TickManager::new()), PoolConfig::new(1, 1, 0, 0)).expect("pool should construct");
    pool.shutdown();

    let cancel = ppx_core::CancelToken::new();
    cancel.cancel();
    let result = pool.await_termination_cancellable(&cancel);
    assert!(matches!(result, Err(ppx_core::PoolError::Interrupted)));

    assert!(pool.await_termination(Duration::from_secs(5)));
}
