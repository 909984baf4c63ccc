use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::{CancelToken, PoolError};

/// Lifecycle state of a submission, as observed through its handle.
///
/// Transitions: `Pending -> Running -> (Done | Failed | Cancelled)`.
/// The three trailing states are terminal and sticky: once reached, the
/// handle never changes state again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl SubmissionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubmissionState::Done | SubmissionState::Failed | SubmissionState::Cancelled
        )
    }
}

struct Shared<T> {
    state: Mutex<Inner<T>>,
    condvar: Condvar,
}

struct Inner<T> {
    state: SubmissionState,
    result: Option<Result<T, PoolError>>,
    /// Set by `cancel(force)`; `None` until a cancel is requested. The
    /// executor/dispatcher observes this to decide cooperative vs forced
    /// cancellation.
    cancel_requested: Option<bool>,
}

/// Caller-visible handle to a submitted submission.
///
/// Cloning a handle is cheap and shares the same underlying state; any
/// clone observes the same terminal outcome.
pub struct SubmissionHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for SubmissionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// The producer side of a [`SubmissionHandle`], held by pool-internal code
/// to drive the handle's state machine. Not exposed to callers of `submit`.
pub struct HandleController<T> {
    shared: Arc<Shared<T>>,
}

impl<T> SubmissionHandle<T> {
    /// Create a linked (caller handle, pool controller) pair in the
    /// `Pending` state.
    pub fn pair() -> (SubmissionHandle<T>, HandleController<T>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(Inner {
                state: SubmissionState::Pending,
                result: None,
                cancel_requested: None,
            }),
            condvar: Condvar::new(),
        });
        (
            SubmissionHandle {
                shared: Arc::clone(&shared),
            },
            HandleController { shared },
        )
    }

    pub fn state(&self) -> SubmissionState {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == SubmissionState::Cancelled
    }

    /// Request cancellation. Idempotent: once a terminal state or a cancel
    /// request is already recorded, later calls are no-ops except that a
    /// `force=true` call always upgrades a prior cooperative request.
    pub fn cancel(&self, force: bool) {
        request_cancel(&self.shared, force);
    }

    /// Convenience for `cancel(false)` (cooperative cancel).
    pub fn cancel_cooperative(&self) {
        self.cancel(false);
    }
}

impl<T: Clone> SubmissionHandle<T> {
    /// Block until the submission reaches a terminal state.
    pub fn wait(&self) -> Result<T, PoolError> {
        let mut inner = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        while !inner.state.is_terminal() {
            inner = self
                .shared
                .condvar
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
        inner
            .result
            .clone()
            .expect("terminal state always carries a result")
    }

    /// Block until the submission reaches a terminal state or `timeout`
    /// elapses. A timeout does not affect execution: it is purely an
    /// observation-side wait.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, PoolError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        while !inner.state.is_terminal() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PoolError::Timeout);
            }
            let (guard, timeout_result) = self
                .shared
                .condvar
                .wait_timeout(inner, remaining)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
            if timeout_result.timed_out() && !inner.state.is_terminal() {
                return Err(PoolError::Timeout);
            }
        }
        inner
            .result
            .clone()
            .expect("terminal state always carries a result")
    }

    /// Block until the submission reaches a terminal state, or `cancel`
    /// fires first, in which case this returns `Interrupted` without
    /// affecting the submission itself — cancelling the *wait*, not the
    /// work. Polls `cancel` on the same cadence `Pool` construction does,
    /// since a `SubmissionHandle`'s condvar and a `CancelToken`'s condvar
    /// can't be waited on together directly.
    pub fn wait_cancellable(&self, cancel: &CancelToken) -> Result<T, PoolError> {
        loop {
            match self.wait_timeout(Duration::from_millis(50)) {
                Err(PoolError::Timeout) => {
                    if cancel.is_cancelled() {
                        return Err(PoolError::Interrupted);
                    }
                }
                other => return other,
            }
        }
    }
}

impl<T> HandleController<T> {
    pub fn mark_running(&self) {
        let mut inner = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state == SubmissionState::Pending {
            inner.state = SubmissionState::Running;
        }
    }

    /// Returns the force flag of a pending cancel request, if any.
    pub fn cancel_requested(&self) -> Option<bool> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner()).cancel_requested
    }

    /// A cheap, independently-owned handle for repeatedly polling
    /// `cancel_requested` without holding a borrow on the controller
    /// itself — needed where the caller also needs a mutable borrow of
    /// the submission's commands at the same time.
    pub fn cancel_query(&self) -> CancelQuery<T> {
        CancelQuery {
            shared: Arc::clone(&self.shared),
        }
    }

    /// A handle that can force-cancel this submission from outside the
    /// normal caller-facing `SubmissionHandle`, used by the pool to abort
    /// a submission it is mid-way through running (e.g. `force_shutdown`)
    /// without holding onto the caller's own handle.
    pub fn remote_cancel(&self) -> RemoteCancel<T> {
        RemoteCancel {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn finish_ok(self, value: T) {
        self.finish(SubmissionState::Done, Ok(value));
    }

    pub fn finish_err(self, err: PoolError) {
        self.finish(SubmissionState::Failed, Err(err));
    }

    pub fn finish_cancelled(self) {
        self.finish(SubmissionState::Cancelled, Err(PoolError::Cancelled));
    }

    fn finish(self, state: SubmissionState, result: Result<T, PoolError>) {
        let mut inner = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state.is_terminal() {
            return;
        }
        inner.state = state;
        inner.result = Some(result);
        drop(inner);
        self.shared.condvar.notify_all();
    }
}

fn request_cancel<T>(shared: &Shared<T>, force: bool) {
    let mut inner = shared.state.lock().unwrap_or_else(|e| e.into_inner());
    if inner.state.is_terminal() {
        return;
    }
    match inner.cancel_requested {
        Some(existing) if existing || !force => {}
        _ => inner.cancel_requested = Some(force),
    }
    drop(inner);
    shared.condvar.notify_all();
}

/// See [`HandleController::cancel_query`].
pub struct CancelQuery<T> {
    shared: Arc<Shared<T>>,
}

impl<T> CancelQuery<T> {
    pub fn get(&self) -> Option<bool> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner()).cancel_requested
    }
}

impl<T> Clone for CancelQuery<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// See [`HandleController::remote_cancel`].
pub struct RemoteCancel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> RemoteCancel<T> {
    pub fn trigger(&self) {
        request_cancel(&self.shared, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn pending_transitions_to_done() {
        let (handle, controller) = SubmissionHandle::<i32>::pair();
        assert_eq!(handle.state(), SubmissionState::Pending);
        controller.mark_running();
        assert_eq!(handle.state(), SubmissionState::Running);
        controller.finish_ok(42);
        assert_eq!(handle.state(), SubmissionState::Done);
        assert_eq!(handle.wait().unwrap(), 42);
    }

    #[test]
    fn terminal_state_is_sticky() {
        let (handle, controller) = SubmissionHandle::<i32>::pair();
        controller.finish_ok(1);
        // A second controller call would be a bug, but finish() is private
        // and consumes self, so this test instead verifies cancel() cannot
        // clobber a terminal state.
        handle.cancel(true);
        assert_eq!(handle.state(), SubmissionState::Done);
    }

    #[test]
    fn wait_timeout_reports_timeout_without_affecting_state() {
        let (handle, controller) = SubmissionHandle::<i32>::pair();
        let result = handle.wait_timeout(Duration::from_millis(20));
        assert!(matches!(result, Err(PoolError::Timeout)));
        assert_eq!(handle.state(), SubmissionState::Pending);
        controller.finish_ok(7);
        assert_eq!(handle.wait().unwrap(), 7);
    }

    #[test]
    fn cancel_is_idempotent_and_force_upgrades() {
        let (handle, controller) = SubmissionHandle::<i32>::pair();
        handle.cancel(false);
        assert_eq!(controller.cancel_requested(), Some(false));
        handle.cancel(true);
        assert_eq!(controller.cancel_requested(), Some(true));
        handle.cancel(false);
        assert_eq!(controller.cancel_requested(), Some(true));
    }

    #[test]
    fn cancel_query_observes_later_cancel_without_borrowing_controller() {
        let (handle, controller) = SubmissionHandle::<i32>::pair();
        let query = controller.cancel_query();
        assert_eq!(query.get(), None);
        handle.cancel(true);
        assert_eq!(query.get(), Some(true));
    }

    #[test]
    fn wait_blocks_until_another_thread_finishes() {
        let (handle, controller) = SubmissionHandle::<i32>::pair();
        let waiter = thread::spawn(move || handle.wait());
        thread::sleep(Duration::from_millis(20));
        controller.finish_ok(99);
        assert_eq!(waiter.join().unwrap().unwrap(), 99);
    }

    #[test]
    fn wait_cancellable_returns_interrupted_when_cancel_fires_first() {
        let (handle, _controller) = SubmissionHandle::<i32>::pair();
        let cancel = CancelToken::new();
        let cancel_trigger = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            cancel_trigger.cancel();
        });
        let result = handle.wait_cancellable(&cancel);
        assert!(matches!(result, Err(PoolError::Interrupted)));
    }

    #[test]
    fn wait_cancellable_returns_result_when_it_arrives_before_cancel() {
        let (handle, controller) = SubmissionHandle::<i32>::pair();
        let cancel = CancelToken::new();
        controller.finish_ok(7);
        assert_eq!(handle.wait_cancellable(&cancel).unwrap(), 7);
    }
}
