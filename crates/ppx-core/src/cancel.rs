use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// A cloneable cancellation flag with a blocking wait.
///
/// Replaces the cooperative thread-interruption model of the original
/// Java implementation: instead of interrupting a blocked thread, callers
/// share a `CancelToken` and blocking waits (handle waits, pool
/// construction, `await_termination`) periodically check it.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Mark this token cancelled and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until cancelled or `timeout` elapses. Returns `true` if
    /// cancellation happened before the deadline.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());
        while !*cancelled {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, result) = cvar
                .wait_timeout(cancelled, remaining)
                .unwrap_or_else(|e| e.into_inner());
            cancelled = guard;
            if result.timed_out() && !*cancelled {
                return false;
            }
        }
        true
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn starts_uncancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent_and_visible_to_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn wait_timeout_returns_false_when_not_cancelled() {
        let token = CancelToken::new();
        let woke = token.wait_timeout(Duration::from_millis(20));
        assert!(!woke);
    }

    #[test]
    fn wait_timeout_wakes_on_cancel_from_another_thread() {
        let token = CancelToken::new();
        let clone = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            clone.cancel();
        });
        let woke = token.wait_timeout(Duration::from_secs(2));
        handle.join().unwrap();
        assert!(woke);
    }
}
