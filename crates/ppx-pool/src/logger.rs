/// Thin wrapper over `tracing` gated by the pool's `verbose` flag.
///
/// When `verbose` is false every method returns before touching a
/// `tracing` macro — a true no-op, not just a filtered-out event, matching
/// the teacher's "pluggable sink, no-op when quiet" approach to optional
/// logging.
#[derive(Debug, Clone, Copy)]
pub struct PoolLogger {
    verbose: bool,
}

impl PoolLogger {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn executor_spawned(&self, executor_id: u64) {
        if !self.verbose {
            return;
        }
        tracing::info!(executor_id, "spawning executor");
    }

    pub fn executor_idle(&self, executor_id: u64) {
        if !self.verbose {
            return;
        }
        tracing::debug!(executor_id, "executor idle");
    }

    pub fn executor_retired(&self, executor_id: u64) {
        if !self.verbose {
            return;
        }
        tracing::info!(executor_id, "executor retired");
    }

    pub fn startup_failed(&self, executor_id: u64, message: &str) {
        if !self.verbose {
            return;
        }
        tracing::warn!(executor_id, message, "executor startup failed");
    }

    pub fn submission_enqueued(&self, queue_len: usize) {
        if !self.verbose {
            return;
        }
        tracing::debug!(queue_len, "submission enqueued");
    }

    pub fn submission_dispatched(&self, executor_id: u64) {
        if !self.verbose {
            return;
        }
        tracing::debug!(executor_id, "submission dispatched");
    }

    pub fn submission_cancelled_in_queue(&self) {
        if !self.verbose {
            return;
        }
        tracing::debug!("queued submission cancelled before dispatch");
    }

    pub fn shutdown_initiated(&self, forced: bool) {
        if !self.verbose {
            return;
        }
        tracing::info!(forced, "pool shutdown initiated");
    }

    pub fn pool_terminated(&self) {
        if !self.verbose {
            return;
        }
        tracing::info!("pool terminated");
    }
}
