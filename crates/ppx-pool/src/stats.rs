/// Point-in-time snapshot of the pool's fleet and queue, built from the
/// same counters the sizing policy maintains. Not a subsystem of its own —
/// just a read-only projection of state the observability getters in the
/// external-interfaces section already expose individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub num_processes: usize,
    pub num_idle: usize,
    pub num_busy: usize,
    pub num_queued_submissions: usize,
    pub num_executing_submissions: usize,
}
