use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ppx_core::{CancelToken, ExecutableSubmission, Job, PoolError, ProcessManager, Submission, SubmissionHandle};
use ppx_process::{spawn_executor, ExecutorMessage, ExecutorObserver};

use crate::config::PoolConfig;
use crate::logger::PoolLogger;
use crate::queue::SubmissionQueue;
use crate::stats::PoolStats;

/// How often the dispatcher wakes even without an explicit notification,
/// so keep-alive expiry and queued-cancellation sweeps are noticed without
/// a dedicated per-executor timer thread (DESIGN NOTES: avoid per-executor
/// timers; a single shared tick serves every executor).
const DISPATCH_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutorStatus {
    Starting,
    Idle,
    Busy,
    Stopping,
}

struct ExecutorEntry {
    id: u64,
    status: ExecutorStatus,
    sender: SyncSender<ExecutorMessage>,
    idle_since: Option<Instant>,
    /// Set while `Busy`: force-cancels the submission currently running on
    /// this executor. Used by `force_shutdown`, which can't reach a busy
    /// executor through its message channel (it isn't reading it).
    current_job_cancel: Option<Box<dyn Fn() + Send>>,
    join_handle: Option<JoinHandle<()>>,
}

struct PoolState {
    executors: Vec<ExecutorEntry>,
    queue: SubmissionQueue,
    shutdown: bool,
    terminated: bool,
    next_executor_id: u64,
    to_join: Vec<JoinHandle<()>>,
}

struct PoolInner {
    state: Mutex<PoolState>,
    condvar: Condvar,
    manager: Arc<dyn ProcessManager>,
    config: PoolConfig,
    logger: PoolLogger,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Fleet manager: launches and retires [`ppx_process::spawn_executor`]
/// processes, dispatches queued submissions to idle ones, and implements
/// the dynamic sizing policy.
pub struct Pool {
    inner: Arc<PoolInner>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Pool {
    /// Validate `config`, spawn `max(min, reserve)` executors, and block
    /// until every one reaches idle or any fails — a failure aborts
    /// construction and force-terminates whatever already started.
    pub fn new(manager: Arc<dyn ProcessManager>, config: PoolConfig) -> Result<Self, PoolError> {
        Self::build(manager, config, None)
    }

    /// As [`Pool::new`], but the wait for initial population also watches
    /// `cancel`; if it fires first, construction aborts with
    /// [`PoolError::Interrupted`] and already-spawned executors are
    /// force-terminated and reaped before returning.
    pub fn new_cancellable(manager: Arc<dyn ProcessManager>, config: PoolConfig, cancel: &CancelToken) -> Result<Self, PoolError> {
        Self::build(manager, config, Some(cancel))
    }

    fn build(manager: Arc<dyn ProcessManager>, config: PoolConfig, cancel: Option<&CancelToken>) -> Result<Self, PoolError> {
        config.validate()?;
        let logger = PoolLogger::new(config.verbose());
        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState {
                executors: Vec::new(),
                queue: SubmissionQueue::new(),
                shutdown: false,
                terminated: false,
                next_executor_id: 0,
                to_join: Vec::new(),
            }),
            condvar: Condvar::new(),
            manager,
            config,
            logger,
        });

        let population = inner.config.initial_population();
        {
            let mut state = inner.lock();
            for _ in 0..population {
                spawn_one_executor_locked(&inner, &mut state);
            }
        }

        if let Err(err) = await_initial_population(&inner, population, cancel) {
            force_terminate_all(&inner);
            return Err(err);
        }

        let dispatcher = spawn_dispatcher(Arc::clone(&inner));
        Ok(Self {
            inner,
            dispatcher: Some(dispatcher),
        })
    }

    /// Enqueue `submission` and return its handle immediately. Rejects
    /// with [`PoolError::RejectedExecution`] once [`Pool::shutdown`] or
    /// [`Pool::force_shutdown`] has been called.
    pub fn submit<T>(&self, submission: Submission<T>) -> Result<SubmissionHandle<T>, PoolError>
    where
        T: Send + 'static,
    {
        let mut state = self.inner.lock();
        if state.shutdown {
            return Err(PoolError::RejectedExecution);
        }
        let (handle, controller) = SubmissionHandle::pair();
        let job: Box<dyn ExecutableSubmission> = Box::new(Job::new(submission, controller));
        state.queue.enqueue(job);
        self.inner.logger.submission_enqueued(state.queue.len());
        drop(state);
        self.inner.condvar.notify_all();
        Ok(handle)
    }

    /// Orderly shutdown: no new submissions are accepted; queued and
    /// running submissions are allowed to complete.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        self.inner.logger.shutdown_initiated(false);
        drop(state);
        self.inner.condvar.notify_all();
    }

    /// Immediate shutdown: every queued submission is cancelled, every
    /// busy executor's current submission is force-cancelled, and every
    /// idle executor is destroyed without an orderly termination attempt.
    /// Returns the number of queued submissions that were cancelled
    /// without ever running.
    ///
    /// Unlike the heritage API this is adapted from, the never-run
    /// submissions aren't handed back as values: the caller already holds
    /// each one's `SubmissionHandle` from `submit`, and observing
    /// `Cancelled` there carries the same information without requiring
    /// the pool to hand back a type it has already erased.
    pub fn force_shutdown(&self) -> usize {
        let mut state = self.inner.lock();
        state.shutdown = true;
        self.inner.logger.shutdown_initiated(true);
        let drained = state.queue.len();
        state.queue.drain_cancelling();
        for entry in state.executors.iter_mut() {
            match entry.status {
                ExecutorStatus::Busy => {
                    if let Some(cancel) = &entry.current_job_cancel {
                        cancel();
                    }
                }
                ExecutorStatus::Idle | ExecutorStatus::Starting => {
                    entry.status = ExecutorStatus::Stopping;
                    let _ = entry.sender.send(ExecutorMessage::Stop { force: true });
                }
                ExecutorStatus::Stopping => {}
            }
        }
        drop(state);
        self.inner.condvar.notify_all();
        drained
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().shutdown
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.lock().terminated
    }

    /// Block until the pool reaches *terminated* or `timeout` elapses.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock();
        while !state.terminated {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, _) = self
                .inner
                .condvar
                .wait_timeout(state, remaining)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
        drop(state);
        join_all(&self.inner);
        true
    }

    /// Block until the pool reaches *terminated*, or `cancel` fires first,
    /// in which case this returns `Interrupted` — the pool itself keeps
    /// shutting down regardless, this only cancels the wait.
    pub fn await_termination_cancellable(&self, cancel: &CancelToken) -> Result<(), PoolError> {
        loop {
            if self.await_termination(Duration::from_millis(50)) {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(PoolError::Interrupted);
            }
        }
    }

    pub fn num_processes(&self) -> usize {
        self.inner.lock().executors.len()
    }

    pub fn num_queued_submissions(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn num_executing_submissions(&self) -> usize {
        self.inner.lock().executors.iter().filter(|e| e.status == ExecutorStatus::Busy).count()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Point-in-time fleet/queue snapshot; see [`PoolStats`].
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        let num_idle = state.executors.iter().filter(|e| e.status == ExecutorStatus::Idle).count();
        let num_busy = state.executors.iter().filter(|e| e.status == ExecutorStatus::Busy).count();
        PoolStats {
            num_processes: state.executors.len(),
            num_idle,
            num_busy,
            num_queued_submissions: state.queue.len(),
            num_executing_submissions: num_busy,
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if !self.is_terminated() {
            self.force_shutdown();
            self.await_termination(Duration::from_secs(10));
        }
        if let Some(handle) = self.dispatcher.take() {
            self.inner.condvar.notify_all();
            let _ = handle.join();
        }
    }
}

struct PoolObserver {
    inner: Arc<PoolInner>,
}

impl ExecutorObserver for PoolObserver {
    fn on_idle(&self, executor_id: u64) {
        let mut state = self.inner.lock();
        if let Some(entry) = state.executors.iter_mut().find(|e| e.id == executor_id) {
            entry.status = ExecutorStatus::Idle;
            entry.idle_since = Some(Instant::now());
            entry.current_job_cancel = None;
        }
        self.inner.logger.executor_idle(executor_id);
        drop(state);
        self.inner.condvar.notify_all();
    }

    fn on_startup_failed(&self, executor_id: u64, message: String) {
        let mut state = self.inner.lock();
        state.executors.retain(|e| e.id != executor_id);
        self.inner.logger.startup_failed(executor_id, &message);
        drop(state);
        self.inner.condvar.notify_all();
    }

    fn on_stopped(&self, executor_id: u64) {
        let mut state = self.inner.lock();
        if let Some(pos) = state.executors.iter().position(|e| e.id == executor_id) {
            let mut entry = state.executors.remove(pos);
            if let Some(handle) = entry.join_handle.take() {
                state.to_join.push(handle);
            }
        }
        self.inner.logger.executor_retired(executor_id);
        if state.shutdown && state.executors.is_empty() && state.queue.is_empty() {
            state.terminated = true;
            self.inner.logger.pool_terminated();
        }
        drop(state);
        self.inner.condvar.notify_all();
    }
}

fn spawn_one_executor_locked(inner: &Arc<PoolInner>, state: &mut PoolState) {
    let id = state.next_executor_id;
    state.next_executor_id += 1;
    inner.logger.executor_spawned(id);
    let observer: Arc<dyn ExecutorObserver> = Arc::new(PoolObserver { inner: Arc::clone(inner) });
    let (sender, join_handle) = spawn_executor(
        id,
        Arc::clone(&inner.manager),
        observer,
        inner.config.command_deadline(),
        inner.config.terminate_grace(),
    );
    state.executors.push(ExecutorEntry {
        id,
        status: ExecutorStatus::Starting,
        sender,
        idle_since: None,
        current_job_cancel: None,
        join_handle: Some(join_handle),
    });
}

fn active_count(state: &PoolState) -> usize {
    state.executors.iter().filter(|e| e.status != ExecutorStatus::Stopping).count()
}

fn idle_count(state: &PoolState) -> usize {
    state.executors.iter().filter(|e| e.status == ExecutorStatus::Idle).count()
}

fn busy_count(state: &PoolState) -> usize {
    state.executors.iter().filter(|e| e.status == ExecutorStatus::Busy).count()
}

/// One pass of the sizing policy in §4.4, run under the pool's single
/// mutex so the dispatcher behaves as-if single-threaded regardless of
/// whether it's woken by `submit`, an executor reporting idle/stopped, or
/// the periodic tick. Besides dispatching queued work, this replenishes
/// the fleet back up to `min`/`reserve` whenever something has dropped it
/// below either — a `ProcessDied` retirement or a `cancel_process_after`
/// teardown shrinks the fleet without going through `submit`, so
/// replenishment can't be limited to "spawn while there's a backlog."
fn dispatch_locked(inner: &Arc<PoolInner>, state: &mut PoolState) {
    let swept = state.queue.sweep_cancelled();
    for _ in 0..swept {
        inner.logger.submission_cancelled_in_queue();
    }

    let busy = busy_count(state);
    if state.shutdown && state.queue.is_empty() && busy == 0 {
        for entry in state.executors.iter_mut() {
            if entry.status == ExecutorStatus::Idle {
                entry.status = ExecutorStatus::Stopping;
                let _ = entry.sender.send(ExecutorMessage::Stop { force: false });
            }
        }
    }

    while !state.queue.is_empty() {
        let Some(idx) = state.executors.iter().position(|e| e.status == ExecutorStatus::Idle) else {
            break;
        };
        let Some(submission) = state.queue.pop_front() else { break };
        let cancel = submission.remote_cancel();
        let entry = &mut state.executors[idx];
        entry.status = ExecutorStatus::Busy;
        entry.current_job_cancel = Some(cancel);
        inner.logger.submission_dispatched(entry.id);
        let _ = entry.sender.send(ExecutorMessage::Assign(submission));
    }

    while !state.queue.is_empty() && active_count(state) < inner.config.max() {
        spawn_one_executor_locked(inner, state);
    }

    while !state.shutdown && active_count(state) < inner.config.max() {
        let busy = busy_count(state);
        let below_min = active_count(state) < inner.config.min();
        let below_reserve = state.queue.is_empty() && idle_count(state) < inner.config.reserve().min(inner.config.max().saturating_sub(busy));
        if !below_min && !below_reserve {
            break;
        }
        spawn_one_executor_locked(inner, state);
    }

    let keep_alive = inner.config.keep_alive();
    if !state.shutdown && !keep_alive.is_zero() {
        loop {
            if !(idle_count(state) > inner.config.reserve() && active_count(state) > inner.config.min()) {
                break;
            }
            let retireable = state.executors.iter().position(|e| {
                e.status == ExecutorStatus::Idle && e.idle_since.map(|since| since.elapsed() >= keep_alive).unwrap_or(false)
            });
            let Some(idx) = retireable else { break };
            let entry = &mut state.executors[idx];
            entry.status = ExecutorStatus::Stopping;
            let _ = entry.sender.send(ExecutorMessage::Stop { force: false });
        }
    }
}

fn spawn_dispatcher(inner: Arc<PoolInner>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("ppx-pool-dispatcher".to_string())
        .spawn(move || loop {
            let mut state = inner.lock();
            if state.terminated {
                return;
            }
            dispatch_locked(&inner, &mut state);
            if state.terminated {
                return;
            }
            let _ = inner.condvar.wait_timeout(state, DISPATCH_TICK);
        })
        .expect("failed to spawn pool dispatcher thread")
}

fn await_initial_population(inner: &Arc<PoolInner>, population: usize, cancel: Option<&CancelToken>) -> Result<(), PoolError> {
    if population == 0 {
        return Ok(());
    }
    let mut state = inner.lock();
    loop {
        let starting = state.executors.iter().filter(|e| e.status == ExecutorStatus::Starting).count();
        if starting == 0 {
            if state.executors.len() >= population {
                return Ok(());
            }
            let failed = population - state.executors.len();
            return Err(PoolError::StartupFailed(format!(
                "{failed} of {population} executors failed to start"
            )));
        }
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(PoolError::Interrupted);
            }
        }
        let (guard, _) = inner
            .condvar
            .wait_timeout(state, Duration::from_millis(50))
            .unwrap_or_else(|e| e.into_inner());
        state = guard;
    }
}

/// Force-destroy every executor currently known to `inner` and wait for
/// all of them to report stopped, then join their threads. Used when
/// construction fails or is interrupted, so no process outlives a failed
/// `Pool::new`/`Pool::new_cancellable` call.
fn force_terminate_all(inner: &Arc<PoolInner>) {
    {
        let mut state = inner.lock();
        state.shutdown = true;
        for entry in state.executors.iter_mut() {
            entry.status = ExecutorStatus::Stopping;
            let _ = entry.sender.send(ExecutorMessage::Stop { force: true });
        }
    }
    let mut state = inner.lock();
    while !state.executors.is_empty() {
        let (guard, _) = inner
            .condvar
            .wait_timeout(state, Duration::from_millis(50))
            .unwrap_or_else(|e| e.into_inner());
        state = guard;
    }
    drop(state);
    join_all(inner);
}

fn join_all(inner: &Arc<PoolInner>) {
    let handles: Vec<JoinHandle<()>> = {
        let mut state = inner.lock();
        state.to_join.drain(..).collect()
    };
    for handle in handles {
        let _ = handle.join();
    }
}
