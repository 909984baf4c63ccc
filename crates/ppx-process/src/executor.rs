use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ppx_core::{Command, ExecutableSubmission, LineOutcome, ProcessManager, RunOutcome, Shell, SubmissionFailure};

use crate::process_io::{IoEvent, ProcessIo};

/// How often the command loop polls for line events when nothing else is
/// pending. Also the cadence at which a forced cancel is noticed mid-command.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Message sent to a running executor thread.
pub enum ExecutorMessage {
    Assign(Box<dyn ExecutableSubmission>),
    /// Stop from the idle state. `force=false` attempts orderly termination
    /// (`ProcessManager::terminate`, then a grace period) before destroying
    /// the process; `force=true` destroys it immediately. A *busy*
    /// executor is never stopped this way — it is force-cancelled through
    /// its current submission's handle instead, since it isn't reading
    /// this channel until it returns to idle.
    Stop { force: bool },
}

/// Pool-side callbacks a running executor reports its lifecycle through.
/// Implemented by `ppx-pool`'s dispatcher; kept as a trait here so
/// `ppx-process` has no dependency on the pool crate.
pub trait ExecutorObserver: Send + Sync {
    /// The executor is idle and can accept a submission — either just
    /// after startup or after returning from a finished submission.
    fn on_idle(&self, executor_id: u64);
    /// The executor failed to reach `idle` during startup.
    fn on_startup_failed(&self, executor_id: u64, message: String);
    /// The executor's thread is about to exit; its process has been
    /// destroyed and reaped.
    fn on_stopped(&self, executor_id: u64);
}

/// Spawn the OS thread that owns one executor's entire lifecycle:
/// *starting -> idle -> busy -> ... -> stopping -> stopped*.
///
/// Returns the channel used to hand the executor work or ask it to stop,
/// and a join handle for the thread itself.
pub fn spawn_executor(
    id: u64,
    manager: Arc<dyn ProcessManager>,
    observer: Arc<dyn ExecutorObserver>,
    command_deadline: Option<Duration>,
    terminate_grace: Duration,
) -> (SyncSender<ExecutorMessage>, JoinHandle<()>) {
    let (tx, rx) = sync_channel(4);
    let handle = thread::Builder::new()
        .name(format!("ppx-executor-{id}"))
        .spawn(move || run(id, manager, observer, command_deadline, terminate_grace, rx))
        .expect("failed to spawn executor thread");
    (tx, handle)
}

fn run(
    id: u64,
    manager: Arc<dyn ProcessManager>,
    observer: Arc<dyn ExecutorObserver>,
    command_deadline: Option<Duration>,
    terminate_grace: Duration,
    rx: Receiver<ExecutorMessage>,
) {
    let spec = manager.new_process();
    tracing::debug!(executor_id = id, program = %spec.program, "spawning process");
    let mut io = match ProcessIo::spawn(&spec) {
        Ok(io) => io,
        Err(err) => {
            tracing::warn!(executor_id = id, error = %err, "executor failed to spawn");
            observer.on_startup_failed(id, err.to_string());
            return;
        }
    };

    if !manager.starts_up_instantly() {
        match wait_for_startup(&mut io, manager.as_ref(), &rx) {
            StartupOutcome::Ready => {}
            StartupOutcome::Stopped => {
                io.destroy();
                tracing::debug!(executor_id = id, "executor stopped during startup verification");
                observer.on_stopped(id);
                return;
            }
            StartupOutcome::Failed(message) => {
                io.destroy();
                tracing::warn!(executor_id = id, %message, "executor failed startup verification");
                observer.on_startup_failed(id, message);
                return;
            }
        }
    }

    {
        let mut shell = IoShell {
            io: &mut io,
            command_deadline,
        };
        if let Err(cause) = manager.on_startup(&mut shell) {
            io.destroy();
            observer.on_startup_failed(id, cause.to_string());
            return;
        }
    }

    tracing::debug!(executor_id = id, "executor idle");
    observer.on_idle(id);

    loop {
        let message = match rx.recv() {
            Ok(message) => message,
            Err(_) => break,
        };
        let job = match message {
            ExecutorMessage::Stop { force } => {
                if force {
                    io.destroy();
                } else {
                    terminate_process(&mut io, manager.as_ref(), terminate_grace);
                }
                tracing::debug!(executor_id = id, "executor stopped");
                observer.on_stopped(id);
                return;
            }
            ExecutorMessage::Assign(job) => job,
        };

        let (should_stop, already_destroyed) = run_assigned_job(id, &mut io, job, command_deadline);
        if should_stop {
            if !already_destroyed {
                terminate_process(&mut io, manager.as_ref(), terminate_grace);
            } else {
                io.destroy();
            }
            tracing::debug!(executor_id = id, "executor stopped");
            observer.on_stopped(id);
            return;
        }
        observer.on_idle(id);
    }

    terminate_process(&mut io, manager.as_ref(), terminate_grace);
    tracing::debug!(executor_id = id, "executor stopped");
    observer.on_stopped(id);
}

/// Run one submission to completion against `io`, finishing its handle and
/// returning `(process_should_stop, process_already_destroyed)`.
fn run_assigned_job(
    executor_id: u64,
    io: &mut ProcessIo,
    mut job: Box<dyn ExecutableSubmission>,
    command_deadline: Option<Duration>,
) -> (bool, bool) {
    job.fire_on_started();
    tracing::debug!(executor_id, "submission started");
    let cancel_process_after = job.cancel_process_after();

    let cancel_query = job.cancel_query();
    let commands = job.commands_mut();
    let result = run_submission(io, commands, cancel_query, command_deadline);

    job.fire_on_finished();

    match result {
        SubmissionRunResult::Done => {
            tracing::debug!(executor_id, "submission complete");
            job.finish(RunOutcome::Done);
            (cancel_process_after, false)
        }
        SubmissionRunResult::Failed(cause) => {
            tracing::warn!(executor_id, error = %cause, "submission failed");
            job.finish(RunOutcome::Failed(cause));
            (true, false)
        }
        SubmissionRunResult::CooperativelyCancelled => {
            tracing::debug!(executor_id, "submission cancelled cooperatively");
            job.finish(RunOutcome::Cancelled);
            (cancel_process_after, false)
        }
        SubmissionRunResult::ForciblyCancelled => {
            tracing::debug!(executor_id, "submission cancelled forcibly");
            job.finish(RunOutcome::Cancelled);
            (true, true)
        }
    }
}

enum SubmissionRunResult {
    Done,
    Failed(SubmissionFailure),
    CooperativelyCancelled,
    ForciblyCancelled,
}

/// Drive `commands` in order against `io`, writing each instruction and
/// consuming output until its predicates decide it's done.
///
/// `cancel_requested` is polled at command boundaries for both cooperative
/// and forced cancellation, and mid-command for forced cancellation only —
/// a cooperative cancel always lets the currently-running command finish.
fn run_submission(
    io: &mut ProcessIo,
    commands: &mut [Command],
    mut cancel_requested: impl FnMut() -> Option<bool>,
    command_deadline: Option<Duration>,
) -> SubmissionRunResult {
    for command in commands.iter_mut() {
        if let Some(force) = cancel_requested() {
            if force {
                io.destroy();
                return SubmissionRunResult::ForciblyCancelled;
            }
            return SubmissionRunResult::CooperativelyCancelled;
        }

        if let Err(err) = io.write_instruction(command.instruction()) {
            return SubmissionRunResult::Failed(SubmissionFailure::WriteFailed(err.to_string()));
        }

        let command_started_at = Instant::now();
        loop {
            match io.recv_event(POLL_INTERVAL) {
                IoEvent::Line(tag, line) => match command.observe_line(&line, tag) {
                    LineOutcome::Continue => {}
                    LineOutcome::Complete => break,
                    LineOutcome::Error => return SubmissionRunResult::Failed(SubmissionFailure::CommandErrorTermination),
                },
                IoEvent::BothEof => return SubmissionRunResult::Failed(SubmissionFailure::ProcessDied),
                IoEvent::Timeout => {
                    if let Some(true) = cancel_requested() {
                        io.destroy();
                        return SubmissionRunResult::ForciblyCancelled;
                    }
                    if io.has_exited() {
                        return SubmissionRunResult::Failed(SubmissionFailure::ProcessDied);
                    }
                    if let Some(deadline) = command_deadline {
                        if command_started_at.elapsed() >= deadline {
                            return SubmissionRunResult::Failed(SubmissionFailure::CommandTimedOut);
                        }
                    }
                }
            }
        }
    }
    SubmissionRunResult::Done
}

enum StartupOutcome {
    Ready,
    /// A `Stop` arrived on the executor's channel while still verifying
    /// startup. Distinct from `Failed`: the process isn't misbehaving,
    /// the pool just wants it gone (`force_shutdown`, a construction
    /// interrupt) before it ever reached idle.
    Stopped,
    Failed(String),
}

fn wait_for_startup(io: &mut ProcessIo, manager: &dyn ProcessManager, rx: &Receiver<ExecutorMessage>) -> StartupOutcome {
    loop {
        if matches!(rx.try_recv(), Ok(ExecutorMessage::Stop { .. })) {
            return StartupOutcome::Stopped;
        }
        match io.recv_event(POLL_INTERVAL) {
            IoEvent::Line(tag, line) => {
                if manager.is_started_up(&line, tag.is_stdout()) {
                    return StartupOutcome::Ready;
                }
            }
            IoEvent::BothEof => return StartupOutcome::Failed("process exited before startup predicate fired".to_string()),
            IoEvent::Timeout => {
                if io.has_exited() {
                    return StartupOutcome::Failed("process exited before startup predicate fired".to_string());
                }
            }
        }
    }
}

fn terminate_process(io: &mut ProcessIo, manager: &dyn ProcessManager, grace: Duration) {
    let orderly = {
        let mut shell = IoShell { io, command_deadline: None };
        manager.terminate(&mut shell)
    };
    if orderly {
        let deadline = Instant::now() + grace;
        while !io.has_exited() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
    }
    io.destroy();
}

/// One-executor-scoped [`Shell`] used for `on_startup`/`terminate`. Never
/// subject to cancellation — it always runs to completion or failure.
struct IoShell<'a> {
    io: &'a mut ProcessIo,
    command_deadline: Option<Duration>,
}

impl Shell for IoShell<'_> {
    fn run_commands(&mut self, commands: &mut [Command]) -> Result<(), SubmissionFailure> {
        match run_submission(self.io, commands, || None, self.command_deadline) {
            SubmissionRunResult::Done => Ok(()),
            SubmissionRunResult::Failed(cause) => Err(cause),
            SubmissionRunResult::CooperativelyCancelled | SubmissionRunResult::ForciblyCancelled => {
                unreachable!("IoShell never requests cancellation")
            }
        }
    }
}
