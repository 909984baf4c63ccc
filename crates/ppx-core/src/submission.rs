use crate::command::Command;
use crate::handle::HandleController;
use crate::{CancelQuery, PoolError, SubmissionFailure};

type ResultFn<T> = Box<dyn FnOnce(&[Command]) -> T + Send>;
type Hook = Box<dyn FnMut() + Send>;

/// An ordered, non-empty sequence of [`Command`]s executed on a single
/// process. Commands never migrate between processes and always run in
/// declaration order.
pub struct Submission<T> {
    commands: Vec<Command>,
    cancel_process_after: bool,
    result_fn: ResultFn<T>,
    on_started: Option<Hook>,
    on_finished: Option<Hook>,
}

impl<T> Submission<T> {
    /// Build a submission from a non-empty command sequence and the
    /// closure that extracts its result value once every command has
    /// completed.
    ///
    /// # Panics
    ///
    /// Panics if `commands` is empty — a submission with no commands is a
    /// programmer error, not a runtime condition callers can recover from.
    pub fn new<F>(commands: Vec<Command>, result: F) -> Self
    where
        F: FnOnce(&[Command]) -> T + Send + 'static,
    {
        assert!(!commands.is_empty(), "Submission must contain at least one command");
        Self {
            commands,
            cancel_process_after: false,
            result_fn: Box::new(result),
            on_started: None,
            on_finished: None,
        }
    }

    /// When true, the hosting process is terminated once this submission
    /// finishes, instead of being returned to the idle pool.
    pub fn with_cancel_process_after(mut self, cancel_process_after: bool) -> Self {
        self.cancel_process_after = cancel_process_after;
        self
    }

    pub fn with_on_started<F>(mut self, hook: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.on_started = Some(Box::new(hook));
        self
    }

    pub fn with_on_finished<F>(mut self, hook: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.on_finished = Some(Box::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn cancel_process_after(&self) -> bool {
        self.cancel_process_after
    }
}

impl Submission<()> {
    /// Convenience for submissions whose caller doesn't need a result value.
    pub fn new_void(commands: Vec<Command>) -> Self {
        Self::new(commands, |_| ())
    }
}

/// Outcome of running a submission to completion, used internally to route
/// the result back through a type-erased [`Job`].
pub enum RunOutcome {
    Done,
    Failed(SubmissionFailure),
    Cancelled,
}

/// Type-erased submission + its handle controller, so the process-executor
/// engine (which doesn't know the caller's result type `T`) can drive any
/// submission through to completion.
pub trait ExecutableSubmission: Send {
    fn commands_mut(&mut self) -> &mut [Command];
    fn cancel_process_after(&self) -> bool;
    fn fire_on_started(&mut self);
    fn fire_on_finished(&mut self);

    /// An independently-owned cancellation query, so callers can poll it
    /// while also holding a mutable borrow of `commands_mut`'s slice.
    fn cancel_query(&self) -> Box<dyn Fn() -> Option<bool> + Send>;

    /// An independently-owned force-cancel trigger, captured before this
    /// job is handed off to an executor thread so the pool can abort it
    /// from outside (e.g. `force_shutdown`) without holding the caller's
    /// `SubmissionHandle`.
    fn remote_cancel(&self) -> Box<dyn Fn() + Send>;

    fn finish(self: Box<Self>, outcome: RunOutcome);
}

/// Pairs a [`Submission<T>`] with the controller side of its
/// [`crate::SubmissionHandle<T>`]. This is the concrete type boxed as
/// `dyn ExecutableSubmission` when a submission is enqueued.
pub struct Job<T> {
    submission: Submission<T>,
    controller: HandleController<T>,
}

impl<T> Job<T> {
    pub fn new(submission: Submission<T>, controller: HandleController<T>) -> Self {
        Self { submission, controller }
    }
}

impl<T: Send + 'static> ExecutableSubmission for Job<T> {
    fn commands_mut(&mut self) -> &mut [Command] {
        &mut self.submission.commands
    }

    fn cancel_process_after(&self) -> bool {
        self.submission.cancel_process_after
    }

    fn fire_on_started(&mut self) {
        self.controller.mark_running();
        if let Some(hook) = &mut self.submission.on_started {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook()));
        }
    }

    fn fire_on_finished(&mut self) {
        if let Some(hook) = &mut self.submission.on_finished {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook()));
        }
    }

    fn cancel_query(&self) -> Box<dyn Fn() -> Option<bool> + Send> {
        let query: CancelQuery<T> = self.controller.cancel_query();
        Box::new(move || query.get())
    }

    fn remote_cancel(&self) -> Box<dyn Fn() + Send> {
        let remote = self.controller.remote_cancel();
        Box::new(move || remote.trigger())
    }

    fn finish(self: Box<Self>, outcome: RunOutcome) {
        let this = *self;
        match outcome {
            RunOutcome::Done => {
                let commands = &this.submission.commands;
                let result_fn = this.submission.result_fn;
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| result_fn(commands))) {
                    Ok(value) => this.controller.finish_ok(value),
                    Err(payload) => this
                        .controller
                        .finish_err(PoolError::SubmissionFailed(SubmissionFailure::CallbackPanicked(panic_message(&payload)))),
                }
            }
            RunOutcome::Failed(cause) => {
                this.controller.finish_err(PoolError::SubmissionFailed(cause));
            }
            RunOutcome::Cancelled => {
                this.controller.finish_cancelled();
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "result callback panicked".to_string()
    }
}
