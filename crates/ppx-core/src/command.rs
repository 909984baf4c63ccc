use crate::StreamTag;

/// What happened after a line was fed to a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// The command is still waiting for more output.
    Continue,
    /// `is_complete` returned true; the command is done.
    Complete,
    /// `is_error_termination` returned true; the command aborts.
    Error,
}

type Predicate = Box<dyn FnMut(&str, bool) -> bool + Send>;

/// A single instruction written to a process's stdin, plus the predicates
/// that decide when its output is complete or has failed, and the
/// accumulated output buffers.
///
/// `is_complete` is invoked exactly once per received output line, after
/// the line has been appended to the command's buffer, so predicates can
/// inspect everything seen so far. The first `true` terminates the
/// command.
pub struct Command {
    instruction: String,
    is_complete: Predicate,
    is_error_termination: Option<Predicate>,
    stdout_lines: Vec<String>,
    stderr_lines: Vec<String>,
}

impl Command {
    /// Build a command from its instruction line and completion predicate.
    ///
    /// `is_complete(line, is_stdout) -> bool` is called once per received
    /// line and should return true once the command has finished.
    pub fn new<F>(instruction: impl Into<String>, is_complete: F) -> Self
    where
        F: FnMut(&str, bool) -> bool + Send + 'static,
    {
        Self {
            instruction: instruction.into(),
            is_complete: Box::new(is_complete),
            is_error_termination: None,
            stdout_lines: Vec::new(),
            stderr_lines: Vec::new(),
        }
    }

    /// Attach an error-termination predicate: if it returns true on any
    /// received line, the command (and its submission) aborts with
    /// [`crate::SubmissionFailure::CommandErrorTermination`].
    pub fn with_error_termination<F>(mut self, is_error_termination: F) -> Self
    where
        F: FnMut(&str, bool) -> bool + Send + 'static,
    {
        self.is_error_termination = Some(Box::new(is_error_termination));
        self
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn stdout_lines(&self) -> &[String] {
        &self.stdout_lines
    }

    pub fn stderr_lines(&self) -> &[String] {
        &self.stderr_lines
    }

    /// Clear accumulated output. Never called automatically by the
    /// executor; callers decide when a command's buffers should reset
    /// (e.g. before reusing a `Command` value across submissions).
    pub fn reset(&mut self) {
        self.stdout_lines.clear();
        self.stderr_lines.clear();
    }

    /// Feed one received line to this command's predicates. Buffers the
    /// line first, then evaluates `is_error_termination` (if any) and
    /// `is_complete`, in that order.
    pub fn observe_line(&mut self, line: &str, tag: StreamTag) -> LineOutcome {
        match tag {
            StreamTag::Stdout => self.stdout_lines.push(line.to_string()),
            StreamTag::Stderr => self.stderr_lines.push(line.to_string()),
        }
        let is_stdout = tag.is_stdout();

        if let Some(predicate) = &mut self.is_error_termination {
            if predicate(line, is_stdout) {
                return LineOutcome::Error;
            }
        }

        if (self.is_complete)(line, is_stdout) {
            LineOutcome::Complete
        } else {
            LineOutcome::Continue
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("instruction", &self.instruction)
            .field("stdout_lines", &self.stdout_lines.len())
            .field("stderr_lines", &self.stderr_lines.len())
            .field("has_error_termination", &self.is_error_termination.is_some())
            .finish()
    }
}
