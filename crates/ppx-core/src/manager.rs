use std::path::PathBuf;

use crate::command::Command;
use crate::error::SubmissionFailure;

/// Launch configuration for one hosted process, as produced by
/// [`ProcessManager::new_process`].
#[derive(Debug, Clone)]
pub struct ProcessLaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl ProcessLaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

/// A one-executor-scoped facility for running a command list synchronously
/// against a hosted process's stdin/stdout/stderr, outside of the normal
/// submission-dispatch path. Implemented by `ppx-process`'s
/// `ProcessExecutor`; consumed by [`ProcessManager::on_startup`] and
/// [`ProcessManager::terminate`].
pub trait Shell {
    /// Write each command's instruction and collect output until its
    /// predicates decide it's done, in order. Returns an error on the
    /// first command that fails (process death, write failure, or an
    /// error-termination predicate firing).
    fn run_commands(&mut self, commands: &mut [Command]) -> Result<(), SubmissionFailure>;
}

/// User-supplied per-process policy: how to launch a process, how to tell
/// it has finished starting up, and how to ask it to stop.
///
/// This is consumed by the pool, never implemented by it — concrete
/// command subtypes, their parsing, and the launch policy for a specific
/// CLI/interpreter/solver are all external to this crate.
pub trait ProcessManager: Send + Sync {
    fn new_process(&self) -> ProcessLaunchSpec;

    /// When true, the process is considered ready as soon as it spawns
    /// (after any init submission); `is_started_up` is never consulted.
    fn starts_up_instantly(&self) -> bool {
        true
    }

    /// Consulted only when `starts_up_instantly` is false: called once per
    /// received line (either stream) until it returns true.
    fn is_started_up(&self, _line: &str, _is_stdout: bool) -> bool {
        true
    }

    /// Run once, synchronously, right after startup verification and
    /// before the executor is declared idle. Returning `Err` fails
    /// startup for this process.
    fn on_startup(&self, _shell: &mut dyn Shell) -> Result<(), SubmissionFailure> {
        Ok(())
    }

    /// Attempt orderly shutdown. Return true on success; false (or a
    /// failure inside `run_commands`) falls back to forced destruction.
    fn terminate(&self, _shell: &mut dyn Shell) -> bool {
        false
    }
}
