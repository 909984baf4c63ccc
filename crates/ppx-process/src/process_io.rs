use std::io::Write;
use std::process::{Child, ChildStdin, Command as OsCommand, Stdio};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use ppx_core::{ProcessLaunchSpec, StreamTag};

use crate::stream_reader::{spawn_stream_reader, StreamEvent};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Result of one [`ProcessIo::recv_event`] call.
pub enum IoEvent {
    Line(StreamTag, String),
    /// Both stdout and stderr have closed; the process is presumed dead or
    /// dying. The caller should confirm via `try_wait`.
    BothEof,
    Timeout,
}

/// Owns a spawned child's stdio plumbing: the writer half of stdin, and a
/// single serialized stream of tagged output lines fed by two reader
/// threads. This is the primitive both the submission command loop and the
/// `Shell` facade (startup/termination) are built on.
pub struct ProcessIo {
    child: Child,
    stdin: Option<ChildStdin>,
    events: Receiver<StreamEvent>,
    stdout_eof: bool,
    stderr_eof: bool,
    reader_threads: Vec<JoinHandle<()>>,
}

impl ProcessIo {
    pub fn spawn(spec: &ProcessLaunchSpec) -> anyhow::Result<Self> {
        let mut command = OsCommand::new(&spec.program);
        command.args(&spec.args);
        for (key, value) in &spec.envs {
            command.env(key, value);
        }
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                command.pre_exec(|| {
                    libc::setsid();
                    Ok(())
                });
            }
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn process `{}`", spec.program))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let (tx, rx) = sync_channel(EVENT_CHANNEL_CAPACITY);
        let stdout_handle = spawn_stream_reader(stdout, StreamTag::Stdout, tx.clone());
        let stderr_handle = spawn_stream_reader(stderr, StreamTag::Stderr, tx);

        Ok(Self {
            child,
            stdin,
            events: rx,
            stdout_eof: false,
            stderr_eof: false,
            reader_threads: vec![stdout_handle, stderr_handle],
        })
    }

    pub fn write_instruction(&mut self, instruction: &str) -> std::io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin already closed"))?;
        stdin.write_all(instruction.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.flush()
    }

    /// Wait up to `timeout` for the next tagged line, or report that both
    /// streams have closed, or report a plain timeout.
    pub fn recv_event(&mut self, timeout: Duration) -> IoEvent {
        let deadline = Instant::now() + timeout;
        loop {
            if self.stdout_eof && self.stderr_eof {
                return IoEvent::BothEof;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return IoEvent::Timeout;
            }
            match self.events.recv_timeout(remaining) {
                Ok(StreamEvent::Line(tag, line)) => return IoEvent::Line(tag, line),
                Ok(StreamEvent::Eof(tag)) => {
                    match tag {
                        StreamTag::Stdout => self.stdout_eof = true,
                        StreamTag::Stderr => self.stderr_eof = true,
                    }
                    continue;
                }
                Err(RecvTimeoutError::Timeout) => return IoEvent::Timeout,
                Err(RecvTimeoutError::Disconnected) => return IoEvent::BothEof,
            }
        }
    }

    /// Non-blocking check for whether the child has already exited.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Close stdin (signals EOF to the child), forcibly kill the process
    /// group, join both reader threads, and reap the child. Called on
    /// every exit path per the resource-release discipline. Safe to call
    /// more than once.
    pub fn destroy(&mut self) {
        self.stdin.take();
        kill_process_group(&mut self.child);
        let _ = self.child.wait();
        for handle in self.reader_threads.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    let pid = child.id() as i32;
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppx_core::ProcessLaunchSpec;
    use std::time::Duration;

    fn spec(script: &str) -> ProcessLaunchSpec {
        ProcessLaunchSpec::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn captures_stdout_lines() {
        let mut io = ProcessIo::spawn(&spec("echo one; echo two")).unwrap();
        let mut lines = Vec::new();
        loop {
            match io.recv_event(Duration::from_secs(2)) {
                IoEvent::Line(StreamTag::Stdout, line) => lines.push(line),
                IoEvent::BothEof => break,
                IoEvent::Line(StreamTag::Stderr, _) => {}
                IoEvent::Timeout => panic!("timed out waiting for output"),
            }
        }
        assert_eq!(lines, vec!["one", "two"]);
        io.destroy();
        // destroy is idempotent
        io.destroy();
    }

    #[test]
    fn write_instruction_reaches_child_stdin() {
        let mut io = ProcessIo::spawn(&spec("read line; echo \"got:$line\"")).unwrap();
        io.write_instruction("hello").unwrap();
        loop {
            match io.recv_event(Duration::from_secs(2)) {
                IoEvent::Line(StreamTag::Stdout, line) => {
                    assert_eq!(line, "got:hello");
                    break;
                }
                IoEvent::BothEof => panic!("process exited before replying"),
                _ => {}
            }
        }
        io.destroy();
    }

    #[test]
    fn destroy_reaps_the_child() {
        let mut io = ProcessIo::spawn(&spec("sleep 30")).unwrap();
        assert!(!io.has_exited());
        io.destroy();
    }
}
