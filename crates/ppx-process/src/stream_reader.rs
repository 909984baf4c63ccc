use std::io::Read;
use std::sync::mpsc::SyncSender;
use std::thread::{self, JoinHandle};

use ppx_core::StreamTag;

/// One event produced by a [`spawn_stream_reader`] thread.
pub enum StreamEvent {
    Line(StreamTag, String),
    Eof(StreamTag),
}

const READ_BUF_SIZE: usize = 4096;

/// Spawn a thread that reads `reader` to EOF, splitting on `\n` (stripping
/// a trailing `\r`) and delivering each line to `sink` tagged with
/// `tag`, in arrival order. Blank lines are preserved. I/O errors are
/// treated the same as EOF — fatality is the executor's call, based on
/// the process exit code, not the reader's.
pub fn spawn_stream_reader<R>(mut reader: R, tag: StreamTag, sink: SyncSender<StreamEvent>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    let name = match tag {
        StreamTag::Stdout => "ppx-stdout-reader",
        StreamTag::Stderr => "ppx-stderr-reader",
    };
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut buf = [0u8; READ_BUF_SIZE];
            let mut pending = Vec::new();
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        flush_partial(&mut pending, tag, &sink);
                        let _ = sink.send(StreamEvent::Eof(tag));
                        return;
                    }
                    Ok(n) => {
                        pending.extend_from_slice(&buf[..n]);
                        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                            let mut line_bytes: Vec<u8> = pending.drain(..=pos).collect();
                            line_bytes.pop(); // trailing '\n'
                            if line_bytes.last() == Some(&b'\r') {
                                line_bytes.pop();
                            }
                            let line = String::from_utf8_lossy(&line_bytes).into_owned();
                            if sink.send(StreamEvent::Line(tag, line)).is_err() {
                                return;
                            }
                        }
                    }
                    Err(_) => {
                        flush_partial(&mut pending, tag, &sink);
                        let _ = sink.send(StreamEvent::Eof(tag));
                        return;
                    }
                }
            }
        })
        .expect("failed to spawn stream reader thread")
}

fn flush_partial(pending: &mut Vec<u8>, tag: StreamTag, sink: &SyncSender<StreamEvent>) {
    if !pending.is_empty() {
        let line = String::from_utf8_lossy(pending).into_owned();
        pending.clear();
        let _ = sink.send(StreamEvent::Line(tag, line));
    }
}
