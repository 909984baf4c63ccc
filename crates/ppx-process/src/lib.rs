//! Single-process supervision: the stream reader, the blocking process I/O
//! primitive built on it, and the executor lifecycle state machine
//! (`starting -> idle -> busy -> stopping -> stopped`).

mod executor;
mod process_io;
mod stream_reader;

pub use executor::{spawn_executor, ExecutorMessage, ExecutorObserver};
pub use process_io::{IoEvent, ProcessIo};
pub use stream_reader::{spawn_stream_reader, StreamEvent};
