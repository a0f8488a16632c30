//! Live log streaming to viewers

pub mod events;
pub mod tail;

pub use events::{classify_line, LineKind, StreamEvent};
pub use tail::{spawn_build_log_stream, spawn_container_log_stream, TailOptions};
