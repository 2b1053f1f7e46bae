//! Pipeline composition and execution.
//!
//! This module provides:
//! - Sequential composition (Script, Source)
//! - Concurrent connected composition (Line) over in-memory pipes
//! - Timeout and deadline wrappers
//! - Top-level run helpers

mod line;
mod pipe;
mod run;
mod script;
mod timeout;

pub use line::{line, Line};
pub use pipe::{pipe, pipe_with_capacity, PipeReader, PipeWriter, PIPE_BUFFER_SIZE};
pub use run::{combined_output, output, run, run_with};
pub use script::{script, source, Script, Source};
pub use timeout::{with_deadline, with_scope, with_timeout, WithScope};
