//! # Pipeflow
//!
//! Composable process pipelines for async Rust.
//!
//! Pipeflow builds shell-style pipelines out of stages:
//!
//! - **Sequential composition**: [`script`] runs stages one after another on
//!   an isolated copy of the session, [`source`] on the session itself
//! - **Concurrent composition**: [`line`] runs stages at the same time,
//!   connecting each stage's output to the next stage's input
//! - **External processes**: [`exec`] runs a program with the session's
//!   directory, environment and streams
//! - **Cancellation**: every session carries a cancellation scope; timeouts
//!   and deadlines narrow it for a sub-stage
//! - **Stream filters**: line selection, substring and regex rewriting,
//!   gzip, base64 and JSON stages in [`filters`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipeflow::prelude::*;
//!
//! let stage = line(vec![
//!     script(vec![exec("echo", ["-n", "hello"]), exec("echo", [" world"])]),
//!     exec("sed", ["s/o/O/g"]),
//! ]);
//! let bytes = output(stage.as_ref()).await?;
//! assert_eq!(bytes, b"hellO wOrld\n");
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod context;
pub mod errors;
pub mod filters;
pub mod observability;
pub mod pipeline;
pub mod process;
pub mod stages;
pub mod testing;

pub use errors::{OutputError, PipeError, Result};
pub use pipeline::{
    combined_output, line, output, run, run_with, script, source, with_deadline, with_timeout,
};
pub use process::exec;
pub use stages::{Stage, StageRef};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{Release, Scope, ScopeFork};
    pub use crate::context::{InputStream, OutputStream, Session, SharedBuffer};
    pub use crate::errors::{Cause, OutputError, PipeError, Result, StreamKind};
    pub use crate::pipeline::{
        combined_output, line, output, run, run_with, script, source, with_deadline,
        with_scope, with_timeout, Line, Script, Source, WithScope,
    };
    pub use crate::process::{exec, Exec};
    pub use crate::stages::{fail, fail_msg, func, named, Func, Stage, StageRef};
}
