//! Execution context for stages.
//!
//! This module provides:
//! - Session, the mutable state every stage runs against
//! - Shared input and output stream handles
//! - An in-memory buffer for capturing output

#[cfg(test)]
mod context_tests;
mod session;
mod streams;

pub use session::Session;
pub use streams::{InputStream, OutputStream, SharedBuffer};
