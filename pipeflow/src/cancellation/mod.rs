//! Structured cancellation for pipeline runs.
//!
//! This module provides:
//! - Scope, a tree of one-shot cancellation signals with deadlines
//! - ScopeFork, reusable transforms that derive child scopes
//! - Release, the guard that cancels a derived scope once its owner is done

mod fork;
mod scope;

pub use fork::{Release, ScopeFork};
pub use scope::Scope;
