//! Testing utilities for pipeflow pipelines.
//!
//! This module provides:
//! - Mock stages that record, fail, stall or transform their streams
//! - Fixtures for running a single stage over in-memory input
//! - Sinks that verify or reject what is written to them

mod fixtures;
mod mocks;

pub use fixtures::{pattern_bytes, run_filter, BrokenSink, PatternCheck};
pub use mocks::{
    BlockingStage, EmitStage, FailingStage, RecordedRun, RecordingStage, SlowStage,
    UppercaseStage,
};
