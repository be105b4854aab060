//! Typed errors surfaced by the engine's public API.
//!
//! Execution failures inside a running task are not represented here; the
//! task service captures those as `TaskState::Error` records instead.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The sequence field was exhausted within a single millisecond.
    /// Non-retryable at the current instant; clears once the clock advances.
    #[error("id generator overflow: sequence exhausted within one millisecond")]
    IdOverflow,

    #[error("invalid time range: start {from_secs}s must be before end {to_secs}s")]
    InvalidTimeRange { from_secs: u64, to_secs: u64 },

    #[error("time format error: expected HH:MM:SS, got {0:?}")]
    TimeFormat(String),
}
