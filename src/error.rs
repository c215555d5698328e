//! Invariant violations surfaced to callers.
//!
//! Everything else travels as `anyhow::Error`; these are the cases a caller
//! is expected to match on, via `err.downcast_ref::<ValidationError>()`.

use chrono::NaiveTime;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("wake window {start}..{end} is empty")]
    InvalidWakeWindow { start: NaiveTime, end: NaiveTime },

    #[error("session {0} has not ended")]
    SessionNotCompleted(String),

    #[error("session {0} already ended")]
    SessionAlreadyCompleted(String),

    #[error("session {session_id} has invalid duration {duration_min} min")]
    InvalidDuration { session_id: String, duration_min: f64 },

    #[error("sleep goal must be a positive number of hours, got {0}")]
    InvalidSleepGoal(f64),

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("tracking already active for session {0}")]
    TrackingAlreadyActive(String),
}
