//! Error types for the stretchkit crate.

use std::fmt;

/// Errors that can occur while configuring or driving the stretcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StretchError {
    /// Invalid construction parameter (ratio, channel count, sample rate).
    InvalidParameter(String),
    /// An operation was called in a lifecycle state that does not permit it.
    UsageOrder {
        operation: &'static str,
        state: &'static str,
    },
    /// A single `process` call supplied more input than the rings can
    /// absorb; pace calls with `samples_required` or grow the limit with
    /// `set_max_process_size`.
    Backpressure { provided: usize, consumed: usize },
}

impl fmt::Display for StretchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StretchError::InvalidParameter(msg) => write!(f, "invalid parameter: {}", msg),
            StretchError::UsageOrder { operation, state } => {
                write!(f, "cannot call {} while {}", operation, state)
            }
            StretchError::Backpressure { provided, consumed } => {
                write!(
                    f,
                    "too much data provided to process: {} of {} samples consumed",
                    consumed, provided
                )
            }
        }
    }
}

impl std::error::Error for StretchError {}
