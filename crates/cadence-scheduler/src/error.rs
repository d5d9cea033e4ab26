use std::fmt;

use thiserror::Error;

/// Why a cron expression was rejected.
///
/// The schedule resolver never surfaces this to callers of the engine; a
/// rejected expression simply has no next occurrence. It is exposed through
/// [`crate::cron::CronExpr::parse`] for tooling that wants to explain why.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronParseError {
    /// Anything other than the five `minute hour dom month dow` fields.
    #[error("expected 5 fields, found {found}")]
    FieldCount { found: usize },

    /// A six-field expression with a leading seconds column.
    #[error("seconds field is not supported (expected 5 fields, found 6)")]
    SecondsField,

    #[error("invalid {field} token: {token:?}")]
    InvalidToken { field: &'static str, token: String },

    #[error("{field} value {value} out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("{field} step must be greater than zero")]
    ZeroStep { field: &'static str },

    #[error("{field} range {start}-{end} is inverted")]
    InvertedRange {
        field: &'static str,
        start: u32,
        end: u32,
    },
}

/// A failed handler invocation.
///
/// Handlers report failure with a message; anything printable converts via
/// [`HandlerError::new`], and a panicking handler is captured as a failure
/// carrying the panic message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
