//! Shared error plumbing.
//!
//! Each layer owns its own `thiserror` enum. They all implement
//! [`ErrorCode`] so callers can surface a grepable code and a retry hint
//! without matching on the concrete type.

use serde::Serialize;

/// Grepable error code and retryable flag for structured error output.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Serializable view of a typed error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl ErrorReport {
    #[must_use]
    pub fn from_error(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self { code: err.error_code(), message: err.to_string(), retryable: err.retryable() }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
