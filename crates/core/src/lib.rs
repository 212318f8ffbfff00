//! Shared primitives for all Rust crates in Primacy.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across Primacy crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Creates a validated non-empty string, naming the field in the error.
    pub fn for_field(field: &str, value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(format!("{field} must not be empty")));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

impl std::fmt::Display for NonEmptyString {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Common error categories for lock backends and coordination.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant. Raised before any backend I/O.
    #[error("validation error: {0}")]
    Validation(String),

    /// Backend resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Another owner holds the resource.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backend confirmed the lease now belongs to someone else.
    #[error("lease lost: {0}")]
    LeaseLost(String),

    /// Backend failure that may succeed on a later attempt.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// Backend unreachable or answered with an unexpected status.
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation abandoned because its cancellation token fired.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns true when retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns a short stable label for structured logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::LeaseLost(_) => "lease_lost",
            Self::Transient(_) => "transient",
            Self::Transport(_) => "transport",
            Self::Cancelled(_) => "cancelled",
            Self::Internal(_) => "internal",
        }
    }
}
