//! Error type returned by document store operations.

use std::fmt;

/// Failure of a document store operation, carrying a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Missing or malformed parameter, e.g. a document name without `.json`.
    InvalidArgument(String),
    /// The document already exists where absence was required.
    Conflict(String),
    /// The document (or, at the HTTP boundary, the key) does not exist.
    NotFound(String),
    /// Any other storage failure: permissions, unreadable or non-object content.
    Io(String),
}

impl StoreError {
    pub fn message(&self) -> &str {
        match self {
            StoreError::InvalidArgument(m)
            | StoreError::Conflict(m)
            | StoreError::NotFound(m)
            | StoreError::Io(m) => m,
        }
    }

    /// HTTP status code the error is surfaced with.
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::InvalidArgument(_) => 400,
            StoreError::Conflict(_) => 409,
            StoreError::NotFound(_) => 404,
            StoreError::Io(_) => 500,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for StoreError {}
