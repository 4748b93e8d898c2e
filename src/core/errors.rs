// src/core/errors.rs

//! Defines the primary error type for the entire engine.

use std::num::ParseIntError;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure a public operation can report.
///
/// The first five variants form the user-facing taxonomy. The remaining ones describe
/// transport-level failures; they are grouped under `ConnectionError` by [`KeydeckError::category`].
#[derive(Error, Debug)]
pub enum KeydeckError {
    /// An unknown server name, or a key that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The liveness check or the dial failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The operation is not valid on the current topology.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A decode, encode or format step failed structurally.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// The caller supplied a value shape incompatible with the declared key type.
    #[error("validation error: {0}")]
    Validation(String),

    /// An error reply from the server. The text is kept verbatim.
    #[error("{0}")]
    Server(String),

    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// The server sent a reply that could not be parsed or was of an unexpected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("Incomplete data in stream")]
    IncompleteData,

    /// The session owning the command was closed while the command was in flight.
    #[error("operation cancelled: session '{0}' closed")]
    Cancelled(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

/// The user-facing error category of a [`KeydeckError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ErrorCategory {
    NotFound,
    ConnectionError,
    Unsupported,
    ConversionError,
    ValidationError,
    ServerError,
}

impl KeydeckError {
    /// Maps the error onto the user-facing taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            KeydeckError::NotFound(_) => ErrorCategory::NotFound,
            KeydeckError::Unsupported(_) => ErrorCategory::Unsupported,
            KeydeckError::Conversion(_) => ErrorCategory::ConversionError,
            KeydeckError::Validation(_) => ErrorCategory::ValidationError,
            KeydeckError::Server(_) => ErrorCategory::ServerError,
            KeydeckError::Connection(_)
            | KeydeckError::Io(_)
            | KeydeckError::Protocol(_)
            | KeydeckError::IncompleteData
            | KeydeckError::Cancelled(_)
            | KeydeckError::Timeout(_) => ErrorCategory::ConnectionError,
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for KeydeckError {
    fn clone(&self) -> Self {
        match self {
            KeydeckError::NotFound(s) => KeydeckError::NotFound(s.clone()),
            KeydeckError::Connection(s) => KeydeckError::Connection(s.clone()),
            KeydeckError::Unsupported(s) => KeydeckError::Unsupported(s.clone()),
            KeydeckError::Conversion(s) => KeydeckError::Conversion(s.clone()),
            KeydeckError::Validation(s) => KeydeckError::Validation(s.clone()),
            KeydeckError::Server(s) => KeydeckError::Server(s.clone()),
            KeydeckError::Io(e) => KeydeckError::Io(Arc::clone(e)),
            KeydeckError::Protocol(s) => KeydeckError::Protocol(s.clone()),
            KeydeckError::IncompleteData => KeydeckError::IncompleteData,
            KeydeckError::Cancelled(s) => KeydeckError::Cancelled(s.clone()),
            KeydeckError::Timeout(s) => KeydeckError::Timeout(s.clone()),
        }
    }
}

impl PartialEq for KeydeckError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (KeydeckError::Io(e1), KeydeckError::Io(e2)) => e1.to_string() == e2.to_string(),
            (KeydeckError::NotFound(s1), KeydeckError::NotFound(s2))
            | (KeydeckError::Connection(s1), KeydeckError::Connection(s2))
            | (KeydeckError::Unsupported(s1), KeydeckError::Unsupported(s2))
            | (KeydeckError::Conversion(s1), KeydeckError::Conversion(s2))
            | (KeydeckError::Validation(s1), KeydeckError::Validation(s2))
            | (KeydeckError::Server(s1), KeydeckError::Server(s2))
            | (KeydeckError::Protocol(s1), KeydeckError::Protocol(s2))
            | (KeydeckError::Cancelled(s1), KeydeckError::Cancelled(s2))
            | (KeydeckError::Timeout(s1), KeydeckError::Timeout(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for KeydeckError {
    fn from(e: std::io::Error) -> Self {
        KeydeckError::Io(Arc::new(e))
    }
}

impl From<std::string::FromUtf8Error> for KeydeckError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        KeydeckError::Conversion(format!("invalid UTF-8: {e}"))
    }
}

impl From<ParseIntError> for KeydeckError {
    fn from(e: ParseIntError) -> Self {
        KeydeckError::Protocol(format!("expected an integer: {e}"))
    }
}

impl From<serde_json::Error> for KeydeckError {
    fn from(e: serde_json::Error) -> Self {
        KeydeckError::Conversion(format!("JSON error: {e}"))
    }
}
