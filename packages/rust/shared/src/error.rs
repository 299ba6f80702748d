//! Error types for docqa.
//!
//! Library crates use [`DocQaError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all docqa operations.
#[derive(Debug, thiserror::Error)]
pub enum DocQaError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level HTTP failure (connect, timeout, body read).
    #[error("network error: {0}")]
    Network(String),

    /// A model service call failed (non-2xx, empty candidates, bad payload).
    #[error("{service} call failed: {message}")]
    ExternalCall { service: String, message: String },

    /// Document or response parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or vector collection error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, empty input, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A referenced document or image asset does not exist.
    #[error("source missing: {}", path.display())]
    SourceMissing { path: PathBuf },

    /// The vector collection is not available for querying.
    #[error("index unavailable: {reason}")]
    IndexUnavailable { reason: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocQaError>;

impl DocQaError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an external-call error for the named service.
    pub fn external(service: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ExternalCall {
            service: service.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error means a referenced input simply was not there.
    pub fn is_source_missing(&self) -> bool {
        match self {
            Self::SourceMissing { .. } => true,
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DocQaError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = DocQaError::external("gemini", "HTTP 429");
        assert_eq!(err.to_string(), "gemini call failed: HTTP 429");

        let err = DocQaError::SourceMissing {
            path: PathBuf::from("docs/Overview.docx"),
        };
        assert!(err.to_string().contains("Overview.docx"));
    }

    #[test]
    fn not_found_io_counts_as_missing_source() {
        let err = DocQaError::io(
            "images/a.png",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_source_missing());

        let err = DocQaError::io(
            "images/a.png",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(!err.is_source_missing());
    }
}
