//! Unified error handling for the graphqa pipeline.
//!
//! One crate-wide error enum covers every failure class: configuration and
//! invariant violations are fatal, external-call failures are retried by the
//! clients before they surface here, and content-level problems are logged and
//! dropped at the call site rather than raised.

use std::fmt;

/// Main error type for the graphqa system
#[derive(Debug)]
pub enum GraphQaError {
    /// Configuration-related errors (unknown provider, missing key, bad path)
    Config {
        /// Error message
        message: String,
    },

    /// Internal invariant violations indicating corrupted state
    Invariant {
        /// Error message
        message: String,
    },

    /// I/O errors from file operations
    Io(std::io::Error),

    /// JSON serialization/deserialization errors
    SerdeJson(serde_json::Error),

    /// HTTP request errors
    Http(Box<ureq::Error>),

    /// Language model call errors (after retries are exhausted)
    LanguageModel {
        /// Error message
        message: String,
    },

    /// Embedding client errors (after retries are exhausted)
    Embedding {
        /// Error message
        message: String,
    },

    /// Open information extraction errors
    OpenIe {
        /// Error message
        message: String,
    },

    /// Persistent store errors
    Storage {
        /// Error message
        message: String,
    },

    /// Retrieval errors
    Retrieval {
        /// Error message
        message: String,
    },

    /// Resource not found errors
    NotFound {
        /// Resource type
        resource: String,
        /// Resource identifier
        id: String,
    },
}

impl fmt::Display for GraphQaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphQaError::Config { message } => {
                write!(f, "Configuration error: {message}")
            },
            GraphQaError::Invariant { message } => {
                write!(f, "Invariant violation: {message}")
            },
            GraphQaError::Io(err) => {
                write!(f, "I/O error: {err}")
            },
            GraphQaError::SerdeJson(err) => {
                write!(f, "JSON error: {err}")
            },
            GraphQaError::Http(err) => {
                write!(f, "HTTP request error: {err}")
            },
            GraphQaError::LanguageModel { message } => {
                write!(f, "Language model error: {message}")
            },
            GraphQaError::Embedding { message } => {
                write!(f, "Embedding error: {message}")
            },
            GraphQaError::OpenIe { message } => {
                write!(f, "OpenIE error: {message}")
            },
            GraphQaError::Storage { message } => {
                write!(f, "Storage error: {message}")
            },
            GraphQaError::Retrieval { message } => {
                write!(f, "Retrieval error: {message}")
            },
            GraphQaError::NotFound { resource, id } => {
                write!(f, "{resource} not found: {id}")
            },
        }
    }
}

impl std::error::Error for GraphQaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GraphQaError::Io(err) => Some(err),
            GraphQaError::SerdeJson(err) => Some(err),
            GraphQaError::Http(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GraphQaError {
    fn from(err: std::io::Error) -> Self {
        GraphQaError::Io(err)
    }
}

impl From<serde_json::Error> for GraphQaError {
    fn from(err: serde_json::Error) -> Self {
        GraphQaError::SerdeJson(err)
    }
}

impl From<ureq::Error> for GraphQaError {
    fn from(err: ureq::Error) -> Self {
        GraphQaError::Http(Box::new(err))
    }
}

/// Convenient Result type alias
pub type Result<T> = std::result::Result<T, GraphQaError>;

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Warning - something unexpected but recoverable
    Warning,
    /// Error - operation failed but the session can continue
    Error,
    /// Critical - session state may be corrupted
    Critical,
}

impl GraphQaError {
    /// Get the severity level of this error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            GraphQaError::Config { .. } => ErrorSeverity::Critical,
            GraphQaError::Invariant { .. } => ErrorSeverity::Critical,
            GraphQaError::Io(_) => ErrorSeverity::Error,
            GraphQaError::SerdeJson(_) => ErrorSeverity::Error,
            GraphQaError::Http(_) => ErrorSeverity::Warning,
            GraphQaError::LanguageModel { .. } => ErrorSeverity::Warning,
            GraphQaError::Embedding { .. } => ErrorSeverity::Warning,
            GraphQaError::OpenIe { .. } => ErrorSeverity::Warning,
            GraphQaError::Storage { .. } => ErrorSeverity::Error,
            GraphQaError::Retrieval { .. } => ErrorSeverity::Warning,
            GraphQaError::NotFound { .. } => ErrorSeverity::Warning,
        }
    }

    /// Check if this error is recoverable within a batch
    pub fn is_recoverable(&self) -> bool {
        self.severity() == ErrorSeverity::Warning
    }
}

/// Trait for adding context to errors
pub trait ErrorContext<T> {
    /// Prefix the error message with context
    fn with_context(self, context: &str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<GraphQaError>,
{
    fn with_context(self, context: &str) -> Result<T> {
        self.map_err(|e| {
            let base = e.into();
            match base {
                GraphQaError::Config { message } => GraphQaError::Config {
                    message: format!("{context}: {message}"),
                },
                GraphQaError::Invariant { message } => GraphQaError::Invariant {
                    message: format!("{context}: {message}"),
                },
                GraphQaError::LanguageModel { message } => GraphQaError::LanguageModel {
                    message: format!("{context}: {message}"),
                },
                GraphQaError::Embedding { message } => GraphQaError::Embedding {
                    message: format!("{context}: {message}"),
                },
                GraphQaError::OpenIe { message } => GraphQaError::OpenIe {
                    message: format!("{context}: {message}"),
                },
                GraphQaError::Storage { message } => GraphQaError::Storage {
                    message: format!("{context}: {message}"),
                },
                GraphQaError::Retrieval { message } => GraphQaError::Retrieval {
                    message: format!("{context}: {message}"),
                },
                other => other,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = GraphQaError::Invariant {
            message: "embedding count mismatch".to_string(),
        };
        assert_eq!(
            format!("{error}"),
            "Invariant violation: embedding count mismatch"
        );
    }

    #[test]
    fn test_error_context() {
        let result: std::result::Result<(), GraphQaError> = Err(GraphQaError::Storage {
            message: "write failed".to_string(),
        });
        let error = result.with_context("saving graph").unwrap_err();
        assert_eq!(format!("{error}"), "Storage error: saving graph: write failed");
    }

    #[test]
    fn test_error_severity() {
        let fatal = GraphQaError::Invariant {
            message: "test".to_string(),
        };
        assert_eq!(fatal.severity(), ErrorSeverity::Critical);
        assert!(!fatal.is_recoverable());

        let soft = GraphQaError::Retrieval {
            message: "test".to_string(),
        };
        assert!(soft.is_recoverable());
    }
}
