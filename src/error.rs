//! Error types for libbinja.

use std::time::Duration;

/// Errors that can occur when using libbinja.
///
/// Errors are organized by category:
/// - Configuration errors: detected at `build()` time
/// - Start errors: failed to launch the analysis server
/// - IO errors: writing to the server's stdin failed
/// - Protocol errors: malformed JSON in either direction
/// - Runtime errors: remote failures, timeouts and connection teardown
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    // -------------------------------------------------------------------------
    // Configuration errors (detected at build() time)
    // -------------------------------------------------------------------------
    /// Invalid configuration provided to builder.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // -------------------------------------------------------------------------
    // Start errors
    // -------------------------------------------------------------------------
    /// Server executable (or its interpreter) could not be located.
    #[error("analysis server not found (searched: {program})")]
    ServerNotFound { program: String },

    /// Failed to spawn the server subprocess.
    #[error("failed to spawn analysis server: {0}")]
    ProcessSpawn(#[source] std::io::Error),

    // -------------------------------------------------------------------------
    // IO errors
    // -------------------------------------------------------------------------
    /// IO error writing to the server's stdin.
    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),

    // -------------------------------------------------------------------------
    // Protocol errors
    // -------------------------------------------------------------------------
    /// Failed to encode or decode a JSON frame.
    #[error("failed to parse JSON: {message}")]
    JsonParse {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    // -------------------------------------------------------------------------
    // Runtime errors
    // -------------------------------------------------------------------------
    /// The server reported a failure for this request.
    #[error("remote error: {message}")]
    Remote {
        message: String,
        /// Server-side traceback, when the server sent one.
        traceback: Option<String>,
    },

    /// No response arrived within the per-attempt deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The connection was torn down before a response arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// A request was issued before `start()`.
    #[error("client not started")]
    NotStarted,

    /// `start()` was called on a client that is already running.
    #[error("client already started")]
    AlreadyStarted,
}

/// A specialized Result type for libbinja operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a JSON parse error with context.
    pub fn json_parse(source: serde_json::Error, raw: &str) -> Self {
        Self::JsonParse {
            message: format!(
                "at column {}: {}",
                source.column(),
                raw.chars().take(100).collect::<String>()
            ),
            source,
        }
    }

    /// Create an IO error.
    pub fn io(source: std::io::Error) -> Self {
        Self::Io(source)
    }

    /// Create a remote error from the fields of a failed response.
    pub fn remote(message: impl Into<String>, traceback: Option<String>) -> Self {
        Self::Remote {
            message: message.into(),
            traceback,
        }
    }

    /// Check if this error was reported by the server.
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Remote { .. })
    }

    /// Check if this error is retryable.
    ///
    /// Remote errors are retryable here; [`RetryPolicy`](crate::RetryPolicy)
    /// can opt out of retrying them.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Io(_) | Error::Remote { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::JsonParse {
            message: err.to_string(),
            source: err,
        }
    }
}
