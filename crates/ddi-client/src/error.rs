//! Error types for the DDI client crate.

use thiserror::Error;

/// Result type alias for DDI client operations.
pub type Result<T> = std::result::Result<T, DdiError>;

/// Classification of a failure, used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The server answered 401; recoverable once through the auth-error handler.
    Unauthorized,
    /// The server answered with a status other than the expected one.
    StatusMismatch,
    /// Connection, DNS, TLS or body I/O failure inside the HTTP client.
    Transport,
    /// No endpoint configured and nothing able to provide one.
    NotInitialized,
    /// A poll or action document could not be decoded.
    MalformedResponse,
    /// Credential material (token or PEM keypair) is unusable.
    Credentials,
    /// An endpoint string was rejected before any request was made.
    InvalidEndpoint,
    /// Local I/O failure, e.g. writing a downloaded artifact.
    Io,
    /// A download receiver asked to stop the transfer.
    Aborted,
}

/// Errors that can occur while talking to the update server.
#[derive(Debug, Error)]
pub enum DdiError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// No progress within the request timeout
    #[error("Timed out: {0}")]
    TimedOut(String),

    /// Server rejected the configured credentials
    #[error("unauthorized")]
    Unauthorized,

    /// Server replied with an unexpected status
    #[error("unexpected HTTP status {presented} (expected {expected})")]
    UnexpectedStatus { presented: u16, expected: u16 },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Response decoded but did not have the required shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Client started without an endpoint and without an auth-error handler
    #[error("Client not initialized: {0}")]
    NotInitialized(String),

    /// Invalid token or TLS keypair
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Endpoint string is not an absolute URI
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transfer stopped by the receiver
    #[error("Transfer aborted by receiver")]
    TransferAborted,
}

impl DdiError {
    /// Create an unexpected-status error
    pub fn unexpected_status(presented: u16, expected: u16) -> Self {
        Self::UnexpectedStatus {
            presented,
            expected,
        }
    }

    /// Create a malformed response error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Create a not-initialized error
    pub fn not_initialized(message: impl Into<String>) -> Self {
        Self::NotInitialized(message.into())
    }

    /// Create an invalid credentials error
    pub fn credentials(message: impl Into<String>) -> Self {
        Self::InvalidCredentials(message.into())
    }

    /// Create a timeout error
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::TimedOut(message.into())
    }

    /// Create an invalid endpoint error
    pub fn endpoint(message: impl Into<String>) -> Self {
        Self::InvalidEndpoint(message.into())
    }

    /// HTTP status presented by the server, if this error carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::UnexpectedStatus { presented, .. } => Some(*presented),
            _ => None,
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(_) | Self::TimedOut(_) => ErrorKind::Transport,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::UnexpectedStatus { .. } => ErrorKind::StatusMismatch,
            Self::Json(_) | Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Self::NotInitialized(_) => ErrorKind::NotInitialized,
            Self::InvalidCredentials(_) => ErrorKind::Credentials,
            Self::InvalidEndpoint(_) => ErrorKind::InvalidEndpoint,
            Self::Io(_) => ErrorKind::Io,
            Self::TransferAborted => ErrorKind::Aborted,
        }
    }
}
