//! Error types for jsonsock.
//!
//! Every failure an endpoint can hit is a [`SocketError`]. Failures raised on a
//! background task are captured as values by the
//! [`BackgroundWorker`](crate::worker::BackgroundWorker) instead of panicking
//! across the task boundary.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Main error type for endpoint operations.
#[derive(Debug, Error)]
pub enum SocketError {
    // Lifecycle errors
    #[error("Endpoint is not connected")]
    NotConnected,

    #[error("Endpoint already has an active connection or attempt")]
    AlreadyConnected,

    #[error("Server endpoint is not bound")]
    NotBound,

    #[error("Server endpoint is already bound to {addr}")]
    AlreadyBound { addr: SocketAddr },

    #[error("Connection closed")]
    Closed,

    // Transport errors
    #[error("Failed to connect to {address}:{port}: {message}")]
    ConnectFailed {
        address: String,
        port: u16,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to bind {address}:{port}: {message}")]
    BindFailed {
        address: String,
        port: u16,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Framing and serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Frame of {len} bytes exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Invalid modified UTF-8 in frame: {message}")]
    InvalidUtf8 { message: String },

    // Background worker errors
    #[error("Background worker '{label}' was already started")]
    WorkerAlreadyStarted { label: String },

    #[error("Background worker '{label}' terminated without reporting an outcome")]
    WorkerPanicked { label: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for jsonsock operations.
pub type Result<T> = std::result::Result<T, SocketError>;

impl From<std::io::Error> for SocketError {
    fn from(err: std::io::Error) -> Self {
        SocketError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SocketError {
    fn from(err: serde_json::Error) -> Self {
        SocketError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl SocketError {
    /// Create a connect error for the given target.
    pub fn connect_failed(address: impl Into<String>, port: u16, err: std::io::Error) -> Self {
        SocketError::ConnectFailed {
            address: address.into(),
            port,
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create a bind error for the given local address.
    pub fn bind_failed(address: impl Into<String>, port: u16, err: std::io::Error) -> Self {
        SocketError::BindFailed {
            address: address.into(),
            port,
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Check if this error is a timeout, either our own read/accept/connect
    /// timer or an OS-level timeout surfaced through IO.
    pub fn is_timeout(&self) -> bool {
        match self {
            SocketError::Timeout(_) => true,
            SocketError::Io {
                source: Some(err), ..
            }
            | SocketError::ConnectFailed {
                source: Some(err), ..
            } => matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Check if this error means the peer went away or the stream was torn down.
    pub fn is_disconnect(&self) -> bool {
        match self {
            SocketError::Closed | SocketError::NotConnected => true,
            SocketError::Io {
                source: Some(err), ..
            } => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
