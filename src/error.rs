//! Error types for memgate
//!
//! One unified error enum whose variants mirror the protocol's error
//! taxonomy: framing errors are recoverable and answered with `ERROR`,
//! client errors with `CLIENT_ERROR`, backend and lock failures with
//! `SERVER_ERROR`, and I/O errors terminate the connection without a reply.

use thiserror::Error;

/// Result type alias using GateError
pub type Result<T> = std::result::Result<T, GateError>;

/// Unified error type for memgate operations
#[derive(Debug, Error)]
pub enum GateError {
    // -------------------------------------------------------------------------
    // Connection-level errors (terminate the connection, never sent to peer)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Protocol errors (connection survives)
    // -------------------------------------------------------------------------
    /// Malformed or truncated request, answered with a bare `ERROR` line
    #[error("framing error: {0}")]
    Framing(String),

    /// Well-framed but semantically invalid input, answered with `CLIENT_ERROR`
    #[error("client error: {0}")]
    Client(String),

    // -------------------------------------------------------------------------
    // Collaborator errors (connection survives, answered with SERVER_ERROR)
    // -------------------------------------------------------------------------
    #[error("backend error: {0}")]
    Backend(String),

    #[error("lock unavailable: {0}")]
    LockUnavailable(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),
}

impl GateError {
    /// Whether the connection can keep serving requests after this error.
    ///
    /// Only transport-level I/O failures are fatal to the connection;
    /// everything else is reported to the peer as a protocol error line.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, GateError::Io(_))
    }
}
