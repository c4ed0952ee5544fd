//! Error types for client operations.

use std::io;

use redpipe_proto::WireError;
use thiserror::Error;

/// The error type shared by the sync session and the async engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport could not be established.
    #[error("connection error: {0}")]
    Connection(String),

    /// Operation attempted without a live connection.
    #[error("not connected")]
    NotConnected,

    /// Server returned an error reply; carries the message verbatim.
    #[error("server error: {0}")]
    Remote(String),

    /// Reply accessed with an accessor incompatible with its actual tag.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Array index at or past the array length.
    #[error("index {index} out of range for array of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// String form of a reply could not be parsed into the requested type.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// RESP2 framing violation on an established transport.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Read or write failure on an established transport.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Protocol(message) => Error::Protocol(message),
            WireError::Io(err) => Error::Io(err),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
