//! # Wire Errors
//!
//! Failures raised while encoding frames or decoding replies. The client
//! crate maps these onto its own taxonomy: `Io` becomes a transport fault,
//! `Protocol` a fatal framing fault.

use thiserror::Error;

/// Result type for codec operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors surfaced by the codec.
#[derive(Debug, Error)]
pub enum WireError {
    /// Reading from or writing to the underlying stream failed, including a
    /// stream that ended in the middle of a reply.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent bytes that do not follow the RESP2 grammar.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A command frame was built without a command name.
    #[error("command frame must contain at least the command name")]
    EmptyFrame,
}

impl WireError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        WireError::Protocol(message.into())
    }
}
