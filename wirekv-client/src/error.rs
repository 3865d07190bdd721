//! # Client Errors
//!
//! Purpose: One error taxonomy for every driver operation, plus the pure
//! classification the retry loop uses to decide what may be retried.
//!
//! ## Design Principles
//! 1. **Explicit Variants**: Connect, transport, protocol and server faults are
//!    separate variants rather than inspected exception types.
//! 2. **Pure Classification**: `classify` looks only at the error value.
//! 3. **First Cause Wins**: `Timeout` keeps the first transient fault as its source.

use std::io;
use std::time::Duration;

use thiserror::Error;
use wirekv_common::{Reply, WireError};

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport could not be established (DNS, TCP or TLS).
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Socket-level failure while a command was in flight.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    /// The server sent bytes that break the reply grammar.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered with an error reply.
    #[error("server error: {0}")]
    Server(String),

    /// Transient faults kept recurring past the retry budget.
    #[error("retry budget of {budget:?} exhausted after {attempts} attempts: {first}")]
    Timeout {
        budget: Duration,
        attempts: u32,
        #[source]
        first: Box<ClientError>,
    },

    /// A reply had a shape the decoder did not expect.
    #[error("unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReply {
        expected: &'static str,
        actual: String,
    },

    /// Configuration could not be parsed or is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The operation is not valid in the current connection/queue state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A queued command's handle was read before its queue was flushed.
    #[error("reply has not been resolved")]
    Unresolved,
}

impl ClientError {
    pub(crate) fn unexpected(expected: &'static str, reply: &Reply) -> Self {
        ClientError::UnexpectedReply {
            expected,
            actual: reply.kind().to_string(),
        }
    }

    /// True when the retry loop may retry after this error.
    pub fn is_retryable(&self) -> bool {
        classify(self) == Fault::Retryable
    }

    /// True for error replies sent by the server.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ClientError::Server(_))
    }

    /// True when the stream can no longer be trusted and must be reopened.
    pub(crate) fn breaks_stream(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. } | ClientError::Transport(_) | ClientError::Protocol(_)
        )
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Transport(err)
    }
}

impl From<WireError> for ClientError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(err) => ClientError::Transport(err),
            WireError::Protocol(message) => ClientError::Protocol(message),
            err @ WireError::EmptyFrame => ClientError::InvalidState(err.to_string()),
        }
    }
}

/// How the retry loop treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Drop the stream, back off and try again within the budget.
    Retryable,
    /// Surface to the caller immediately.
    Fatal,
}

/// Classifies an error for the retry loop.
pub fn classify(err: &ClientError) -> Fault {
    match err {
        ClientError::Connect { .. } => Fault::Retryable,
        ClientError::Transport(err) => classify_io(err.kind()),
        _ => Fault::Fatal,
    }
}

/// Classifies a raw I/O error kind.
pub fn classify_io(kind: io::ErrorKind) -> Fault {
    use io::ErrorKind::*;

    match kind {
        ConnectionReset | ConnectionAborted | ConnectionRefused | BrokenPipe | UnexpectedEof
        | TimedOut | WouldBlock | NotConnected | Interrupted | AddrNotAvailable => {
            Fault::Retryable
        }
        _ => Fault::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_faults_are_retryable() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::TimedOut,
            io::ErrorKind::WouldBlock,
        ] {
            let err = ClientError::Transport(io::Error::from(kind));
            assert_eq!(classify(&err), Fault::Retryable, "{:?}", kind);
        }
    }

    #[test]
    fn connect_faults_are_retryable() {
        let err = ClientError::Connect {
            addr: "127.0.0.1:1".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn server_and_protocol_faults_are_fatal() {
        assert_eq!(classify(&ClientError::Server("ERR".into())), Fault::Fatal);
        assert_eq!(classify(&ClientError::Protocol("bad".into())), Fault::Fatal);
        let tls = ClientError::Transport(io::Error::new(io::ErrorKind::InvalidData, "bad record"));
        assert_eq!(classify(&tls), Fault::Fatal);
    }

    #[test]
    fn only_stream_faults_break_the_stream() {
        assert!(ClientError::Protocol("x".into()).breaks_stream());
        assert!(ClientError::Transport(io::Error::from(io::ErrorKind::BrokenPipe)).breaks_stream());
        assert!(!ClientError::Server("WRONGTYPE".into()).breaks_stream());
    }

    #[test]
    fn timeout_exposes_first_cause_as_source() {
        use std::error::Error as _;

        let first = ClientError::Transport(io::Error::from(io::ErrorKind::UnexpectedEof));
        let err = ClientError::Timeout {
            budget: Duration::from_millis(10),
            attempts: 3,
            first: Box::new(first),
        };
        let source = err.source().expect("source");
        assert!(source.to_string().contains("transport error"));
    }

    #[test]
    fn wire_errors_map_onto_client_taxonomy() {
        let io_err: ClientError =
            WireError::Io(io::Error::from(io::ErrorKind::UnexpectedEof)).into();
        assert!(matches!(io_err, ClientError::Transport(_)));
        let proto: ClientError = WireError::Protocol("x".into()).into();
        assert!(matches!(proto, ClientError::Protocol(_)));
    }
}
