//! Error taxonomy of the bridge.
//!
//! Every failure reaches the immediate caller as a [`BridgeError`]. Nothing
//! in this crate retries or replays a request: a `Set` or `Call` against a
//! stateful remote graph is not provably idempotent.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport-level failures. Always fatal to the current call.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Failed to connect to the scripting host.
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] std::io::Error),

    /// No response arrived within the configured timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The channel was shut down, or the remote side went away.
    #[error("Channel closed")]
    Closed,

    /// Framing or encoding failure.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                ChannelError::ConnectionFailed(err)
            }
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset => ChannelError::Closed,
            _ => ChannelError::Io(err),
        }
    }
}

/// Typed failure of one bridged call.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The accessor does not resolve against the live graph.
    #[error("cannot resolve `{accessor}`: {message}")]
    Resolution { accessor: String, message: String },

    /// A value's kind disagrees with what the call site expected.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// The remote callable itself failed.
    #[error("remote error: {message}")]
    Remote { message: String },
}

impl BridgeError {
    pub fn type_mismatch(expected: impl ToString, found: impl ToString) -> Self {
        BridgeError::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub fn is_resolution(&self) -> bool {
        matches!(self, BridgeError::Resolution { .. })
    }

    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, BridgeError::TypeMismatch { .. })
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Failure raised on the scripting-host side and carried in a response.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteFault {
    #[error("resolution failed: {message}")]
    Resolution { message: String },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("{message}")]
    Remote { message: String },
}

impl RemoteFault {
    pub fn resolution(message: impl Into<String>) -> Self {
        RemoteFault::Resolution {
            message: message.into(),
        }
    }

    pub fn type_mismatch(expected: impl ToString, found: impl ToString) -> Self {
        RemoteFault::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        RemoteFault::Remote {
            message: message.into(),
        }
    }

    /// Lift into the caller-facing error, attributing resolution faults to `accessor`.
    pub fn into_bridge_error(self, accessor: &str) -> BridgeError {
        match self {
            RemoteFault::Resolution { message } => BridgeError::Resolution {
                accessor: accessor.to_string(),
                message,
            },
            RemoteFault::TypeMismatch { expected, found } => {
                BridgeError::TypeMismatch { expected, found }
            }
            RemoteFault::Remote { message } => BridgeError::Remote { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ChannelError::Timeout(Duration::from_millis(250)).to_string(),
            "Request timed out after 250ms"
        );
        assert_eq!(
            BridgeError::type_mismatch("int", "str").to_string(),
            "type mismatch: expected int, found str"
        );
        let err: BridgeError = ChannelError::Closed.into();
        assert_eq!(err.to_string(), "Channel closed");
    }

    #[test]
    fn test_channel_error_from_io() {
        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        assert!(matches!(ChannelError::from(not_found), ChannelError::ConnectionFailed(_)));

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(ChannelError::from(refused), ChannelError::ConnectionFailed(_)));

        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(ChannelError::from(eof), ChannelError::Closed));

        let other = std::io::Error::new(std::io::ErrorKind::Other, "other");
        assert!(matches!(ChannelError::from(other), ChannelError::Io(_)));
    }

    #[test]
    fn test_fault_lifts_to_typed_error() {
        let err = RemoteFault::resolution("no member `x`").into_bridge_error("app.x");
        match err {
            BridgeError::Resolution { accessor, message } => {
                assert_eq!(accessor, "app.x");
                assert_eq!(message, "no member `x`");
            }
            other => panic!("Expected Resolution, got {:?}", other),
        }
        assert!(RemoteFault::type_mismatch("int", "str")
            .into_bridge_error("a")
            .is_type_mismatch());
    }

    #[test]
    fn test_fault_wire_shape() {
        let json = serde_json::to_value(RemoteFault::remote("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "remote", "message": "boom"}));
    }
}
