// src/core/errors.rs

//! Defines the primary error type for the relay.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every connection-scoped failure in the relay.
/// None of these are fatal to the process; handlers log them and close the connection.
#[derive(Error, Debug, Clone)]
pub enum RelayError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// A frame ended before its declared length was available and no more data will arrive.
    #[error("Incomplete message in stream")]
    IncompleteMessage,

    #[error("Frame of {len} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Failed to decode {message}: {reason}")]
    Decode {
        message: &'static str,
        reason: String,
    },

    #[error("Failed to encode {message}: {reason}")]
    Encode {
        message: &'static str,
        reason: String,
    },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Handshake did not complete within {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("Internal Relay Error: {0}")]
    Internal(String),
}

impl RelayError {
    /// True for the error kinds that are part of a peer hanging up normally.
    pub fn is_normal_disconnect(&self) -> bool {
        matches!(self, RelayError::Io(e) if matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionAborted
        ))
    }

    /// True for framing, decode and protocol failures caused by the peer's bytes.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            RelayError::IncompleteMessage
                | RelayError::FrameTooLarge { .. }
                | RelayError::Decode { .. }
                | RelayError::ProtocolViolation(_)
        )
    }
}

impl PartialEq for RelayError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RelayError::Io(e1), RelayError::Io(e2)) => e1.kind() == e2.kind(),
            (
                RelayError::FrameTooLarge { len: l1, max: m1 },
                RelayError::FrameTooLarge { len: l2, max: m2 },
            ) => l1 == l2 && m1 == m2,
            (
                RelayError::Decode {
                    message: m1,
                    reason: r1,
                },
                RelayError::Decode {
                    message: m2,
                    reason: r2,
                },
            ) => m1 == m2 && r1 == r2,
            (RelayError::ProtocolViolation(s1), RelayError::ProtocolViolation(s2)) => s1 == s2,
            (RelayError::HandshakeTimeout(d1), RelayError::HandshakeTimeout(d2)) => d1 == d2,
            (RelayError::Internal(s1), RelayError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::Io(Arc::new(e))
    }
}
