//! Error types shared by every component of the switch manager.

use thiserror::Error;

use crate::switch::SwitchState;

/// The primary error type of the switch manager.
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error occurred on the secure channel.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The switch closed the secure channel (zero-byte read).
    #[error("Secure channel closed by peer")]
    ConnectionClosed,

    /// A frame on the wire could not be delimited or decoded.
    #[error("Invalid OpenFlow frame: {0}")]
    InvalidFrame(&'static str),

    /// A frame announced a protocol version other than OpenFlow 1.0.
    #[error("Unsupported OpenFlow version {0:#04x}")]
    UnsupportedVersion(u8),

    /// A handshake message arrived in a state that does not accept it.
    #[error("Unexpected {message} in state {state:?}")]
    UnexpectedMessage {
        state: SwitchState,
        message: &'static str,
    },

    /// The switch broke the handshake in a way that cannot be recovered.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(&'static str),

    /// A handshake phase exceeded its deadline.
    #[error("Handshake timed out in state {state:?}")]
    HandshakeTimeout { state: SwitchState },

    /// A transaction id is already outstanding in the xid table.
    #[error("Transaction id {0:#x} is already in flight")]
    DuplicateXid(u32),

    /// An application addressed a switch other than the one this manager owns.
    #[error("Invalid datapath id {actual:#x} (expected {expected:#x})")]
    DatapathMismatch { expected: u64, actual: u64 },

    /// The operation requires a completed handshake.
    #[error("Switch not connected")]
    NotConnected,

    /// No endpoint is registered under the given service name.
    #[error("Unknown service {0}")]
    UnknownService(String),

    /// An internal channel between tasks was closed unexpectedly.
    #[error("Internal channel is broken")]
    ChannelClosed,

    /// A destination rule on the command line could not be parsed.
    #[error("Invalid destination rule {0}")]
    InvalidRule(String),
}

/// A specialized `Result` type for the switch manager.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error ends the connection to the switch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ConnectionClosed
                | Error::InvalidFrame(_)
                | Error::UnsupportedVersion(_)
                | Error::HandshakeFailed(_)
                | Error::HandshakeTimeout { .. }
        )
    }
}
