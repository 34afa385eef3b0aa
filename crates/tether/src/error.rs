//! Unified error type for Tether.

use tether_buffer::BufferError;
use tether_protocol::ProtocolError;
use tether_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `tether` meta-crate, you deal with this single error
/// type instead of importing errors from each sub-crate.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    /// A transport-level error (connect, handshake, send, receive).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (codec, document, packet).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A buffer error.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),
}
