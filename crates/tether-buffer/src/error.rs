//! Error types for the buffer layer.

/// Errors raised by [`Buffer`](crate::Buffer) cursor and packet operations.
///
/// Reads past the written region are always reported instead of
/// returning zeroes: a decoder that silently reads garbage would corrupt
/// every value after it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// A read needed more bytes than the buffer holds after the cursor.
    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof {
        /// Bytes the read wanted.
        needed: usize,
        /// Bytes left between the cursor and the logical end.
        remaining: usize,
    },

    /// A cursor or range start lies beyond the written region.
    #[error("offset {offset} is past the end of the buffer ({size} bytes)")]
    OutOfRange {
        /// The offending offset.
        offset: usize,
        /// Logical size of the buffer.
        size: usize,
    },

    /// The packet grew beyond what a 32-bit length prefix can describe.
    #[error("packet of {0} bytes does not fit a 32-bit length prefix")]
    PacketTooLarge(usize),

    /// `end_packet` was called on a buffer shorter than a packet header.
    #[error("buffer holds no packet header")]
    NoPacketHeader,
}
