//! Error types for the protocol layer.
//!
//! Everything that can go wrong while turning bytes or text into values
//! (and back) ends up here. Errors that leave the read cursor in an
//! unknown place, such as an unrecognised type tag, are always returned;
//! problems confined to a single value whose extent is still known are
//! logged by the codec and replaced with an absent value instead.

use tether_buffer::BufferError;

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The buffer ran out or a cursor was misplaced.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// A value started with a tag this codec does not know. The length
    /// of the value is unknowable, so nothing after it can be trusted.
    #[error("unknown type tag {0}")]
    UnknownTag(u8),

    /// A string on the wire was not valid UTF-8.
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    /// A value had a different type than the reader asked for.
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// Values nested deeper than the codec allows.
    #[error("values nested deeper than {0} levels")]
    TooDeep(usize),

    /// A declared element count cannot possibly fit in the bytes left.
    #[error("collection of {count} elements cannot fit in {remaining} remaining bytes")]
    ImplausibleLength { count: usize, remaining: usize },

    /// A count too large for the wire's 32-bit signed length.
    #[error("count {0} does not fit in a 32-bit length")]
    CountTooLarge(usize),

    /// A packet carried a kind byte outside the protocol.
    #[error("unknown packet kind {0}")]
    UnknownPacket(u8),

    /// A function address was built from an object id wider than 24 bits.
    #[error("object id {0} does not fit in 24 bits")]
    ObjectIdOutOfRange(u32),

    /// The text form of a document could not be parsed.
    #[error("document line {line}: {message}")]
    Text { line: usize, message: String },

    /// Reading or writing a document file (or its compressed form) failed.
    #[error("document i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// The message is invalid at the protocol level.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
