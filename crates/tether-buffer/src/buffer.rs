//! The reusable read/write byte container.
//!
//! A [`Buffer`] owns a growable byte region whose length is the logical
//! size (everything written so far), plus a single cursor used for
//! reading. Writes always append; reads advance the cursor.
//!
//! # Packets
//!
//! Every packet on the wire is
//!
//! ```text
//! ┌──────────────┬──────────┬──────────────────────────┐
//! │ u32 length   │ u8 kind  │ payload (length-1 bytes) │
//! └──────────────┴──────────┴──────────────────────────┘
//! ```
//!
//! [`Buffer::begin_packet`] writes a zero length placeholder plus the
//! kind byte; [`Buffer::end_packet`] back-patches the real length once
//! the payload is in place.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::BufferError;

/// Bytes used by the length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Bytes used by the length prefix plus the kind byte.
pub const PACKET_HEADER_LEN: usize = LENGTH_PREFIX_LEN + 1;

// ---------------------------------------------------------------------------
// PoolConfig
// ---------------------------------------------------------------------------

/// Sizing rules for pooled buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Capacity a freshly created buffer starts with.
    pub initial_capacity: usize,

    /// Largest backing allocation a buffer may keep while idle. Clearing
    /// a buffer whose capacity grew beyond this replaces the allocation
    /// with a fresh one of `initial_capacity` bytes.
    pub max_resident_bytes: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 256,
            max_resident_bytes: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Buffer
// ---------------------------------------------------------------------------

/// A growable byte region with a read cursor and a writing flag.
///
/// Buffers are normally obtained from a [`BufferPool`](crate::BufferPool)
/// rather than constructed directly.
#[derive(Clone, PartialEq, Eq)]
pub struct Buffer {
    data: BytesMut,
    position: usize,
    writing: bool,
    config: PoolConfig,
}

impl Buffer {
    /// Creates an empty buffer with the default [`PoolConfig`].
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Creates an empty buffer sized by `config`.
    pub fn with_config(config: PoolConfig) -> Self {
        Self {
            data: BytesMut::with_capacity(config.initial_capacity),
            position: 0,
            writing: false,
            config,
        }
    }

    /// Creates an unpooled buffer holding a copy of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buffer = Self::new();
        buffer.data.extend_from_slice(bytes);
        buffer
    }

    /// Logical size: the number of bytes written.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Capacity of the backing allocation.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes between the cursor and the logical end.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Returns `true` between `begin_write` and `end_write`.
    pub fn is_writing(&self) -> bool {
        self.writing
    }

    /// The written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// The written bytes from the cursor onward.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.position.min(self.data.len())..]
    }

    /// Forgets the contents and resets the cursor.
    ///
    /// Oversized backing storage is released so an idle buffer never
    /// holds more than `max_resident_bytes`.
    pub fn clear(&mut self) {
        if self.data.capacity() > self.config.max_resident_bytes {
            self.data = BytesMut::with_capacity(self.config.initial_capacity);
        } else {
            self.data.clear();
        }
        self.position = 0;
        self.writing = false;
    }

    // -- Write side --

    /// Starts a write pass. Without `append` the previous contents are
    /// discarded first.
    pub fn begin_write(&mut self, append: bool) -> &mut Self {
        if !append {
            self.data.clear();
            self.position = 0;
        }
        self.writing = true;
        self
    }

    /// Ends the write pass and returns the logical size.
    pub fn end_write(&mut self) -> usize {
        self.writing = false;
        self.data.len()
    }

    /// Discards the contents and writes a packet header for `kind`.
    ///
    /// The length field is a placeholder until [`end_packet`](Self::end_packet).
    pub fn begin_packet(&mut self, kind: u8) -> &mut Self {
        self.begin_write(false);
        self.data.put_u32_le(0);
        self.data.put_u8(kind);
        self
    }

    /// Back-patches the length prefix and ends the write pass.
    ///
    /// The length covers everything after the prefix itself. Returns the
    /// total packet size including the prefix.
    pub fn end_packet(&mut self) -> Result<usize, BufferError> {
        let size = self.end_write();
        if size < PACKET_HEADER_LEN {
            return Err(BufferError::NoPacketHeader);
        }
        let body = u32::try_from(size - LENGTH_PREFIX_LEN)
            .map_err(|_| BufferError::PacketTooLarge(size))?;
        self.data[..LENGTH_PREFIX_LEN].copy_from_slice(&body.to_le_bytes());
        Ok(size)
    }

    /// Appends raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.data.put_i8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.data.put_u8(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.data.put_u16_le(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.data.put_i16_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.put_u32_le(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.put_i32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.put_u64_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.data.put_i64_le(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.data.put_f32_le(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.data.put_f64_le(value);
    }

    // -- Read side --

    /// Ends any write pass and moves the cursor to `offset`.
    pub fn begin_read(&mut self, offset: usize) -> Result<&mut Self, BufferError> {
        if offset > self.data.len() {
            return Err(BufferError::OutOfRange {
                offset,
                size: self.data.len(),
            });
        }
        self.writing = false;
        self.position = offset;
        Ok(self)
    }

    /// Moves the cursor forward without reading.
    pub fn skip(&mut self, count: usize) -> Result<(), BufferError> {
        self.ensure(count)?;
        self.position += count;
        Ok(())
    }

    /// Reads `count` raw bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<&[u8], BufferError> {
        self.ensure(count)?;
        let start = self.position;
        self.position += count;
        Ok(&self.data[start..start + count])
    }

    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        self.ensure(1)?;
        Ok(self.take().get_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8, BufferError> {
        self.ensure(1)?;
        Ok(self.take().get_i8())
    }

    pub fn read_bool(&mut self) -> Result<bool, BufferError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        self.ensure(2)?;
        Ok(self.take().get_u16_le())
    }

    pub fn read_i16(&mut self) -> Result<i16, BufferError> {
        self.ensure(2)?;
        Ok(self.take().get_i16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        self.ensure(4)?;
        Ok(self.take().get_u32_le())
    }

    pub fn read_i32(&mut self) -> Result<i32, BufferError> {
        self.ensure(4)?;
        Ok(self.take().get_i32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64, BufferError> {
        self.ensure(8)?;
        Ok(self.take().get_u64_le())
    }

    pub fn read_i64(&mut self) -> Result<i64, BufferError> {
        self.ensure(8)?;
        Ok(self.take().get_i64_le())
    }

    pub fn read_f32(&mut self) -> Result<f32, BufferError> {
        self.ensure(4)?;
        Ok(self.take().get_f32_le())
    }

    pub fn read_f64(&mut self) -> Result<f64, BufferError> {
        self.ensure(8)?;
        Ok(self.take().get_f64_le())
    }

    // -- Non-destructive peeks --
    //
    // Peeks ignore the cursor and report `None` when the requested range
    // has not been written yet.

    pub fn peek_u8(&self, offset: usize) -> Option<u8> {
        self.data.get(offset).copied()
    }

    pub fn peek_u32(&self, offset: usize) -> Option<u32> {
        self.peek_bytes(offset, 4).map(|mut b| b.get_u32_le())
    }

    pub fn peek_i32(&self, offset: usize) -> Option<i32> {
        self.peek_bytes(offset, 4).map(|mut b| b.get_i32_le())
    }

    pub fn peek_bytes(&self, offset: usize, count: usize) -> Option<&[u8]> {
        let end = offset.checked_add(count)?;
        self.data.get(offset..end)
    }

    /// The kind byte of the packet this buffer holds, if any.
    pub fn packet_kind(&self) -> Option<u8> {
        self.peek_u8(LENGTH_PREFIX_LEN)
    }

    // -- Bulk copies --

    /// Replaces `target`'s contents with this buffer's written bytes.
    ///
    /// Only the logical size is copied, never the spare capacity.
    pub fn copy_to(&self, target: &mut Buffer) {
        target.begin_write(false);
        target.data.extend_from_slice(&self.data);
        target.end_write();
    }

    /// Replaces `target`'s contents with `count` bytes starting at
    /// `offset`.
    pub fn copy_range_to(
        &self,
        offset: usize,
        count: usize,
        target: &mut Buffer,
    ) -> Result<(), BufferError> {
        let bytes = self.peek_bytes(offset, count).ok_or(
            BufferError::UnexpectedEof {
                needed: count,
                remaining: self.data.len().saturating_sub(offset),
            },
        )?;
        target.begin_write(false);
        target.data.extend_from_slice(bytes);
        target.end_write();
        Ok(())
    }

    /// Drops the first `count` bytes, shifting the rest to the front.
    ///
    /// The cursor moves back by the same amount (saturating at zero).
    pub fn discard_front(&mut self, count: usize) {
        let count = count.min(self.data.len());
        self.data.advance(count);
        self.position = self.position.saturating_sub(count);
    }

    fn ensure(&self, needed: usize) -> Result<(), BufferError> {
        let remaining = self.remaining();
        if remaining < needed {
            return Err(BufferError::UnexpectedEof { needed, remaining });
        }
        Ok(())
    }

    /// A slice from the cursor that advances the cursor as it is read.
    fn take(&mut self) -> Cursor<'_> {
        Cursor {
            bytes: &self.data[self.position..],
            position: &mut self.position,
        }
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.data.len())
            .field("position", &self.position)
            .field("writing", &self.writing)
            .finish()
    }
}

impl crate::Recycle for Buffer {
    fn recycle(&mut self) {
        self.clear();
    }
}

/// `Buf` adapter over the unread bytes that keeps the owning buffer's
/// cursor in step.
struct Cursor<'a> {
    bytes: &'a [u8],
    position: &'a mut usize,
}

impl Buf for Cursor<'_> {
    fn remaining(&self) -> usize {
        self.bytes.len()
    }

    fn chunk(&self) -> &[u8] {
        self.bytes
    }

    fn advance(&mut self, cnt: usize) {
        self.bytes = &self.bytes[cnt..];
        *self.position += cnt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =====================================================================
    // Write / read
    // =====================================================================

    #[test]
    fn test_primitives_read_back_in_order() {
        let mut buf = Buffer::new();
        buf.begin_write(false);
        buf.write_u8(7);
        buf.write_i16(-2);
        buf.write_u32(0xDEAD_BEEF);
        buf.write_i64(i64::MIN);
        buf.write_f32(1.5);
        buf.write_f64(-0.25);
        buf.write_bool(true);
        assert_eq!(buf.end_write(), 1 + 2 + 4 + 8 + 4 + 8 + 1);

        buf.begin_read(0).unwrap();
        assert_eq!(buf.read_u8().unwrap(), 7);
        assert_eq!(buf.read_i16().unwrap(), -2);
        assert_eq!(buf.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(buf.read_i64().unwrap(), i64::MIN);
        assert_eq!(buf.read_f32().unwrap(), 1.5);
        assert_eq!(buf.read_f64().unwrap(), -0.25);
        assert!(buf.read_bool().unwrap());
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_values_are_little_endian() {
        let mut buf = Buffer::new();
        buf.write_u32(1);
        assert_eq!(buf.as_slice(), &[1, 0, 0, 0]);
    }

    #[test]
    fn test_read_past_end_is_an_error() {
        let mut buf = Buffer::from_slice(&[1, 2]);
        let err = buf.read_u32().unwrap_err();
        assert_eq!(
            err,
            BufferError::UnexpectedEof {
                needed: 4,
                remaining: 2
            }
        );
        // The cursor must not move on a failed read.
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_begin_write_append_keeps_contents() {
        let mut buf = Buffer::from_slice(&[1, 2]);
        buf.begin_write(true);
        buf.write_u8(3);
        assert_eq!(buf.end_write(), 3);

        buf.begin_write(false);
        buf.write_u8(9);
        assert_eq!(buf.as_slice(), &[9]);
    }

    #[test]
    fn test_begin_read_rejects_offset_past_end() {
        let mut buf = Buffer::from_slice(&[1, 2, 3]);
        assert!(buf.begin_read(3).is_ok());
        assert_eq!(
            buf.begin_read(4).unwrap_err(),
            BufferError::OutOfRange { offset: 4, size: 3 }
        );
    }

    // =====================================================================
    // Peeks
    // =====================================================================

    #[test]
    fn test_peeks_do_not_move_cursor() {
        let mut buf = Buffer::new();
        buf.write_i32(-5);
        buf.write_u8(9);

        assert_eq!(buf.peek_i32(0), Some(-5));
        assert_eq!(buf.peek_u8(4), Some(9));
        assert_eq!(buf.peek_bytes(1, 3), Some(&[0xFF, 0xFF, 0xFF][..]));
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_peeks_past_written_region_return_none() {
        let buf = Buffer::from_slice(&[1, 2, 3]);
        assert_eq!(buf.peek_i32(0), None);
        assert_eq!(buf.peek_u8(3), None);
        assert_eq!(buf.peek_bytes(2, 2), None);
        assert_eq!(buf.peek_bytes(usize::MAX, 2), None);
    }

    // =====================================================================
    // Packets
    // =====================================================================

    #[test]
    fn test_end_packet_back_patches_length() {
        let mut buf = Buffer::new();
        buf.begin_packet(42);
        buf.write_u16(0xABCD);
        let size = buf.end_packet().unwrap();

        assert_eq!(size, 7);
        assert_eq!(buf.peek_u32(0), Some(3), "kind + 2 payload bytes");
        assert_eq!(buf.packet_kind(), Some(42));
        assert!(!buf.is_writing());
    }

    #[test]
    fn test_begin_packet_discards_previous_contents() {
        let mut buf = Buffer::from_slice(&[9, 9, 9, 9, 9, 9]);
        buf.begin_packet(1);
        assert_eq!(buf.end_packet().unwrap(), PACKET_HEADER_LEN);
        assert_eq!(buf.as_slice(), &[1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_end_packet_without_header_fails() {
        let mut buf = Buffer::from_slice(&[1, 2]);
        assert_eq!(buf.end_packet().unwrap_err(), BufferError::NoPacketHeader);
    }

    // =====================================================================
    // Copies and clearing
    // =====================================================================

    #[test]
    fn test_copy_to_copies_only_written_bytes() {
        let mut source = Buffer::with_config(PoolConfig {
            initial_capacity: 64,
            max_resident_bytes: 1024,
        });
        source.write_bytes(&[1, 2, 3]);

        let mut target = Buffer::from_slice(&[7, 7, 7, 7, 7]);
        source.copy_to(&mut target);
        assert_eq!(target.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_copy_range_to_rejects_short_source() {
        let source = Buffer::from_slice(&[1, 2, 3]);
        let mut target = Buffer::new();
        assert!(source.copy_range_to(1, 5, &mut target).is_err());
        source.copy_range_to(1, 2, &mut target).unwrap();
        assert_eq!(target.as_slice(), &[2, 3]);
    }

    #[test]
    fn test_discard_front_shifts_remaining_bytes() {
        let mut buf = Buffer::from_slice(&[1, 2, 3, 4]);
        buf.begin_read(3).unwrap();
        buf.discard_front(2);
        assert_eq!(buf.as_slice(), &[3, 4]);
        assert_eq!(buf.position(), 1);
    }

    #[test]
    fn test_clear_shrinks_oversized_storage() {
        let config = PoolConfig {
            initial_capacity: 16,
            max_resident_bytes: 64,
        };
        let mut buf = Buffer::with_config(config);
        buf.write_bytes(&[0; 4096]);
        assert!(buf.capacity() >= 4096);

        buf.clear();
        assert!(buf.is_empty());
        assert!(buf.capacity() <= 64);
    }

    #[test]
    fn test_clear_keeps_small_storage() {
        let mut buf = Buffer::new();
        buf.write_bytes(&[0; 100]);
        let capacity = buf.capacity();
        buf.clear();
        assert_eq!(buf.capacity(), capacity);
        assert_eq!(buf.position(), 0);
    }
}
