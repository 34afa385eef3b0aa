//! Packet framing.
//!
//! A stream delivers bytes in arbitrary chunks. [`FrameDecoder`] appends
//! each chunk to a pooled receive buffer and cuts whole packets out of it
//! as their length prefixes complete:
//!
//! ```text
//! | u32 length | u8 kind | payload (length - 1 bytes) | u32 length | ...
//!   ^ offset                                            ^ next offset
//! ```
//!
//! The decoder's only state is the receive buffer, the offset of the
//! first unconsumed packet, and the cached length of that packet, so
//! [`FrameDecoder::drain`] can be called again at any time and picks up
//! where the last pass stopped.

use tether_buffer::{Buffer, BufferPool, LENGTH_PREFIX_LEN, Pooled};

use crate::TransportError;

/// Whether the stream is still open after a framing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Open,
    /// The peer sent a zero length prefix, which marks a graceful close.
    Closed,
}

/// Recovers packet boundaries from a byte stream.
#[derive(Debug)]
pub struct FrameDecoder {
    pool: BufferPool,
    receive: Option<Pooled<Buffer>>,
    offset: usize,
    expected: Option<u32>,
    max_packet_size: u32,
}

impl FrameDecoder {
    /// Creates a decoder that takes its buffers from `pool` and refuses
    /// packets longer than `max_packet_size`.
    pub fn new(pool: BufferPool, max_packet_size: u32) -> Self {
        Self {
            pool,
            receive: None,
            offset: 0,
            expected: None,
            max_packet_size,
        }
    }

    /// Appends `chunk` and moves every packet it completes into `out`, in
    /// stream order.
    pub fn push(
        &mut self,
        chunk: &[u8],
        out: &mut Vec<Pooled<Buffer>>,
    ) -> Result<FrameStatus, TransportError> {
        if !chunk.is_empty() {
            let pool = &self.pool;
            let receive = self.receive.get_or_insert_with(|| pool.acquire());
            receive.begin_write(true).write_bytes(chunk);
            receive.end_write();
        }
        self.drain(out)
    }

    /// Cuts every complete packet out of the receive buffer.
    ///
    /// When the buffer holds exactly one packet starting at offset zero,
    /// the buffer itself is handed out. Otherwise each packet is copied
    /// into its own pooled buffer and the consumed bytes are discarded.
    pub fn drain(&mut self, out: &mut Vec<Pooled<Buffer>>) -> Result<FrameStatus, TransportError> {
        loop {
            let Some(receive) = self.receive.as_ref() else {
                return Ok(FrameStatus::Open);
            };
            let available = receive.size() - self.offset;

            let body = match self.expected {
                Some(body) => body,
                None => {
                    let Some(body) = receive.peek_u32(self.offset) else {
                        break;
                    };
                    if body == 0 {
                        self.clear();
                        return Ok(FrameStatus::Closed);
                    }
                    if body > self.max_packet_size {
                        let max = self.max_packet_size;
                        self.clear();
                        return Err(TransportError::PacketTooLarge { length: body, max });
                    }
                    self.expected = Some(body);
                    body
                }
            };

            let total = LENGTH_PREFIX_LEN + body as usize;
            if available < total {
                break;
            }
            self.expected = None;

            if self.offset == 0 && available == total {
                if let Some(packet) = self.receive.take() {
                    out.push(packet);
                }
                return Ok(FrameStatus::Open);
            }

            let mut packet = self.pool.acquire();
            receive.copy_range_to(self.offset, total, &mut packet)?;
            out.push(packet);
            self.offset += total;
        }

        self.compact();
        Ok(FrameStatus::Open)
    }

    /// Bytes received but not yet part of a complete packet.
    pub fn pending_bytes(&self) -> usize {
        self.receive
            .as_ref()
            .map_or(0, |receive| receive.size() - self.offset)
    }

    /// Returns `true` if no partial packet is buffered.
    pub fn is_idle(&self) -> bool {
        self.receive.is_none() && self.expected.is_none()
    }

    /// Drops any partial packet and returns the receive buffer to the
    /// pool.
    pub fn clear(&mut self) {
        self.receive = None;
        self.offset = 0;
        self.expected = None;
    }

    fn compact(&mut self) {
        if let Some(receive) = self.receive.as_mut() {
            if self.offset > 0 {
                receive.discard_front(self.offset);
                self.offset = 0;
            }
            if receive.is_empty() {
                self.receive = None;
            }
        }
    }
}
