//! Recyclable buffers for Tether.
//!
//! Every packet that goes in or out of a connection lives in a
//! [`Buffer`] on loan from a [`BufferPool`]. When the last owner lets go,
//! the buffer is cleared and returned to the free list, so steady-state
//! traffic does not allocate.
//!
//! - [`Pool`], [`Pooled`], [`Shared`]: the generic free list and its two
//!   ownership handles.
//! - [`Buffer`]: byte region with a read cursor and packet helpers.
//! - [`Datagram`], [`DatagramPool`]: a buffer paired with an endpoint,
//!   for connectionless transports.
//!
//! # How it fits in the stack
//!
//! ```text
//! Transport (sockets, framing)   ← fills inbound buffers, drains outbound
//!     ↕
//! Buffer layer (this crate)      ← owns the bytes and their lifetime
//!     ↕
//! Protocol (codec, documents)    ← reads and writes values in buffers
//! ```

mod buffer;
mod datagram;
mod error;
mod pool;

pub use buffer::{Buffer, LENGTH_PREFIX_LEN, PACKET_HEADER_LEN, PoolConfig};
pub use datagram::{Datagram, DatagramPool};
pub use error::BufferError;
pub use pool::{Pool, PoolStats, Pooled, Recycle, Shared};

/// A pool of [`Buffer`]s.
pub type BufferPool = Pool<Buffer>;

/// Creates a buffer pool whose buffers follow `config`.
pub fn buffer_pool(config: PoolConfig) -> BufferPool {
    Pool::new("buffer", move || Buffer::with_config(config))
}
