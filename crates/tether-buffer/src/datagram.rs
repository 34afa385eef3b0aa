//! Pooled buffers paired with a remote endpoint.

use std::net::SocketAddr;

use crate::{Buffer, BufferPool, Pool, PoolConfig, Pooled, Recycle};

/// A [`Buffer`] plus the address it came from or is going to.
///
/// The endpoint is a plain `SocketAddr` value, so storing it always
/// copies: an in-flight datagram can never observe a later change to the
/// address it was created with.
#[derive(Debug, Default)]
pub struct Datagram {
    buffer: Option<Pooled<Buffer>>,
    endpoint: Option<SocketAddr>,
}

impl Datagram {
    /// The payload, if one is attached.
    pub fn buffer(&self) -> Option<&Pooled<Buffer>> {
        self.buffer.as_ref()
    }

    /// Mutable access to the payload, if one is attached.
    pub fn buffer_mut(&mut self) -> Option<&mut Pooled<Buffer>> {
        self.buffer.as_mut()
    }

    /// Attaches a payload. A previously attached buffer is recycled.
    pub fn set_buffer(&mut self, buffer: Pooled<Buffer>) {
        self.buffer = Some(buffer);
    }

    /// Detaches and returns the payload.
    pub fn take_buffer(&mut self) -> Option<Pooled<Buffer>> {
        self.buffer.take()
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    pub fn set_endpoint(&mut self, endpoint: SocketAddr) {
        self.endpoint = Some(endpoint);
    }
}

impl Recycle for Datagram {
    fn recycle(&mut self) {
        // Dropping the attached buffer returns it to its own pool.
        self.buffer = None;
        self.endpoint = None;
    }
}

// ---------------------------------------------------------------------------
// DatagramPool
// ---------------------------------------------------------------------------

/// A pool of [`Datagram`] shells backed by a [`BufferPool`] for their
/// payloads.
#[derive(Debug, Clone)]
pub struct DatagramPool {
    datagrams: Pool<Datagram>,
    buffers: BufferPool,
}

impl DatagramPool {
    /// Creates a datagram pool that draws payloads from `buffers`.
    pub fn new(buffers: BufferPool) -> Self {
        Self {
            datagrams: Pool::new("datagram", Datagram::default),
            buffers,
        }
    }

    /// Takes a datagram addressed to `endpoint` with an empty payload.
    pub fn acquire(&self, endpoint: SocketAddr) -> Pooled<Datagram> {
        self.wrap(self.buffers.acquire(), endpoint)
    }

    /// Takes a datagram shell and attaches an existing payload.
    pub fn wrap(
        &self,
        buffer: Pooled<Buffer>,
        endpoint: SocketAddr,
    ) -> Pooled<Datagram> {
        let mut datagram = self.datagrams.acquire();
        datagram.set_buffer(buffer);
        datagram.set_endpoint(endpoint);
        datagram
    }

    /// The pool datagram shells come from.
    pub fn shells(&self) -> &Pool<Datagram> {
        &self.datagrams
    }

    /// The pool payloads come from.
    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }
}

impl Default for DatagramPool {
    fn default() -> Self {
        Self::new(crate::buffer_pool(PoolConfig::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_acquire_attaches_buffer_and_endpoint() {
        let pool = DatagramPool::default();
        let datagram = pool.acquire(addr(4000));
        assert_eq!(datagram.endpoint(), Some(addr(4000)));
        assert!(datagram.buffer().is_some());
        assert_eq!(pool.buffers().in_use_count(), 1);
    }

    #[test]
    fn test_recycle_returns_buffer_and_clears_endpoint() {
        let pool = DatagramPool::default();
        let mut datagram = pool.acquire(addr(4000));
        datagram.buffer_mut().unwrap().write_u8(1);
        drop(datagram);

        assert_eq!(pool.shells().idle_count(), 1);
        assert_eq!(pool.buffers().idle_count(), 1);

        let shell = pool.shells().acquire();
        assert!(shell.endpoint().is_none());
        assert!(shell.buffer().is_none());
    }

    #[test]
    fn test_replacing_buffer_recycles_old_one() {
        let pool = DatagramPool::default();
        let mut datagram = pool.acquire(addr(1));
        datagram.set_buffer(pool.buffers().acquire());
        assert_eq!(pool.buffers().idle_count(), 1);
        assert_eq!(pool.buffers().in_use_count(), 1);
    }

    #[test]
    fn test_endpoint_is_copied() {
        let pool = DatagramPool::default();
        let mut endpoint = addr(5000);
        let datagram = pool.acquire(endpoint);
        endpoint.set_port(6000);
        assert_eq!(datagram.endpoint(), Some(addr(5000)));
    }
}
