//! Receive buffers
//!
//! A [`Datagram`] owns the buffer a datagram was received into. The buffer
//! goes back to its [`BufferPool`] when the `Datagram` is dropped, so the
//! receive loop can never write into a buffer that is still being decoded.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::fmt;
use std::ops::Deref;

/// Bounded pool of fixed-size receive buffers
pub struct BufferPool {
    free: Receiver<Vec<u8>>,
    release: Sender<Vec<u8>>,
    buffer_size: usize,
    capacity: usize,
}

impl BufferPool {
    /// Create a pool of `capacity` buffers of `buffer_size` bytes
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let capacity = capacity.max(1);
        let (release, free) = bounded(capacity);
        for _ in 0..capacity {
            let _ = release.try_send(vec![0; buffer_size]);
        }
        BufferPool {
            free,
            release,
            buffer_size,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of buffers currently available
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Take a buffer from the pool, blocking until one is released
    pub fn acquire(&self) -> Datagram {
        // the pool holds a sender, so the channel is never disconnected
        let mut data = self
            .free
            .recv()
            .unwrap_or_else(|_| vec![0; self.buffer_size]);
        data.resize(self.buffer_size, 0);
        Datagram {
            data,
            len: 0,
            pool: Some(self.release.clone()),
        }
    }
}

/// One received datagram, owning its buffer
pub struct Datagram {
    data: Vec<u8>,
    len: usize,
    pool: Option<Sender<Vec<u8>>>,
}

impl Datagram {
    /// The whole buffer, to receive into
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    /// Set the length of the received data
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.data.len());
    }
}

impl From<Vec<u8>> for Datagram {
    /// Wrap a buffer that does not belong to any pool
    fn from(data: Vec<u8>) -> Self {
        let len = data.len();
        Datagram {
            data,
            len,
            pool: None,
        }
    }
}

impl Deref for Datagram {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl fmt::Debug for Datagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datagram")
            .field("len", &self.len)
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for Datagram {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let data = std::mem::take(&mut self.data);
            // pool dropped or full: let the buffer go
            let _ = pool.try_send(data);
        }
    }
}
