// Ring Buffer
// Fixed-capacity byte FIFO with drop-incoming overflow and a byte loss counter

use thiserror::Error;

/// Errors from ring buffer construction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    #[error("Ring buffer capacity cannot be 0")]
    ZeroCapacity,

    #[error("Could not allocate {0} bytes for the ring buffer")]
    AllocationFailed(usize),
}

/// Fixed-capacity circular byte store.
///
/// `head` is the next byte to read, `tail` the next slot to write. When the
/// buffer is full, incoming bytes are discarded and counted in `lost`; bytes
/// already stored are never overwritten.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    head: usize,
    tail: usize,
    len: usize,
    lost: u64,
    received: u64,
}

impl RingBuffer {
    /// Allocate a buffer of exactly `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Result<Self, RingError> {
        if capacity == 0 {
            return Err(RingError::ZeroCapacity);
        }

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| RingError::AllocationFailed(capacity))?;
        storage.resize(capacity, 0);

        Ok(Self {
            buf: storage.into_boxed_slice(),
            head: 0,
            tail: 0,
            len: 0,
            lost: 0,
            received: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes waiting to be read
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Space left before incoming bytes start being dropped
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    /// Bytes dropped at the input since creation
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Bytes offered to the buffer since creation, kept or not
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Append bytes in order, keeping as many as fit.
    ///
    /// Returns the number of bytes dropped.
    pub fn push(&mut self, data: &[u8]) -> usize {
        self.received = self.received.saturating_add(data.len() as u64);

        let accepted = data.len().min(self.free());
        let dropped = data.len() - accepted;

        let mut remaining = &data[..accepted];
        while !remaining.is_empty() {
            let contiguous = (self.capacity() - self.tail).min(remaining.len());
            self.buf[self.tail..self.tail + contiguous].copy_from_slice(&remaining[..contiguous]);
            self.tail = (self.tail + contiguous) % self.capacity();
            self.len += contiguous;
            remaining = &remaining[contiguous..];
        }

        self.lost = self.lost.saturating_add(dropped as u64);
        dropped
    }

    /// Move the oldest bytes into `out`, returning how many were copied
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.len);

        let mut copied = 0;
        while copied < count {
            let contiguous = (self.capacity() - self.head).min(count - copied);
            out[copied..copied + contiguous]
                .copy_from_slice(&self.buf[self.head..self.head + contiguous]);
            self.head = (self.head + contiguous) % self.capacity();
            self.len -= contiguous;
            copied += contiguous;
        }

        if self.len == 0 {
            self.head = 0;
            self.tail = 0;
        }
        count
    }

    /// Take up to `max` of the oldest bytes
    pub fn read_vec(&mut self, max: usize) -> Vec<u8> {
        let mut out = vec![0u8; max.min(self.len)];
        let count = self.read(&mut out);
        out.truncate(count);
        out
    }

    /// Look at the oldest bytes without consuming them
    pub fn peek(&self, max: usize) -> Vec<u8> {
        let count = max.min(self.len);
        (0..count)
            .map(|i| self.buf[(self.head + i) % self.capacity()])
            .collect()
    }

    /// Discard everything buffered, returning how many bytes were thrown away.
    ///
    /// Counters are left alone: loss is only ever counted at the input.
    pub fn drain(&mut self) -> usize {
        let discarded = self.len;
        self.head = 0;
        self.tail = 0;
        self.len = 0;
        discarded
    }
}
