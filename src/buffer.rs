//! Fixed-capacity cumulative byte buffer.
//!
//! Bytes are appended at the write cursor and consumed from the read cursor.
//! The region between the two is the cumulated (unread) data. The region from
//! the write cursor to the end of the allocation is the *linear free space*:
//! the contiguous slice a kernel `read(2)` may fill in one call.
//!
//! ```text
//!  0          read        write                 capacity
//!  |-----------|###########|.......................|
//!   consumed    cumulated    linear free space
//! ```
//!
//! The buffer never grows. Appends that do not fit in the linear free space
//! compact the unread bytes to the front first, and fail with
//! [`BufferError::Overflow`] if the total free space is still too small.

use crate::error::BufferError;

/// Lower bound for every buffer allocation.
pub const DEFAULT_CAPACITY: usize = 1024 * 10;

pub struct CumulativeBuffer {
    data: Box<[u8]>,
    read: usize,
    write: usize,
}

impl CumulativeBuffer {
    /// Allocates a buffer able to hold two messages of `max_message_size`.
    ///
    /// The capacity is `max(max_message_size * 2, DEFAULT_CAPACITY)`, so one
    /// oversized message can be absorbed without reallocating mid-stream.
    pub fn with_message_size(max_message_size: usize) -> Self {
        Self::with_capacity(capacity_for(max_message_size))
    }

    /// Allocates a buffer of exactly `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes available to consume.
    #[inline]
    pub fn cumulated_len(&self) -> usize {
        self.write - self.read
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Contiguous writable bytes from the write cursor to the end.
    #[inline]
    pub fn linear_free_space(&self) -> usize {
        self.data.len() - self.write
    }

    /// Writable bytes including the already consumed prefix.
    #[inline]
    pub fn total_free_space(&self) -> usize {
        self.data.len() - self.cumulated_len()
    }

    /// Unread bytes, without consuming them.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data[self.read..self.write]
    }

    /// The writable tail, for filling directly from a socket.
    ///
    /// Call [`increase_data`](Self::increase_data) with the number of bytes
    /// written afterwards.
    #[inline]
    pub fn append_slice_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.write..]
    }

    /// Advances the write cursor after an external fill.
    pub fn increase_data(&mut self, len: usize) -> Result<(), BufferError> {
        if len > self.linear_free_space() {
            return Err(self.overflow(len));
        }
        self.write += len;
        Ok(())
    }

    /// Copies `bytes` behind the unread data.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        if bytes.len() > self.total_free_space() {
            return Err(self.overflow(bytes.len()));
        }
        if bytes.len() > self.linear_free_space() {
            self.compact();
        }
        let end = self.write + bytes.len();
        self.data[self.write..end].copy_from_slice(bytes);
        self.write = end;
        Ok(())
    }

    /// Removes the next `len` bytes and returns them.
    ///
    /// The returned slice stays valid until the buffer is mutated again. When
    /// the last buffered byte is consumed both cursors rewind to the start.
    pub fn consume(&mut self, len: usize) -> Result<&[u8], BufferError> {
        let available = self.cumulated_len();
        if len > available {
            return Err(BufferError::Underflow {
                requested: len,
                available,
            });
        }
        let start = self.read;
        if len == available {
            self.read = 0;
            self.write = 0;
        } else {
            self.read += len;
        }
        Ok(&self.data[start..start + len])
    }

    /// Drops `len` bytes from the front without returning them.
    pub fn advance(&mut self, len: usize) -> Result<(), BufferError> {
        self.consume(len).map(|_| ())
    }

    /// Moves unread bytes to the front, maximising linear free space.
    pub fn compact(&mut self) {
        if self.read == 0 {
            return;
        }
        let len = self.cumulated_len();
        self.data.copy_within(self.read..self.write, 0);
        self.read = 0;
        self.write = len;
    }

    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    fn overflow(&self, requested: usize) -> BufferError {
        BufferError::Overflow {
            requested,
            available: self.total_free_space(),
            capacity: self.capacity(),
        }
    }
}

impl std::fmt::Debug for CumulativeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CumulativeBuffer")
            .field("capacity", &self.capacity())
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}

/// Capacity derived from the largest message a peer may send.
pub fn capacity_for(max_message_size: usize) -> usize {
    max_message_size.saturating_mul(2).max(DEFAULT_CAPACITY)
}
