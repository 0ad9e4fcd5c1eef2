//! Fixed-capacity ring buffer with independent read/write cursors
//!
//! Backs the per-socket read and write buffers. Capacity is fixed at
//! construction and there is no implicit growth: `write` fails rather
//! than overflow, so callers size buffers for their worst-case burst.
//!
//! The writable region is exposed directly (`writable` +
//! `advance_written`) so a `recv` call can fill the buffer in place
//! without an intermediate copy. Across a wraparound the region is
//! split and a second `writable`/`advance_written` round is needed.

/// Byte ring buffer. Readable bytes = (write - read) mod capacity.
pub struct RingBuffer {
    storage: Box<[u8]>,
    /// Read cursor, index into storage
    read: usize,
    /// Bytes currently stored
    size: usize,
}

impl RingBuffer {
    /// Create a buffer with the given fixed capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be non-zero");
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            size: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Total readable bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Free bytes.
    #[inline]
    pub fn space(&self) -> usize {
        self.capacity() - self.size
    }

    #[inline]
    fn write_pos(&self) -> usize {
        (self.read + self.size) % self.capacity()
    }

    /// Append `data`, all-or-nothing. Returns false and leaves the
    /// buffer unchanged if `data` exceeds the free space.
    pub fn write(&mut self, data: &[u8]) -> bool {
        if data.len() > self.space() {
            return false;
        }

        let cap = self.capacity();
        let pos = self.write_pos();
        let first = data.len().min(cap - pos);
        self.storage[pos..pos + first].copy_from_slice(&data[..first]);
        if first < data.len() {
            // wrapped
            let rest = data.len() - first;
            self.storage[..rest].copy_from_slice(&data[first..]);
        }
        self.size += data.len();
        true
    }

    /// Next contiguous writable region. May be shorter than `space()`
    /// when the free region wraps; call again after `advance_written`.
    pub fn writable(&mut self) -> &mut [u8] {
        let cap = self.capacity();
        let pos = self.write_pos();
        let contiguous = self.space().min(cap - pos);
        &mut self.storage[pos..pos + contiguous]
    }

    /// Advance the write cursor after an external fill (e.g. `recv`
    /// directly into `writable()`).
    pub fn advance_written(&mut self, n: usize) {
        debug_assert!(n <= self.space().min(self.capacity() - self.write_pos()));
        self.size += n;
    }

    /// Next contiguous readable region.
    pub fn readable(&self) -> &[u8] {
        let contiguous = self.contiguous_len();
        &self.storage[self.read..self.read + contiguous]
    }

    /// Length of the contiguous readable region (may be shorter than
    /// `len()` when the data wraps).
    #[inline]
    pub fn contiguous_len(&self) -> usize {
        self.size.min(self.capacity() - self.read)
    }

    /// Drain `n` bytes from the read side.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.size);
        let n = n.min(self.size);
        self.read = (self.read + n) % self.capacity();
        self.size -= n;
    }

    /// Copy up to `out.len()` bytes out of the buffer and drain them.
    /// Returns the number of bytes moved.
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let mut moved = 0;
        while moved < out.len() && !self.is_empty() {
            let chunk = self.readable();
            let take = chunk.len().min(out.len() - moved);
            out[moved..moved + take].copy_from_slice(&chunk[..take]);
            self.consume(take);
            moved += take;
        }
        moved
    }

    /// Drop all stored bytes.
    pub fn clear(&mut self) {
        self.read = 0;
        self.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_in_order() {
        let mut rb = RingBuffer::new(16);
        assert!(rb.write(b"hello"));
        assert!(rb.write(b" world"));
        assert_eq!(rb.len(), 11);

        let mut out = [0u8; 11];
        assert_eq!(rb.read_into(&mut out), 11);
        assert_eq!(&out, b"hello world");
        assert!(rb.is_empty());
    }

    #[test]
    fn test_oversized_write_fails_unchanged() {
        let mut rb = RingBuffer::new(8);
        assert!(rb.write(b"abcd"));
        assert!(!rb.write(b"too big here"));
        assert_eq!(rb.len(), 4);
        assert_eq!(rb.readable(), b"abcd");
    }

    #[test]
    fn test_wraparound() {
        let mut rb = RingBuffer::new(8);
        assert!(rb.write(b"abcdef"));
        rb.consume(4);
        // free region wraps: 2 at the tail, 4 at the head
        assert!(rb.write(b"123456"));
        assert_eq!(rb.len(), 8);
        assert_eq!(rb.space(), 0);

        let mut out = [0u8; 8];
        assert_eq!(rb.read_into(&mut out), 8);
        assert_eq!(&out, b"ef123456");
    }

    #[test]
    fn test_writable_advance() {
        let mut rb = RingBuffer::new(8);
        assert!(rb.write(b"abcde"));
        rb.consume(5);

        // external fill across the wrap needs two rounds
        let w = rb.writable();
        assert_eq!(w.len(), 3);
        w.copy_from_slice(b"xyz");
        rb.advance_written(3);

        let w = rb.writable();
        assert_eq!(w.len(), 5);
        w[..2].copy_from_slice(b"01");
        rb.advance_written(2);

        let mut out = [0u8; 5];
        assert_eq!(rb.read_into(&mut out), 5);
        assert_eq!(&out, b"xyz01");
    }

    #[test]
    fn test_fifo_random_sequence() {
        let mut rb = RingBuffer::new(64);
        let mut reference: Vec<u8> = Vec::new();
        let mut next: u8 = 0;

        for round in 0..200 {
            let n = (round * 7) % 23 + 1;
            let chunk: Vec<u8> = (0..n)
                .map(|_| {
                    next = next.wrapping_add(1);
                    next
                })
                .collect();
            if rb.write(&chunk) {
                reference.extend_from_slice(&chunk);
            } else {
                assert!(chunk.len() > rb.space());
                // roll back the generator so the stream stays in sync
                next = next.wrapping_sub(n as u8);
            }

            let drain = (round * 3) % 17;
            let mut out = vec![0u8; drain];
            let moved = rb.read_into(&mut out);
            assert_eq!(out[..moved], reference[..moved]);
            reference.drain(..moved);
        }
    }
}
