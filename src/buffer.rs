//! Growable append-only byte accumulator.
//!
//! Used to assemble log entries and forwarded request headers without
//! reallocating and copying already written bytes on growth. Content lives in
//! a sequence of chunks; when the last chunk overflows, a new chunk twice its
//! capacity is added.

/// Default capacity of the first chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 128;

/// A chunked byte buffer with append, flatten and reset.
///
/// # Example
///
/// ```
/// use bluegate::buffer::ByteAccumulator;
///
/// let mut acc = ByteAccumulator::new(4);
/// acc.append_str("GET ");
/// acc.append(b"/index.html");
/// assert_eq!(acc.flatten(), b"GET /index.html");
///
/// acc.reset();
/// assert!(acc.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct ByteAccumulator {
    chunks: Vec<Vec<u8>>,
    /// Index of the chunk currently being filled.
    active: usize,
    len: usize,
}

impl ByteAccumulator {
    /// Create an accumulator whose first chunk holds `initial` bytes.
    pub fn new(initial: usize) -> Self {
        Self {
            chunks: vec![Vec::with_capacity(initial.max(1))],
            active: 0,
            len: 0,
        }
    }

    /// Append raw bytes.
    pub fn append(&mut self, mut bytes: &[u8]) {
        self.len += bytes.len();

        while !bytes.is_empty() {
            let chunk = &mut self.chunks[self.active];
            let room = chunk.capacity() - chunk.len();

            if room == 0 {
                self.advance();
                continue;
            }

            let (head, rest) = bytes.split_at(room.min(bytes.len()));
            chunk.extend_from_slice(head);
            bytes = rest;
        }
    }

    /// Append UTF-8 text.
    #[inline]
    pub fn append_str(&mut self, text: &str) {
        self.append(text.as_bytes());
    }

    /// Move to the next chunk, allocating one twice as large as the current
    /// chunk unless a previous reset left one behind.
    fn advance(&mut self) {
        let next = self.active + 1;
        if next == self.chunks.len() {
            let capacity = self.chunks[self.active].capacity() * 2;
            self.chunks.push(Vec::with_capacity(capacity));
        }
        self.active = next;
    }

    /// Copy the whole content into one contiguous buffer.
    pub fn flatten(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in &self.chunks[..=self.active] {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Discard the content while keeping every allocated chunk.
    pub fn reset(&mut self) {
        for chunk in &mut self.chunks {
            chunk.clear();
        }
        self.active = 0;
        self.len = 0;
    }

    /// Number of bytes appended since the last reset.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing was appended since the last reset.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total bytes allocated across all chunks.
    pub fn capacity(&self) -> usize {
        self.chunks.iter().map(Vec::capacity).sum()
    }
}

impl Default for ByteAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl std::fmt::Write for ByteAccumulator {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.append_str(s);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_flatten_content_spanning_chunks() {
        let mut acc = ByteAccumulator::new(2);
        acc.append(b"hello ");
        acc.append(b"world");

        assert_eq!(acc.len(), 11);
        assert_eq!(acc.flatten(), b"hello world");
    }

    #[test]
    fn should_double_chunk_capacity_on_overflow() {
        let mut acc = ByteAccumulator::new(4);
        acc.append(b"abcd");
        assert_eq!(acc.chunks.len(), 1);

        acc.append(b"e");
        assert_eq!(acc.chunks.len(), 2);
        assert!(acc.chunks[1].capacity() >= 8);
    }

    #[test]
    fn should_keep_capacity_after_reset() {
        let mut acc = ByteAccumulator::new(4);
        acc.append(&[b'x'; 100]);
        let capacity = acc.capacity();

        acc.reset();
        assert!(acc.is_empty());
        assert_eq!(acc.capacity(), capacity);
        assert!(acc.flatten().is_empty());

        acc.append_str("again");
        assert_eq!(acc.flatten(), b"again");
        assert_eq!(acc.capacity(), capacity);
    }

    #[test]
    fn should_support_fmt_write() {
        use std::fmt::Write;

        let mut acc = ByteAccumulator::default();
        write!(acc, "[payload size: {}]", 42).unwrap();
        assert_eq!(acc.flatten(), b"[payload size: 42]");
    }

    #[test]
    fn should_accept_empty_appends() {
        let mut acc = ByteAccumulator::new(1);
        acc.append(b"");
        acc.append_str("");
        assert!(acc.is_empty());
        assert!(acc.flatten().is_empty());
    }
}
