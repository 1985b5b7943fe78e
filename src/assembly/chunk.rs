//! Fixed-capacity chunk buffers.

use crate::capture::FrameInfo;
use std::time::Instant;

/// Raw bytes of one reassembled image.
///
/// Storage is allocated once; appending never reallocates. Bytes that do not
/// fit are dropped and the buffer is marked truncated.
pub struct ChunkBuffer {
    data: Box<[u8]>,
    len: usize,
    truncated: bool,
    first_byte: Option<Instant>,
    fill_start: Option<Instant>,
    fill_complete: Option<Instant>,
    frame_info: FrameInfo,
    sequence: u64,
}

impl ChunkBuffer {
    /// Allocates an empty buffer holding up to `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            truncated: false,
            first_byte: None,
            fill_start: None,
            fill_complete: None,
            frame_info: FrameInfo::default(),
            sequence: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes still free.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// The valid bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Returns true if bytes were dropped for lack of space.
    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// When the first payload byte arrived.
    pub fn first_byte_at(&self) -> Option<Instant> {
        self.first_byte
    }

    /// When the buffer was taken from the pool for filling.
    pub fn fill_started_at(&self) -> Option<Instant> {
        self.fill_start
    }

    /// When the chunk was sealed.
    pub fn fill_completed_at(&self) -> Option<Instant> {
        self.fill_complete
    }

    /// Scanner information as of the micro-frame that started the chunk.
    pub fn frame_info(&self) -> &FrameInfo {
        &self.frame_info
    }

    /// Sequence number assigned when the chunk was sealed.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Starts a new fill, writing `header` ahead of any payload.
    pub(crate) fn begin(&mut self, header: &[u8], now: Instant) {
        self.reset();
        self.fill_start = Some(now);
        self.copy_in(header);
    }

    /// Appends payload, returning how many bytes were stored.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }
        if self.first_byte.is_none() {
            self.first_byte = Some(Instant::now());
        }
        self.copy_in(bytes)
    }

    fn copy_in(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining());
        self.data[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        if n < bytes.len() {
            self.truncated = true;
        }
        n
    }

    pub(crate) fn seal(&mut self, info: FrameInfo, sequence: u64, now: Instant) {
        self.fill_complete = Some(now);
        self.frame_info = info;
        self.sequence = sequence;
    }

    /// Clears contents and metadata; capacity is kept.
    pub fn reset(&mut self) {
        self.len = 0;
        self.truncated = false;
        self.first_byte = None;
        self.fill_start = None;
        self.fill_complete = None;
        self.frame_info = FrameInfo::default();
        self.sequence = 0;
    }
}

impl std::fmt::Debug for ChunkBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("truncated", &self.truncated)
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_within_capacity() {
        let mut chunk = ChunkBuffer::with_capacity(8);
        assert_eq!(chunk.append(&[1, 2, 3]), 3);
        assert_eq!(chunk.append(&[4]), 1);
        assert_eq!(chunk.data(), &[1, 2, 3, 4]);
        assert!(!chunk.is_truncated());
        assert!(chunk.first_byte_at().is_some());
    }

    #[test]
    fn test_overflow_truncates() {
        let mut chunk = ChunkBuffer::with_capacity(4);
        assert_eq!(chunk.append(&[1, 2, 3]), 3);
        assert_eq!(chunk.append(&[4, 5, 6]), 1);
        assert_eq!(chunk.data(), &[1, 2, 3, 4]);
        assert!(chunk.is_truncated());
        assert_eq!(chunk.remaining(), 0);
    }

    #[test]
    fn test_begin_writes_header_and_resets() {
        let mut chunk = ChunkBuffer::with_capacity(8);
        chunk.append(&[9; 8]);
        chunk.append(&[9]);
        assert!(chunk.is_truncated());

        chunk.begin(&[0xFF, 0xD8], Instant::now());
        assert_eq!(chunk.data(), &[0xFF, 0xD8]);
        assert!(!chunk.is_truncated());
        assert!(chunk.first_byte_at().is_none());
        assert!(chunk.fill_started_at().is_some());
    }
}
