//! Receive buffer for HTTP response parsing

use crate::{
    constants::*,
    error::{AriError, AriResult},
};
use bytes::{Bytes, BytesMut};

/// Accumulates socket reads until the parser can take a complete piece
/// (head, chunk line, body) off the front.
pub struct ResponseBuffer {
    buffer: BytesMut,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(BUF_CHUNK),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append bytes read from the socket, enforcing [`MAX_BUFFER_SIZE`]
    pub fn extend_from_slice(&mut self, data: &[u8]) -> AriResult<()> {
        let size = self.buffer.len() + data.len();
        if size > MAX_BUFFER_SIZE {
            tracing::error!(
                "Response buffer would hold {} bytes (limit {}), dropping connection",
                size,
                MAX_BUFFER_SIZE
            );
            return Err(AriError::BufferOverflow {
                size,
                limit: MAX_BUFFER_SIZE,
            });
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    #[cfg(test)]
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    /// Offset of the first occurrence of `pattern`
    pub fn find(&self, pattern: &[u8]) -> Option<usize> {
        if pattern.is_empty() || self.buffer.len() < pattern.len() {
            return None;
        }
        self.buffer
            .windows(pattern.len())
            .position(|window| window == pattern)
    }

    /// Split off everything before `pattern` and discard the pattern itself
    pub fn take_until(&mut self, pattern: &[u8]) -> Option<Bytes> {
        let pos = self.find(pattern)?;
        let data = self.buffer.split_to(pos).freeze();
        let _ = self.buffer.split_to(pattern.len());
        Some(data)
    }

    /// Split off exactly `count` bytes, if that many are buffered
    pub fn take(&mut self, count: usize) -> Option<Bytes> {
        if self.buffer.len() < count {
            return None;
        }
        Some(self.buffer.split_to(count).freeze())
    }

    /// Split off everything buffered
    pub fn take_all(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_until() {
        let mut buffer = ResponseBuffer::new();
        buffer
            .extend_from_slice(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nBody")
            .unwrap();

        let head = buffer.take_until(HEAD_TERMINATOR).unwrap();
        assert_eq!(&head[..], b"HTTP/1.1 200 OK\r\nContent-Length: 4");
        assert_eq!(buffer.data(), b"Body");
    }

    #[test]
    fn test_take_waits_for_enough_data() {
        let mut buffer = ResponseBuffer::new();
        buffer.extend_from_slice(b"Hel").unwrap();
        assert!(buffer.take(5).is_none());
        buffer.extend_from_slice(b"lo World").unwrap();
        assert_eq!(&buffer.take(5).unwrap()[..], b"Hello");
        assert_eq!(buffer.data(), b" World");
    }

    #[test]
    fn test_find_missing_pattern() {
        let mut buffer = ResponseBuffer::new();
        buffer.extend_from_slice(b"partial head\r\n").unwrap();
        assert_eq!(buffer.find(HEAD_TERMINATOR), None);
        assert!(buffer.take_until(HEAD_TERMINATOR).is_none());
        assert_eq!(buffer.len(), 14);
    }

    #[test]
    fn test_overflow_rejected() {
        let mut buffer = ResponseBuffer::new();
        let chunk = vec![0u8; MAX_BUFFER_SIZE];
        buffer.extend_from_slice(&chunk).unwrap();
        assert!(matches!(
            buffer.extend_from_slice(b"x"),
            Err(AriError::BufferOverflow { .. })
        ));
    }
}
