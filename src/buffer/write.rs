//! Write buffer for encoding XDR data
//!
//! Requests are assembled here and only reach the byte channel on an explicit
//! flush, so a request is always sent whole.

use bytes::{BufMut, Bytes, BytesMut};

use super::read::xdr_pad;
use crate::error::{Error, Result};

const PAD: [u8; 4] = [0; 4];

/// A buffer for writing XDR-encoded data
#[derive(Debug)]
pub struct WriteBuffer {
    /// The underlying byte buffer
    data: BytesMut,
    /// Maximum capacity (for request size limits)
    max_capacity: Option<usize>,
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBuffer {
    /// Create a new WriteBuffer with default capacity
    pub fn new() -> Self {
        Self {
            data: BytesMut::with_capacity(8192),
            max_capacity: None,
        }
    }

    /// Create a new WriteBuffer with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            max_capacity: None,
        }
    }

    /// Create a new WriteBuffer with a maximum capacity limit
    pub fn with_max_capacity(capacity: usize, max_capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            max_capacity: Some(max_capacity),
        }
    }

    /// Get the current length of data in the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the remaining writable space
    #[inline]
    pub fn remaining_capacity(&self) -> usize {
        match self.max_capacity {
            Some(max) => max.saturating_sub(self.data.len()),
            None => usize::MAX - self.data.len(),
        }
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Get the written bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Convert into immutable bytes
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    /// Take the written bytes, leaving the buffer empty
    pub fn take(&mut self) -> BytesMut {
        self.data.split()
    }

    #[inline]
    fn ensure_capacity(&self, n: usize) -> Result<()> {
        if self.remaining_capacity() < n {
            Err(Error::BufferOverflow {
                needed: n,
                available: self.remaining_capacity(),
            })
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Raw writes
    // =========================================================================

    /// Write a single byte
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.ensure_capacity(1)?;
        self.data.put_u8(value);
        Ok(())
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_capacity(bytes.len())?;
        self.data.put_slice(bytes);
        Ok(())
    }

    /// Write a 16-bit unsigned integer in little-endian format
    pub fn write_u16_le(&mut self, value: u16) -> Result<()> {
        self.ensure_capacity(2)?;
        self.data.put_u16_le(value);
        Ok(())
    }

    // =========================================================================
    // XDR writes
    // =========================================================================

    /// Write a 32-bit signed integer
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.ensure_capacity(4)?;
        self.data.put_i32(value);
        Ok(())
    }

    /// Write a 64-bit signed integer
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.ensure_capacity(8)?;
        self.data.put_i64(value);
        Ok(())
    }

    /// Write zero padding for `len` preceding opaque bytes
    pub fn write_pad(&mut self, len: usize) -> Result<()> {
        let pad = xdr_pad(len);
        self.write_bytes(&PAD[..pad])
    }

    /// Write opaque data occupying exactly `len` bytes
    ///
    /// Shorter input is filled with spaces, which is how fixed CHAR values
    /// travel on the wire.
    pub fn write_opaque(&mut self, bytes: &[u8], len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let take = bytes.len().min(len);
        self.ensure_capacity(len + xdr_pad(len))?;
        self.data.put_slice(&bytes[..take]);
        self.data.put_bytes(b' ', len - take);
        self.write_pad(len)
    }

    /// Write a length-prefixed opaque buffer
    pub fn write_buffer(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_i32(bytes.len() as i32)?;
        self.write_bytes(bytes)?;
        self.write_pad(bytes.len())
    }

    /// Write a length-prefixed string
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        self.write_buffer(s.as_bytes())
    }

    /// Write a single blob segment as `op_batch_segments` expects it
    ///
    /// The segment length appears three times: twice as XDR integers and
    /// once as a little-endian prefix inside the opaque payload.
    pub fn write_blob_buffer(&mut self, segment: &[u8]) -> Result<()> {
        let len = segment.len();
        if len > u16::MAX as usize {
            return Err(Error::SegmentTooLarge(len));
        }
        self.write_i32(len as i32 + 2)?;
        self.write_i32(len as i32 + 2)?;
        self.write_u16_le(len as u16)?;
        self.write_bytes(segment)?;
        self.write_pad(len + 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_i32() {
        let mut buf = WriteBuffer::new();
        buf.write_i32(0x01020304).unwrap();
        buf.write_i32(-1).unwrap();
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_write_i64() {
        let mut buf = WriteBuffer::new();
        buf.write_i64(0x0102030405060708).unwrap();
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_write_buffer_pads() {
        let mut buf = WriteBuffer::new();
        buf.write_buffer(b"hello").unwrap();
        assert_eq!(buf.as_slice(), &[0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o', 0, 0, 0]);
    }

    #[test]
    fn test_write_empty_buffer() {
        let mut buf = WriteBuffer::new();
        buf.write_buffer(&[]).unwrap();
        assert_eq!(buf.as_slice(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_write_opaque_fills_with_spaces() {
        let mut buf = WriteBuffer::new();
        buf.write_opaque(b"ab", 5).unwrap();
        assert_eq!(buf.as_slice(), &[b'a', b'b', b' ', b' ', b' ', 0, 0, 0]);
    }

    #[test]
    fn test_write_blob_buffer() {
        let mut buf = WriteBuffer::new();
        buf.write_blob_buffer(b"xyz").unwrap();
        assert_eq!(
            buf.as_slice(),
            &[0, 0, 0, 5, 0, 0, 0, 5, 3, 0, b'x', b'y', b'z', 0, 0, 0]
        );
    }

    #[test]
    fn test_max_capacity() {
        let mut buf = WriteBuffer::with_max_capacity(4, 4);
        buf.write_i32(1).unwrap();
        assert!(matches!(
            buf.write_u8(0),
            Err(Error::BufferOverflow { needed: 1, available: 0 })
        ));
    }
}
