//! Read buffer for decoding XDR data held in memory
//!
//! Used for information responses, event counters, slices and any other
//! payload that arrives inside an opaque buffer. Big-endian XDR primitives
//! sit next to the little-endian "vax" integers that information clumplets
//! use.

use bytes::Bytes;

use crate::error::{Error, Result};

/// A buffer for reading XDR-encoded data
#[derive(Debug)]
pub struct ReadBuffer {
    /// The underlying byte data
    data: Bytes,
    /// Current read position
    pos: usize,
}

impl ReadBuffer {
    /// Create a new ReadBuffer from bytes
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    /// Create a new ReadBuffer from a byte slice
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            data: Bytes::copy_from_slice(data),
            pos: 0,
        }
    }

    /// Create a new ReadBuffer from a Vec
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
            pos: 0,
        }
    }

    /// Get the current position in the buffer
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get the total length of the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of bytes remaining to be read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Skip `n` bytes in the buffer
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure_remaining(n)?;
        self.pos += n;
        Ok(())
    }

    /// Look at the next byte without consuming it
    pub fn peek_u8(&self) -> Result<u8> {
        self.ensure_remaining(1)?;
        Ok(self.data[self.pos])
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    #[inline]
    fn ensure_remaining(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            Err(Error::BufferUnderflow {
                needed: n,
                available: self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Raw byte reads
    // =========================================================================

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure_remaining(1)?;
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    /// Read raw bytes and return as a new Bytes
    pub fn read_bytes_owned(&mut self, n: usize) -> Result<Bytes> {
        self.ensure_remaining(n)?;
        let bytes = self.data.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(bytes)
    }

    // =========================================================================
    // XDR reads (big-endian, 4-byte aligned)
    // =========================================================================

    /// Read a 32-bit signed integer
    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure_remaining(4)?;
        let b = &self.data[self.pos..self.pos + 4];
        let value = i32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        self.pos += 4;
        Ok(value)
    }

    /// Read a 64-bit signed integer
    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure_remaining(8)?;
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.data[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(i64::from_be_bytes(b))
    }

    /// Read `len` bytes of opaque data followed by its alignment padding
    pub fn read_opaque(&mut self, len: usize) -> Result<Bytes> {
        let pad = xdr_pad(len);
        self.ensure_remaining(len + pad)?;
        let bytes = self.data.slice(self.pos..self.pos + len);
        self.pos += len + pad;
        Ok(bytes)
    }

    /// Read a length-prefixed opaque buffer
    pub fn read_buffer(&mut self) -> Result<Bytes> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(Error::Protocol(format!("negative buffer length {}", len)));
        }
        self.read_opaque(len as usize)
    }

    /// Read a length-prefixed string
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_buffer()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    // =========================================================================
    // Little-endian reads (information clumplets, segment headers)
    // =========================================================================

    /// Read a 16-bit unsigned integer in little-endian format
    pub fn read_u16_le(&mut self) -> Result<u16> {
        self.ensure_remaining(2)?;
        let value = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(value)
    }

    /// Read a little-endian integer of `len` bytes (at most 8)
    pub fn read_vax_int(&mut self, len: usize) -> Result<i64> {
        if len > 8 {
            return Err(Error::Protocol(format!("integer of {} bytes", len)));
        }
        self.ensure_remaining(len)?;
        let value = vax_integer(&self.data[self.pos..self.pos + len]);
        self.pos += len;
        Ok(value)
    }

    /// Read a 2-byte length followed by a little-endian integer of that length
    pub fn read_vax_clumplet(&mut self) -> Result<i64> {
        let len = self.read_u16_le()? as usize;
        self.read_vax_int(len)
    }
}

/// Alignment padding that follows `len` opaque bytes
#[inline]
pub fn xdr_pad(len: usize) -> usize {
    (4 - (len & 3)) & 3
}

/// Decode a little-endian, sign-extended integer
pub fn vax_integer(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let mut value: i64 = 0;
    for (shift, b) in bytes.iter().enumerate() {
        value |= (*b as i64) << (shift * 8);
    }
    let bits = bytes.len() * 8;
    if bits < 64 && bytes[bytes.len() - 1] & 0x80 != 0 {
        value -= 1i64 << bits;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_i32() {
        let mut buf = ReadBuffer::from_slice(&[0xFF, 0xFF, 0xFF, 0xFE, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(buf.read_i32().unwrap(), -2);
        assert_eq!(buf.read_i32().unwrap(), 256);
        assert!(buf.read_i32().is_err());
    }

    #[test]
    fn test_read_buffer_skips_padding() {
        let mut buf = ReadBuffer::from_slice(&[0, 0, 0, 3, b'a', b'b', b'c', 0, 0, 0, 0, 7]);
        assert_eq!(&buf.read_buffer().unwrap()[..], b"abc");
        assert_eq!(buf.read_i32().unwrap(), 7);
    }

    #[test]
    fn test_read_buffer_underflow() {
        let mut buf = ReadBuffer::from_slice(&[0, 0, 0, 9, 1, 2]);
        match buf.read_buffer() {
            Err(Error::BufferUnderflow { needed, .. }) => assert_eq!(needed, 12),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_vax_integer() {
        assert_eq!(vax_integer(&[0x01, 0x02]), 0x0201);
        assert_eq!(vax_integer(&[0xFF]), -1);
        assert_eq!(vax_integer(&[0xFE, 0xFF, 0xFF, 0xFF]), -2);
        assert_eq!(vax_integer(&[]), 0);
    }

    #[test]
    fn test_read_vax_clumplet() {
        let mut buf = ReadBuffer::from_slice(&[4, 0, 0x00, 0x10, 0x00, 0x00]);
        assert_eq!(buf.read_vax_clumplet().unwrap(), 4096);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_xdr_pad() {
        assert_eq!(xdr_pad(0), 0);
        assert_eq!(xdr_pad(1), 3);
        assert_eq!(xdr_pad(4), 0);
        assert_eq!(xdr_pad(6), 2);
    }
}
