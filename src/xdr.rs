//! XDR stream codec
//!
//! [`XdrStream`] owns one byte channel split into a buffered reader and a
//! buffered writer. Writes accumulate in memory until [`XdrStream::flush`];
//! reads pull whole fields from the channel, so an awaiting caller is only
//! ever suspended at the channel boundary and never inside a value.
//!
//! Every channel fault, including a read timeout or an unexpected end of
//! stream, surfaces as [`Error::NetworkRead`] or [`Error::NetworkWrite`].

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::buffer::{xdr_pad, WriteBuffer};
use crate::constants::{arg, op};
use crate::error::{Error, Result};
use crate::status::{StatusEntry, StatusVector};
use crate::transport::{Arc4, BoxedStream};

const READ_CHUNK: usize = 8192;

// =============================================================================
// Reader
// =============================================================================

/// Buffered XDR reader over the read half of a channel
pub struct XdrReader {
    inner: ReadHalf<BoxedStream>,
    buf: BytesMut,
    cipher: Option<Arc4>,
    read_timeout: Option<Duration>,
}

impl XdrReader {
    /// Wrap the read half of a channel
    pub fn new(inner: ReadHalf<BoxedStream>) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
            cipher: None,
            read_timeout: None,
        }
    }

    /// Bound how long a single read may block
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Decrypt everything received from now on
    pub fn start_decryption(&mut self, key: &[u8]) -> Result<()> {
        self.cipher = Some(Arc4::new(key)?);
        Ok(())
    }

    /// Buffer at least `n` bytes
    async fn fill(&mut self, n: usize) -> Result<()> {
        while self.buf.len() < n {
            let start = self.buf.len();
            self.buf.reserve(READ_CHUNK.max(n - start));
            let read = match self.read_timeout {
                Some(limit) => tokio::time::timeout(limit, self.inner.read_buf(&mut self.buf))
                    .await
                    .map_err(|_| Error::NetworkRead(format!("read timed out after {:?}", limit)))?,
                None => self.inner.read_buf(&mut self.buf).await,
            }
            .map_err(Error::network_read)?;

            if read == 0 {
                return Err(Error::NetworkRead("connection closed by peer".to_string()));
            }
            if let Some(cipher) = self.cipher.as_mut() {
                cipher.apply(&mut self.buf[start..]);
            }
        }
        Ok(())
    }

    /// Read a 32-bit signed integer
    pub async fn read_i32(&mut self) -> Result<i32> {
        self.fill(4).await?;
        Ok(self.buf.get_i32())
    }

    /// Read a 64-bit signed integer
    pub async fn read_i64(&mut self) -> Result<i64> {
        self.fill(8).await?;
        Ok(self.buf.get_i64())
    }

    /// Read `n` raw bytes with no alignment padding
    pub async fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        self.fill(n).await?;
        Ok(self.buf.split_to(n).freeze())
    }

    /// Read `len` opaque bytes and skip their padding
    pub async fn read_opaque(&mut self, len: usize) -> Result<Bytes> {
        let pad = xdr_pad(len);
        self.fill(len + pad).await?;
        let data = self.buf.split_to(len).freeze();
        self.buf.advance(pad);
        Ok(data)
    }

    /// Read a length-prefixed opaque buffer
    pub async fn read_buffer(&mut self) -> Result<Bytes> {
        self.fill(4).await?;
        let len = i32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if len < 0 {
            return Err(Error::Protocol(format!("negative buffer length {}", len)));
        }
        let len = len as usize;
        self.fill(4 + len + xdr_pad(len)).await?;
        self.buf.advance(4);
        self.read_opaque(len).await
    }

    /// Read a length-prefixed string
    pub async fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_buffer().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read the next operation code, skipping keep-alive dummies
    pub async fn read_operation(&mut self) -> Result<i32> {
        loop {
            let code = self.read_i32().await?;
            if code != op::DUMMY {
                tracing::trace!(op = op::name(code), code, "received operation");
                return Ok(code);
            }
        }
    }

    /// Read a status vector up to and including `isc_arg_end`
    pub async fn read_status_vector(&mut self) -> Result<StatusVector> {
        let mut sv = StatusVector::new();
        loop {
            let kind = self.read_i32().await?;
            match kind {
                arg::END => break,
                arg::STRING | arg::CSTRING | arg::INTERPRETED => {
                    sv.push(StatusEntry::Text(self.read_string().await?));
                }
                arg::SQL_STATE => sv.push(StatusEntry::SqlState(self.read_string().await?)),
                _ => {
                    let code = self.read_i32().await?;
                    sv.push_code(kind, code);
                }
            }
        }
        Ok(sv)
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Write half of a channel plus its optional encryption
pub struct WireSink {
    inner: WriteHalf<BoxedStream>,
    cipher: Option<Arc4>,
}

impl WireSink {
    /// Send bytes, encrypting them first when wire crypt is active
    pub async fn send(&mut self, mut data: BytesMut) -> Result<()> {
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.apply(&mut data);
        }
        self.inner.write_all(&data).await.map_err(Error::network_write)?;
        self.inner.flush().await.map_err(Error::network_write)
    }

    /// Close the write side of the channel
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await.map_err(Error::network_write)
    }
}

/// Shared handle to a channel's write side
pub type SharedSink = Arc<Mutex<WireSink>>;

/// Buffered XDR writer
pub struct XdrWriter {
    buf: WriteBuffer,
    sink: SharedSink,
}

impl XdrWriter {
    /// Wrap the write half of a channel
    pub fn new(inner: WriteHalf<BoxedStream>) -> Self {
        Self {
            buf: WriteBuffer::new(),
            sink: Arc::new(Mutex::new(WireSink {
                inner,
                cipher: None,
            })),
        }
    }

    /// Handle to the write side for out-of-band requests
    pub fn sink(&self) -> SharedSink {
        Arc::clone(&self.sink)
    }

    /// Encrypt everything sent from now on
    pub async fn start_encryption(&mut self, key: &[u8]) -> Result<()> {
        let cipher = Arc4::new(key)?;
        self.sink.lock().await.cipher = Some(cipher);
        Ok(())
    }

    /// Bytes waiting for the next flush
    pub fn pending(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// Send everything buffered so far
    pub async fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let data = self.buf.take();
        tracing::trace!(bytes = data.len(), "flushing request");
        self.sink.lock().await.send(data).await
    }

    /// Access the request buffer directly
    pub fn buffer(&mut self) -> &mut WriteBuffer {
        &mut self.buf
    }
}

// =============================================================================
// Stream
// =============================================================================

/// Reader and writer over one channel
pub struct XdrStream {
    reader: XdrReader,
    writer: XdrWriter,
}

impl XdrStream {
    /// Split a channel into its buffered halves
    pub fn new(stream: BoxedStream) -> Self {
        let (r, w) = tokio::io::split(stream);
        Self {
            reader: XdrReader::new(r),
            writer: XdrWriter::new(w),
        }
    }

    /// Reading half
    pub fn reader(&mut self) -> &mut XdrReader {
        &mut self.reader
    }

    /// Writing half
    pub fn writer(&mut self) -> &mut XdrWriter {
        &mut self.writer
    }

    /// Give up the halves, e.g. to move the reader into a listener task
    pub fn into_parts(self) -> (XdrReader, XdrWriter) {
        (self.reader, self.writer)
    }

    /// Turn on Arc4 in both directions with the session key
    ///
    /// Must be called after the crypt request is flushed and before its
    /// response is read.
    pub async fn start_encryption(&mut self, key: &[u8]) -> Result<()> {
        self.writer.start_encryption(key).await?;
        self.reader.start_decryption(key)
    }

    /// Bound how long a single read may block
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.reader.set_read_timeout(timeout);
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Write a 32-bit signed integer
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.writer.buf.write_i32(value)
    }

    /// Write a 64-bit signed integer
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.writer.buf.write_i64(value)
    }

    /// Write a length-prefixed opaque buffer
    pub fn write_buffer(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.buf.write_buffer(bytes)
    }

    /// Write a length-prefixed string
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        self.writer.buf.write_string(s)
    }

    /// Write opaque data occupying exactly `len` bytes
    pub fn write_opaque(&mut self, bytes: &[u8], len: usize) -> Result<()> {
        self.writer.buf.write_opaque(bytes, len)
    }

    /// Write pre-encoded bytes verbatim
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.buf.write_bytes(bytes)
    }

    /// Start a request with its operation code
    pub fn write_op(&mut self, code: i32) -> Result<()> {
        tracing::trace!(op = op::name(code), code, "sending operation");
        self.writer.buf.write_i32(code)
    }

    /// Send everything buffered so far
    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Read a 32-bit signed integer
    pub async fn read_i32(&mut self) -> Result<i32> {
        self.reader.read_i32().await
    }

    /// Read a 64-bit signed integer
    pub async fn read_i64(&mut self) -> Result<i64> {
        self.reader.read_i64().await
    }

    /// Read a length-prefixed opaque buffer
    pub async fn read_buffer(&mut self) -> Result<Bytes> {
        self.reader.read_buffer().await
    }

    /// Read a length-prefixed string
    pub async fn read_string(&mut self) -> Result<String> {
        self.reader.read_string().await
    }

    /// Read `len` opaque bytes and skip their padding
    pub async fn read_opaque(&mut self, len: usize) -> Result<Bytes> {
        self.reader.read_opaque(len).await
    }

    /// Read the next operation code
    pub async fn read_operation(&mut self) -> Result<i32> {
        self.reader.read_operation().await
    }

    /// Read a status vector
    pub async fn read_status_vector(&mut self) -> Result<StatusVector> {
        self.reader.read_status_vector().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn stream(mock: tokio_test::io::Mock) -> XdrStream {
        XdrStream::new(Box::new(mock))
    }

    #[tokio::test]
    async fn test_reads_fields_split_across_chunks() {
        let mock = Builder::new()
            .read(&[0, 0])
            .read(&[0, 7, 0, 0, 0, 5, b'h'])
            .read(&[b'e', b'l', b'l', b'o', 0, 0, 0])
            .build();
        let mut xdr = stream(mock);
        assert_eq!(xdr.read_i32().await.unwrap(), 7);
        assert_eq!(xdr.read_string().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_read_operation_skips_dummy() {
        let mock = Builder::new()
            .read(&[0, 0, 0, 71, 0, 0, 0, 71, 0, 0, 0, 9])
            .build();
        let mut xdr = stream(mock);
        assert_eq!(xdr.read_operation().await.unwrap(), op::RESPONSE);
    }

    #[tokio::test]
    async fn test_eof_is_network_read() {
        let mock = Builder::new().read(&[0, 0]).build();
        let mut xdr = stream(mock);
        assert!(matches!(xdr.read_i32().await, Err(Error::NetworkRead(_))));
    }

    #[tokio::test]
    async fn test_writes_are_buffered_until_flush() {
        let mock = Builder::new()
            .write(&[0, 0, 0, 93, 0, 0, 0, 2, b'o', b'k', 0, 0])
            .build();
        let mut xdr = stream(mock);
        xdr.write_op(op::PING).unwrap();
        xdr.write_string("ok").unwrap();
        assert_eq!(xdr.writer().pending().len(), 12);
        xdr.flush().await.unwrap();
        assert!(xdr.writer().pending().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_is_network_write() {
        let mock = Builder::new()
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let mut xdr = stream(mock);
        xdr.write_op(op::PING).unwrap();
        assert!(matches!(xdr.flush().await, Err(Error::NetworkWrite(_))));
    }

    #[tokio::test]
    async fn test_status_vector_from_stream() {
        let mock = Builder::new()
            .read(&[0, 0, 0, 1, 0x13, 0xF0, 0x00, 0x6E])
            .read(&[0, 0, 0, 19, 0, 0, 0, 5, b'4', b'2', b'0', b'0', b'0', 0, 0, 0])
            .read(&[0, 0, 0, 0])
            .build();
        let mut xdr = stream(mock);
        let sv = xdr.read_status_vector().await.unwrap();
        assert_eq!(sv.error_code(), Some(0x13F0006E));
        assert_eq!(sv.sql_state(), Some("42000"));
    }

    #[tokio::test]
    async fn test_encrypted_round_trip_over_duplex() {
        let key = [9u8; 20];
        let (a, b) = tokio::io::duplex(1024);
        let mut client = XdrStream::new(Box::new(a));
        let mut server = XdrStream::new(Box::new(b));
        client.start_encryption(&key).await.unwrap();
        server.start_encryption(&key).await.unwrap();

        client.write_i32(42).unwrap();
        client.write_buffer(b"secret").unwrap();
        client.flush().await.unwrap();

        assert_eq!(server.read_i32().await.unwrap(), 42);
        assert_eq!(&server.read_buffer().await.unwrap()[..], b"secret");
    }
}
