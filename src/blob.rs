//! Blobs
//!
//! A [`Blob`] binds a transient server handle to a persistent blob id. Data
//! moves one bounded chunk per round trip: `op_get_segment` returns a buffer
//! of `[u16 LE length][bytes]` segments, and writes go out through
//! `op_batch_segments` with the same framing. End of stream is a flag on
//! the reply, separate from how much data arrived, so an empty or short
//! segment never ends a read by itself.

use std::sync::Arc;

use bytes::Bytes;

use crate::buffer::ReadBuffer;
use crate::connection::{locked, ConnectionInner, Session};
use crate::constants::{bpb, buffer_size, op};
use crate::error::{Error, Result};
use crate::messages::{BlobInfo, BLOB_INFO_ITEMS};
use crate::params::ParameterBuffer;
use crate::transaction::Transaction;

/// `op_get_segment` reply handle while more data remains
const SEGMENT_MORE: i32 = 1;

/// `op_get_segment` reply handle at end of stream
const SEGMENT_EOF: i32 = 2;

/// Largest chunk requested or written by the convenience helpers
const MAX_CHUNK: usize = buffer_size::MAX_SEGMENT - buffer_size::SEGMENT_HEADER;

/// Origin of a [`Blob::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SeekMode {
    /// From the start
    Start = 0,
    /// From the current position
    Current = 1,
    /// From the end
    End = 2,
}

/// Direction a blob was opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobMode {
    /// Opened with `op_open_blob2`
    Read,
    /// Created with `op_create_blob2`
    Write,
}

impl BlobMode {
    fn as_str(&self) -> &'static str {
        match self {
            BlobMode::Read => "read",
            BlobMode::Write => "write",
        }
    }
}

/// BPB for a blob of the given subtype and storage type
pub fn blob_parameters(sub_type: i16, stream: bool) -> ParameterBuffer {
    let mut buf = ParameterBuffer::bpb();
    buf.append_u8(
        bpb::TYPE,
        if stream { bpb::TYPE_STREAM } else { bpb::TYPE_SEGMENTED },
    );
    buf.append_i16(bpb::TARGET_TYPE, sub_type);
    buf
}

/// An open blob
///
/// Close a written blob explicitly; dropping it cancels the write.
pub struct Blob {
    session: Arc<Session>,
    handle: i32,
    id: i64,
    mode: BlobMode,
    open: bool,
    eof: bool,
}

impl Blob {
    pub(crate) async fn create(
        session: Arc<Session>,
        transaction: &Transaction,
        bpb: Option<&ParameterBuffer>,
    ) -> Result<Self> {
        Self::bind(session, transaction, op::CREATE_BLOB2, 0, bpb, BlobMode::Write).await
    }

    pub(crate) async fn open(
        session: Arc<Session>,
        transaction: &Transaction,
        blob_id: i64,
        bpb: Option<&ParameterBuffer>,
    ) -> Result<Self> {
        Self::bind(session, transaction, op::OPEN_BLOB2, blob_id, bpb, BlobMode::Read).await
    }

    async fn bind(
        session: Arc<Session>,
        transaction: &Transaction,
        operation: i32,
        blob_id: i64,
        bpb: Option<&ParameterBuffer>,
        mode: BlobMode,
    ) -> Result<Self> {
        let tr_handle = transaction.active_handle()?;
        let bpb = bpb.map(ParameterBuffer::as_bytes).unwrap_or_default();
        let response = locked!(&session, |inner| {
            async {
                inner.ensure_attached()?;
                let xdr = inner.xdr()?;
                xdr.write_op(operation)?;
                xdr.write_buffer(bpb)?;
                xdr.write_i32(tr_handle)?;
                xdr.write_i64(blob_id)?;
                inner.call().await
            }
            .await
        })?;
        let id = if mode == BlobMode::Write { response.object_id } else { blob_id };
        tracing::debug!(handle = response.handle, id, mode = mode.as_str(), "blob opened");
        Ok(Blob {
            session,
            handle: response.handle,
            id,
            mode,
            open: true,
            eof: false,
        })
    }

    /// Persistent blob id
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Transient server handle
    pub fn handle(&self) -> i32 {
        self.handle
    }

    /// Read or write
    pub fn mode(&self) -> BlobMode {
        self.mode
    }

    /// True once the server reported the end of the stream
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// True until closed or cancelled
    pub fn is_open(&self) -> bool {
        self.open
    }

    fn require(&self, operation: &'static str, mode: BlobMode) -> Result<()> {
        if !self.open {
            return Err(Error::BlobState {
                operation,
                state: "closed",
            });
        }
        if self.mode != mode {
            return Err(Error::BlobState {
                operation,
                state: self.mode.as_str(),
            });
        }
        Ok(())
    }

    /// Read the next chunk of at most `max_length` bytes
    ///
    /// The result may hold several segments and may be empty without the
    /// stream being finished; check [`is_eof`](Self::is_eof).
    pub async fn get_segment(&mut self, max_length: usize) -> Result<Bytes> {
        self.require("get_segment", BlobMode::Read)?;
        if self.eof {
            return Ok(Bytes::new());
        }
        let handle = self.handle;
        let request = max_length.min(MAX_CHUNK) as i32;
        let response = locked!(&self.session, |inner| {
            async {
                let xdr = inner.xdr()?;
                xdr.write_op(op::GET_SEGMENT)?;
                xdr.write_i32(handle)?;
                xdr.write_i32(request)?;
                xdr.write_buffer(&[])?;
                inner.call().await
            }
            .await
        })?;
        match response.handle {
            SEGMENT_EOF => self.eof = true,
            SEGMENT_MORE | 0 => {}
            other => tracing::trace!(handle, state = other, "unexpected segment state"),
        }
        join_segments(&response.data)
    }

    /// Write one segment of up to 65535 bytes
    pub async fn put_segment(&mut self, data: &[u8]) -> Result<()> {
        self.require("put_segment", BlobMode::Write)?;
        if data.len() > u16::MAX as usize {
            return Err(Error::SegmentTooLarge(data.len()));
        }
        let handle = self.handle;
        locked!(&self.session, |inner| {
            async {
                let xdr = inner.xdr()?;
                xdr.write_op(op::BATCH_SEGMENTS)?;
                xdr.write_i32(handle)?;
                xdr.writer().buffer().write_blob_buffer(data)?;
                inner.call().await.map(|_| ())
            }
            .await
        })
    }

    /// Read everything up to the end of the stream
    pub async fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while !self.eof {
            let chunk = self.get_segment(MAX_CHUNK).await?;
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Write `data` as a series of maximum-size segments
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(buffer_size::MAX_SEGMENT) {
            self.put_segment(chunk).await?;
        }
        Ok(())
    }

    /// Move the read position of a stream blob; returns the new position
    pub async fn seek(&mut self, mode: SeekMode, offset: i32) -> Result<i32> {
        self.require("seek", BlobMode::Read)?;
        let handle = self.handle;
        let response = locked!(&self.session, |inner| {
            async {
                let xdr = inner.xdr()?;
                xdr.write_op(op::SEEK_BLOB)?;
                xdr.write_i32(handle)?;
                xdr.write_i32(mode as i32)?;
                xdr.write_i32(offset)?;
                inner.call().await
            }
            .await
        })?;
        self.eof = false;
        Ok(response.handle)
    }

    /// Segment count, sizes and storage type
    pub async fn info(&self) -> Result<BlobInfo> {
        if !self.open {
            return Err(Error::BlobState {
                operation: "info",
                state: "closed",
            });
        }
        let handle = self.handle;
        let data = locked!(&self.session, |inner| {
            inner
                .info(op::INFO_BLOB, handle, BLOB_INFO_ITEMS, buffer_size::DEFAULT_INFO)
                .await
        })?;
        BlobInfo::parse(&data)
    }

    /// Finish the blob; a written blob becomes visible under its id
    pub async fn close(&mut self) -> Result<()> {
        self.release(op::CLOSE_BLOB).await
    }

    /// Discard the blob
    pub async fn cancel(&mut self) -> Result<()> {
        self.release(op::CANCEL_BLOB).await
    }

    async fn release(&mut self, operation: i32) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        let handle = self.handle;
        self.open = false;
        locked!(&self.session, |inner| release_handle(inner, operation, handle).await)?;
        tracing::debug!(handle, id = self.id, "blob released");
        Ok(())
    }
}

async fn release_handle(inner: &mut ConnectionInner, operation: i32, handle: i32) -> Result<()> {
    let xdr = inner.xdr()?;
    xdr.write_op(operation)?;
    xdr.write_i32(handle)?;
    inner.call().await.map(|_| ())
}

/// Concatenate the `[u16 LE length][bytes]` segments of a reply
fn join_segments(data: &[u8]) -> Result<Bytes> {
    let mut buf = ReadBuffer::from_slice(data);
    let mut out = Vec::with_capacity(data.len());
    while buf.remaining() >= 2 {
        let len = buf.read_u16_le()? as usize;
        out.extend_from_slice(&buf.read_bytes_owned(len)?);
    }
    Ok(Bytes::from(out))
}

impl Drop for Blob {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let operation = match self.mode {
            BlobMode::Read => op::CLOSE_BLOB,
            BlobMode::Write => op::CANCEL_BLOB,
        };
        let session = Arc::clone(&self.session);
        let handle = self.handle;
        runtime.spawn(async move {
            let mut inner = session.inner.lock().await;
            if let Err(e) = release_handle(&mut inner, operation, handle).await {
                tracing::warn!(handle, error = %e, "release of dropped blob failed");
            }
        });
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("mode", &self.mode)
            .field("eof", &self.eof)
            .finish()
    }
}
