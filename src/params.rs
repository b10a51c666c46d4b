//! Parameter buffers (DPB, TPB, SPB, BPB)
//!
//! A parameter buffer is a version byte followed by tag-prefixed clumplets.
//! Buffers are append-only while being built and are sent as raw bytes. The
//! layout of a clumplet depends on the buffer kind:
//!
//! | kind                 | header   | value length       | integers           |
//! |----------------------|----------|--------------------|--------------------|
//! | database             | `1`      | 1 byte             | `[4][i32 LE]`      |
//! | database (wide)      | `2`      | 4 bytes LE         | `[4 LE][i32 LE]`   |
//! | transaction          | `3`      | 1 byte, or none    | `[2][i16 LE]`      |
//! | service attach       | `2 2`    | 1 byte             | `[4][i32 LE]`      |
//! | service start        | none     | 2 bytes LE         | `[i32 LE]`         |
//! | blob                 | `1`      | 1 byte             | `[2][i16 LE]`      |

use crate::buffer::vax_integer;
use crate::constants::{bpb, dpb, spb, tpb};
use crate::error::{Error, Result};

/// Which parameter buffer format is being built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// DPB, `isc_dpb_version1`
    Database,
    /// DPB, `isc_dpb_version2` with 4-byte lengths
    DatabaseWide,
    /// TPB
    Transaction,
    /// SPB sent with service attach
    Service,
    /// SPB sent with service start (action block)
    ServiceStart,
    /// BPB
    Blob,
}

impl BufferKind {
    fn header(&self) -> &'static [u8] {
        match self {
            BufferKind::Database => &[dpb::VERSION1],
            BufferKind::DatabaseWide => &[2],
            BufferKind::Transaction => &[tpb::VERSION3],
            BufferKind::Service => &[spb::VERSION2, spb::CURRENT_VERSION],
            BufferKind::ServiceStart => &[],
            BufferKind::Blob => &[bpb::VERSION1],
        }
    }

    fn length_width(&self) -> usize {
        match self {
            BufferKind::DatabaseWide => 4,
            BufferKind::ServiceStart => 2,
            _ => 1,
        }
    }
}

/// A tagged option buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBuffer {
    kind: BufferKind,
    data: Vec<u8>,
}

impl ParameterBuffer {
    /// Create an empty buffer of the given kind
    pub fn new(kind: BufferKind) -> Self {
        Self {
            kind,
            data: kind.header().to_vec(),
        }
    }

    /// Database parameter buffer
    pub fn dpb() -> Self {
        Self::new(BufferKind::Database)
    }

    /// Transaction parameter buffer
    pub fn tpb() -> Self {
        Self::new(BufferKind::Transaction)
    }

    /// Blob parameter buffer
    pub fn bpb() -> Self {
        Self::new(BufferKind::Blob)
    }

    /// Service start buffer, beginning with the action code
    pub fn service_start(action: u8) -> Self {
        let mut buf = Self::new(BufferKind::ServiceStart);
        buf.data.push(action);
        buf
    }

    /// Buffer format
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Encoded length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when nothing beyond the header was appended
    pub fn is_empty(&self) -> bool {
        self.data.len() <= self.header_len()
    }

    fn header_len(&self) -> usize {
        self.kind.header().len() + usize::from(self.kind == BufferKind::ServiceStart)
    }

    fn write_length(&mut self, len: usize) -> Result<()> {
        match self.kind.length_width() {
            1 => {
                let len = u8::try_from(len).map_err(|_| {
                    Error::DataConversion(format!("parameter value of {} bytes exceeds 255", len))
                })?;
                self.data.push(len);
            }
            2 => {
                let len = u16::try_from(len).map_err(|_| {
                    Error::DataConversion(format!("parameter value of {} bytes exceeds 65535", len))
                })?;
                self.data.extend_from_slice(&len.to_le_bytes());
            }
            _ => self.data.extend_from_slice(&(len as u32).to_le_bytes()),
        }
        Ok(())
    }

    fn write_small_length(&mut self, len: u8) {
        match self.kind.length_width() {
            1 => self.data.push(len),
            2 => self.data.extend_from_slice(&[len, 0]),
            _ => self.data.extend_from_slice(&[len, 0, 0, 0]),
        }
    }

    /// Append a tag with no value
    ///
    /// TPB options and service start switches are bare tags; every other
    /// format writes an explicit zero length.
    pub fn append_flag(&mut self, tag: u8) {
        self.data.push(tag);
        match self.kind {
            BufferKind::Transaction | BufferKind::ServiceStart => {}
            BufferKind::DatabaseWide => self.data.extend_from_slice(&[0, 0, 0, 0]),
            _ => self.data.push(0),
        }
    }

    /// Append a single-byte value
    pub fn append_u8(&mut self, tag: u8, value: u8) {
        self.data.push(tag);
        self.write_small_length(1);
        self.data.push(value);
    }

    /// Append a 16-bit value
    pub fn append_i16(&mut self, tag: u8, value: i16) {
        self.data.push(tag);
        self.write_small_length(2);
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a 32-bit value
    pub fn append_i32(&mut self, tag: u8, value: i32) {
        self.data.push(tag);
        if self.kind != BufferKind::ServiceStart {
            self.write_small_length(4);
        }
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Append raw bytes
    pub fn append_bytes(&mut self, tag: u8, value: &[u8]) -> Result<()> {
        let rollback = self.data.len();
        self.data.push(tag);
        if let Err(e) = self.write_length(value.len()) {
            self.data.truncate(rollback);
            return Err(e);
        }
        self.data.extend_from_slice(value);
        Ok(())
    }

    /// Append a string value
    pub fn append_str(&mut self, tag: u8, value: &str) -> Result<()> {
        self.append_bytes(tag, value.as_bytes())
    }

    /// Iterate over the clumplets in order
    pub fn iter(&self) -> ClumpletIter<'_> {
        ClumpletIter {
            kind: self.kind,
            data: &self.data,
            pos: self.header_len().min(self.data.len()),
        }
    }
}

impl AsRef<[u8]> for ParameterBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// One decoded clumplet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clumplet<'a> {
    /// Option tag
    pub tag: u8,
    /// Raw value bytes (empty for flags)
    pub value: &'a [u8],
}

impl<'a> Clumplet<'a> {
    /// Value as a little-endian integer
    pub fn as_int(&self) -> i64 {
        vax_integer(self.value)
    }

    /// Value as text
    pub fn as_str(&self) -> String {
        String::from_utf8_lossy(self.value).into_owned()
    }
}

/// Iterator over the clumplets of a [`ParameterBuffer`]
pub struct ClumpletIter<'a> {
    kind: BufferKind,
    data: &'a [u8],
    pos: usize,
}

impl<'a> ClumpletIter<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::BufferUnderflow {
                needed: n,
                available: self.data.len() - self.pos,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_length(&mut self) -> Result<usize> {
        let bytes = self.take(self.kind.length_width())?;
        Ok(bytes.iter().rev().fold(0usize, |acc, b| (acc << 8) | *b as usize))
    }

    fn next_clumplet(&mut self) -> Result<Clumplet<'a>> {
        let tag = self.take(1)?[0];
        let value = match self.kind {
            BufferKind::Transaction => match tag {
                tpb::LOCK_READ | tpb::LOCK_WRITE | tpb::LOCK_TIMEOUT => {
                    let len = self.take_length()?;
                    self.take(len)?
                }
                _ => &[],
            },
            BufferKind::ServiceStart => match tag {
                spb::DBNAME | spb::USER_NAME | spb::SQL_ROLE_NAME => {
                    let len = self.take_length()?;
                    self.take(len)?
                }
                spb::OPTIONS | spb::CONNECT_TIMEOUT => self.take(4)?,
                _ => &[],
            },
            _ => {
                let len = self.take_length()?;
                self.take(len)?
            }
        };
        Ok(Clumplet { tag, value })
    }
}

impl<'a> Iterator for ClumpletIter<'a> {
    type Item = Result<Clumplet<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let item = self.next_clumplet();
        if item.is_err() {
            self.pos = self.data.len();
        }
        Some(item)
    }
}
