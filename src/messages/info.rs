//! Information requests and their responses
//!
//! Database, transaction, statement and blob info share one layout: the
//! client sends a list of item codes and the server answers with
//! `[item][u16 LE length][value]` groups closed by `isc_info_end`.

use bytes::Bytes;

use crate::buffer::{vax_integer, ReadBuffer};
use crate::constants::{blob_info, db_info, info, sql_info, tra_info, StatementType};
use crate::error::{Error, Result};
use crate::xdr::XdrStream;

/// Queue an info request for `handle`
pub fn write_info_request(
    xdr: &mut XdrStream,
    operation: i32,
    handle: i32,
    items: &[u8],
    buffer_length: i32,
) -> Result<()> {
    xdr.write_op(operation)?;
    xdr.write_i32(handle)?;
    xdr.write_i32(0)?;
    xdr.write_buffer(items)?;
    xdr.write_i32(buffer_length)
}

/// One `[item][length][value]` group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoItem {
    /// Item code
    pub item: u8,
    /// Raw value
    pub value: Bytes,
}

impl InfoItem {
    /// Value as a little-endian integer
    pub fn as_int(&self) -> i64 {
        vax_integer(&self.value)
    }
}

/// Split an info response into its items
///
/// Stops at `isc_info_end` or at the end of the data. A truncated response
/// is reported as an error since the caller asked for a fixed item list.
pub fn parse_items(data: &[u8]) -> Result<Vec<InfoItem>> {
    let mut buf = ReadBuffer::from_slice(data);
    let mut items = Vec::new();
    while buf.remaining() > 0 {
        let item = buf.read_u8()?;
        match item {
            info::END => break,
            info::TRUNCATED => {
                return Err(Error::Protocol("information response truncated".to_string()))
            }
            info::ERROR => {
                return Err(Error::Protocol("server could not supply an information item".to_string()))
            }
            _ => {
                let len = buf.read_u16_le()? as usize;
                let value = buf.read_bytes_owned(len)?;
                items.push(InfoItem { item, value });
            }
        }
    }
    Ok(items)
}

/// Decode a `[count][len][text]...` version list
fn version_strings(value: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let Some((&count, mut rest)) = value.split_first() else {
        return out;
    };
    for _ in 0..count {
        let Some((&len, tail)) = rest.split_first() else {
            break;
        };
        let len = (len as usize).min(tail.len());
        out.push(String::from_utf8_lossy(&tail[..len]).into_owned());
        rest = &tail[len..];
    }
    out
}

// =============================================================================
// Database
// =============================================================================

/// Items requested for [`DatabaseInfo`]
pub const DATABASE_INFO_ITEMS: &[u8] = &[
    db_info::ISC_VERSION,
    db_info::FIREBIRD_VERSION,
    db_info::PAGE_SIZE,
    db_info::ODS_VERSION,
    db_info::ODS_MINOR_VERSION,
    db_info::SQL_DIALECT,
    db_info::READ_ONLY,
    db_info::FORCED_WRITES,
    db_info::SIZE_IN_PAGES,
    db_info::IMPLEMENTATION,
    info::END,
];

/// Summary of the attached database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseInfo {
    /// Server version string, e.g. `LI-V4.0.2.2816 Firebird 4.0`
    pub server_version: String,
    /// Firebird version strings, one per server in the chain
    pub firebird_version: Vec<String>,
    /// Page size in bytes
    pub page_size: u32,
    /// On-disk structure major version
    pub ods_version: u32,
    /// On-disk structure minor version
    pub ods_minor_version: u32,
    /// SQL dialect of the database
    pub sql_dialect: u8,
    /// Database is read-only
    pub read_only: bool,
    /// Forced writes enabled
    pub forced_writes: bool,
    /// Allocated pages
    pub size_in_pages: u64,
    /// Implementation code (cpu / os / compatibility / class)
    pub implementation: Vec<u8>,
}

impl DatabaseInfo {
    /// Decode a response to [`DATABASE_INFO_ITEMS`]
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut out = DatabaseInfo::default();
        for item in parse_items(data)? {
            match item.item {
                db_info::ISC_VERSION => {
                    out.server_version = version_strings(&item.value).into_iter().next().unwrap_or_default();
                }
                db_info::FIREBIRD_VERSION => out.firebird_version = version_strings(&item.value),
                db_info::PAGE_SIZE => out.page_size = item.as_int() as u32,
                db_info::ODS_VERSION => out.ods_version = item.as_int() as u32,
                db_info::ODS_MINOR_VERSION => out.ods_minor_version = item.as_int() as u32,
                db_info::SQL_DIALECT => out.sql_dialect = item.as_int() as u8,
                db_info::READ_ONLY => out.read_only = item.as_int() != 0,
                db_info::FORCED_WRITES => out.forced_writes = item.as_int() != 0,
                db_info::SIZE_IN_PAGES => out.size_in_pages = item.as_int() as u64,
                db_info::IMPLEMENTATION => out.implementation = item.value.to_vec(),
                other => tracing::trace!(item = other, "ignoring database info item"),
            }
        }
        Ok(out)
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// Items requested for [`TransactionInfo`]
pub const TRANSACTION_INFO_ITEMS: &[u8] = &[
    tra_info::ID,
    tra_info::OLDEST_INTERESTING,
    tra_info::OLDEST_SNAPSHOT,
    tra_info::OLDEST_ACTIVE,
    info::END,
];

/// Transaction counters reported by the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionInfo {
    /// Transaction id
    pub id: i64,
    /// Oldest interesting transaction
    pub oldest_interesting: i64,
    /// Oldest snapshot
    pub oldest_snapshot: i64,
    /// Oldest active transaction
    pub oldest_active: i64,
}

impl TransactionInfo {
    /// Decode a response to [`TRANSACTION_INFO_ITEMS`]
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut out = TransactionInfo::default();
        for item in parse_items(data)? {
            match item.item {
                tra_info::ID => out.id = item.as_int(),
                tra_info::OLDEST_INTERESTING => out.oldest_interesting = item.as_int(),
                tra_info::OLDEST_SNAPSHOT => out.oldest_snapshot = item.as_int(),
                tra_info::OLDEST_ACTIVE => out.oldest_active = item.as_int(),
                _ => {}
            }
        }
        Ok(out)
    }
}

// =============================================================================
// Blob
// =============================================================================

/// Items requested for [`BlobInfo`]
pub const BLOB_INFO_ITEMS: &[u8] = &[
    blob_info::NUM_SEGMENTS,
    blob_info::MAX_SEGMENT,
    blob_info::TOTAL_LENGTH,
    blob_info::TYPE,
    info::END,
];

/// Blob size information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobInfo {
    /// Number of segments
    pub num_segments: u32,
    /// Longest segment
    pub max_segment: u32,
    /// Total length in bytes
    pub total_length: u64,
    /// True for stream blobs
    pub is_stream: bool,
}

impl BlobInfo {
    /// Decode a response to [`BLOB_INFO_ITEMS`]
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut out = BlobInfo::default();
        for item in parse_items(data)? {
            match item.item {
                blob_info::NUM_SEGMENTS => out.num_segments = item.as_int() as u32,
                blob_info::MAX_SEGMENT => out.max_segment = item.as_int() as u32,
                blob_info::TOTAL_LENGTH => out.total_length = item.as_int() as u64,
                blob_info::TYPE => out.is_stream = item.as_int() == 1,
                _ => {}
            }
        }
        Ok(out)
    }
}

// =============================================================================
// Statement
// =============================================================================

/// Items asking for the statement type only
pub const STATEMENT_TYPE_ITEMS: &[u8] = &[sql_info::STMT_TYPE];

/// Items asking for the affected-record counters
pub const RECORDS_ITEMS: &[u8] = &[sql_info::RECORDS, info::END];

/// Extract the statement type from an info response
pub fn parse_statement_type(data: &[u8]) -> Result<StatementType> {
    parse_items(data)?
        .into_iter()
        .find(|i| i.item == sql_info::STMT_TYPE)
        .map(|i| StatementType::from_code(i.as_int() as i32))
        .ok_or_else(|| Error::Protocol("statement type missing from info response".to_string()))
}

/// Sum the insert, update and delete counters of an `isc_info_sql_records` reply
///
/// Select counts are not records affected and are skipped.
pub fn parse_records_affected(data: &[u8]) -> Result<i64> {
    let mut total = 0;
    for item in parse_items(data)? {
        if item.item != sql_info::RECORDS {
            continue;
        }
        let mut buf = ReadBuffer::new(item.value);
        while buf.remaining() > 0 {
            let counter = buf.read_u8()?;
            if counter == info::END {
                break;
            }
            let len = buf.read_u16_le()? as usize;
            let count = buf.read_vax_int(len)?;
            match counter {
                sql_info::REQ_INSERT_COUNT
                | sql_info::REQ_UPDATE_COUNT
                | sql_info::REQ_DELETE_COUNT => total += count,
                _ => {}
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(tag: u8, value: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&(value.len() as u16).to_le_bytes());
        out.extend_from_slice(value);
        out
    }

    #[test]
    fn test_parse_items_stops_at_end() {
        let mut data = item(4, &[1, 0, 0, 0]);
        data.push(info::END);
        data.extend_from_slice(&[9, 9, 9]);
        let items = parse_items(&data).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_int(), 1);
    }

    #[test]
    fn test_truncated_info_is_an_error() {
        assert!(parse_items(&[info::TRUNCATED]).is_err());
    }

    #[test]
    fn test_database_info() {
        let mut data = item(db_info::ISC_VERSION, b"\x01\x0bWI-V4.0.2.1");
        data.extend(item(db_info::PAGE_SIZE, &8192u32.to_le_bytes()));
        data.extend(item(db_info::ODS_VERSION, &[13, 0, 0, 0]));
        data.extend(item(db_info::ODS_MINOR_VERSION, &[0, 0, 0, 0]));
        data.extend(item(db_info::SQL_DIALECT, &[3]));
        data.extend(item(db_info::FIREBIRD_VERSION, b"\x02\x03abc\x02de"));
        data.push(info::END);

        let parsed = DatabaseInfo::parse(&data).unwrap();
        assert_eq!(parsed.server_version, "WI-V4.0.2.1");
        assert_eq!(parsed.page_size, 8192);
        assert_eq!(parsed.ods_version, 13);
        assert_eq!(parsed.sql_dialect, 3);
        assert_eq!(parsed.firebird_version, vec!["abc", "de"]);
    }

    #[test]
    fn test_statement_type() {
        let mut data = item(sql_info::STMT_TYPE, &[1, 0, 0, 0]);
        data.push(info::END);
        assert_eq!(parse_statement_type(&data).unwrap(), StatementType::Select);
        assert!(parse_statement_type(&[info::END]).is_err());
    }

    #[test]
    fn test_records_affected_excludes_selects() {
        let mut counters = item(sql_info::REQ_SELECT_COUNT, &[7, 0, 0, 0]);
        counters.extend(item(sql_info::REQ_INSERT_COUNT, &[2, 0, 0, 0]));
        counters.extend(item(sql_info::REQ_UPDATE_COUNT, &[3, 0, 0, 0]));
        counters.extend(item(sql_info::REQ_DELETE_COUNT, &[1, 0, 0, 0]));
        counters.push(info::END);
        let mut data = item(sql_info::RECORDS, &counters);
        data.push(info::END);
        assert_eq!(parse_records_affected(&data).unwrap(), 6);
    }

    #[test]
    fn test_blob_info() {
        let mut data = item(blob_info::NUM_SEGMENTS, &[3, 0, 0, 0]);
        data.extend(item(blob_info::MAX_SEGMENT, &[0xFF, 0x7F, 0, 0]));
        data.extend(item(blob_info::TOTAL_LENGTH, &[0x10, 0x27, 0, 0]));
        data.extend(item(blob_info::TYPE, &[0, 0, 0, 0]));
        data.push(info::END);
        let parsed = BlobInfo::parse(&data).unwrap();
        assert_eq!(parsed.num_segments, 3);
        assert_eq!(parsed.max_segment, 32767);
        assert_eq!(parsed.total_length, 10000);
        assert!(!parsed.is_stream);
    }
}
