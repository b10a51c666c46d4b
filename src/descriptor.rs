//! Field descriptors
//!
//! A [`Descriptor`] lists the input or output fields of a prepared
//! statement. It is filled from `op_prepare_statement` / `op_info_sql`
//! describe information and turned into the BLR message format that
//! execute and fetch requests carry.
//!
//! Describe information may not fit the server's reply buffer. The reply
//! then ends in `isc_info_truncated` and the request has to be repeated with
//! `isc_info_sql_sqlda_start` telling the server where each descriptor
//! should resume; see [`parse_sql_info`].

use std::ops::Index;

use crate::buffer::ReadBuffer;
use crate::constants::{blr, info, sql_info, sql_type};
use crate::error::{Error, Result};

/// Character set id of binary strings
pub const CHARSET_OCTETS: i32 = 1;

/// Character set id of UTF-8
pub const CHARSET_UTF8: i32 = 4;

/// Describe items for one descriptor, minus the leading select/bind tag
const FIELD_ITEMS: [u8; 11] = [
    sql_info::DESCRIBE_VARS,
    sql_info::SQLDA_SEQ,
    sql_info::TYPE,
    sql_info::SUB_TYPE,
    sql_info::SCALE,
    sql_info::LENGTH,
    sql_info::FIELD,
    sql_info::RELATION,
    sql_info::OWNER,
    sql_info::ALIAS,
    sql_info::DESCRIBE_END,
];

const fn part_items(tag: u8) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[0] = tag;
    let mut i = 0;
    while i < FIELD_ITEMS.len() {
        out[i + 1] = FIELD_ITEMS[i];
        i += 1;
    }
    out
}

const fn both_parts() -> [u8; 24] {
    let select = part_items(sql_info::SELECT);
    let bind = part_items(sql_info::BIND);
    let mut out = [0u8; 24];
    let mut i = 0;
    while i < 12 {
        out[i] = select[i];
        out[i + 12] = bind[i];
        i += 1;
    }
    out
}

/// Describe items for the output fields
pub const SELECT_ITEMS: [u8; 12] = part_items(sql_info::SELECT);

/// Describe items for the input parameters
pub const BIND_ITEMS: [u8; 12] = part_items(sql_info::BIND);

/// Describe items sent with prepare: output fields, then input parameters
pub const DESCRIBE_ITEMS: [u8; 24] = both_parts();

/// Metadata of one field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbField {
    /// SQL type code, with the low bit marking a nullable field
    pub data_type: i32,
    /// Subtype (character set for text, blob subtype, numeric flavour)
    pub sub_type: i32,
    /// Decimal scale, zero or negative
    pub scale: i32,
    /// Length in bytes
    pub length: i32,
    /// Column name
    pub name: String,
    /// Table name
    pub relation: String,
    /// Table owner
    pub owner: String,
    /// Column alias
    pub alias: String,
}

impl DbField {
    /// SQL type code without the nullable bit
    pub fn sql_type(&self) -> i32 {
        self.data_type & !1
    }

    /// Whether the field accepts NULL
    pub fn is_nullable(&self) -> bool {
        self.data_type & 1 != 0
    }

    /// Character set id of a text field
    pub fn charset(&self) -> i32 {
        self.sub_type & 0xFF
    }

    /// Whether values are raw bytes rather than text
    pub fn is_binary(&self) -> bool {
        matches!(self.sql_type(), sql_type::TEXT | sql_type::VARYING) && self.charset() == CHARSET_OCTETS
    }

    /// Alias, falling back to the column name
    pub fn display_name(&self) -> &str {
        if self.alias.is_empty() {
            &self.name
        } else {
            &self.alias
        }
    }

    /// Append this field's message format followed by its null indicator
    fn write_blr(&self, out: &mut Vec<u8>) -> Result<()> {
        let len = self.length.clamp(0, u16::MAX as i32) as u16;
        let scale = self.scale as i8 as u8;
        match self.sql_type() {
            sql_type::VARYING => {
                out.push(blr::VARYING);
                out.extend_from_slice(&len.to_le_bytes());
            }
            sql_type::TEXT => {
                out.push(blr::TEXT);
                out.extend_from_slice(&len.to_le_bytes());
            }
            sql_type::DOUBLE => out.push(blr::DOUBLE),
            sql_type::FLOAT => out.push(blr::FLOAT),
            sql_type::D_FLOAT => out.push(blr::D_FLOAT),
            sql_type::TYPE_DATE => out.push(blr::SQL_DATE),
            sql_type::TYPE_TIME => out.push(blr::SQL_TIME),
            sql_type::TIMESTAMP => out.push(blr::TIMESTAMP),
            sql_type::BLOB | sql_type::ARRAY => out.extend_from_slice(&[blr::QUAD, 0]),
            sql_type::LONG => out.extend_from_slice(&[blr::LONG, scale]),
            sql_type::SHORT => out.extend_from_slice(&[blr::SHORT, scale]),
            sql_type::INT64 => out.extend_from_slice(&[blr::INT64, scale]),
            sql_type::QUAD => out.extend_from_slice(&[blr::QUAD, scale]),
            sql_type::BOOLEAN => out.push(blr::BOOL),
            sql_type::NULL => out.extend_from_slice(&[blr::TEXT, 0, 0]),
            other => {
                return Err(Error::DataConversion(format!(
                    "field {} has unsupported SQL type {}",
                    self.display_name(),
                    other
                )))
            }
        }
        out.extend_from_slice(&[blr::SHORT, 0]);
        Ok(())
    }
}

/// Ordered field list of a statement's input or output message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    fields: Vec<DbField>,
}

impl Descriptor {
    /// Descriptor with `count` empty fields
    pub fn with_count(count: usize) -> Self {
        Self {
            fields: vec![DbField::default(); count],
        }
    }

    /// Descriptor over existing fields
    pub fn from_fields(fields: Vec<DbField>) -> Self {
        Self { fields }
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when there are no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field by position
    pub fn get(&self, index: usize) -> Option<&DbField> {
        self.fields.get(index)
    }

    /// All fields
    pub fn fields(&self) -> &[DbField] {
        &self.fields
    }

    /// Iterate over the fields
    pub fn iter(&self) -> std::slice::Iter<'_, DbField> {
        self.fields.iter()
    }

    /// Display names, in order
    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.display_name().to_string()).collect()
    }

    /// BLR message format: every field plus a short null indicator
    pub fn to_blr(&self) -> Result<Vec<u8>> {
        let slots = self.fields.len() * 2;
        if slots > u16::MAX as usize {
            return Err(Error::DataConversion(format!("{} fields in one message", self.fields.len())));
        }
        let mut out = Vec::with_capacity(8 + self.fields.len() * 6);
        out.extend_from_slice(&[blr::VERSION5, blr::BEGIN, blr::MESSAGE, 0]);
        out.extend_from_slice(&(slots as u16).to_le_bytes());
        for field in &self.fields {
            field.write_blr(&mut out)?;
        }
        out.extend_from_slice(&[blr::END, blr::EOC]);
        Ok(out)
    }

    fn field_mut(&mut self, seq: usize) -> Result<&mut DbField> {
        seq.checked_sub(1)
            .and_then(|i| self.fields.get_mut(i))
            .ok_or_else(|| malformed(format!("field {} is outside the descriptor", seq)))
    }
}

impl Index<usize> for Descriptor {
    type Output = DbField;

    fn index(&self, index: usize) -> &Self::Output {
        &self.fields[index]
    }
}

impl<'a> IntoIterator for &'a Descriptor {
    type Item = &'a DbField;
    type IntoIter = std::slice::Iter<'a, DbField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// Result of one round of describe parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescribeOutcome {
    /// Every descriptor is complete
    Complete,
    /// The reply was cut short; request these items next
    Truncated(Vec<u8>),
}

/// Parse one describe reply into `descriptors`
///
/// `items` is the item list originally requested, one part per descriptor
/// in order. Descriptors already created in an earlier round keep their
/// fields; a resumed reply only fills the fields it carries.
pub fn parse_sql_info(
    data: &[u8],
    items: &[u8],
    descriptors: &mut [Option<Descriptor>],
) -> Result<DescribeOutcome> {
    let mut buf = ReadBuffer::from_slice(data);
    let mut part: Option<usize> = None;
    let mut seq = 0usize;

    loop {
        if buf.remaining() == 0 {
            return Err(Error::Protocol("describe information ended without isc_info_end".to_string()));
        }
        let item = buf.read_u8()?;
        match item {
            info::END => return Ok(DescribeOutcome::Complete),
            sql_info::DESCRIBE_END => {}
            info::TRUNCATED => {
                let resume = seq.saturating_sub(1);
                return Ok(DescribeOutcome::Truncated(resume_items(items, descriptors, part, resume)));
            }
            sql_info::SELECT | sql_info::BIND => {
                let next = part.map_or(0, |p| p + 1);
                if next >= descriptors.len() {
                    return Err(malformed("more descriptors than requested"));
                }
                part = Some(next);
                seq = 0;
                if buf.peek_u8()? == info::TRUNCATED {
                    continue;
                }
                buf.skip(1)?;
                let count = buf.read_vax_clumplet()?;
                if count < 0 {
                    return Err(malformed(format!("negative field count {}", count)));
                }
                if descriptors[next].is_none() {
                    descriptors[next] = Some(Descriptor::with_count(count as usize));
                }
            }
            sql_info::SQLDA_SEQ => seq = buf.read_vax_clumplet()?.max(0) as usize,
            sql_info::TYPE
            | sql_info::SUB_TYPE
            | sql_info::SCALE
            | sql_info::LENGTH
            | sql_info::FIELD
            | sql_info::RELATION
            | sql_info::OWNER
            | sql_info::ALIAS => {
                let len = buf.read_u16_le()? as usize;
                let value = buf.read_bytes_owned(len)?;
                let descriptor = part
                    .and_then(|p| descriptors.get_mut(p))
                    .and_then(Option::as_mut)
                    .ok_or_else(|| malformed("field item before a descriptor header"))?;
                let field = descriptor.field_mut(seq)?;
                let int = || crate::buffer::vax_integer(&value) as i32;
                let text = || String::from_utf8_lossy(&value).into_owned();
                match item {
                    sql_info::TYPE => field.data_type = int(),
                    sql_info::SUB_TYPE => field.sub_type = int(),
                    sql_info::SCALE => field.scale = int(),
                    sql_info::LENGTH => field.length = int(),
                    sql_info::FIELD => field.name = text(),
                    sql_info::RELATION => field.relation = text(),
                    sql_info::OWNER => field.owner = text(),
                    _ => field.alias = text(),
                }
            }
            other => return Err(malformed(format!("unknown item {}", other))),
        }
    }
}

fn malformed(detail: impl std::fmt::Display) -> Error {
    Error::Protocol(format!("malformed describe information: {}", detail))
}

/// Rebuild `items` with an `isc_info_sql_sqlda_start` before every part
///
/// The interrupted part resumes at `resume`, parts before it at their field
/// count and parts not reached yet at zero.
fn resume_items(
    items: &[u8],
    descriptors: &[Option<Descriptor>],
    current: Option<usize>,
    resume: usize,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(items.len() + 4 * descriptors.len());
    let mut part = 0usize;
    let mut at_part_start = true;
    for &item in items {
        if at_part_start {
            let start = if Some(part) == current {
                resume
            } else {
                descriptors
                    .get(part)
                    .and_then(Option::as_ref)
                    .map_or(0, Descriptor::len)
            };
            let start = start.min(u16::MAX as usize) as u16;
            out.extend_from_slice(&[sql_info::SQLDA_START, 2]);
            out.extend_from_slice(&start.to_le_bytes());
            at_part_start = false;
        }
        out.push(item);
        if item == sql_info::DESCRIBE_END {
            part += 1;
            at_part_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clumplet(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
        out.push(tag);
        out.extend_from_slice(&(value.len() as u16).to_le_bytes());
        out.extend_from_slice(value);
    }

    fn header(out: &mut Vec<u8>, tag: u8, count: i32) {
        out.push(tag);
        clumplet(out, sql_info::DESCRIBE_VARS, &count.to_le_bytes());
    }

    fn field(out: &mut Vec<u8>, seq: i32, data_type: i32, name: &str) {
        clumplet(out, sql_info::SQLDA_SEQ, &seq.to_le_bytes());
        clumplet(out, sql_info::TYPE, &data_type.to_le_bytes());
        clumplet(out, sql_info::SUB_TYPE, &0i32.to_le_bytes());
        clumplet(out, sql_info::SCALE, &0i32.to_le_bytes());
        clumplet(out, sql_info::LENGTH, &4i32.to_le_bytes());
        clumplet(out, sql_info::FIELD, name.as_bytes());
        clumplet(out, sql_info::ALIAS, name.as_bytes());
        out.push(sql_info::DESCRIBE_END);
    }

    #[test]
    fn test_item_lists() {
        assert_eq!(SELECT_ITEMS[0], sql_info::SELECT);
        assert_eq!(BIND_ITEMS[0], sql_info::BIND);
        assert_eq!(&DESCRIBE_ITEMS[..12], &SELECT_ITEMS);
        assert_eq!(&DESCRIBE_ITEMS[12..], &BIND_ITEMS);
        assert_eq!(DESCRIBE_ITEMS[23], sql_info::DESCRIBE_END);
    }

    #[test]
    fn test_parse_complete_reply() {
        let mut data = Vec::new();
        header(&mut data, sql_info::SELECT, 2);
        field(&mut data, 1, sql_type::LONG + 1, "ID");
        field(&mut data, 2, sql_type::VARYING, "NAME");
        header(&mut data, sql_info::BIND, 0);
        data.push(info::END);

        let mut descs = [None, None];
        let outcome = parse_sql_info(&data, &DESCRIBE_ITEMS, &mut descs).unwrap();
        assert_eq!(outcome, DescribeOutcome::Complete);

        let fields = descs[0].as_ref().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].sql_type(), sql_type::LONG);
        assert!(fields[0].is_nullable());
        assert_eq!(fields[1].name, "NAME");
        assert!(descs[1].as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_truncated_reply_builds_resume_items() {
        let mut data = Vec::new();
        header(&mut data, sql_info::SELECT, 3);
        field(&mut data, 1, sql_type::LONG, "A");
        field(&mut data, 2, sql_type::LONG, "B");
        clumplet(&mut data, sql_info::SQLDA_SEQ, &3i32.to_le_bytes());
        data.push(info::TRUNCATED);

        let mut descs = [None, None];
        let outcome = parse_sql_info(&data, &DESCRIBE_ITEMS, &mut descs).unwrap();
        let DescribeOutcome::Truncated(items) = outcome else {
            panic!("expected truncation");
        };
        assert_eq!(&items[..4], &[sql_info::SQLDA_START, 2, 2, 0]);
        assert_eq!(items[4], sql_info::SELECT);
        assert_eq!(&items[16..20], &[sql_info::SQLDA_START, 2, 0, 0]);
        assert_eq!(items[20], sql_info::BIND);
        assert_eq!(items.len(), DESCRIBE_ITEMS.len() + 8);
        assert_eq!(descs[0].as_ref().unwrap()[1].name, "B");
    }

    #[test]
    fn test_unknown_item_is_protocol_error() {
        let mut data = Vec::new();
        header(&mut data, sql_info::SELECT, 1);
        data.push(99);
        let mut descs = [None];
        let err = parse_sql_info(&data, &SELECT_ITEMS, &mut descs).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(!err.is_server_error());
    }

    #[test]
    fn test_field_before_header_is_rejected() {
        let mut data = Vec::new();
        clumplet(&mut data, sql_info::SQLDA_SEQ, &1i32.to_le_bytes());
        clumplet(&mut data, sql_info::TYPE, &496i32.to_le_bytes());
        let mut descs = [None];
        let err = parse_sql_info(&data, &SELECT_ITEMS, &mut descs).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_blr_message() {
        let desc = Descriptor::from_fields(vec![
            DbField {
                data_type: sql_type::VARYING,
                length: 10,
                ..Default::default()
            },
            DbField {
                data_type: sql_type::INT64 + 1,
                scale: -2,
                ..Default::default()
            },
        ]);
        assert_eq!(
            desc.to_blr().unwrap(),
            vec![
                blr::VERSION5, blr::BEGIN, blr::MESSAGE, 0, 4, 0,
                blr::VARYING, 10, 0, blr::SHORT, 0,
                blr::INT64, 0xFE, blr::SHORT, 0,
                blr::END, blr::EOC,
            ]
        );
    }
}
