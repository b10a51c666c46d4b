//! Column values and row messages
//!
//! This module provides:
//! - [`DbValue`], the decoded form of a single column or parameter
//! - [`Row`], one fetched record with optional named access
//! - the row message codec for both null encodings: inline 32-bit
//!   indicators (protocols 10 to 12) and a leading null bitmap (protocol 13)

use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::buffer::WriteBuffer;
use crate::capabilities::NullFormat;
use crate::constants::{isc, sql_type};
use crate::descriptor::{DbField, Descriptor, CHARSET_OCTETS, CHARSET_UTF8};
use crate::error::{Error, Result};
use crate::status::StatusVector;
use crate::xdr::XdrStream;

/// Day number of 1858-11-17, the protocol's date epoch, counted from 0001-01-01
const DATE_EPOCH_DAYS_FROM_CE: i32 = 678_576;

/// Time values count in units of 100 microseconds
const TIME_UNITS_PER_SECOND: u32 = 10_000;
const NANOS_PER_TIME_UNIT: u32 = 100_000;

/// Inline null indicator value
const NULL_INDICATOR: i32 = -1;

/// Fixed-point number as the server sends it: `value * 10^scale`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal {
    /// Unscaled value
    pub value: i64,
    /// Power of ten, zero or negative
    pub scale: i32,
}

impl Decimal {
    /// Build from an unscaled value and scale
    pub fn new(value: i64, scale: i32) -> Self {
        Self { value, scale }
    }

    /// Approximate as a float
    pub fn to_f64(&self) -> f64 {
        self.value as f64 * 10f64.powi(self.scale)
    }

    /// Unscaled value expressed at another scale, rounding half away from zero
    pub fn rescale(&self, scale: i32) -> Result<i64> {
        let shift = self.scale - scale;
        if shift >= 0 {
            10i64
                .checked_pow(shift as u32)
                .and_then(|factor| self.value.checked_mul(factor))
                .ok_or_else(overflow)
        } else {
            let factor = 10i64.checked_pow((-shift) as u32).ok_or_else(overflow)?;
            let quotient = self.value / factor;
            let remainder = self.value % factor;
            if remainder.abs() * 2 >= factor {
                Ok(quotient + self.value.signum())
            } else {
                Ok(quotient)
            }
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale >= 0 {
            return write!(f, "{}{}", self.value, "0".repeat(self.scale as usize));
        }
        let digits = self.value.unsigned_abs().to_string();
        let places = (-self.scale) as usize;
        let padded = format!("{:0>width$}", digits, width = places + 1);
        let (int, frac) = padded.split_at(padded.len() - places);
        let sign = if self.value < 0 { "-" } else { "" };
        write!(f, "{}{}.{}", sign, int, frac)
    }
}

/// A column or parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    /// SQL NULL
    Null,
    /// Character data
    Text(String),
    /// Binary data (`CHARACTER SET OCTETS`)
    Bytes(Vec<u8>),
    /// `SMALLINT`
    Short(i16),
    /// `INTEGER`
    Integer(i32),
    /// `BIGINT`
    BigInt(i64),
    /// `NUMERIC` / `DECIMAL`
    Decimal(Decimal),
    /// `FLOAT`
    Float(f32),
    /// `DOUBLE PRECISION`
    Double(f64),
    /// `DATE`
    Date(NaiveDate),
    /// `TIME`
    Time(NaiveTime),
    /// `TIMESTAMP`
    Timestamp(NaiveDateTime),
    /// `BOOLEAN`
    Boolean(bool),
    /// Blob id; open it with [`crate::Connection::open_blob`]
    BlobId(i64),
    /// Array id; read it with [`crate::Connection::get_slice`]
    ArrayId(i64),
}

impl DbValue {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, DbValue::Null)
    }

    /// Try to get as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DbValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DbValue::Short(v) => Some(*v as i64),
            DbValue::Integer(v) => Some(*v as i64),
            DbValue::BigInt(v) => Some(*v),
            DbValue::Decimal(d) => d.rescale(0).ok(),
            DbValue::Float(v) => Some(*v as i64),
            DbValue::Double(v) => Some(*v as i64),
            DbValue::Boolean(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Try to get as a float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DbValue::Short(v) => Some(*v as f64),
            DbValue::Integer(v) => Some(*v as f64),
            DbValue::BigInt(v) => Some(*v as f64),
            DbValue::Decimal(d) => Some(d.to_f64()),
            DbValue::Float(v) => Some(*v as f64),
            DbValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get as bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            DbValue::Bytes(b) => Some(b),
            DbValue::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Try to get as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DbValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as a date
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            DbValue::Date(d) => Some(*d),
            DbValue::Timestamp(ts) => Some(ts.date()),
            _ => None,
        }
    }

    /// Try to get as a time of day
    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            DbValue::Time(t) => Some(*t),
            DbValue::Timestamp(ts) => Some(ts.time()),
            _ => None,
        }
    }

    /// Try to get as a timestamp
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            DbValue::Timestamp(ts) => Some(*ts),
            DbValue::Date(d) => d.and_hms_opt(0, 0, 0),
            _ => None,
        }
    }

    /// Try to get as a blob id
    pub fn as_blob_id(&self) -> Option<i64> {
        match self {
            DbValue::BlobId(id) => Some(*id),
            _ => None,
        }
    }

    /// Try to get as an array id
    pub fn as_array_id(&self) -> Option<i64> {
        match self {
            DbValue::ArrayId(id) => Some(*id),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            DbValue::Null => "NULL",
            DbValue::Text(_) => "text",
            DbValue::Bytes(_) => "bytes",
            DbValue::Short(_) => "SMALLINT",
            DbValue::Integer(_) => "INTEGER",
            DbValue::BigInt(_) => "BIGINT",
            DbValue::Decimal(_) => "DECIMAL",
            DbValue::Float(_) => "FLOAT",
            DbValue::Double(_) => "DOUBLE PRECISION",
            DbValue::Date(_) => "DATE",
            DbValue::Time(_) => "TIME",
            DbValue::Timestamp(_) => "TIMESTAMP",
            DbValue::Boolean(_) => "BOOLEAN",
            DbValue::BlobId(_) => "blob id",
            DbValue::ArrayId(_) => "array id",
        }
    }
}

impl From<i16> for DbValue {
    fn from(v: i16) -> Self {
        DbValue::Short(v)
    }
}

impl From<i32> for DbValue {
    fn from(v: i32) -> Self {
        DbValue::Integer(v)
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::BigInt(v)
    }
}

impl From<f32> for DbValue {
    fn from(v: f32) -> Self {
        DbValue::Float(v)
    }
}

impl From<f64> for DbValue {
    fn from(v: f64) -> Self {
        DbValue::Double(v)
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        DbValue::Boolean(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_string())
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

impl From<Vec<u8>> for DbValue {
    fn from(v: Vec<u8>) -> Self {
        DbValue::Bytes(v)
    }
}

impl From<&[u8]> for DbValue {
    fn from(v: &[u8]) -> Self {
        DbValue::Bytes(v.to_vec())
    }
}

impl From<Decimal> for DbValue {
    fn from(v: Decimal) -> Self {
        DbValue::Decimal(v)
    }
}

impl From<NaiveDate> for DbValue {
    fn from(v: NaiveDate) -> Self {
        DbValue::Date(v)
    }
}

impl From<NaiveTime> for DbValue {
    fn from(v: NaiveTime) -> Self {
        DbValue::Time(v)
    }
}

impl From<NaiveDateTime> for DbValue {
    fn from(v: NaiveDateTime) -> Self {
        DbValue::Timestamp(v)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => DbValue::Null,
        }
    }
}

impl fmt::Display for DbValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbValue::Null => write!(f, "NULL"),
            DbValue::Text(s) => write!(f, "{}", s),
            DbValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            DbValue::Short(v) => write!(f, "{}", v),
            DbValue::Integer(v) => write!(f, "{}", v),
            DbValue::BigInt(v) => write!(f, "{}", v),
            DbValue::Decimal(d) => write!(f, "{}", d),
            DbValue::Float(v) => write!(f, "{}", v),
            DbValue::Double(v) => write!(f, "{}", v),
            DbValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            DbValue::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.4f")),
            DbValue::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.4f")),
            DbValue::Boolean(b) => write!(f, "{}", b),
            DbValue::BlobId(id) => write!(f, "<BLOB {:#x}>", id),
            DbValue::ArrayId(id) => write!(f, "<ARRAY {:#x}>", id),
        }
    }
}

/// A fetched record
///
/// Values are addressed by position (0-based) or, case-insensitively, by
/// column alias.
///
/// # Example
///
/// ```rust,no_run
/// use firebird_rs::{Connection, DbValue};
///
/// # async fn example(conn: &Connection) -> firebird_rs::Result<()> {
/// let mut tx = conn.begin_transaction(Default::default()).await?;
/// let mut stmt = conn.prepare(&tx, "SELECT id, name FROM employees").await?;
/// stmt.execute(&tx, &[]).await?;
/// while let Some(row) = stmt.fetch().await? {
///     let id = row.get_i64(0);
///     let name = row.get_by_name("NAME").and_then(DbValue::as_str);
///     println!("{:?}: {:?}", id, name);
/// }
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<DbValue>,
    column_names: Option<Arc<[String]>>,
}

impl Row {
    /// Create a new row with values
    pub fn new(values: Vec<DbValue>) -> Self {
        Self {
            values,
            column_names: None,
        }
    }

    /// Create a new row with values and shared column names
    pub fn with_names(values: Vec<DbValue>, names: Arc<[String]>) -> Self {
        Self {
            values,
            column_names: Some(names),
        }
    }

    /// Get the number of columns in this row
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index
    pub fn get(&self, index: usize) -> Option<&DbValue> {
        self.values.get(index)
    }

    /// Get a value by column name
    pub fn get_by_name(&self, name: &str) -> Option<&DbValue> {
        let names = self.column_names.as_ref()?;
        let index = names.iter().position(|n| n.eq_ignore_ascii_case(name))?;
        self.values.get(index)
    }

    /// Get all values as a slice
    pub fn values(&self) -> &[DbValue] {
        &self.values
    }

    /// Consume the row and return the values
    pub fn into_values(self) -> Vec<DbValue> {
        self.values
    }

    /// Try to get a string value by index
    pub fn get_string(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(DbValue::as_str)
    }

    /// Try to get an integer value by index
    pub fn get_i64(&self, index: usize) -> Option<i64> {
        self.get(index).and_then(DbValue::as_i64)
    }

    /// Try to get a float value by index
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(DbValue::as_f64)
    }

    /// Check if a column value is NULL
    pub fn is_null(&self, index: usize) -> bool {
        self.get(index).map(DbValue::is_null).unwrap_or(true)
    }
}

impl std::ops::Index<usize> for Row {
    type Output = DbValue;

    fn index(&self, index: usize) -> &Self::Output {
        &self.values[index]
    }
}

// =============================================================================
// Dates and times
// =============================================================================

/// Decode a day count from the protocol epoch
pub fn decode_date(days: i32) -> Result<NaiveDate> {
    days.checked_add(DATE_EPOCH_DAYS_FROM_CE)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| Error::DataConversion(format!("date out of range: {} days", days)))
}

/// Encode a date as days from the protocol epoch
pub fn encode_date(date: &NaiveDate) -> i32 {
    date.num_days_from_ce() - DATE_EPOCH_DAYS_FROM_CE
}

/// Decode a time of day counted in 100µs units
pub fn decode_time(units: i32) -> Result<NaiveTime> {
    let units = units as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(
        units / TIME_UNITS_PER_SECOND,
        (units % TIME_UNITS_PER_SECOND) * NANOS_PER_TIME_UNIT,
    )
    .ok_or_else(|| Error::DataConversion(format!("time out of range: {}", units)))
}

/// Encode a time of day in 100µs units
pub fn encode_time(time: &NaiveTime) -> i32 {
    let units = time.num_seconds_from_midnight() * TIME_UNITS_PER_SECOND
        + (time.nanosecond() % 1_000_000_000) / NANOS_PER_TIME_UNIT;
    units as i32
}

// =============================================================================
// Row decoding
// =============================================================================

/// Read one row message described by `descriptor`
pub async fn read_row(xdr: &mut XdrStream, descriptor: &Descriptor, format: NullFormat) -> Result<Vec<DbValue>> {
    let mut values = Vec::with_capacity(descriptor.len());
    match format {
        NullFormat::Bitmap => {
            let bitmap = xdr.read_opaque(descriptor.len().div_ceil(8)).await?;
            for (index, field) in descriptor.iter().enumerate() {
                if bitmap[index / 8] & (1 << (index % 8)) != 0 {
                    values.push(DbValue::Null);
                } else {
                    values.push(read_value(xdr, field).await?);
                }
            }
        }
        NullFormat::Inline => {
            for field in descriptor {
                let value = read_value(xdr, field).await?;
                let indicator = xdr.read_i32().await?;
                values.push(if indicator == NULL_INDICATOR { DbValue::Null } else { value });
            }
        }
    }
    Ok(values)
}

/// Read a single non-null value of `field`'s type
pub(crate) async fn read_value(xdr: &mut XdrStream, field: &DbField) -> Result<DbValue> {
    let value = match field.sql_type() {
        sql_type::TEXT => {
            let raw = xdr.read_opaque(field.length.max(0) as usize).await?;
            match field.charset() {
                CHARSET_OCTETS => DbValue::Bytes(raw.to_vec()),
                CHARSET_UTF8 => DbValue::Text(String::from_utf8_lossy(&raw).trim_end_matches(' ').to_string()),
                _ => DbValue::Text(String::from_utf8_lossy(&raw).into_owned()),
            }
        }
        sql_type::VARYING => {
            let raw = xdr.read_buffer().await?;
            if field.charset() == CHARSET_OCTETS {
                DbValue::Bytes(raw.to_vec())
            } else {
                DbValue::Text(String::from_utf8_lossy(&raw).into_owned())
            }
        }
        sql_type::SHORT => {
            let v = xdr.read_i32().await?;
            if field.scale != 0 {
                DbValue::Decimal(Decimal::new(v as i64, field.scale))
            } else {
                DbValue::Short(v as i16)
            }
        }
        sql_type::LONG => {
            let v = xdr.read_i32().await?;
            if field.scale != 0 {
                DbValue::Decimal(Decimal::new(v as i64, field.scale))
            } else {
                DbValue::Integer(v)
            }
        }
        sql_type::INT64 | sql_type::QUAD => {
            let v = xdr.read_i64().await?;
            if field.scale != 0 {
                DbValue::Decimal(Decimal::new(v, field.scale))
            } else {
                DbValue::BigInt(v)
            }
        }
        sql_type::FLOAT => DbValue::Float(f32::from_bits(xdr.read_i32().await? as u32)),
        sql_type::DOUBLE | sql_type::D_FLOAT => DbValue::Double(f64::from_bits(xdr.read_i64().await? as u64)),
        sql_type::TYPE_DATE => DbValue::Date(decode_date(xdr.read_i32().await?)?),
        sql_type::TYPE_TIME => DbValue::Time(decode_time(xdr.read_i32().await?)?),
        sql_type::TIMESTAMP => {
            let date = decode_date(xdr.read_i32().await?)?;
            let time = decode_time(xdr.read_i32().await?)?;
            DbValue::Timestamp(date.and_time(time))
        }
        sql_type::BOOLEAN => {
            let raw = xdr.read_opaque(1).await?;
            DbValue::Boolean(raw.first().copied().unwrap_or(0) != 0)
        }
        sql_type::BLOB => DbValue::BlobId(xdr.read_i64().await?),
        sql_type::ARRAY => DbValue::ArrayId(xdr.read_i64().await?),
        sql_type::NULL => DbValue::Null,
        other => {
            return Err(Error::DataConversion(format!(
                "column {} has unsupported SQL type {}",
                field.display_name(),
                other
            )))
        }
    };
    Ok(value)
}

// =============================================================================
// Parameter encoding
// =============================================================================

/// Encode a parameter message for `descriptor`
pub fn encode_params(
    buf: &mut WriteBuffer,
    descriptor: &Descriptor,
    values: &[DbValue],
    format: NullFormat,
) -> Result<()> {
    if values.len() != descriptor.len() {
        return Err(Error::DataConversion(format!(
            "statement expects {} parameters, got {}",
            descriptor.len(),
            values.len()
        )));
    }
    match format {
        NullFormat::Bitmap => {
            let mut bitmap = vec![0u8; descriptor.len().div_ceil(8)];
            for (index, value) in values.iter().enumerate() {
                if value.is_null() {
                    bitmap[index / 8] |= 1 << (index % 8);
                }
            }
            buf.write_bytes(&bitmap)?;
            buf.write_pad(bitmap.len())?;
            for (field, value) in descriptor.iter().zip(values) {
                if !value.is_null() {
                    write_value(buf, field, value)?;
                }
            }
        }
        NullFormat::Inline => {
            for (field, value) in descriptor.iter().zip(values) {
                if value.is_null() {
                    write_placeholder(buf, field)?;
                    buf.write_i32(NULL_INDICATOR)?;
                } else {
                    write_value(buf, field, value)?;
                    buf.write_i32(0)?;
                }
            }
        }
    }
    Ok(())
}

/// Zero value standing in for a NULL under inline indicators
fn write_placeholder(buf: &mut WriteBuffer, field: &DbField) -> Result<()> {
    match field.sql_type() {
        sql_type::TEXT => buf.write_opaque(&[], field.length.max(0) as usize),
        sql_type::VARYING => buf.write_buffer(&[]),
        sql_type::SHORT | sql_type::LONG | sql_type::FLOAT | sql_type::TYPE_DATE | sql_type::TYPE_TIME => {
            buf.write_i32(0)
        }
        sql_type::INT64
        | sql_type::QUAD
        | sql_type::DOUBLE
        | sql_type::D_FLOAT
        | sql_type::TIMESTAMP
        | sql_type::BLOB
        | sql_type::ARRAY => buf.write_i64(0),
        sql_type::BOOLEAN => buf.write_opaque(&[0], 1),
        _ => Ok(()),
    }
}

/// Write a non-null value converted to `field`'s type
pub(crate) fn write_value(buf: &mut WriteBuffer, field: &DbField, value: &DbValue) -> Result<()> {
    match field.sql_type() {
        sql_type::TEXT => {
            let bytes = text_bytes(field, value)?;
            check_length(field, bytes.len())?;
            buf.write_opaque(&bytes, field.length.max(0) as usize)
        }
        sql_type::VARYING => {
            let bytes = text_bytes(field, value)?;
            check_length(field, bytes.len())?;
            buf.write_buffer(&bytes)
        }
        sql_type::SHORT | sql_type::LONG => {
            let scaled = scaled_integer(field, value)?;
            let v = i32::try_from(scaled).map_err(|_| overflow())?;
            buf.write_i32(v)
        }
        sql_type::INT64 | sql_type::QUAD => buf.write_i64(scaled_integer(field, value)?),
        sql_type::FLOAT => {
            let v = float_value(field, value)? as f32;
            buf.write_i32(v.to_bits() as i32)
        }
        sql_type::DOUBLE | sql_type::D_FLOAT => buf.write_i64(float_value(field, value)?.to_bits() as i64),
        sql_type::TYPE_DATE => {
            let date = value.as_date().ok_or_else(|| mismatch(field, value))?;
            buf.write_i32(encode_date(&date))
        }
        sql_type::TYPE_TIME => {
            let time = value.as_time().ok_or_else(|| mismatch(field, value))?;
            buf.write_i32(encode_time(&time))
        }
        sql_type::TIMESTAMP => {
            let ts = value.as_timestamp().ok_or_else(|| mismatch(field, value))?;
            buf.write_i32(encode_date(&ts.date()))?;
            buf.write_i32(encode_time(&ts.time()))
        }
        sql_type::BOOLEAN => {
            let b = match value {
                DbValue::Boolean(b) => *b,
                other => other.as_i64().map(|v| v != 0).ok_or_else(|| mismatch(field, value))?,
            };
            buf.write_opaque(&[b as u8], 1)
        }
        sql_type::BLOB => buf.write_i64(value.as_blob_id().ok_or_else(|| mismatch(field, value))?),
        sql_type::ARRAY => buf.write_i64(value.as_array_id().ok_or_else(|| mismatch(field, value))?),
        sql_type::NULL => Ok(()),
        other => Err(Error::DataConversion(format!(
            "parameter {} has unsupported SQL type {}",
            field.display_name(),
            other
        ))),
    }
}

fn text_bytes(field: &DbField, value: &DbValue) -> Result<Vec<u8>> {
    match value {
        DbValue::Text(s) => Ok(s.as_bytes().to_vec()),
        DbValue::Bytes(b) => Ok(b.clone()),
        DbValue::Null | DbValue::BlobId(_) | DbValue::ArrayId(_) => Err(mismatch(field, value)),
        other => Ok(other.to_string().into_bytes()),
    }
}

fn check_length(field: &DbField, len: usize) -> Result<()> {
    if len > field.length.max(0) as usize {
        return Err(Error::Server(StatusVector::from_codes(&[
            isc::ARITH_EXCEPT,
            isc::STRING_TRUNCATION,
        ])));
    }
    Ok(())
}

fn scaled_integer(field: &DbField, value: &DbValue) -> Result<i64> {
    let scale = field.scale;
    match value {
        DbValue::Short(v) => Decimal::new(*v as i64, 0).rescale(scale),
        DbValue::Integer(v) => Decimal::new(*v as i64, 0).rescale(scale),
        DbValue::BigInt(v) => Decimal::new(*v, 0).rescale(scale),
        DbValue::Decimal(d) => d.rescale(scale),
        DbValue::Boolean(b) => Decimal::new(*b as i64, 0).rescale(scale),
        DbValue::Float(_) | DbValue::Double(_) => {
            let v = value.as_f64().unwrap_or_default() * 10f64.powi(-scale);
            if v.is_finite() && v.abs() < i64::MAX as f64 {
                Ok(v.round() as i64)
            } else {
                Err(overflow())
            }
        }
        DbValue::Text(s) => {
            let parsed: f64 = s.trim().parse().map_err(|_| mismatch(field, value))?;
            scaled_integer(field, &DbValue::Double(parsed))
        }
        _ => Err(mismatch(field, value)),
    }
}

fn float_value(field: &DbField, value: &DbValue) -> Result<f64> {
    match value {
        DbValue::Text(s) => s.trim().parse().map_err(|_| mismatch(field, value)),
        other => other.as_f64().ok_or_else(|| mismatch(field, value)),
    }
}

fn mismatch(field: &DbField, value: &DbValue) -> Error {
    Error::DataConversion(format!(
        "cannot send {} as SQL type {} for {}",
        value.kind(),
        field.sql_type(),
        field.display_name()
    ))
}

fn overflow() -> Error {
    Error::isc(isc::ARITH_EXCEPT)
}
