//! Array slices
//!
//! Arrays are read and written whole, through a slice description language
//! (SDL) program that names the column, its element type and the bounds of
//! every dimension. Elements travel XDR encoded, in row-major order unless
//! the descriptor says otherwise.

use crate::buffer::WriteBuffer;
use crate::connection::{locked, Session};
use crate::constants::{blr, op, sdl, sql_type};
use crate::descriptor::DbField;
use crate::error::{Error, Result};
use crate::messages::Response;
use crate::transaction::Transaction;
use crate::value::{read_value, write_value, DbValue};

/// Bounds of one dimension, both inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayBound {
    /// Lowest index
    pub lower: i32,
    /// Highest index
    pub upper: i32,
}

impl ArrayBound {
    /// Bounds `lower..=upper`
    pub fn new(lower: i32, upper: i32) -> Self {
        Self { lower, upper }
    }

    /// Elements along this dimension
    pub fn len(&self) -> usize {
        (i64::from(self.upper) - i64::from(self.lower) + 1).max(0) as usize
    }

    /// True when the dimension holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shape and element type of an array column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayDescriptor {
    /// Table name
    pub relation: String,
    /// Column name
    pub field: String,
    /// Element type as a BLR code
    pub data_type: u8,
    /// Element scale
    pub scale: i8,
    /// Element length in bytes
    pub length: i16,
    /// One entry per dimension
    pub bounds: Vec<ArrayBound>,
    /// Elements ordered by column instead of by row
    pub column_major: bool,
}

impl ArrayDescriptor {
    /// A descriptor for `relation.field`
    pub fn new(relation: impl Into<String>, field: impl Into<String>, data_type: u8, length: i16) -> Self {
        Self {
            relation: relation.into(),
            field: field.into(),
            data_type,
            scale: 0,
            length,
            bounds: Vec::new(),
            column_major: false,
        }
    }

    /// Add a dimension
    pub fn dimension(mut self, lower: i32, upper: i32) -> Self {
        self.bounds.push(ArrayBound::new(lower, upper));
        self
    }

    /// Set the element scale
    pub fn scale(mut self, scale: i8) -> Self {
        self.scale = scale;
        self
    }

    /// Total element count
    pub fn element_count(&self) -> usize {
        if self.bounds.is_empty() {
            return 0;
        }
        self.bounds.iter().map(ArrayBound::len).product()
    }

    fn is_varying(&self) -> bool {
        matches!(self.data_type, blr::VARYING | blr::VARYING2)
    }

    /// Bytes one element takes in the server's slice accounting
    fn element_length(&self) -> usize {
        self.length.max(0) as usize + if self.is_varying() { 2 } else { 0 }
    }

    /// Byte length of the whole slice as the server accounts for it
    pub fn slice_length(&self) -> usize {
        self.element_count().saturating_mul(self.element_length())
    }

    /// Field metadata used to encode and decode one element
    pub fn element_field(&self) -> Result<DbField> {
        let data_type = match self.data_type {
            blr::TEXT | blr::TEXT2 | blr::CSTRING | blr::CSTRING2 => sql_type::TEXT,
            blr::VARYING | blr::VARYING2 => sql_type::VARYING,
            blr::SHORT => sql_type::SHORT,
            blr::LONG => sql_type::LONG,
            blr::INT64 => sql_type::INT64,
            blr::QUAD => sql_type::QUAD,
            blr::FLOAT => sql_type::FLOAT,
            blr::DOUBLE | blr::D_FLOAT => sql_type::DOUBLE,
            blr::SQL_DATE => sql_type::TYPE_DATE,
            blr::SQL_TIME => sql_type::TYPE_TIME,
            blr::TIMESTAMP => sql_type::TIMESTAMP,
            blr::BOOL => sql_type::BOOLEAN,
            other => {
                return Err(Error::DataConversion(format!(
                    "array element type {} is not supported",
                    other
                )))
            }
        };
        Ok(DbField {
            data_type,
            scale: self.scale as i32,
            length: self.length as i32,
            name: self.field.clone(),
            relation: self.relation.clone(),
            ..DbField::default()
        })
    }

    /// Encode the SDL program describing this slice
    pub fn to_sdl(&self) -> Result<Vec<u8>> {
        let dimensions = self.bounds.len();
        if dimensions == 0 || dimensions > sdl::MAX_DIMENSIONS {
            return Err(Error::InvalidDimension(dimensions));
        }
        let mut out = vec![sdl::VERSION1, sdl::STRUCT, 1, self.data_type];
        match self.data_type {
            blr::SHORT | blr::LONG | blr::INT64 | blr::QUAD => out.push(self.scale as u8),
            blr::TEXT | blr::CSTRING | blr::VARYING => out.extend_from_slice(&self.length.to_le_bytes()),
            blr::TEXT2 | blr::CSTRING2 | blr::VARYING2 => {
                // charset, then length
                out.extend_from_slice(&0i16.to_le_bytes());
                out.extend_from_slice(&self.length.to_le_bytes());
            }
            _ => {}
        }
        push_name(&mut out, sdl::RELATION, &self.relation)?;
        push_name(&mut out, sdl::FIELD, &self.field)?;

        let order: Vec<usize> = if self.column_major {
            (0..dimensions).rev().collect()
        } else {
            (0..dimensions).collect()
        };
        for &n in &order {
            let bound = self.bounds[n];
            if bound.lower == 1 {
                out.extend_from_slice(&[sdl::DO1, n as u8]);
            } else {
                out.extend_from_slice(&[sdl::DO2, n as u8]);
                push_literal(&mut out, bound.lower);
            }
            push_literal(&mut out, bound.upper);
        }

        out.extend_from_slice(&[sdl::ELEMENT, 1, sdl::SCALAR, 0, dimensions as u8]);
        for n in 0..dimensions {
            out.extend_from_slice(&[sdl::VARIABLE, n as u8]);
        }
        out.push(sdl::EOC);
        Ok(out)
    }
}

fn push_name(out: &mut Vec<u8>, tag: u8, name: &str) -> Result<()> {
    let len = u8::try_from(name.len())
        .map_err(|_| Error::DataConversion(format!("array name {} is too long", name)))?;
    out.push(tag);
    out.push(len);
    out.extend_from_slice(name.as_bytes());
    Ok(())
}

/// Smallest SDL literal holding `value`
fn push_literal(out: &mut Vec<u8>, value: i32) {
    if let Ok(v) = i8::try_from(value) {
        out.extend_from_slice(&[sdl::TINY_INTEGER, v as u8]);
    } else if let Ok(v) = i16::try_from(value) {
        out.push(sdl::SHORT_INTEGER);
        out.extend_from_slice(&v.to_le_bytes());
    } else {
        out.push(sdl::LONG_INTEGER);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Read every element of array `array_id`
pub(crate) async fn get_slice(
    session: &std::sync::Arc<Session>,
    transaction: &Transaction,
    array_id: i64,
    descriptor: &ArrayDescriptor,
) -> Result<Vec<DbValue>> {
    let tr_handle = transaction.active_handle()?;
    let field = descriptor.element_field()?;
    let sdl = descriptor.to_sdl()?;
    let slice_length = descriptor.slice_length() as i32;
    let count = descriptor.element_count();

    locked!(session, |inner| {
        async {
            inner.ensure_attached()?;
            let xdr = inner.xdr()?;
            xdr.write_op(op::GET_SLICE)?;
            xdr.write_i32(tr_handle)?;
            xdr.write_i64(array_id)?;
            xdr.write_i32(slice_length)?;
            xdr.write_buffer(&sdl)?;
            xdr.write_string("")?;
            xdr.write_i32(0)?;
            xdr.flush().await?;

            let operation = xdr.read_operation().await?;
            if operation != op::SLICE {
                // An error arrives as a plain op_response
                let body = crate::messages::read_generic_body(xdr).await?;
                inner.check(body.status)?;
                return Err(Error::UnexpectedOperation {
                    expected: "op_slice",
                    actual: operation,
                });
            }
            let length = xdr.read_i32().await?;
            xdr.read_i32().await?;
            let element_length = descriptor.element_length();
            let length = usize::try_from(length).unwrap_or(usize::MAX);
            if element_length == 0 || length % element_length != 0 {
                return Err(Error::Protocol(format!(
                    "slice of {} bytes does not hold whole {}-byte elements",
                    length, element_length
                )));
            }
            // every element sent is read, matching or not
            let received = length / element_length;
            let mut values = Vec::with_capacity(received);
            for _ in 0..received {
                values.push(read_value(xdr, &field).await?);
            }
            if received != count {
                return Err(Error::ArraySizeMismatch {
                    expected: count,
                    actual: received,
                });
            }
            tracing::debug!(array_id, elements = count, "array slice read");
            Ok(values)
        }
        .await
    })
}

/// Write `values` as a whole array; returns the id of the stored array
pub(crate) async fn put_slice(
    session: &std::sync::Arc<Session>,
    transaction: &Transaction,
    array_id: i64,
    descriptor: &ArrayDescriptor,
    values: &[DbValue],
) -> Result<i64> {
    let expected = descriptor.element_count();
    if values.len() != expected {
        return Err(Error::ArraySizeMismatch {
            expected,
            actual: values.len(),
        });
    }
    let tr_handle = transaction.active_handle()?;
    let field = descriptor.element_field()?;
    let sdl = descriptor.to_sdl()?;
    let slice_length = descriptor.slice_length() as i32;

    let mut slice = WriteBuffer::new();
    for value in values {
        write_value(&mut slice, &field, value)?;
    }
    let slice = slice.take();

    let response = locked!(session, |inner| {
        async {
            inner.ensure_attached()?;
            let xdr = inner.xdr()?;
            xdr.write_op(op::PUT_SLICE)?;
            xdr.write_i32(tr_handle)?;
            xdr.write_i64(array_id)?;
            xdr.write_i32(slice_length)?;
            xdr.write_buffer(&sdl)?;
            xdr.write_string("")?;
            xdr.write_i32(slice_length)?;
            xdr.write_bytes(&slice)?;
            xdr.flush().await?;
            match inner.read_response().await? {
                Response::Generic(generic) => {
                    inner.check(generic.status.clone())?;
                    Ok(generic)
                }
                other => Err(Error::UnexpectedOperation {
                    expected: "op_response",
                    actual: other.operation(),
                }),
            }
        }
        .await
    })?;
    tracing::debug!(array_id = response.object_id, elements = expected, "array slice written");
    Ok(response.object_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdl_integer_vector() {
        let desc = ArrayDescriptor::new("T", "A", blr::LONG, 4).dimension(1, 10);
        assert_eq!(
            desc.to_sdl().unwrap(),
            vec![
                sdl::VERSION1,
                sdl::STRUCT,
                1,
                blr::LONG,
                0,
                sdl::RELATION,
                1,
                b'T',
                sdl::FIELD,
                1,
                b'A',
                sdl::DO1,
                0,
                sdl::TINY_INTEGER,
                10,
                sdl::ELEMENT,
                1,
                sdl::SCALAR,
                0,
                1,
                sdl::VARIABLE,
                0,
                sdl::EOC,
            ]
        );
    }

    #[test]
    fn test_sdl_lower_bound_and_wide_literal() {
        let desc = ArrayDescriptor::new("T", "A", blr::VARYING, 20).dimension(0, 1000);
        let sdl_bytes = desc.to_sdl().unwrap();
        // type, then i16 LE length
        assert_eq!(&sdl_bytes[3..6], &[blr::VARYING, 20, 0]);
        let dims = sdl_bytes.iter().position(|&b| b == sdl::DO2).unwrap();
        assert_eq!(
            &sdl_bytes[dims..dims + 7],
            &[sdl::DO2, 0, sdl::TINY_INTEGER, 0, sdl::SHORT_INTEGER, 0xE8, 0x03]
        );
    }

    #[test]
    fn test_sdl_column_major_reverses_dimensions() {
        let mut desc = ArrayDescriptor::new("T", "A", blr::SHORT, 2)
            .dimension(1, 2)
            .dimension(1, 3);
        desc.column_major = true;
        let sdl_bytes = desc.to_sdl().unwrap();
        let first = sdl_bytes.iter().position(|&b| b == sdl::DO1).unwrap();
        assert_eq!(sdl_bytes[first + 1], 1);
    }

    #[test]
    fn test_too_many_dimensions() {
        let mut desc = ArrayDescriptor::new("T", "A", blr::LONG, 4);
        for _ in 0..17 {
            desc = desc.dimension(1, 1);
        }
        assert!(matches!(desc.to_sdl(), Err(Error::InvalidDimension(17))));
    }

    #[test]
    fn test_slice_length() {
        let ints = ArrayDescriptor::new("T", "A", blr::LONG, 4).dimension(1, 3).dimension(0, 1);
        assert_eq!(ints.element_count(), 6);
        assert_eq!(ints.slice_length(), 24);
        let varying = ArrayDescriptor::new("T", "V", blr::VARYING, 10).dimension(1, 2);
        assert_eq!(varying.slice_length(), 24);
    }

    #[test]
    fn test_extreme_bounds_do_not_overflow() {
        let bound = ArrayBound::new(i32::MIN, i32::MAX);
        assert_eq!(bound.len(), 1usize << 32);
        assert!(ArrayBound::new(5, 1).is_empty());
        assert_eq!(ArrayBound::new(-2, 2).len(), 5);
    }

    #[test]
    fn test_element_field() {
        let desc = ArrayDescriptor::new("T", "A", blr::INT64, 8).scale(-2).dimension(1, 1);
        let field = desc.element_field().unwrap();
        assert_eq!(field.sql_type(), sql_type::INT64);
        assert_eq!(field.scale, -2);
        assert!(ArrayDescriptor::new("T", "A", 99, 1).element_field().is_err());
    }
}
