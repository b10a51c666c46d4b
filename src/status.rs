//! Status vector decoding
//!
//! Every server reply ends with a status vector: a sequence of typed
//! arguments terminated by `isc_arg_end`. An empty vector means success, a
//! vector that starts with `isc_arg_warning` carries warnings only, and
//! anything else is an error list whose first `isc_arg_gds` code is the
//! primary error.

use std::fmt;

use crate::buffer::ReadBuffer;
use crate::constants::arg;
use crate::error::Result;

/// One argument of a status vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEntry {
    /// Error code (`isc_arg_gds` or an unrecognised numeric kind)
    Gds(i32),
    /// Warning code (`isc_arg_warning`)
    Warning(i32),
    /// Message argument (`isc_arg_string`, `isc_arg_cstring`, `isc_arg_interpreted`)
    Text(String),
    /// Numeric message argument (`isc_arg_number`)
    Number(i32),
    /// SQLSTATE (`isc_arg_sql_state`)
    SqlState(String),
}

/// Decoded status vector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusVector {
    entries: Vec<StatusEntry>,
}

impl StatusVector {
    /// Empty (success) vector
    pub fn new() -> Self {
        Self::default()
    }

    /// Vector holding a single error code
    pub fn from_code(code: i32) -> Self {
        Self {
            entries: vec![StatusEntry::Gds(code)],
        }
    }

    /// Vector holding the given codes in order
    pub fn from_codes(codes: &[i32]) -> Self {
        Self {
            entries: codes.iter().map(|c| StatusEntry::Gds(*c)).collect(),
        }
    }

    /// Append an entry
    pub fn push(&mut self, entry: StatusEntry) {
        self.entries.push(entry);
    }

    /// Record a numeric argument the way the wire encodes it
    ///
    /// Zero codes are placeholders and are dropped.
    pub fn push_code(&mut self, kind: i32, code: i32) {
        if code == 0 {
            return;
        }
        let entry = match kind {
            arg::WARNING => StatusEntry::Warning(code),
            arg::NUMBER => StatusEntry::Number(code),
            _ => StatusEntry::Gds(code),
        };
        self.entries.push(entry);
    }

    /// All entries in wire order
    pub fn entries(&self) -> &[StatusEntry] {
        &self.entries
    }

    /// Error and warning codes in wire order, without message arguments
    pub fn codes(&self) -> Vec<i32> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                StatusEntry::Gds(c) | StatusEntry::Warning(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    /// Primary error code
    pub fn error_code(&self) -> Option<i32> {
        self.codes().first().copied()
    }

    /// SQLSTATE, if the server sent one
    pub fn sql_state(&self) -> Option<&str> {
        self.entries.iter().find_map(|e| match e {
            StatusEntry::SqlState(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Message arguments in order
    pub fn messages(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                StatusEntry::Text(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    /// True when the server reported nothing
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the first entry is a warning
    pub fn is_warning(&self) -> bool {
        matches!(self.entries.first(), Some(StatusEntry::Warning(_)))
    }

    /// True when the vector aborts the operation
    pub fn is_error(&self) -> bool {
        !self.entries.is_empty() && !self.is_warning()
    }

    /// Decode a status vector from an in-memory buffer
    pub fn decode(buf: &mut ReadBuffer) -> Result<Self> {
        let mut sv = StatusVector::new();
        loop {
            let kind = buf.read_i32()?;
            match kind {
                arg::END => break,
                arg::STRING | arg::CSTRING | arg::INTERPRETED => {
                    sv.push(StatusEntry::Text(buf.read_string()?));
                }
                arg::SQL_STATE => sv.push(StatusEntry::SqlState(buf.read_string()?)),
                _ => {
                    let code = buf.read_i32()?;
                    sv.push_code(kind, code);
                }
            }
        }
        Ok(sv)
    }
}

impl fmt::Display for StatusVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for entry in &self.entries {
            if !first {
                write!(f, "; ")?;
            }
            first = false;
            match entry {
                StatusEntry::Gds(c) => write!(f, "error {}", c)?,
                StatusEntry::Warning(c) => write!(f, "warning {}", c)?,
                StatusEntry::Text(s) => write!(f, "{}", s)?,
                StatusEntry::Number(n) => write!(f, "{}", n)?,
                StatusEntry::SqlState(s) => write!(f, "SQLSTATE {}", s)?,
            }
        }
        if first {
            write!(f, "no error")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::WriteBuffer;
    use crate::constants::isc;

    fn encode(build: impl FnOnce(&mut WriteBuffer)) -> ReadBuffer {
        let mut buf = WriteBuffer::new();
        build(&mut buf);
        ReadBuffer::new(buf.freeze())
    }

    #[test]
    fn test_two_gds_groups() {
        let mut buf = encode(|w| {
            w.write_i32(arg::GDS).unwrap();
            w.write_i32(335544569).unwrap();
            w.write_i32(arg::GDS).unwrap();
            w.write_i32(335544436).unwrap();
            w.write_i32(arg::NUMBER).unwrap();
            w.write_i32(-104).unwrap();
            w.write_i32(arg::END).unwrap();
        });
        let sv = StatusVector::decode(&mut buf).unwrap();
        assert_eq!(sv.codes(), vec![335544569, 335544436]);
        assert_eq!(sv.error_code(), Some(335544569));
        assert!(sv.is_error());
        assert!(!sv.is_warning());
    }

    #[test]
    fn test_warning_vector() {
        let mut buf = encode(|w| {
            w.write_i32(arg::WARNING).unwrap();
            w.write_i32(335544807).unwrap();
            w.write_i32(arg::STRING).unwrap();
            w.write_string("field truncated").unwrap();
            w.write_i32(arg::END).unwrap();
        });
        let sv = StatusVector::decode(&mut buf).unwrap();
        assert!(sv.is_warning());
        assert!(!sv.is_error());
        assert_eq!(sv.messages(), vec!["field truncated"]);
    }

    #[test]
    fn test_success_vector() {
        let mut buf = encode(|w| {
            w.write_i32(arg::GDS).unwrap();
            w.write_i32(0).unwrap();
            w.write_i32(arg::END).unwrap();
        });
        let sv = StatusVector::decode(&mut buf).unwrap();
        assert!(sv.is_empty());
        assert!(!sv.is_error());
    }

    #[test]
    fn test_sql_state_and_display() {
        let mut sv = StatusVector::from_code(isc::LOGIN);
        sv.push(StatusEntry::SqlState("28000".into()));
        assert_eq!(sv.sql_state(), Some("28000"));
        assert_eq!(sv.to_string(), "error 335544472; SQLSTATE 28000");
    }
}
