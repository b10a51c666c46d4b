//! Error types for the Firebird client
//!
//! Errors follow the protocol's own taxonomy: network faults, malformed or
//! unexpected responses, server-reported status vectors and local state
//! violations detected before any traffic is sent.

use std::io;
use thiserror::Error;

use crate::constants::isc;
use crate::status::StatusVector;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Firebird client
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    // =========================================================================
    // Network Errors
    // =========================================================================
    /// Reading from the byte channel failed or timed out
    #[error("network read failed: {0}")]
    NetworkRead(String),

    /// Writing to the byte channel failed
    #[error("network write failed: {0}")]
    NetworkWrite(String),

    /// Connection closed unexpectedly
    #[error("connection closed unexpectedly")]
    ConnectionClosed,

    /// Connection timeout
    #[error("connection timeout after {0:?}")]
    ConnectionTimeout(std::time::Duration),

    /// Underlying I/O error outside of a wire exchange
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Malformed response
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An operation code arrived where another was expected
    #[error("unexpected operation {actual} (expected {expected})")]
    UnexpectedOperation { expected: &'static str, actual: i32 },

    /// Not enough bytes to decode a value
    #[error("buffer underflow: need {needed} bytes but only {available} available")]
    BufferUnderflow { needed: usize, available: usize },

    /// Request larger than the buffer limit
    #[error("buffer overflow: need {needed} bytes but only {available} available")]
    BufferOverflow { needed: usize, available: usize },

    /// Server refused the connect request
    #[error("connection rejected by server")]
    ConnectionRejected,

    // =========================================================================
    // Server Errors
    // =========================================================================
    /// Error list decoded from a status vector
    #[error("{0}")]
    Server(StatusVector),

    // =========================================================================
    // State Errors
    // =========================================================================
    /// Statement operation not valid in the current state
    #[error("invalid statement state: {operation} not allowed in {state}")]
    StatementState {
        operation: &'static str,
        state: &'static str,
    },

    /// Transaction operation not valid in the current state
    #[error("invalid transaction state: {operation} not allowed in {state}")]
    TransactionState {
        operation: &'static str,
        state: &'static str,
    },

    /// Blob operation not valid for the blob's mode or state
    #[error("invalid blob state: {operation} not allowed on a {state} blob")]
    BlobState {
        operation: &'static str,
        state: &'static str,
    },

    /// Connection not ready for operations
    #[error("connection not ready")]
    ConnectionNotReady,

    /// Detach attempted while transactions are still open
    #[error("cannot detach: {0} open transaction(s)")]
    OpenTransactions(usize),

    // =========================================================================
    // Authentication and Wire Crypt Errors
    // =========================================================================
    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Server asked for a plugin this client does not implement
    #[error("unsupported authentication plugin: {0}")]
    UnsupportedAuthPlugin(String),

    /// Wire encryption was required but could not be negotiated
    #[error("wire encryption required but not supported by the server")]
    WireCryptIncompatible,

    // =========================================================================
    // Data Errors
    // =========================================================================
    /// Value could not be converted to or from its wire form
    #[error("data conversion error: {0}")]
    DataConversion(String),

    /// Slice buffer does not match the element count of the array descriptor
    #[error("array slice size mismatch: expected {expected} elements, got {actual}")]
    ArraySizeMismatch { expected: usize, actual: usize },

    /// Array descriptor has too many dimensions
    #[error("invalid array dimension count: {0}")]
    InvalidDimension(usize),

    /// Blob segment longer than the protocol's 16-bit length
    #[error("blob segment too large: {0} bytes")]
    SegmentTooLarge(usize),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid connection string
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// Feature not supported by the negotiated protocol
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),
}

impl Error {
    /// Wrap a read-side I/O failure
    pub fn network_read(err: impl std::fmt::Display) -> Self {
        Error::NetworkRead(err.to_string())
    }

    /// Wrap a write-side I/O failure
    pub fn network_write(err: impl std::fmt::Display) -> Self {
        Error::NetworkWrite(err.to_string())
    }

    /// Server-style error carrying a single ISC code
    pub fn isc(code: i32) -> Self {
        Error::Server(StatusVector::from_code(code))
    }

    /// Check if this is a network failure
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            Error::NetworkRead(_)
                | Error::NetworkWrite(_)
                | Error::ConnectionClosed
                | Error::ConnectionTimeout(_)
                | Error::Io(_)
        )
    }

    /// Check if this is a local state violation
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Error::StatementState { .. }
                | Error::TransactionState { .. }
                | Error::BlobState { .. }
                | Error::ConnectionNotReady
                | Error::OpenTransactions(_)
        )
    }

    /// Check if the server reported this error
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Server(_))
    }

    /// Primary ISC code, when one applies
    pub fn error_code(&self) -> Option<i32> {
        match self {
            Error::Server(sv) => sv.error_code(),
            Error::NetworkRead(_) => Some(isc::NET_READ_ERR),
            Error::NetworkWrite(_) => Some(isc::NET_WRITE_ERR),
            Error::ConnectionClosed => Some(isc::NETWORK_ERROR),
            Error::ConnectionRejected => Some(isc::CONNECT_REJECT),
            Error::TransactionState { .. } => Some(isc::TRA_STATE),
            Error::OpenTransactions(_) => Some(isc::OPEN_TRANS),
            Error::WireCryptIncompatible => Some(isc::WIRECRYPT_INCOMPATIBLE),
            Error::InvalidDimension(_) => Some(isc::INVALID_DIMENSION),
            _ => None,
        }
    }

    /// SQLSTATE reported by the server, if any
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Error::Server(sv) => sv.sql_state(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        assert!(Error::NetworkRead("eof".into()).is_network_error());
        assert!(Error::ConnectionClosed.is_network_error());
        assert!(!Error::ConnectionClosed.is_state_error());
        assert!(Error::OpenTransactions(2).is_state_error());
        assert!(Error::isc(isc::SEGSTR_EOF).is_server_error());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::isc(isc::LOGIN).error_code(), Some(isc::LOGIN));
        assert_eq!(
            Error::NetworkWrite("broken pipe".into()).error_code(),
            Some(isc::NET_WRITE_ERR)
        );
        assert_eq!(Error::OpenTransactions(1).error_code(), Some(isc::OPEN_TRANS));
        assert_eq!(Error::Protocol("x".into()).error_code(), None);
    }

    #[test]
    fn test_state_error_display() {
        let err = Error::StatementState {
            operation: "execute",
            state: "Allocated",
        };
        assert_eq!(
            err.to_string(),
            "invalid statement state: execute not allowed in Allocated"
        );
    }
}
