//! Server replies
//!
//! Every request is answered by exactly one reply operation. Most carry a
//! status vector (`op_response`); fetches, stored procedure outputs and the
//! auth continuation have their own shapes. Row data that may follow a
//! fetch or SQL response is left on the stream for the caller.

use bytes::Bytes;

use crate::constants::op;
use crate::error::{Error, Result};
use crate::status::StatusVector;
use crate::xdr::XdrStream;

/// `op_response`: handle, object id, data and status
#[derive(Debug, Clone, Default)]
pub struct GenericResponse {
    /// Object handle (statement, transaction, blob, ...)
    pub handle: i32,
    /// Object id (blob or array id)
    pub object_id: i64,
    /// Info or auth data
    pub data: Bytes,
    /// Decoded status vector
    pub status: StatusVector,
}

/// `op_fetch_response` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchResponse {
    /// 0 while rows remain, 100 at end of cursor
    pub status: i32,
    /// Rows following this header (0 or 1)
    pub count: i32,
}

/// `op_sql_response` header, the singleton output of `op_execute2`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlResponse {
    /// Rows following (0 or 1)
    pub count: i32,
}

/// `op_cont_auth` from the server
#[derive(Debug, Clone, Default)]
pub struct ContAuthResponse {
    /// Plugin specific data (salt and server key for SRP)
    pub data: Bytes,
    /// Plugin the server continues with
    pub plugin_name: String,
    /// Plugins the server accepts
    pub plugin_list: String,
    /// Wire-crypt keys known so far
    pub keys: Bytes,
}

/// `op_crypt_key_callback`: the server needs the database encryption key
#[derive(Debug, Clone, Default)]
pub struct CryptKeyCallbackResponse {
    /// Plugin data from the server
    pub data: Bytes,
}

/// Any reply the session can receive
#[derive(Debug, Clone)]
pub enum Response {
    /// `op_response`
    Generic(GenericResponse),
    /// `op_fetch_response`
    Fetch(FetchResponse),
    /// `op_sql_response`
    Sql(SqlResponse),
    /// `op_cont_auth`
    ContAuth(ContAuthResponse),
    /// `op_crypt_key_callback`
    CryptKeyCallback(CryptKeyCallbackResponse),
}

impl Response {
    /// Operation name, for error reporting
    pub fn name(&self) -> &'static str {
        match self {
            Response::Generic(_) => "op_response",
            Response::Fetch(_) => "op_fetch_response",
            Response::Sql(_) => "op_sql_response",
            Response::ContAuth(_) => "op_cont_auth",
            Response::CryptKeyCallback(_) => "op_crypt_key_callback",
        }
    }

    /// Operation code the reply arrived with
    pub fn operation(&self) -> i32 {
        match self {
            Response::Generic(_) => op::RESPONSE,
            Response::Fetch(_) => op::FETCH_RESPONSE,
            Response::Sql(_) => op::SQL_RESPONSE,
            Response::ContAuth(_) => op::CONT_AUTH,
            Response::CryptKeyCallback(_) => op::CRYPT_KEY_CALLBACK,
        }
    }

    /// The generic reply, or an unexpected-operation error
    pub fn into_generic(self) -> Result<GenericResponse> {
        match self {
            Response::Generic(generic) => Ok(generic),
            other => Err(Error::UnexpectedOperation {
                expected: "op_response",
                actual: other.operation(),
            }),
        }
    }
}

/// Read the body of an `op_response` whose operation code was consumed
pub async fn read_generic_body(xdr: &mut XdrStream) -> Result<GenericResponse> {
    let handle = xdr.read_i32().await?;
    let object_id = xdr.read_i64().await?;
    let data = xdr.read_buffer().await?;
    let status = xdr.read_status_vector().await?;
    Ok(GenericResponse {
        handle,
        object_id,
        data,
        status,
    })
}

/// Read the body of an `op_cont_auth`
pub async fn read_cont_auth_body(xdr: &mut XdrStream) -> Result<ContAuthResponse> {
    Ok(ContAuthResponse {
        data: xdr.read_buffer().await?,
        plugin_name: xdr.read_string().await?,
        plugin_list: xdr.read_string().await?,
        keys: xdr.read_buffer().await?,
    })
}

/// Read the next reply
pub async fn read_response(xdr: &mut XdrStream) -> Result<Response> {
    let operation = xdr.read_operation().await?;
    match operation {
        op::RESPONSE => Ok(Response::Generic(read_generic_body(xdr).await?)),
        op::FETCH_RESPONSE => Ok(Response::Fetch(FetchResponse {
            status: xdr.read_i32().await?,
            count: xdr.read_i32().await?,
        })),
        op::SQL_RESPONSE => Ok(Response::Sql(SqlResponse {
            count: xdr.read_i32().await?,
        })),
        op::CONT_AUTH => Ok(Response::ContAuth(read_cont_auth_body(xdr).await?)),
        op::CRYPT_KEY_CALLBACK => Ok(Response::CryptKeyCallback(CryptKeyCallbackResponse {
            data: xdr.read_buffer().await?,
        })),
        other => Err(Error::UnexpectedOperation {
            expected: "response",
            actual: other,
        }),
    }
}
