//! GDS protocol messages
//!
//! Request builders and reply decoders shared by the session components.

mod attach;
mod connect;
mod info;
mod response;

pub use attach::{build_dpb, write_attach};
pub use connect::{read_accept, write_connect, AcceptAuth, AcceptReply};
pub use info::{
    parse_items, parse_records_affected, parse_statement_type, write_info_request, BlobInfo,
    DatabaseInfo, InfoItem, TransactionInfo, BLOB_INFO_ITEMS, DATABASE_INFO_ITEMS, RECORDS_ITEMS,
    STATEMENT_TYPE_ITEMS, TRANSACTION_INFO_ITEMS,
};
pub use response::{
    read_cont_auth_body, read_generic_body, read_response, ContAuthResponse,
    CryptKeyCallbackResponse, FetchResponse, GenericResponse, Response, SqlResponse,
};
