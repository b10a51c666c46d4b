//! GDS wire protocol constants
//!
//! Operation codes, parameter buffer tags, information items, BLR/SDL codes
//! and the ISC status codes the client core needs to recognise.

// =============================================================================
// Protocol Versions
// =============================================================================

/// Protocol negotiation values
#[allow(missing_docs)]
pub mod protocol {
    pub const CONNECT_VERSION3: i32 = 3;
    pub const ARCH_GENERIC: i32 = 1;

    pub const FB_PROTOCOL_FLAG: i32 = 0x8000;
    pub const FB_PROTOCOL_MASK: i32 = !FB_PROTOCOL_FLAG;

    pub const VERSION10: i32 = 10;
    pub const VERSION11: i32 = FB_PROTOCOL_FLAG | 11;
    pub const VERSION12: i32 = FB_PROTOCOL_FLAG | 12;
    pub const VERSION13: i32 = FB_PROTOCOL_FLAG | 13;

    pub const PTYPE_RPC: i32 = 2;
    pub const PTYPE_BATCH_SEND: i32 = 3;
    pub const PTYPE_LAZY_SEND: i32 = 5;
    pub const PTYPE_MASK: i32 = 0xFF;

    pub const INVALID_OBJECT: i32 = 0xFFFF;
}

// =============================================================================
// Operation Codes
// =============================================================================

/// Operation codes that start every request and response
#[allow(missing_docs)]
pub mod op {
    pub const CONNECT: i32 = 1;
    pub const EXIT: i32 = 2;
    pub const ACCEPT: i32 = 3;
    pub const REJECT: i32 = 4;
    pub const DISCONNECT: i32 = 6;
    pub const RESPONSE: i32 = 9;
    pub const ATTACH: i32 = 19;
    pub const CREATE: i32 = 20;
    pub const DETACH: i32 = 21;
    pub const TRANSACTION: i32 = 29;
    pub const COMMIT: i32 = 30;
    pub const ROLLBACK: i32 = 31;
    pub const PREPARE: i32 = 32;
    pub const CREATE_BLOB: i32 = 34;
    pub const OPEN_BLOB: i32 = 35;
    pub const GET_SEGMENT: i32 = 36;
    pub const PUT_SEGMENT: i32 = 37;
    pub const CANCEL_BLOB: i32 = 38;
    pub const CLOSE_BLOB: i32 = 39;
    pub const INFO_DATABASE: i32 = 40;
    pub const INFO_TRANSACTION: i32 = 42;
    pub const INFO_BLOB: i32 = 43;
    pub const BATCH_SEGMENTS: i32 = 44;
    pub const QUE_EVENTS: i32 = 48;
    pub const CANCEL_EVENTS: i32 = 49;
    pub const COMMIT_RETAINING: i32 = 50;
    pub const PREPARE2: i32 = 51;
    pub const EVENT: i32 = 52;
    pub const CONNECT_REQUEST: i32 = 53;
    pub const OPEN_BLOB2: i32 = 56;
    pub const CREATE_BLOB2: i32 = 57;
    pub const GET_SLICE: i32 = 58;
    pub const PUT_SLICE: i32 = 59;
    pub const SLICE: i32 = 60;
    pub const SEEK_BLOB: i32 = 61;
    pub const ALLOCATE_STATEMENT: i32 = 62;
    pub const EXECUTE: i32 = 63;
    pub const EXEC_IMMEDIATE: i32 = 64;
    pub const FETCH: i32 = 65;
    pub const FETCH_RESPONSE: i32 = 66;
    pub const FREE_STATEMENT: i32 = 67;
    pub const PREPARE_STATEMENT: i32 = 68;
    pub const INFO_SQL: i32 = 70;
    pub const DUMMY: i32 = 71;
    pub const EXECUTE2: i32 = 76;
    pub const SQL_RESPONSE: i32 = 78;
    pub const DROP_DATABASE: i32 = 81;
    pub const ROLLBACK_RETAINING: i32 = 86;
    pub const CANCEL: i32 = 91;
    pub const CONT_AUTH: i32 = 92;
    pub const PING: i32 = 93;
    pub const ACCEPT_DATA: i32 = 94;
    pub const CRYPT: i32 = 96;
    pub const CRYPT_KEY_CALLBACK: i32 = 97;
    pub const COND_ACCEPT: i32 = 98;

    /// Human readable opcode name for trace output
    pub fn name(code: i32) -> &'static str {
        match code {
            CONNECT => "connect",
            EXIT => "exit",
            ACCEPT => "accept",
            REJECT => "reject",
            DISCONNECT => "disconnect",
            RESPONSE => "response",
            ATTACH => "attach",
            CREATE => "create",
            DETACH => "detach",
            TRANSACTION => "transaction",
            COMMIT => "commit",
            ROLLBACK => "rollback",
            PREPARE => "prepare",
            GET_SEGMENT => "get_segment",
            CANCEL_BLOB => "cancel_blob",
            CLOSE_BLOB => "close_blob",
            INFO_DATABASE => "info_database",
            INFO_TRANSACTION => "info_transaction",
            INFO_BLOB => "info_blob",
            BATCH_SEGMENTS => "batch_segments",
            QUE_EVENTS => "que_events",
            CANCEL_EVENTS => "cancel_events",
            COMMIT_RETAINING => "commit_retaining",
            PREPARE2 => "prepare2",
            EVENT => "event",
            CONNECT_REQUEST => "connect_request",
            OPEN_BLOB2 => "open_blob2",
            CREATE_BLOB2 => "create_blob2",
            GET_SLICE => "get_slice",
            PUT_SLICE => "put_slice",
            SLICE => "slice",
            SEEK_BLOB => "seek_blob",
            ALLOCATE_STATEMENT => "allocate_statement",
            EXECUTE => "execute",
            EXEC_IMMEDIATE => "exec_immediate",
            FETCH => "fetch",
            FETCH_RESPONSE => "fetch_response",
            FREE_STATEMENT => "free_statement",
            PREPARE_STATEMENT => "prepare_statement",
            INFO_SQL => "info_sql",
            DUMMY => "dummy",
            EXECUTE2 => "execute2",
            SQL_RESPONSE => "sql_response",
            DROP_DATABASE => "drop_database",
            ROLLBACK_RETAINING => "rollback_retaining",
            CANCEL => "cancel",
            CONT_AUTH => "cont_auth",
            PING => "ping",
            ACCEPT_DATA => "accept_data",
            CRYPT => "crypt",
            CRYPT_KEY_CALLBACK => "crypt_key_callback",
            COND_ACCEPT => "cond_accept",
            _ => "unknown",
        }
    }
}

// =============================================================================
// User Identification (op_connect)
// =============================================================================

/// Tags of the user identification block sent with op_connect
#[allow(missing_docs)]
pub mod cnct {
    pub const USER: u8 = 1;
    pub const PASSWD: u8 = 2;
    pub const HOST: u8 = 4;
    pub const GROUP: u8 = 5;
    pub const USER_VERIFICATION: u8 = 6;
    pub const SPECIFIC_DATA: u8 = 7;
    pub const PLUGIN_NAME: u8 = 8;
    pub const LOGIN: u8 = 9;
    pub const PLUGIN_LIST: u8 = 10;
    pub const CLIENT_CRYPT: u8 = 11;
}

// =============================================================================
// Parameter Buffer Tags
// =============================================================================

/// Database parameter buffer tags
#[allow(missing_docs)]
pub mod dpb {
    pub const VERSION1: u8 = 1;
    pub const PAGE_SIZE: u8 = 4;
    pub const NUM_BUFFERS: u8 = 5;
    pub const NO_GARBAGE_COLLECT: u8 = 16;
    pub const FORCE_WRITE: u8 = 24;
    pub const USER_NAME: u8 = 28;
    pub const PASSWORD: u8 = 29;
    pub const LC_CTYPE: u8 = 48;
    pub const OVERWRITE: u8 = 54;
    pub const CONNECT_TIMEOUT: u8 = 57;
    pub const DUMMY_PACKET_INTERVAL: u8 = 58;
    pub const SQL_ROLE_NAME: u8 = 60;
    pub const SQL_DIALECT: u8 = 63;
    pub const SET_DB_CHARSET: u8 = 68;
    pub const PROCESS_ID: u8 = 71;
    pub const NO_DB_TRIGGERS: u8 = 72;
    pub const PROCESS_NAME: u8 = 74;
    pub const UTF8_FILENAME: u8 = 77;
    pub const CLIENT_VERSION: u8 = 80;
    pub const SPECIFIC_AUTH_DATA: u8 = 84;
    pub const AUTH_PLUGIN_LIST: u8 = 85;
    pub const AUTH_PLUGIN_NAME: u8 = 86;
    pub const SESSION_TIME_ZONE: u8 = 91;
}

/// Transaction parameter buffer tags
#[allow(missing_docs)]
pub mod tpb {
    pub const VERSION3: u8 = 3;
    pub const CONSISTENCY: u8 = 1;
    pub const CONCURRENCY: u8 = 2;
    pub const SHARED: u8 = 3;
    pub const PROTECTED: u8 = 4;
    pub const EXCLUSIVE: u8 = 5;
    pub const WAIT: u8 = 6;
    pub const NOWAIT: u8 = 7;
    pub const READ: u8 = 8;
    pub const WRITE: u8 = 9;
    pub const LOCK_READ: u8 = 10;
    pub const LOCK_WRITE: u8 = 11;
    pub const READ_COMMITTED: u8 = 15;
    pub const AUTOCOMMIT: u8 = 16;
    pub const REC_VERSION: u8 = 17;
    pub const NO_REC_VERSION: u8 = 18;
    pub const NO_AUTO_UNDO: u8 = 20;
    pub const LOCK_TIMEOUT: u8 = 21;
}

/// Service parameter buffer tags
#[allow(missing_docs)]
pub mod spb {
    pub const VERSION2: u8 = 2;
    pub const CURRENT_VERSION: u8 = 2;
    pub const USER_NAME: u8 = 28;
    pub const PASSWORD: u8 = 29;
    pub const CONNECT_TIMEOUT: u8 = 57;
    pub const SQL_ROLE_NAME: u8 = 60;
    pub const DBNAME: u8 = 106;
    pub const VERBOSE: u8 = 107;
    pub const OPTIONS: u8 = 108;
    pub const SPECIFIC_AUTH_DATA: u8 = 111;
}

/// Blob parameter buffer tags
#[allow(missing_docs)]
pub mod bpb {
    pub const VERSION1: u8 = 1;
    pub const SOURCE_TYPE: u8 = 1;
    pub const TARGET_TYPE: u8 = 2;
    pub const TYPE: u8 = 3;
    pub const SOURCE_INTERP: u8 = 4;
    pub const TARGET_INTERP: u8 = 5;
    pub const TYPE_SEGMENTED: u8 = 0;
    pub const TYPE_STREAM: u8 = 1;
}

/// Event parameter buffer version
pub const EPB_VERSION1: u8 = 1;

// =============================================================================
// Information Items
// =============================================================================

/// Structural codes shared by every information response
#[allow(missing_docs)]
pub mod info {
    pub const END: u8 = 1;
    pub const TRUNCATED: u8 = 2;
    pub const ERROR: u8 = 3;
    pub const DATA_NOT_READY: u8 = 4;
    pub const FLAG_END: u8 = 127;
}

/// Statement information items
#[allow(missing_docs)]
pub mod sql_info {
    pub const SELECT: u8 = 4;
    pub const BIND: u8 = 5;
    pub const NUM_VARIABLES: u8 = 6;
    pub const DESCRIBE_VARS: u8 = 7;
    pub const DESCRIBE_END: u8 = 8;
    pub const SQLDA_SEQ: u8 = 9;
    pub const MESSAGE_SEQ: u8 = 10;
    pub const TYPE: u8 = 11;
    pub const SUB_TYPE: u8 = 12;
    pub const SCALE: u8 = 13;
    pub const LENGTH: u8 = 14;
    pub const NULL_IND: u8 = 15;
    pub const FIELD: u8 = 16;
    pub const RELATION: u8 = 17;
    pub const OWNER: u8 = 18;
    pub const ALIAS: u8 = 19;
    pub const SQLDA_START: u8 = 20;
    pub const STMT_TYPE: u8 = 21;
    pub const GET_PLAN: u8 = 22;
    pub const RECORDS: u8 = 23;

    pub const REQ_SELECT_COUNT: u8 = 13;
    pub const REQ_INSERT_COUNT: u8 = 14;
    pub const REQ_UPDATE_COUNT: u8 = 15;
    pub const REQ_DELETE_COUNT: u8 = 16;
}

/// Database information items
#[allow(missing_docs)]
pub mod db_info {
    pub const ID: u8 = 4;
    pub const IMPLEMENTATION: u8 = 11;
    pub const ISC_VERSION: u8 = 12;
    pub const PAGE_SIZE: u8 = 14;
    pub const NUM_BUFFERS: u8 = 15;
    pub const ODS_VERSION: u8 = 32;
    pub const ODS_MINOR_VERSION: u8 = 33;
    pub const FORCED_WRITES: u8 = 52;
    pub const SQL_DIALECT: u8 = 62;
    pub const READ_ONLY: u8 = 63;
    pub const SIZE_IN_PAGES: u8 = 64;
    pub const FIREBIRD_VERSION: u8 = 103;
}

/// Transaction information items
#[allow(missing_docs)]
pub mod tra_info {
    pub const ID: u8 = 4;
    pub const OLDEST_INTERESTING: u8 = 5;
    pub const OLDEST_SNAPSHOT: u8 = 6;
    pub const OLDEST_ACTIVE: u8 = 7;
    pub const ISOLATION: u8 = 8;
    pub const ACCESS: u8 = 9;
    pub const LOCK_TIMEOUT: u8 = 10;
}

/// Blob information items
#[allow(missing_docs)]
pub mod blob_info {
    pub const NUM_SEGMENTS: u8 = 4;
    pub const MAX_SEGMENT: u8 = 5;
    pub const TOTAL_LENGTH: u8 = 6;
    pub const TYPE: u8 = 7;
}

// =============================================================================
// Statement Types
// =============================================================================

/// Statement kind reported by `isc_info_sql_stmt_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementType {
    /// `SELECT`
    Select,
    /// `INSERT`
    Insert,
    /// `UPDATE`
    Update,
    /// `DELETE`
    Delete,
    /// DDL statement
    Ddl,
    /// Blob segment read
    GetSegment,
    /// Blob segment write
    PutSegment,
    /// `EXECUTE PROCEDURE`
    StoredProcedure,
    /// `SET TRANSACTION`
    StartTrans,
    /// `COMMIT`
    Commit,
    /// `ROLLBACK`
    Rollback,
    /// `SELECT ... FOR UPDATE`
    SelectForUpdate,
    /// `SET GENERATOR`
    SetGenerator,
    /// `SAVEPOINT`
    Savepoint,
    /// Not yet classified, or unknown to this client
    #[default]
    Unknown,
}

impl StatementType {
    /// Map the server's statement type code
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => StatementType::Select,
            2 => StatementType::Insert,
            3 => StatementType::Update,
            4 => StatementType::Delete,
            5 => StatementType::Ddl,
            6 => StatementType::GetSegment,
            7 => StatementType::PutSegment,
            8 => StatementType::StoredProcedure,
            9 => StatementType::StartTrans,
            10 => StatementType::Commit,
            11 => StatementType::Rollback,
            12 => StatementType::SelectForUpdate,
            13 => StatementType::SetGenerator,
            14 => StatementType::Savepoint,
            _ => StatementType::Unknown,
        }
    }

    /// Whether the statement opens a cursor
    pub fn returns_rows(&self) -> bool {
        matches!(self, StatementType::Select | StatementType::SelectForUpdate)
    }

    /// Whether a records-affected query makes sense after execution
    pub fn affects_rows(&self) -> bool {
        matches!(
            self,
            StatementType::Insert
                | StatementType::Update
                | StatementType::Delete
                | StatementType::StoredProcedure
        )
    }
}

/// Options for `op_free_statement`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FreeOption {
    /// Close the cursor, keep the handle
    Close = 1,
    /// Release the handle and its descriptors
    Drop = 2,
}

/// Kinds accepted by `op_cancel`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CancelKind {
    /// Disable cancellation for the attachment
    Disable = 1,
    /// Re-enable cancellation
    Enable = 2,
    /// Cancel the running request
    Raise = 3,
    /// Abort the attachment
    Abort = 4,
}

// =============================================================================
// SQL Data Types
// =============================================================================

/// SQL type codes carried by describe information (nullable bit cleared)
#[allow(missing_docs)]
pub mod sql_type {
    pub const TEXT: i32 = 452;
    pub const VARYING: i32 = 448;
    pub const SHORT: i32 = 500;
    pub const LONG: i32 = 496;
    pub const FLOAT: i32 = 482;
    pub const DOUBLE: i32 = 480;
    pub const D_FLOAT: i32 = 530;
    pub const TIMESTAMP: i32 = 510;
    pub const BLOB: i32 = 520;
    pub const ARRAY: i32 = 540;
    pub const QUAD: i32 = 550;
    pub const TYPE_TIME: i32 = 560;
    pub const TYPE_DATE: i32 = 570;
    pub const INT64: i32 = 580;
    pub const BOOLEAN: i32 = 32764;
    pub const NULL: i32 = 32766;
}

/// BLR codes used for message formats and array element types
#[allow(missing_docs)]
pub mod blr {
    pub const VERSION5: u8 = 5;
    pub const BEGIN: u8 = 2;
    pub const MESSAGE: u8 = 4;
    pub const EOC: u8 = 76;
    pub const END: u8 = 255;

    pub const TEXT: u8 = 14;
    pub const TEXT2: u8 = 15;
    pub const SHORT: u8 = 7;
    pub const LONG: u8 = 8;
    pub const QUAD: u8 = 9;
    pub const FLOAT: u8 = 10;
    pub const D_FLOAT: u8 = 11;
    pub const SQL_DATE: u8 = 12;
    pub const SQL_TIME: u8 = 13;
    pub const INT64: u8 = 16;
    pub const BOOL: u8 = 23;
    pub const DOUBLE: u8 = 27;
    pub const TIMESTAMP: u8 = 35;
    pub const VARYING: u8 = 37;
    pub const VARYING2: u8 = 38;
    pub const CSTRING: u8 = 40;
    pub const CSTRING2: u8 = 41;
}

/// Slice description language codes
#[allow(missing_docs)]
pub mod sdl {
    pub const VERSION1: u8 = 1;
    pub const EOC: u8 = 255;
    pub const RELATION: u8 = 2;
    pub const FIELD: u8 = 4;
    pub const STRUCT: u8 = 6;
    pub const VARIABLE: u8 = 7;
    pub const SCALAR: u8 = 8;
    pub const TINY_INTEGER: u8 = 9;
    pub const SHORT_INTEGER: u8 = 10;
    pub const LONG_INTEGER: u8 = 11;
    pub const DO2: u8 = 34;
    pub const DO1: u8 = 35;
    pub const ELEMENT: u8 = 36;

    pub const MAX_DIMENSIONS: usize = 16;
    pub const ARRAY_DESC_COLUMN_MAJOR: u8 = 1;
}

// =============================================================================
// Status Vector
// =============================================================================

/// Argument kinds in a status vector
#[allow(missing_docs)]
pub mod arg {
    pub const END: i32 = 0;
    pub const GDS: i32 = 1;
    pub const STRING: i32 = 2;
    pub const CSTRING: i32 = 3;
    pub const NUMBER: i32 = 4;
    pub const INTERPRETED: i32 = 5;
    pub const WIN32: i32 = 17;
    pub const WARNING: i32 = 18;
    pub const SQL_STATE: i32 = 19;
}

/// ISC status codes raised or recognised by the client
#[allow(missing_docs)]
pub mod isc {
    pub const ARITH_EXCEPT: i32 = 335544321;
    pub const BAD_DB_HANDLE: i32 = 335544324;
    pub const OPEN_TRANS: i32 = 335544357;
    pub const SEGMENT: i32 = 335544366;
    pub const SEGSTR_EOF: i32 = 335544367;
    pub const CONNECT_REJECT: i32 = 335544421;
    pub const INVALID_DIMENSION: i32 = 335544458;
    pub const TRA_STATE: i32 = 335544468;
    pub const DSQL_SQLDA_ERR: i32 = 335544583;
    pub const NETWORK_ERROR: i32 = 335544721;
    pub const NET_READ_ERR: i32 = 335544726;
    pub const NET_WRITE_ERR: i32 = 335544727;
    pub const STRING_TRUNCATION: i32 = 335544914;
    pub const WIRECRYPT_INCOMPATIBLE: i32 = 335545064;
    pub const LOGIN: i32 = 335544472;
}

// =============================================================================
// Sizes and Fetch Status
// =============================================================================

/// Buffer sizes requested from the server
#[allow(missing_docs)]
pub mod buffer_size {
    pub const PREPARE_INFO: i32 = 32768;
    pub const STATEMENT_TYPE: i32 = 8;
    pub const ROWS_AFFECTED: i32 = 34;
    pub const DEFAULT_INFO: i32 = 1024;
    pub const MAX_SEGMENT: usize = 32767;
    pub const SEGMENT_HEADER: usize = 12;
}

/// Fetch status meaning "cursor exhausted"
pub const FETCH_NO_MORE_ROWS: i32 = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_versions_carry_flag() {
        assert_eq!(protocol::VERSION13 & protocol::FB_PROTOCOL_MASK, 13);
        assert_eq!(protocol::VERSION10 & protocol::FB_PROTOCOL_FLAG, 0);
    }

    #[test]
    fn test_statement_type_from_code() {
        assert_eq!(StatementType::from_code(1), StatementType::Select);
        assert_eq!(StatementType::from_code(8), StatementType::StoredProcedure);
        assert_eq!(StatementType::from_code(99), StatementType::Unknown);
        assert!(StatementType::SelectForUpdate.returns_rows());
        assert!(!StatementType::Insert.returns_rows());
        assert!(StatementType::Delete.affects_rows());
        assert!(!StatementType::Ddl.affects_rows());
    }

    #[test]
    fn test_op_names() {
        assert_eq!(op::name(op::CONT_AUTH), "cont_auth");
        assert_eq!(op::name(12345), "unknown");
    }
}
