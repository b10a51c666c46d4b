//! Scripted in-memory server for integration tests
//!
//! [`MockTransport`] hands out the client ends of `tokio::io::duplex`
//! pipes; each server end is wrapped in a [`MockServer`] that reads
//! requests with the crate's own XDR stream and writes canned replies.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use firebird_rs::constants::{arg, db_info, info, op, protocol, sql_info};
use firebird_rs::transport::BoxedStream;
use firebird_rs::xdr::XdrStream;
use firebird_rs::{Config, Error, Result, Transport};

pub const DB_HANDLE: i32 = 1;
pub const SERVER_VERSION: &str = "LI-V4.0.2.2816 Firebird 4.0";

/// Route client logs to the test output, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Transport that returns pre-created pipes in order
pub struct MockTransport {
    streams: Mutex<VecDeque<tokio::io::DuplexStream>>,
}

impl MockTransport {
    /// A transport with `channels` pipes and their server ends
    pub fn with_channels(channels: usize) -> (Arc<Self>, Vec<MockServer>) {
        init_tracing();
        let mut clients = VecDeque::new();
        let mut servers = Vec::new();
        for _ in 0..channels {
            let (client, server) = tokio::io::duplex(1 << 20);
            clients.push_back(client);
            servers.push(MockServer::new(Box::new(server)));
        }
        (
            Arc::new(Self {
                streams: Mutex::new(clients),
            }),
            servers,
        )
    }

    /// A transport with one pipe
    pub fn single() -> (Arc<Self>, MockServer) {
        let (transport, mut servers) = Self::with_channels(1);
        let server = servers.remove(0);
        (transport, server)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn open(&self, _host: &str, _port: u16) -> Result<BoxedStream> {
        let stream = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)))?;
        Ok(Box::new(stream))
    }
}

pub fn config() -> Config {
    Config::new("localhost", 3050, "/data/test.fdb", "sysdba", "masterkey")
}

/// One decoded client request
#[derive(Debug, Default)]
pub struct Request {
    pub op: i32,
    pub ints: Vec<i64>,
    pub buffers: Vec<Bytes>,
    pub strings: Vec<String>,
}

impl Request {
    pub fn int(&self, index: usize) -> i64 {
        self.ints[index]
    }
}

/// Server side of one pipe
pub struct MockServer {
    xdr: XdrStream,
}

impl MockServer {
    pub fn new(stream: BoxedStream) -> Self {
        Self {
            xdr: XdrStream::new(stream),
        }
    }

    pub fn xdr(&mut self) -> &mut XdrStream {
        &mut self.xdr
    }

    /// Read the next request, decoding its body by operation code
    pub async fn next_request(&mut self) -> Result<Request> {
        let code = self.xdr.read_operation().await?;
        let mut req = Request {
            op: code,
            ..Request::default()
        };
        // i = i32, l = i64, b = buffer, s = string
        let layout: &str = match code {
            op::ATTACH | op::CREATE => "isb",
            op::INFO_DATABASE | op::INFO_TRANSACTION | op::INFO_BLOB | op::INFO_SQL => "iibi",
            op::TRANSACTION | op::PREPARE2 => "ib",
            op::COMMIT
            | op::ROLLBACK
            | op::COMMIT_RETAINING
            | op::ROLLBACK_RETAINING
            | op::PREPARE
            | op::ALLOCATE_STATEMENT
            | op::CLOSE_BLOB
            | op::CANCEL_BLOB
            | op::DETACH
            | op::DROP_DATABASE
            | op::CANCEL => "i",
            op::PREPARE_STATEMENT => "iiisbi",
            op::EXECUTE => "iibii",
            op::EXECUTE2 => "iibiibi",
            op::FETCH => "ibii",
            op::FREE_STATEMENT | op::CANCEL_EVENTS => "ii",
            op::EXEC_IMMEDIATE => "iiisbi",
            op::CREATE_BLOB2 | op::OPEN_BLOB2 => "bil",
            // batch segments repeats the payload length before the buffer
            op::GET_SEGMENT | op::BATCH_SEGMENTS => "iib",
            op::SEEK_BLOB | op::CONNECT_REQUEST => "iii",
            op::CONT_AUTH => "bssb",
            op::CRYPT => "ss",
            op::QUE_EVENTS => "ibiii",
            op::CONNECT => "iiisib",
            // put slice is followed by the raw element bytes
            op::GET_SLICE | op::PUT_SLICE => "ilibsi",
            _ => "",
        };
        for kind in layout.chars() {
            match kind {
                'i' => req.ints.push(self.xdr.read_i32().await? as i64),
                'l' => req.ints.push(self.xdr.read_i64().await?),
                'b' => req.buffers.push(self.xdr.read_buffer().await?),
                's' => req.strings.push(self.xdr.read_string().await?),
                _ => unreachable!(),
            }
        }
        if code == op::CONNECT {
            let offers = req.ints[3];
            for _ in 0..offers * 5 {
                req.ints.push(self.xdr.read_i32().await? as i64);
            }
        }
        Ok(req)
    }

    /// Read a request and check its operation
    pub async fn expect(&mut self, code: i32) -> Request {
        let req = self.next_request().await.expect("request");
        assert_eq!(
            req.op,
            code,
            "expected {} but got {}",
            op::name(code),
            op::name(req.op)
        );
        req
    }

    // -------------------------------------------------------------------------
    // Replies
    // -------------------------------------------------------------------------

    pub async fn send(&mut self) {
        self.xdr.flush().await.expect("flush");
    }

    fn write_response(&mut self, handle: i32, object_id: i64, data: &[u8], status: &[(i32, i32)]) {
        let xdr = &mut self.xdr;
        xdr.write_op(op::RESPONSE).unwrap();
        xdr.write_i32(handle).unwrap();
        xdr.write_i64(object_id).unwrap();
        xdr.write_buffer(data).unwrap();
        for (kind, code) in status {
            xdr.write_i32(*kind).unwrap();
            xdr.write_i32(*code).unwrap();
        }
        xdr.write_i32(arg::END).unwrap();
    }

    /// `op_response` with a clean status
    pub async fn ok(&mut self, handle: i32, object_id: i64, data: &[u8]) {
        self.write_response(handle, object_id, data, &[]);
        self.send().await;
    }

    pub async fn ok_empty(&mut self) {
        self.ok(0, 0, &[]).await;
    }

    /// `op_response` carrying an error
    pub async fn error(&mut self, code: i32) {
        self.status(&[(arg::GDS, code)]).await;
    }

    /// `op_response` with an arbitrary numeric status vector
    pub async fn status(&mut self, status: &[(i32, i32)]) {
        self.write_response(0, 0, &[], status);
        self.send().await;
    }

    /// Successful `op_response` carrying a warning
    pub async fn warning(&mut self, handle: i32, code: i32) {
        self.write_response(handle, 0, &[], &[(arg::WARNING, code)]);
        self.send().await;
    }

    pub async fn accept(&mut self, version: i32) {
        let xdr = &mut self.xdr;
        xdr.write_op(op::ACCEPT).unwrap();
        xdr.write_i32(version).unwrap();
        xdr.write_i32(protocol::ARCH_GENERIC).unwrap();
        xdr.write_i32(protocol::PTYPE_BATCH_SEND).unwrap();
        self.send().await;
    }

    pub async fn cont_auth(&mut self, data: &[u8], plugin: &str, keys: &[u8]) {
        let xdr = &mut self.xdr;
        xdr.write_op(op::CONT_AUTH).unwrap();
        xdr.write_buffer(data).unwrap();
        xdr.write_string(plugin).unwrap();
        xdr.write_string(plugin).unwrap();
        xdr.write_buffer(keys).unwrap();
        self.send().await;
    }

    /// One fetched row: `op_fetch_response` then the row message
    pub fn queue_row(&mut self, row: &[u8]) {
        let xdr = &mut self.xdr;
        xdr.write_op(op::FETCH_RESPONSE).unwrap();
        xdr.write_i32(0).unwrap();
        xdr.write_i32(1).unwrap();
        xdr.write_bytes(row).unwrap();
    }

    /// `op_sql_response` with the singleton output row, if any
    pub async fn sql_response(&mut self, row: Option<&[u8]>) {
        let xdr = &mut self.xdr;
        xdr.write_op(op::SQL_RESPONSE).unwrap();
        xdr.write_i32(row.is_some() as i32).unwrap();
        if let Some(row) = row {
            xdr.write_bytes(row).unwrap();
        }
        self.send().await;
    }

    /// Batch terminator; status 100 ends the cursor
    pub async fn end_batch(&mut self, exhausted: bool) {
        let xdr = &mut self.xdr;
        xdr.write_op(op::FETCH_RESPONSE).unwrap();
        xdr.write_i32(if exhausted { 100 } else { 0 }).unwrap();
        xdr.write_i32(0).unwrap();
        self.send().await;
    }

    // -------------------------------------------------------------------------
    // Scripted sequences
    // -------------------------------------------------------------------------

    /// Connect, attach without continued auth, answer the version query
    pub async fn handshake(&mut self, version: i32) {
        self.expect(op::CONNECT).await;
        self.accept(version).await;
        self.expect(op::ATTACH).await;
        self.ok(DB_HANDLE, 0, &[]).await;
        self.answer_server_version().await;
    }

    pub async fn answer_server_version(&mut self) {
        let req = self.expect(op::INFO_DATABASE).await;
        assert_eq!(req.int(0), DB_HANDLE as i64);
        self.ok(0, 0, &server_version_info()).await;
    }

    /// Answer `op_transaction` with `handle`
    pub async fn begin(&mut self, handle: i32) {
        self.expect(op::TRANSACTION).await;
        self.ok(handle, 0, &[]).await;
    }

    /// Allocate plus prepare of a statement with integer columns
    ///
    /// `columns` integer output fields, no parameters.
    pub async fn prepare(&mut self, stmt_handle: i32, columns: usize, statement_type: i32) {
        self.expect(op::ALLOCATE_STATEMENT).await;
        self.ok(stmt_handle, 0, &[]).await;
        self.expect(op::PREPARE_STATEMENT).await;
        self.ok(0, 0, &describe_info(columns, 1, None)).await;
        self.expect(op::INFO_SQL).await;
        self.ok(0, 0, &statement_type_info(statement_type)).await;
    }

    /// Answer generic requests until the client disconnects
    pub async fn drain(&mut self) {
        while let Ok(req) = self.next_request().await {
            if req.op == op::DISCONNECT {
                break;
            }
            self.ok_empty().await;
        }
    }
}

// -----------------------------------------------------------------------------
// Info payloads
// -----------------------------------------------------------------------------

pub fn clumplet(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    out.push(tag);
    out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    out.extend_from_slice(value);
}

pub fn server_version_info() -> Vec<u8> {
    let mut value = vec![1, SERVER_VERSION.len() as u8];
    value.extend_from_slice(SERVER_VERSION.as_bytes());
    let mut out = Vec::new();
    clumplet(&mut out, db_info::ISC_VERSION, &value);
    out.push(info::END);
    out
}

pub fn statement_type_info(code: i32) -> Vec<u8> {
    let mut out = Vec::new();
    clumplet(&mut out, sql_info::STMT_TYPE, &code.to_le_bytes());
    out.push(info::END);
    out
}

pub fn records_info(inserted: i32, updated: i32, deleted: i32) -> Vec<u8> {
    let mut counters = Vec::new();
    clumplet(&mut counters, sql_info::REQ_SELECT_COUNT, &99i32.to_le_bytes());
    clumplet(&mut counters, sql_info::REQ_INSERT_COUNT, &inserted.to_le_bytes());
    clumplet(&mut counters, sql_info::REQ_UPDATE_COUNT, &updated.to_le_bytes());
    clumplet(&mut counters, sql_info::REQ_DELETE_COUNT, &deleted.to_le_bytes());
    counters.push(info::END);
    let mut out = Vec::new();
    clumplet(&mut out, sql_info::RECORDS, &counters);
    out.push(info::END);
    out
}

/// One described integer column
pub fn describe_field(out: &mut Vec<u8>, seq: usize, name: &str) {
    clumplet(out, sql_info::SQLDA_SEQ, &(seq as i32).to_le_bytes());
    clumplet(out, sql_info::TYPE, &(496i32 + 1).to_le_bytes());
    clumplet(out, sql_info::SUB_TYPE, &0i32.to_le_bytes());
    clumplet(out, sql_info::SCALE, &0i32.to_le_bytes());
    clumplet(out, sql_info::LENGTH, &4i32.to_le_bytes());
    clumplet(out, sql_info::FIELD, name.as_bytes());
    clumplet(out, sql_info::RELATION, b"T");
    clumplet(out, sql_info::OWNER, b"SYSDBA");
    clumplet(out, sql_info::ALIAS, name.as_bytes());
    out.push(sql_info::DESCRIBE_END);
}

/// Describe reply for `columns` integer outputs and no inputs
///
/// Fields start at `from` (1-based); with `truncate_after` the reply stops
/// once that many fields have been described.
pub fn describe_info(columns: usize, from: usize, truncate_after: Option<usize>) -> Vec<u8> {
    let mut out = vec![sql_info::SELECT];
    clumplet(&mut out, sql_info::DESCRIBE_VARS, &(columns as i32).to_le_bytes());
    for seq in from..=columns {
        if truncate_after == Some(seq - 1) {
            out.push(info::TRUNCATED);
            return out;
        }
        describe_field(&mut out, seq, &format!("C{}", seq));
    }
    out.push(sql_info::BIND);
    clumplet(&mut out, sql_info::DESCRIBE_VARS, &0i32.to_le_bytes());
    out.push(info::END);
    out
}

/// Field index a resumed describe request starts at
pub fn resume_start(items: &[u8]) -> usize {
    assert_eq!(items[0], sql_info::SQLDA_START);
    u16::from_le_bytes([items[2], items[3]]) as usize
}

/// Row of nullable integers in the null-bitmap format
pub fn bitmap_row(values: &[Option<i32>]) -> Vec<u8> {
    let mut bitmap = vec![0u8; values.len().div_ceil(8)];
    for (i, v) in values.iter().enumerate() {
        if v.is_none() {
            bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    let mut out = bitmap;
    while out.len() % 4 != 0 {
        out.push(0);
    }
    for v in values.iter().flatten() {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out
}

/// Row of nullable integers in the inline-indicator format
pub fn inline_row(values: &[Option<i32>]) -> Vec<u8> {
    let mut out = Vec::new();
    for v in values {
        out.extend_from_slice(&v.unwrap_or(0).to_be_bytes());
        out.extend_from_slice(&(if v.is_some() { 0i32 } else { -1 }).to_be_bytes());
    }
    out
}
