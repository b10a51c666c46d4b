//! Firebird database connection
//!
//! This module provides the main `Connection` type. A connection owns one
//! session: the byte channel, its XDR codec and the attached database
//! handle. The protocol has no multiplexing, so every request/response
//! pair runs under the session lock and replies arrive in request order.
//!
//! # Example
//!
//! ```rust,no_run
//! use firebird_rs::{Connection, TransactionOptions};
//!
//! #[tokio::main]
//! async fn main() -> firebird_rs::Result<()> {
//!     let conn = Connection::connect("localhost:employee", "SYSDBA", "masterkey").await?;
//!
//!     let mut tx = conn.begin_transaction(TransactionOptions::default()).await?;
//!     let mut stmt = conn.prepare(&tx, "SELECT first_name FROM employee").await?;
//!     stmt.execute(&tx, &[]).await?;
//!     while let Some(row) = stmt.fetch().await? {
//!         println!("{:?}", row.get_string(0));
//!     }
//!     stmt.free(firebird_rs::FreeOption::Drop).await?;
//!     tx.commit().await?;
//!
//!     conn.detach().await?;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;

use crate::array::{self, ArrayDescriptor};
use crate::auth::{AuthNegotiator, SESSION_KEY_TYPE, WIRE_CRYPT_PLUGIN};
use crate::blob::Blob;
use crate::buffer::WriteBuffer;
use crate::capabilities::Capabilities;
use crate::config::Config;
use crate::constants::{db_info, info, op, CancelKind};
use crate::error::{Error, Result};
use crate::events::{self, EventManager, EventStream};
use crate::messages::{
    build_dpb, read_accept, read_generic_body, read_response, write_attach, write_connect,
    write_info_request, DatabaseInfo, GenericResponse, Response, DATABASE_INFO_ITEMS,
};
use crate::params::ParameterBuffer;
use crate::statement::Statement;
use crate::status::StatusVector;
use crate::transaction::{Transaction, TransactionOptions};
use crate::transport::{TcpTransport, Transport};
use crate::value::DbValue;
use crate::xdr::{SharedSink, XdrStream};

/// Callback receiving server warnings
pub type WarningCallback = Arc<dyn Fn(&StatusVector) + Send + Sync>;

/// Items fetched right after attach
const SERVER_VERSION_ITEMS: &[u8] = &[db_info::ISC_VERSION, info::END];

/// Reply buffer for `op_exec_immediate`
const EXEC_IMMEDIATE_BUFFER: i32 = 8192;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Channel open and protocol accepted
    Connected,
    /// Database attached and ready
    Attached,
    /// Connection is closed
    Closed,
}

impl ConnectionState {
    /// Name used in errors and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Attached => "attached",
            ConnectionState::Closed => "closed",
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// Run `$body` with the session locked, then hand queued warnings out
///
/// The lock is released before any warning callback runs.
macro_rules! locked {
    ($session:expr, |$inner:ident| $body:expr) => {{
        let session = ::std::sync::Arc::clone($session);
        let mut guard = session.inner.lock().await;
        let result = {
            let $inner: &mut $crate::connection::ConnectionInner = &mut guard;
            $body
        };
        let (warnings, callback) = guard.take_warnings();
        drop(guard);
        $crate::connection::deliver_warnings(warnings, callback.as_ref());
        result
    }};
}
pub(crate) use locked;

/// State shared by a connection and every object created from it
pub(crate) struct Session {
    pub(crate) inner: Mutex<ConnectionInner>,
    pub(crate) config: Config,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) events: Mutex<Option<EventManager>>,
}

impl Session {
    /// Detach when possible, otherwise just drop the channel
    ///
    /// Failures are logged, never returned.
    pub(crate) async fn shutdown(&self) {
        if let Some(manager) = self.events.lock().await.take() {
            manager.shutdown().await;
        }
        let mut inner = self.inner.lock().await;
        if inner.state == ConnectionState::Attached && inner.open_transactions == 0 {
            if let Err(e) = inner.detach().await {
                tracing::warn!(error = %e, "detach during close failed");
            }
        }
        inner.disconnect().await;
    }
}

/// The session's protocol state, guarded by the session lock
pub(crate) struct ConnectionInner {
    xdr: Option<XdrStream>,
    pub(crate) state: ConnectionState,
    pub(crate) capabilities: Capabilities,
    pub(crate) db_handle: i32,
    pub(crate) open_transactions: usize,
    pub(crate) dialect: u8,
    server_version: Option<String>,
    warnings: Vec<StatusVector>,
    warning_callback: Option<WarningCallback>,
}

impl ConnectionInner {
    fn new(xdr: XdrStream, dialect: u8) -> Self {
        Self {
            xdr: Some(xdr),
            state: ConnectionState::Connected,
            capabilities: Capabilities::default(),
            db_handle: 0,
            open_transactions: 0,
            dialect,
            server_version: None,
            warnings: Vec::new(),
            warning_callback: None,
        }
    }

    /// The channel, or `ConnectionClosed` once it is gone
    pub(crate) fn xdr(&mut self) -> Result<&mut XdrStream> {
        self.xdr.as_mut().ok_or(Error::ConnectionClosed)
    }

    /// Fail unless a database is attached
    pub(crate) fn ensure_attached(&self) -> Result<()> {
        match self.state {
            ConnectionState::Attached => Ok(()),
            ConnectionState::Closed => Err(Error::ConnectionClosed),
            _ => Err(Error::ConnectionNotReady),
        }
    }

    /// Read the next reply without interpreting its status
    pub(crate) async fn read_response(&mut self) -> Result<Response> {
        let response = read_response(self.xdr()?).await?;
        tracing::trace!(op = response.name(), "received reply");
        Ok(response)
    }

    /// Raise an error status, queue a warning
    pub(crate) fn check(&mut self, status: StatusVector) -> Result<()> {
        if status.is_error() {
            return Err(Error::Server(status));
        }
        if status.is_warning() {
            self.warnings.push(status);
        }
        Ok(())
    }

    /// Check the status of a generic reply, pass other replies through
    pub(crate) fn checked(&mut self, response: Response) -> Result<Response> {
        match response {
            Response::Generic(generic) => {
                self.check(generic.status.clone())?;
                Ok(Response::Generic(generic))
            }
            other => Ok(other),
        }
    }

    /// Read an `op_response` and check its status
    pub(crate) async fn read_generic(&mut self) -> Result<GenericResponse> {
        let generic = self.read_response().await?.into_generic()?;
        self.check(generic.status.clone())?;
        Ok(generic)
    }

    /// Flush the queued request and read its `op_response`
    pub(crate) async fn call(&mut self) -> Result<GenericResponse> {
        self.xdr()?.flush().await?;
        self.read_generic().await
    }

    /// Send an info request and return the raw info data
    pub(crate) async fn info(&mut self, operation: i32, handle: i32, items: &[u8], buffer_length: i32) -> Result<Bytes> {
        write_info_request(self.xdr()?, operation, handle, items, buffer_length)?;
        Ok(self.call().await?.data)
    }

    pub(crate) fn take_warnings(&mut self) -> (Vec<StatusVector>, Option<WarningCallback>) {
        (std::mem::take(&mut self.warnings), self.warning_callback.clone())
    }

    // -------------------------------------------------------------------------
    // Handshake
    // -------------------------------------------------------------------------

    /// `op_connect` and the accept family
    async fn connect_request(&mut self, config: &Config, auth: &mut AuthNegotiator) -> Result<()> {
        let crypt_key = config.crypt_key.clone().unwrap_or_default();
        let xdr = self.xdr()?;
        write_connect(xdr, &config.database, &auth.user_identification())?;
        xdr.flush().await?;

        let mut operation = xdr.read_operation().await?;
        while operation == op::CRYPT_KEY_CALLBACK {
            let _plugin_data = xdr.read_buffer().await?;
            let size = xdr.read_i32().await?;
            xdr.write_op(op::CRYPT_KEY_CALLBACK)?;
            xdr.write_buffer(&crypt_key)?;
            xdr.write_i32(size)?;
            xdr.flush().await?;
            operation = xdr.read_operation().await?;
        }

        match operation {
            op::ACCEPT | op::COND_ACCEPT | op::ACCEPT_DATA => {}
            op::RESPONSE => {
                let response = read_generic_body(xdr).await?;
                self.check(response.status)?;
                return Err(Error::ConnectionRejected);
            }
            _ => return Err(Error::ConnectionRejected),
        }

        let reply = read_accept(self.xdr()?, operation).await?;
        self.capabilities = Capabilities::from_accept(reply.version, reply.architecture, reply.packet_type);
        tracing::debug!(
            version = self.capabilities.version_number(),
            packet_type = self.capabilities.packet_type,
            "protocol accepted"
        );

        if let Some(accept) = &reply.auth {
            auth.start(&accept.data, &accept.plugin_name, accept.authenticated, &accept.keys)?;
            if reply.is_conditional() {
                loop {
                    self.send_cont_auth(auth).await?;
                    match self.read_cont_auth_reply(auth).await? {
                        Response::ContAuth(cont) => {
                            auth.start(&cont.data, &cont.plugin_name, false, &cont.keys)?;
                        }
                        _ => break,
                    }
                }
                if !auth.server_keys().is_empty() {
                    self.start_wire_crypt(auth).await?;
                }
            }
        }
        self.state = ConnectionState::Connected;
        auth.validate_wire_crypt(self.capabilities.protocol_version)
    }

    /// `op_attach` / `op_create`, continuing authentication as the server asks
    async fn attach(&mut self, config: &Config, auth: &mut AuthNegotiator, create: bool) -> Result<()> {
        let version = self.capabilities.protocol_version;
        let crypt_key = config.crypt_key.clone().unwrap_or_default();
        let dpb = build_dpb(config, auth, version, create)?;
        let xdr = self.xdr()?;
        write_attach(xdr, &config.database, &dpb, create)?;
        xdr.flush().await?;

        let mut response = self.read_response().await?;
        if matches!(response, Response::ContAuth(_)) {
            let mut rounds = 0;
            while let Response::ContAuth(cont) = response {
                rounds += 1;
                tracing::debug!(round = rounds, plugin = %cont.plugin_name, "continuing authentication");
                auth.start(&cont.data, &cont.plugin_name, false, &cont.keys)?;
                self.send_cont_auth(auth).await?;
                response = self.read_cont_auth_reply(auth).await?;
                response = self.answer_crypt_callbacks(response, &crypt_key).await?;
            }
            let generic = response.into_generic()?;
            self.db_handle = generic.handle;
            if !generic.data.is_empty() {
                self.start_wire_crypt(auth).await?;
            }
        } else {
            let response = self.checked(response)?;
            let generic = self.answer_crypt_callbacks(response, &crypt_key).await?.into_generic()?;
            self.db_handle = generic.handle;
            auth.complete(&[]);
        }
        auth.validate_wire_crypt(version)
    }

    async fn send_cont_auth(&mut self, auth: &AuthNegotiator) -> Result<()> {
        let plugin = auth.accepted_plugin().unwrap_or_default();
        let xdr = self.xdr()?;
        xdr.write_op(op::CONT_AUTH)?;
        xdr.write_buffer(auth.cont_auth_data())?;
        xdr.write_string(plugin)?;
        xdr.write_string(plugin)?;
        xdr.write_buffer(auth.server_keys())?;
        xdr.flush().await
    }

    /// Read the reply to `op_cont_auth`; a final `op_response` completes auth
    async fn read_cont_auth_reply(&mut self, auth: &mut AuthNegotiator) -> Result<Response> {
        let response = self.read_response().await?;
        let response = self.checked(response)?;
        match &response {
            Response::ContAuth(_) | Response::CryptKeyCallback(_) => {}
            Response::Generic(generic) => auth.complete(&generic.data),
            other => {
                return Err(Error::UnexpectedOperation {
                    expected: "op_cont_auth",
                    actual: other.operation(),
                })
            }
        }
        Ok(response)
    }

    /// Answer crypt key callbacks until another reply arrives
    async fn answer_crypt_callbacks(&mut self, mut response: Response, key: &[u8]) -> Result<Response> {
        while let Response::CryptKeyCallback(_) = response {
            let xdr = self.xdr()?;
            xdr.write_op(op::CRYPT_KEY_CALLBACK)?;
            xdr.write_buffer(key)?;
            xdr.flush().await?;
            let next = self.read_response().await?;
            response = self.checked(next)?;
        }
        Ok(response)
    }

    /// `op_crypt`; both directions switch to Arc4 before the reply is read
    async fn start_wire_crypt(&mut self, auth: &mut AuthNegotiator) -> Result<()> {
        if !auth.should_start_wire_crypt() {
            return Ok(());
        }
        let Some(key) = auth.session_key().map(<[u8]>::to_vec) else {
            return Ok(());
        };
        let xdr = self.xdr()?;
        xdr.write_op(op::CRYPT)?;
        xdr.write_string(WIRE_CRYPT_PLUGIN)?;
        xdr.write_string(SESSION_KEY_TYPE)?;
        xdr.flush().await?;
        xdr.start_encryption(&key).await?;
        self.read_generic().await?;
        auth.mark_wire_crypt_initialized();
        tracing::debug!(plugin = WIRE_CRYPT_PLUGIN, "wire encryption enabled");
        Ok(())
    }

    /// Best-effort detach after a failed attach
    async fn safely_detach(&mut self) {
        if self.db_handle != 0 {
            let handle = self.db_handle;
            let attempt = async {
                let xdr = self.xdr()?;
                xdr.write_op(op::DETACH)?;
                xdr.write_i32(handle)?;
                self.call().await
            };
            if let Err(e) = attempt.await {
                tracing::debug!(error = %e, "detach after failed attach");
            }
        }
        self.disconnect().await;
    }

    // -------------------------------------------------------------------------
    // Database level requests
    // -------------------------------------------------------------------------

    async fn fetch_server_version(&mut self) -> Result<()> {
        let data = self
            .info(op::INFO_DATABASE, self.db_handle, SERVER_VERSION_ITEMS, crate::constants::buffer_size::DEFAULT_INFO)
            .await?;
        let version = DatabaseInfo::parse(&data)?.server_version;
        tracing::debug!(server_version = %version, "attached");
        self.server_version = Some(version);
        Ok(())
    }

    async fn detach(&mut self) -> Result<()> {
        self.ensure_attached()?;
        if self.open_transactions > 0 {
            return Err(Error::OpenTransactions(self.open_transactions));
        }
        let handle = self.db_handle;
        let xdr = self.xdr()?;
        xdr.write_op(op::DETACH)?;
        xdr.write_i32(handle)?;
        self.call().await?;
        tracing::debug!(handle, "detached");
        self.disconnect().await;
        Ok(())
    }

    async fn drop_database(&mut self) -> Result<()> {
        self.ensure_attached()?;
        let handle = self.db_handle;
        let xdr = self.xdr()?;
        xdr.write_op(op::DROP_DATABASE)?;
        xdr.write_i32(handle)?;
        self.call().await?;
        tracing::debug!(handle, "database dropped");
        self.disconnect().await;
        Ok(())
    }

    /// Say goodbye and drop the channel
    async fn disconnect(&mut self) {
        if let Some(mut xdr) = self.xdr.take() {
            let farewell = async {
                xdr.write_op(op::DISCONNECT)?;
                xdr.flush().await?;
                let sink = xdr.writer().sink();
                let mut sink = sink.lock().await;
                sink.shutdown().await
            };
            if let Err(e) = farewell.await {
                tracing::trace!(error = %e, "disconnect");
            }
        }
        self.state = ConnectionState::Closed;
        self.db_handle = 0;
    }

    async fn ping(&mut self) -> Result<()> {
        self.ensure_attached()?;
        self.xdr()?.write_op(op::PING)?;
        self.call().await.map(|_| ())
    }

    async fn execute_immediate(&mut self, tr_handle: i32, sql: &str) -> Result<()> {
        self.ensure_attached()?;
        let (db_handle, dialect) = (self.db_handle, self.dialect as i32);
        let xdr = self.xdr()?;
        xdr.write_op(op::EXEC_IMMEDIATE)?;
        xdr.write_i32(tr_handle)?;
        xdr.write_i32(db_handle)?;
        xdr.write_i32(dialect)?;
        xdr.write_string(sql)?;
        xdr.write_buffer(&[])?;
        xdr.write_i32(EXEC_IMMEDIATE_BUFFER)?;
        self.call().await.map(|_| ())
    }
}

/// Hand warnings to the callback, or log them
pub(crate) fn deliver_warnings(warnings: Vec<StatusVector>, callback: Option<&WarningCallback>) {
    for warning in warnings {
        match callback {
            Some(callback) => callback(&warning),
            None => tracing::warn!(warning = %warning, "server warning"),
        }
    }
}

// =============================================================================
// Connection
// =============================================================================

/// A connection to a Firebird database
///
/// # Thread Safety
///
/// `Connection` is `Send` and `Sync`, but operations are serialized internally
/// via the session lock. For parallel query execution, use multiple
/// connections.
pub struct Connection {
    session: Arc<Session>,
    closed: AtomicBool,
    id: u32,
}

// Connection ID counter
static CONNECTION_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

impl Connection {
    /// Connect and attach
    ///
    /// # Arguments
    ///
    /// * `connect_string` - `host[/port]:database`
    /// * `username` - Database user
    /// * `password` - Password
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let conn = Connection::connect("localhost/3050:/data/employee.fdb", "SYSDBA", "masterkey").await?;
    /// ```
    pub async fn connect(connect_string: &str, username: &str, password: &str) -> Result<Self> {
        let mut config: Config = connect_string.parse()?;
        config.set_username(username);
        config.set_password(password);
        Self::connect_with_config(config).await
    }

    /// Connect and attach using a [`Config`]
    pub async fn connect_with_config(config: Config) -> Result<Self> {
        let transport = Arc::new(TcpTransport::new().connect_timeout(config.connect_timeout));
        Self::open(config, transport, false).await
    }

    /// Connect and attach over a custom [`Transport`]
    pub async fn connect_with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::open(config, transport, false).await
    }

    /// Create a new database and stay attached to it
    ///
    /// Page size, forced writes and overwrite come from the [`Config`].
    pub async fn create_database(config: Config) -> Result<Self> {
        let transport = Arc::new(TcpTransport::new().connect_timeout(config.connect_timeout));
        Self::open(config, transport, true).await
    }

    /// Create a new database over a custom [`Transport`]
    pub async fn create_database_with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::open(config, transport, true).await
    }

    async fn open(config: Config, transport: Arc<dyn Transport>, create: bool) -> Result<Self> {
        let id = CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(id, target = %config, create, "opening connection");

        let stream = transport.open(&config.host, config.port).await?;
        let mut xdr = XdrStream::new(stream);
        xdr.set_read_timeout(config.read_timeout);

        let mut inner = ConnectionInner::new(xdr, config.dialect);
        let mut auth = AuthNegotiator::new(
            &config.username,
            config.password(),
            config.wire_crypt,
            &config.auth_plugins,
        )?;

        if let Err(e) = inner.connect_request(&config, &mut auth).await {
            inner.disconnect().await;
            return Err(e);
        }
        if let Err(e) = inner.attach(&config, &mut auth, create).await {
            inner.safely_detach().await;
            return Err(e);
        }
        inner.state = ConnectionState::Attached;
        if let Err(e) = inner.fetch_server_version().await {
            inner.safely_detach().await;
            return Err(e);
        }

        let (warnings, _) = inner.take_warnings();
        deliver_warnings(warnings, None);

        Ok(Connection {
            session: Arc::new(Session {
                inner: Mutex::new(inner),
                config,
                transport,
                events: Mutex::new(None),
            }),
            closed: AtomicBool::new(false),
            id,
        })
    }

    pub(crate) fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Get the connection ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Check if the connection is closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Configuration the connection was opened with
    pub fn config(&self) -> &Config {
        &self.session.config
    }

    /// Get the current connection state
    pub async fn state(&self) -> ConnectionState {
        self.session.inner.lock().await.state
    }

    /// Capabilities negotiated with the server
    pub async fn capabilities(&self) -> Capabilities {
        self.session.inner.lock().await.capabilities.clone()
    }

    /// Server version string reported at attach
    pub async fn server_version(&self) -> Option<String> {
        self.session.inner.lock().await.server_version.clone()
    }

    /// Number of transactions begun and not yet finished
    pub async fn open_transaction_count(&self) -> usize {
        self.session.inner.lock().await.open_transactions
    }

    /// Route server warnings to `callback` instead of the log
    ///
    /// The callback runs on the caller's task after the session lock has
    /// been released.
    pub async fn set_warning_callback<F>(&self, callback: F)
    where
        F: Fn(&StatusVector) + Send + Sync + 'static,
    {
        self.session.inner.lock().await.warning_callback = Some(Arc::new(callback));
    }

    /// Send warnings back to the log
    pub async fn clear_warning_callback(&self) {
        self.session.inner.lock().await.warning_callback = None;
    }

    /// Summary of the attached database
    pub async fn database_info(&self) -> Result<DatabaseInfo> {
        let data = self.database_info_items(DATABASE_INFO_ITEMS).await?;
        DatabaseInfo::parse(&data)
    }

    /// Raw `op_info_database` for arbitrary items
    pub async fn database_info_items(&self, items: &[u8]) -> Result<Bytes> {
        let buffer_length = self.session.config.packet_size as i32;
        locked!(&self.session, |inner| {
            match inner.ensure_attached() {
                Ok(()) => {
                    let handle = inner.db_handle;
                    inner.info(op::INFO_DATABASE, handle, items, buffer_length).await
                }
                Err(e) => Err(e),
            }
        })
    }

    /// Round trip to check the connection is alive
    pub async fn ping(&self) -> Result<()> {
        locked!(&self.session, |inner| inner.ping().await)
    }

    /// Start a transaction
    pub async fn begin_transaction(&self, options: TransactionOptions) -> Result<Transaction> {
        Transaction::begin(Arc::clone(&self.session), options).await
    }

    /// A statement handle not yet allocated on the server
    pub fn create_statement(&self) -> Statement {
        Statement::new(Arc::clone(&self.session))
    }

    /// Allocate and prepare a statement
    pub async fn prepare(&self, transaction: &Transaction, sql: &str) -> Result<Statement> {
        let mut statement = self.create_statement();
        statement.allocate().await?;
        statement.prepare(transaction, sql).await?;
        Ok(statement)
    }

    /// Run a statement without preparing it
    pub async fn execute_immediate(&self, transaction: &Transaction, sql: &str) -> Result<()> {
        let tr_handle = transaction.active_handle()?;
        locked!(&self.session, |inner| inner.execute_immediate(tr_handle, sql).await)
    }

    /// Create a new blob for writing
    pub async fn create_blob(&self, transaction: &Transaction, bpb: Option<&ParameterBuffer>) -> Result<Blob> {
        Blob::create(Arc::clone(&self.session), transaction, bpb).await
    }

    /// Open an existing blob for reading
    pub async fn open_blob(&self, transaction: &Transaction, blob_id: i64, bpb: Option<&ParameterBuffer>) -> Result<Blob> {
        Blob::open(Arc::clone(&self.session), transaction, blob_id, bpb).await
    }

    /// Read a whole array slice
    pub async fn get_slice(&self, transaction: &Transaction, array_id: i64, descriptor: &ArrayDescriptor) -> Result<Vec<DbValue>> {
        array::get_slice(&self.session, transaction, array_id, descriptor).await
    }

    /// Write an array slice, returning the id of the stored array
    ///
    /// Pass `0` as `array_id` to create a new array.
    pub async fn put_slice(
        &self,
        transaction: &Transaction,
        array_id: i64,
        descriptor: &ArrayDescriptor,
        values: &[DbValue],
    ) -> Result<i64> {
        array::put_slice(&self.session, transaction, array_id, descriptor, values).await
    }

    /// Register interest in named events
    ///
    /// The first call opens the auxiliary event channel.
    pub async fn queue_events(&self, names: &[&str]) -> Result<EventStream> {
        events::queue_events(&self.session, names).await
    }

    /// Handle for cancelling requests from another task
    pub async fn cancel_handle(&self) -> Result<CancelHandle> {
        let mut inner = self.session.inner.lock().await;
        inner.ensure_attached()?;
        if !inner.capabilities.supports_cancel {
            return Err(Error::FeatureNotSupported(format!(
                "op_cancel needs protocol 12, server accepted {}",
                inner.capabilities.version_number()
            )));
        }
        Ok(CancelHandle {
            sink: inner.xdr()?.writer().sink(),
        })
    }

    /// Detach from the database and close the channel
    ///
    /// Fails with [`Error::OpenTransactions`] while transactions are open.
    pub async fn detach(&self) -> Result<()> {
        let open = self.open_transaction_count().await;
        if open > 0 {
            return Err(Error::OpenTransactions(open));
        }
        if let Some(manager) = self.session.events.lock().await.take() {
            manager.shutdown().await;
        }
        locked!(&self.session, |inner| inner.detach().await)?;
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Drop the attached database and close the channel
    pub async fn drop_database(&self) -> Result<()> {
        if let Some(manager) = self.session.events.lock().await.take() {
            manager.shutdown().await;
        }
        locked!(&self.session, |inner| inner.drop_database().await)?;
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Close the connection
    ///
    /// Detaches when no transaction is open; otherwise the channel is simply
    /// dropped and the server rolls back. Never fails.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        self.session.shutdown().await;
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let session = Arc::clone(&self.session);
            handle.spawn(async move { session.shutdown().await });
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("target", &self.session.config.to_string())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Sends `op_cancel` without waiting for the session lock
///
/// The request goes straight to the channel's write side, so it reaches the
/// server even while another task is blocked reading a reply.
#[derive(Clone)]
pub struct CancelHandle {
    sink: SharedSink,
}

impl CancelHandle {
    /// Send a cancel request of the given kind
    pub async fn cancel(&self, kind: CancelKind) -> Result<()> {
        let mut buf = WriteBuffer::new();
        buf.write_i32(op::CANCEL)?;
        buf.write_i32(kind as i32)?;
        tracing::debug!(?kind, "sending cancel");
        self.sink.lock().await.send(buf.take()).await
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_connection_state_names() {
        assert_eq!(ConnectionState::Attached.as_str(), "attached");
        assert_ne!(ConnectionState::Connected, ConnectionState::Attached);
    }

    #[test]
    fn test_deliver_warnings_to_callback() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: WarningCallback = Arc::new(move |w: &StatusVector| {
            sink.lock().unwrap().push(w.codes());
        });
        let warning = StatusVector::from_code(335544366);
        deliver_warnings(vec![warning.clone(), warning], Some(&callback));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_check_queues_warnings() {
        let (client, _server) = tokio::io::duplex(64);
        let mut inner = ConnectionInner::new(XdrStream::new(Box::new(client)), 3);

        let mut warning = StatusVector::new();
        warning.push_code(crate::constants::arg::WARNING, 335544366);
        assert!(warning.is_warning());
        inner.check(warning).unwrap();

        let err = inner.check(StatusVector::from_code(335544324)).unwrap_err();
        assert_eq!(err.error_code(), Some(335544324));

        let (warnings, callback) = inner.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(callback.is_none());
        assert!(inner.take_warnings().0.is_empty());
    }

    #[tokio::test]
    async fn test_warning_callback_runs_unlocked() {
        let (client, _server) = tokio::io::duplex(64);
        let inner = ConnectionInner::new(XdrStream::new(Box::new(client)), 3);
        let session = Arc::new(Session {
            inner: Mutex::new(inner),
            config: Config::default(),
            transport: Arc::new(TcpTransport::new()),
            events: Mutex::new(None),
        });

        let observed = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        let weak = Arc::downgrade(&session);
        session.inner.lock().await.warning_callback = Some(Arc::new(move |_: &StatusVector| {
            let unlocked = weak
                .upgrade()
                .map(|s| s.inner.try_lock().is_ok())
                .unwrap_or(false);
            sink.lock().unwrap().push(unlocked);
        }));

        let mut warning = StatusVector::new();
        warning.push_code(crate::constants::arg::WARNING, 335544366);
        let result: Result<()> = locked!(&session, |inner| inner.check(warning));
        result.unwrap();
        assert_eq!(*observed.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn test_closed_channel_is_connection_closed() {
        let (client, _server) = tokio::io::duplex(64);
        let mut inner = ConnectionInner::new(XdrStream::new(Box::new(client)), 3);
        inner.disconnect().await;
        assert_eq!(inner.state, ConnectionState::Closed);
        assert!(matches!(inner.xdr(), Err(Error::ConnectionClosed)));
        assert!(matches!(inner.ensure_attached(), Err(Error::ConnectionClosed)));
    }
}
