//! Synchronous API
//!
//! Thin wrappers that drive the async types on a private tokio runtime.
//! Each call blocks the calling thread for one request/response round trip;
//! the framing and state machines are the async ones, unchanged.
//!
//! Do not call these from inside an async context: `block_on` panics there.
//!
//! ```rust,no_run
//! use firebird_rs::blocking::Connection;
//! use firebird_rs::TransactionOptions;
//!
//! let conn = Connection::connect("localhost:employee", "SYSDBA", "masterkey")?;
//! let mut tx = conn.begin_transaction(TransactionOptions::default())?;
//! let mut stmt = conn.prepare(&tx, "SELECT COUNT(*) FROM employee")?;
//! stmt.execute(&tx, &[])?;
//! let row = stmt.fetch()?;
//! tx.commit()?;
//! conn.close()?;
//! # Ok::<(), firebird_rs::Error>(())
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Runtime;

use crate::array::ArrayDescriptor;
use crate::blob::SeekMode;
use crate::config::Config;
use crate::constants::FreeOption;
use crate::descriptor::Descriptor;
use crate::error::{Error, Result};
use crate::messages::DatabaseInfo;
use crate::params::ParameterBuffer;
use crate::status::StatusVector;
use crate::transaction::{TransactionOptions, TransactionState};
use crate::transport::Transport;
use crate::value::{DbValue, Row};

fn runtime() -> Result<Arc<Runtime>> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("firebird-blocking")
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(Error::Io)
}

/// Blocking connection
pub struct Connection {
    runtime: Arc<Runtime>,
    inner: crate::Connection,
}

impl Connection {
    /// Connect using a `host[/port]:database` string
    pub fn connect(connect_string: &str, username: &str, password: &str) -> Result<Self> {
        let runtime = runtime()?;
        let inner = runtime.block_on(crate::Connection::connect(connect_string, username, password))?;
        Ok(Self { runtime, inner })
    }

    /// Connect with a full configuration
    pub fn connect_with_config(config: Config) -> Result<Self> {
        let runtime = runtime()?;
        let inner = runtime.block_on(crate::Connection::connect_with_config(config))?;
        Ok(Self { runtime, inner })
    }

    /// Connect over a custom [`Transport`]
    pub fn connect_with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let runtime = runtime()?;
        let inner = runtime.block_on(crate::Connection::connect_with_transport(config, transport))?;
        Ok(Self { runtime, inner })
    }

    /// Create a database and attach to it
    pub fn create_database(config: Config) -> Result<Self> {
        let runtime = runtime()?;
        let inner = runtime.block_on(crate::Connection::create_database(config))?;
        Ok(Self { runtime, inner })
    }

    /// The underlying async connection
    pub fn as_async(&self) -> &crate::Connection {
        &self.inner
    }

    /// Server version string
    pub fn server_version(&self) -> Option<String> {
        self.runtime.block_on(self.inner.server_version())
    }

    /// Database information
    pub fn database_info(&self) -> Result<DatabaseInfo> {
        self.runtime.block_on(self.inner.database_info())
    }

    /// Round trip to check the connection
    pub fn ping(&self) -> Result<()> {
        self.runtime.block_on(self.inner.ping())
    }

    /// Number of transactions not yet finished
    pub fn open_transaction_count(&self) -> usize {
        self.runtime.block_on(self.inner.open_transaction_count())
    }

    /// Install a warning callback
    pub fn set_warning_callback<F>(&self, callback: F)
    where
        F: Fn(&StatusVector) + Send + Sync + 'static,
    {
        self.runtime.block_on(self.inner.set_warning_callback(callback))
    }

    /// Start a transaction
    pub fn begin_transaction(&self, options: TransactionOptions) -> Result<Transaction> {
        let inner = self.runtime.block_on(self.inner.begin_transaction(options))?;
        Ok(Transaction {
            runtime: Arc::clone(&self.runtime),
            inner: Some(inner),
        })
    }

    /// Allocate and prepare a statement
    pub fn prepare(&self, transaction: &Transaction, sql: &str) -> Result<Statement> {
        let inner = self.runtime.block_on(self.inner.prepare(transaction.get()?, sql))?;
        Ok(Statement {
            runtime: Arc::clone(&self.runtime),
            inner: Some(inner),
        })
    }

    /// Run a statement with no parameters and no result set
    pub fn execute_immediate(&self, transaction: &Transaction, sql: &str) -> Result<()> {
        self.runtime
            .block_on(self.inner.execute_immediate(transaction.get()?, sql))
    }

    /// Create a blob for writing
    pub fn create_blob(&self, transaction: &Transaction, bpb: Option<&ParameterBuffer>) -> Result<Blob> {
        let inner = self
            .runtime
            .block_on(self.inner.create_blob(transaction.get()?, bpb))?;
        Ok(Blob {
            runtime: Arc::clone(&self.runtime),
            inner: Some(inner),
        })
    }

    /// Open a blob for reading
    pub fn open_blob(&self, transaction: &Transaction, blob_id: i64, bpb: Option<&ParameterBuffer>) -> Result<Blob> {
        let inner = self
            .runtime
            .block_on(self.inner.open_blob(transaction.get()?, blob_id, bpb))?;
        Ok(Blob {
            runtime: Arc::clone(&self.runtime),
            inner: Some(inner),
        })
    }

    /// Read a whole array
    pub fn get_slice(&self, transaction: &Transaction, array_id: i64, descriptor: &ArrayDescriptor) -> Result<Vec<DbValue>> {
        self.runtime
            .block_on(self.inner.get_slice(transaction.get()?, array_id, descriptor))
    }

    /// Write a whole array, returning its id
    pub fn put_slice(
        &self,
        transaction: &Transaction,
        array_id: i64,
        descriptor: &ArrayDescriptor,
        values: &[DbValue],
    ) -> Result<i64> {
        self.runtime
            .block_on(self.inner.put_slice(transaction.get()?, array_id, descriptor, values))
    }

    /// Detach; fails while transactions are open
    pub fn detach(&self) -> Result<()> {
        self.runtime.block_on(self.inner.detach())
    }

    /// Drop the attached database
    pub fn drop_database(&self) -> Result<()> {
        self.runtime.block_on(self.inner.drop_database())
    }

    /// Close the connection
    pub fn close(&self) -> Result<()> {
        self.runtime.block_on(self.inner.close())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.inner.is_closed() {
            let _ = self.runtime.block_on(self.inner.close());
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Connection").field(&self.inner).finish()
    }
}

/// Blocking transaction
pub struct Transaction {
    runtime: Arc<Runtime>,
    inner: Option<crate::Transaction>,
}

impl Transaction {
    fn get(&self) -> Result<&crate::Transaction> {
        self.inner.as_ref().ok_or(Error::TransactionState {
            operation: "use",
            state: TransactionState::NoTransaction.as_str(),
        })
    }

    fn get_mut(&mut self) -> Result<&mut crate::Transaction> {
        self.inner.as_mut().ok_or(Error::TransactionState {
            operation: "use",
            state: TransactionState::NoTransaction.as_str(),
        })
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        self.inner
            .as_ref()
            .map(crate::Transaction::state)
            .unwrap_or(TransactionState::NoTransaction)
    }

    /// Commit
    pub fn commit(&mut self) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.get_mut()?.commit())
    }

    /// Roll back
    pub fn rollback(&mut self) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.get_mut()?.rollback())
    }

    /// Commit and keep the transaction context
    pub fn commit_retaining(&mut self) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.get_mut()?.commit_retaining())
    }

    /// Roll back and keep the transaction context
    pub fn rollback_retaining(&mut self) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.get_mut()?.rollback_retaining())
    }

    /// First phase of a two-phase commit
    pub fn prepare(&mut self, message: Option<&[u8]>) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.get_mut()?.prepare(message))
    }

    /// Raw transaction information
    pub fn info(&self, items: &[u8]) -> Result<Bytes> {
        self.runtime.block_on(self.get()?.info(items))
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // the async drop spawns its rollback on this runtime
        let _guard = self.runtime.enter();
        self.inner.take();
    }
}

/// Blocking statement
pub struct Statement {
    runtime: Arc<Runtime>,
    inner: Option<crate::Statement>,
}

impl Statement {
    fn get_mut(&mut self) -> Result<&mut crate::Statement> {
        self.inner.as_mut().ok_or(Error::StatementState {
            operation: "use",
            state: "deallocated",
        })
    }

    /// The underlying async statement
    pub fn as_async(&self) -> Option<&crate::Statement> {
        self.inner.as_ref()
    }

    /// Output field metadata
    pub fn fields(&self) -> Option<&Descriptor> {
        self.inner.as_ref().map(crate::Statement::fields)
    }

    /// Rows changed by the last execute, -1 when unknown
    pub fn records_affected(&self) -> i64 {
        self.inner
            .as_ref()
            .map(crate::Statement::records_affected)
            .unwrap_or(-1)
    }

    /// Rows requested per fetch round trip
    pub fn set_fetch_size(&mut self, size: u32) -> Result<()> {
        self.get_mut()?.set_fetch_size(size);
        Ok(())
    }

    /// Prepare new SQL text on this statement
    pub fn prepare(&mut self, transaction: &Transaction, sql: &str) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        let tx = transaction.get()?;
        runtime.block_on(self.get_mut()?.prepare(tx, sql))
    }

    /// Execute with `params`
    pub fn execute(&mut self, transaction: &Transaction, params: &[DbValue]) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        let tx = transaction.get()?;
        runtime.block_on(self.get_mut()?.execute(tx, params))
    }

    /// Next row, or `None` at the end of the result set
    pub fn fetch(&mut self) -> Result<Option<Row>> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.get_mut()?.fetch())
    }

    /// All remaining rows
    pub fn fetch_all(&mut self) -> Result<Vec<Row>> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.get_mut()?.fetch_all())
    }

    /// Close the cursor or release the statement
    pub fn free(&mut self, option: FreeOption) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.get_mut()?.free(option))
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        let _guard = self.runtime.enter();
        self.inner.take();
    }
}

/// Blocking blob
pub struct Blob {
    runtime: Arc<Runtime>,
    inner: Option<crate::Blob>,
}

impl Blob {
    fn get_mut(&mut self) -> Result<&mut crate::Blob> {
        self.inner.as_mut().ok_or(Error::BlobState {
            operation: "use",
            state: "closed",
        })
    }

    /// Persistent blob id
    pub fn id(&self) -> i64 {
        self.inner.as_ref().map(crate::Blob::id).unwrap_or(0)
    }

    /// True once the end of the stream was reached
    pub fn is_eof(&self) -> bool {
        self.inner.as_ref().map(crate::Blob::is_eof).unwrap_or(true)
    }

    /// Read the next chunk
    pub fn get_segment(&mut self, max_length: usize) -> Result<Bytes> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.get_mut()?.get_segment(max_length))
    }

    /// Write one segment
    pub fn put_segment(&mut self, data: &[u8]) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.get_mut()?.put_segment(data))
    }

    /// Read to the end
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.get_mut()?.read_all())
    }

    /// Write `data` in maximum-size segments
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.get_mut()?.write_all(data))
    }

    /// Move the read position
    pub fn seek(&mut self, mode: SeekMode, offset: i32) -> Result<i32> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.get_mut()?.seek(mode, offset))
    }

    /// Finish the blob
    pub fn close(&mut self) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.get_mut()?.close())
    }

    /// Discard the blob
    pub fn cancel(&mut self) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.get_mut()?.cancel())
    }
}

impl Drop for Blob {
    fn drop(&mut self) {
        let _guard = self.runtime.enter();
        self.inner.take();
    }
}
