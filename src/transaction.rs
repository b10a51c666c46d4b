//! Transactions
//!
//! A [`Transaction`] owns one server transaction handle from a successful
//! begin until commit or rollback. The session counts open transactions and
//! refuses to detach while any remain.
//!
//! # Example
//!
//! ```rust,no_run
//! # use firebird_rs::{Connection, Isolation, TransactionOptions};
//! # async fn example(conn: Connection) -> firebird_rs::Result<()> {
//! let options = TransactionOptions::new()
//!     .isolation(Isolation::ReadCommitted { record_version: true })
//!     .read_only()
//!     .no_wait();
//! let mut tx = conn.begin_transaction(options).await?;
//! // ...
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;

use crate::connection::{locked, Session};
use crate::constants::{buffer_size, op, tpb};
use crate::error::{Error, Result};
use crate::messages::{TransactionInfo, TRANSACTION_INFO_ITEMS};
use crate::params::ParameterBuffer;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    /// Table-level locking, fully serializable
    Consistency,
    /// Snapshot
    #[default]
    Concurrency,
    /// Read committed
    ReadCommitted {
        /// Read the latest committed version instead of waiting on uncommitted ones
        record_version: bool,
    },
}

/// Read or write access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Reads and writes
    #[default]
    ReadWrite,
    /// Reads only
    ReadOnly,
}

/// What to do on a lock conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResolution {
    /// Wait for the conflicting transaction, optionally bounded in seconds
    Wait(Option<u32>),
    /// Fail immediately
    NoWait,
}

impl Default for LockResolution {
    fn default() -> Self {
        LockResolution::Wait(None)
    }
}

/// Lock mode for a table reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableLock {
    /// `shared` + `lock_read`
    SharedRead,
    /// `shared` + `lock_write`
    SharedWrite,
    /// `protected` + `lock_read`
    ProtectedRead,
    /// `protected` + `lock_write`
    ProtectedWrite,
}

impl TableLock {
    fn tags(&self) -> (u8, u8) {
        match self {
            TableLock::SharedRead => (tpb::LOCK_READ, tpb::SHARED),
            TableLock::SharedWrite => (tpb::LOCK_WRITE, tpb::SHARED),
            TableLock::ProtectedRead => (tpb::LOCK_READ, tpb::PROTECTED),
            TableLock::ProtectedWrite => (tpb::LOCK_WRITE, tpb::PROTECTED),
        }
    }
}

/// Options used to build the transaction parameter buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Isolation level
    pub isolation: Isolation,
    /// Access mode
    pub access: AccessMode,
    /// Lock conflict resolution
    pub lock_resolution: LockResolution,
    /// Commit automatically after each statement
    pub autocommit: bool,
    /// Skip the undo log
    pub no_auto_undo: bool,
    /// Tables reserved at start
    pub reservations: Vec<(String, TableLock)>,
}

impl TransactionOptions {
    /// Snapshot, read-write, wait
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level
    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Read-only access
    pub fn read_only(mut self) -> Self {
        self.access = AccessMode::ReadOnly;
        self
    }

    /// Fail on lock conflicts instead of waiting
    pub fn no_wait(mut self) -> Self {
        self.lock_resolution = LockResolution::NoWait;
        self
    }

    /// Wait at most `seconds` on lock conflicts
    pub fn lock_timeout(mut self, seconds: u32) -> Self {
        self.lock_resolution = LockResolution::Wait(Some(seconds));
        self
    }

    /// Enable autocommit
    pub fn autocommit(mut self, enabled: bool) -> Self {
        self.autocommit = enabled;
        self
    }

    /// Disable the undo log
    pub fn no_auto_undo(mut self) -> Self {
        self.no_auto_undo = true;
        self
    }

    /// Reserve a table
    pub fn reserve(mut self, table: impl Into<String>, lock: TableLock) -> Self {
        self.reservations.push((table.into(), lock));
        self
    }

    /// Encode as a TPB
    pub fn to_tpb(&self) -> Result<ParameterBuffer> {
        let mut buf = ParameterBuffer::tpb();
        match self.isolation {
            Isolation::Consistency => buf.append_flag(tpb::CONSISTENCY),
            Isolation::Concurrency => buf.append_flag(tpb::CONCURRENCY),
            Isolation::ReadCommitted { record_version } => {
                buf.append_flag(tpb::READ_COMMITTED);
                buf.append_flag(if record_version {
                    tpb::REC_VERSION
                } else {
                    tpb::NO_REC_VERSION
                });
            }
        }
        buf.append_flag(match self.access {
            AccessMode::ReadWrite => tpb::WRITE,
            AccessMode::ReadOnly => tpb::READ,
        });
        match self.lock_resolution {
            LockResolution::Wait(timeout) => {
                buf.append_flag(tpb::WAIT);
                if let Some(seconds) = timeout {
                    let seconds = i32::try_from(seconds)
                        .map_err(|_| Error::DataConversion(format!("lock timeout {} out of range", seconds)))?;
                    buf.append_i32(tpb::LOCK_TIMEOUT, seconds);
                }
            }
            LockResolution::NoWait => buf.append_flag(tpb::NOWAIT),
        }
        if self.autocommit {
            buf.append_flag(tpb::AUTOCOMMIT);
        }
        if self.no_auto_undo {
            buf.append_flag(tpb::NO_AUTO_UNDO);
        }
        for (table, lock) in &self.reservations {
            let (lock_tag, share_tag) = lock.tags();
            buf.append_str(lock_tag, table)?;
            buf.append_flag(share_tag);
        }
        Ok(buf)
    }
}

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Finished, or never started
    NoTransaction,
    /// Started and usable
    Active,
    /// First phase of a two-phase commit done
    Prepared,
}

impl TransactionState {
    /// Name used in errors and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::NoTransaction => "no transaction",
            TransactionState::Active => "active",
            TransactionState::Prepared => "prepared",
        }
    }
}

/// A server transaction
///
/// Dropping an unfinished transaction rolls it back in the background.
pub struct Transaction {
    session: Arc<Session>,
    handle: i32,
    state: TransactionState,
    updates: watch::Sender<TransactionState>,
}

impl Transaction {
    pub(crate) async fn begin(session: Arc<Session>, options: TransactionOptions) -> Result<Self> {
        let tpb = options.to_tpb()?;
        let handle = locked!(&session, |inner| {
            async {
                inner.ensure_attached()?;
                let db_handle = inner.db_handle;
                let xdr = inner.xdr()?;
                xdr.write_op(op::TRANSACTION)?;
                xdr.write_i32(db_handle)?;
                xdr.write_buffer(tpb.as_bytes())?;
                let handle = inner.call().await?.handle;
                inner.open_transactions += 1;
                Ok::<_, Error>(handle)
            }
            .await
        })?;
        tracing::debug!(handle, isolation = ?options.isolation, "transaction started");
        let (updates, _) = watch::channel(TransactionState::Active);
        Ok(Transaction {
            session,
            handle,
            state: TransactionState::Active,
            updates,
        })
    }

    /// Server handle
    pub fn handle(&self) -> i32 {
        self.handle
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Handle of an active transaction, for requests that run inside it
    pub(crate) fn active_handle(&self) -> Result<i32> {
        match self.state {
            TransactionState::Active => Ok(self.handle),
            other => Err(Error::TransactionState {
                operation: "use",
                state: other.as_str(),
            }),
        }
    }

    pub(crate) fn belongs_to(&self, session: &Arc<Session>) -> bool {
        Arc::ptr_eq(&self.session, session)
    }

    /// Receiver told when the transaction finishes
    pub(crate) fn subscribe(&self) -> watch::Receiver<TransactionState> {
        self.updates.subscribe()
    }

    /// Commit and release the handle
    pub async fn commit(&mut self) -> Result<()> {
        self.finish(op::COMMIT, "commit").await
    }

    /// Roll back and release the handle
    pub async fn rollback(&mut self) -> Result<()> {
        self.finish(op::ROLLBACK, "rollback").await
    }

    /// Commit and keep the transaction context open
    pub async fn commit_retaining(&mut self) -> Result<()> {
        self.retain(op::COMMIT_RETAINING, "commit_retaining").await
    }

    /// Roll back and keep the transaction context open
    pub async fn rollback_retaining(&mut self) -> Result<()> {
        self.retain(op::ROLLBACK_RETAINING, "rollback_retaining").await
    }

    /// First phase of a two-phase commit
    ///
    /// With `message`, `op_prepare2` carries it to the server for recovery.
    pub async fn prepare(&mut self, message: Option<&[u8]>) -> Result<()> {
        self.require(TransactionState::Active, "prepare")?;
        let handle = self.handle;
        locked!(&self.session, |inner| {
            async {
                let xdr = inner.xdr()?;
                match message {
                    Some(data) => {
                        xdr.write_op(op::PREPARE2)?;
                        xdr.write_i32(handle)?;
                        xdr.write_buffer(data)?;
                    }
                    None => {
                        xdr.write_op(op::PREPARE)?;
                        xdr.write_i32(handle)?;
                    }
                }
                inner.call().await.map(|_| ())
            }
            .await
        })?;
        self.set_state(TransactionState::Prepared);
        Ok(())
    }

    /// Raw `op_info_transaction` for arbitrary items
    pub async fn info(&self, items: &[u8]) -> Result<Bytes> {
        let handle = self.active_handle()?;
        locked!(&self.session, |inner| {
            inner
                .info(op::INFO_TRANSACTION, handle, items, buffer_size::DEFAULT_INFO)
                .await
        })
    }

    /// Transaction id and the oldest interesting/snapshot/active markers
    pub async fn transaction_info(&self) -> Result<TransactionInfo> {
        let data = self.info(TRANSACTION_INFO_ITEMS).await?;
        TransactionInfo::parse(&data)
    }

    fn require(&self, expected: TransactionState, operation: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(Error::TransactionState {
                operation,
                state: self.state.as_str(),
            });
        }
        Ok(())
    }

    async fn finish(&mut self, operation: i32, name: &'static str) -> Result<()> {
        if self.state == TransactionState::NoTransaction {
            return Err(Error::TransactionState {
                operation: name,
                state: self.state.as_str(),
            });
        }
        let handle = self.handle;
        locked!(&self.session, |inner| {
            async {
                let xdr = inner.xdr()?;
                xdr.write_op(operation)?;
                xdr.write_i32(handle)?;
                inner.call().await?;
                inner.open_transactions = inner.open_transactions.saturating_sub(1);
                Ok::<_, Error>(())
            }
            .await
        })?;
        self.set_state(TransactionState::NoTransaction);
        Ok(())
    }

    async fn retain(&mut self, operation: i32, name: &'static str) -> Result<()> {
        self.require(TransactionState::Active, name)?;
        let handle = self.handle;
        locked!(&self.session, |inner| {
            async {
                let xdr = inner.xdr()?;
                xdr.write_op(operation)?;
                xdr.write_i32(handle)?;
                inner.call().await.map(|_| ())
            }
            .await
        })?;
        tracing::debug!(handle, operation = name, "transaction retained");
        Ok(())
    }

    fn set_state(&mut self, state: TransactionState) {
        tracing::debug!(handle = self.handle, from = self.state.as_str(), to = state.as_str(), "transaction state");
        self.state = state;
        self.updates.send_replace(state);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::NoTransaction {
            return;
        }
        self.updates.send_replace(TransactionState::NoTransaction);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let session = Arc::clone(&self.session);
        let handle = self.handle;
        runtime.spawn(async move {
            let mut inner = session.inner.lock().await;
            let result = async {
                let xdr = inner.xdr()?;
                xdr.write_op(op::ROLLBACK)?;
                xdr.write_i32(handle)?;
                inner.call().await
            }
            .await;
            inner.open_transactions = inner.open_transactions.saturating_sub(1);
            if let Err(e) = result {
                tracing::warn!(handle, error = %e, "rollback of dropped transaction failed");
            }
        });
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .finish()
    }
}
