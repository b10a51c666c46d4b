//! Prepared statements
//!
//! A [`Statement`] owns one server statement handle and walks the state
//! machine
//!
//! ```text
//! Deallocated -> Allocated -> Prepared -> Executed -> Closed
//! ```
//!
//! with `Error` reachable from any state when the channel fails. Prepare
//! collects both descriptors, following truncated describe replies until
//! every field is filled in. Fetch pulls rows in batches of the configured
//! fetch size and hands them out one at a time.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;

use crate::buffer::WriteBuffer;
use crate::connection::{locked, ConnectionInner, Session};
use crate::constants::{buffer_size, op, FreeOption, StatementType, FETCH_NO_MORE_ROWS};
use crate::descriptor::{
    parse_sql_info, DescribeOutcome, Descriptor, BIND_ITEMS, DESCRIBE_ITEMS, SELECT_ITEMS,
};
use crate::error::{Error, Result};
use crate::messages::{
    parse_records_affected, parse_statement_type, Response, RECORDS_ITEMS, STATEMENT_TYPE_ITEMS,
};
use crate::transaction::{Transaction, TransactionState};
use crate::value::{encode_params, read_row, DbValue, Row};

/// Statement lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    /// No server handle
    Deallocated,
    /// Handle allocated, nothing prepared
    Allocated,
    /// SQL prepared and described
    Prepared,
    /// Executed; a select has an open cursor
    Executed,
    /// Cursor closed, statement still prepared
    Closed,
    /// The channel failed mid-operation; only `free` is accepted
    Error,
}

impl StatementState {
    /// Name used in errors and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementState::Deallocated => "deallocated",
            StatementState::Allocated => "allocated",
            StatementState::Prepared => "prepared",
            StatementState::Executed => "executed",
            StatementState::Closed => "closed",
            StatementState::Error => "error",
        }
    }
}

/// A prepared SQL statement
pub struct Statement {
    session: Arc<Session>,
    handle: i32,
    state: StatementState,
    statement_type: StatementType,
    sql: String,
    fields: Descriptor,
    parameters: Descriptor,
    column_names: Arc<[String]>,
    rows: VecDeque<Row>,
    all_rows_fetched: bool,
    output_parameters: Option<Row>,
    records_affected: i64,
    fetch_size: u32,
    transaction: Option<watch::Receiver<TransactionState>>,
    tr_handle: i32,
}

impl Statement {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        let fetch_size = session.config.fetch_size;
        Self {
            session,
            handle: 0,
            state: StatementState::Deallocated,
            statement_type: StatementType::Unknown,
            sql: String::new(),
            fields: Descriptor::default(),
            parameters: Descriptor::default(),
            column_names: Arc::from(Vec::<String>::new()),
            rows: VecDeque::new(),
            all_rows_fetched: false,
            output_parameters: None,
            records_affected: -1,
            fetch_size,
            transaction: None,
            tr_handle: 0,
        }
    }

    /// Server handle, zero while deallocated
    pub fn handle(&self) -> i32 {
        self.handle
    }

    /// Current state
    pub fn state(&self) -> StatementState {
        self.state
    }

    /// Statement kind reported at prepare
    pub fn statement_type(&self) -> StatementType {
        self.statement_type
    }

    /// SQL text of the last prepare
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Output fields
    pub fn fields(&self) -> &Descriptor {
        &self.fields
    }

    /// Input parameters
    pub fn parameters(&self) -> &Descriptor {
        &self.parameters
    }

    /// Singleton output of an executed procedure
    pub fn output_parameters(&self) -> Option<&Row> {
        self.output_parameters.as_ref()
    }

    /// Rows changed by the last execute, or -1 when not known
    ///
    /// Only counted for DML and procedure calls, and only while
    /// `Config::records_affected` is on.
    pub fn records_affected(&self) -> i64 {
        self.records_affected
    }

    /// Rows requested per `op_fetch`
    pub fn fetch_size(&self) -> u32 {
        self.fetch_size
    }

    /// Change the number of rows requested per `op_fetch`
    pub fn set_fetch_size(&mut self, size: u32) {
        self.fetch_size = size.max(1);
    }

    fn require(&self, operation: &'static str, allowed: &[StatementState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::StatementState {
                operation,
                state: self.state.as_str(),
            })
        }
    }

    fn set_state(&mut self, state: StatementState) {
        if self.state != state {
            tracing::debug!(handle = self.handle, from = self.state.as_str(), to = state.as_str(), "statement state");
            self.state = state;
        }
    }

    /// Move to `Error` when the failure left the channel in an unknown state
    fn fail(&mut self, error: Error) -> Error {
        let broken = error.is_network_error()
            || matches!(
                error,
                Error::Protocol(_) | Error::UnexpectedOperation { .. } | Error::BufferUnderflow { .. }
            );
        if broken {
            self.set_state(StatementState::Error);
        }
        error
    }

    /// Close the cursor when the bound transaction has finished
    fn sync_with_transaction(&mut self) {
        let finished = self
            .transaction
            .as_ref()
            .map(|rx| *rx.borrow() == TransactionState::NoTransaction)
            .unwrap_or(false);
        if finished {
            self.transaction = None;
            self.rows.clear();
            self.all_rows_fetched = false;
            if self.state == StatementState::Executed {
                self.set_state(StatementState::Closed);
            }
        }
    }

    /// `op_allocate_statement`
    pub async fn allocate(&mut self) -> Result<()> {
        self.require("allocate", &[StatementState::Deallocated])?;
        let result = locked!(&self.session, |inner| {
            async {
                inner.ensure_attached()?;
                let db_handle = inner.db_handle;
                let xdr = inner.xdr()?;
                xdr.write_op(op::ALLOCATE_STATEMENT)?;
                xdr.write_i32(db_handle)?;
                inner.call().await.map(|r| r.handle)
            }
            .await
        });
        match result {
            Ok(handle) => {
                self.handle = handle;
                self.set_state(StatementState::Allocated);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Prepare `sql` within `transaction` and describe it
    pub async fn prepare(&mut self, transaction: &Transaction, sql: &str) -> Result<()> {
        self.sync_with_transaction();
        self.require(
            "prepare",
            &[StatementState::Allocated, StatementState::Prepared, StatementState::Closed],
        )?;
        let tr_handle = transaction.active_handle()?;
        let handle = self.handle;
        let result = locked!(&self.session, |inner| {
            async {
                let dialect = inner.dialect as i32;
                let xdr = inner.xdr()?;
                xdr.write_op(op::PREPARE_STATEMENT)?;
                xdr.write_i32(tr_handle)?;
                xdr.write_i32(handle)?;
                xdr.write_i32(dialect)?;
                xdr.write_string(sql)?;
                xdr.write_buffer(&DESCRIBE_ITEMS)?;
                xdr.write_i32(buffer_size::PREPARE_INFO)?;
                let data = inner.call().await?.data;
                let descriptors = describe_loop(inner, handle, &DESCRIBE_ITEMS, data, 2).await?;

                let data = inner
                    .info(op::INFO_SQL, handle, STATEMENT_TYPE_ITEMS, buffer_size::STATEMENT_TYPE)
                    .await?;
                let statement_type = parse_statement_type(&data)?;
                Ok::<_, Error>((descriptors, statement_type))
            }
            .await
        });
        let (mut descriptors, statement_type) = result.map_err(|e| self.fail(e))?;

        self.parameters = descriptors.pop().unwrap_or_default();
        self.fields = descriptors.pop().unwrap_or_default();
        self.column_names = Arc::from(self.fields.names());
        self.statement_type = statement_type;
        self.sql = sql.to_string();
        self.rows.clear();
        self.output_parameters = None;
        self.records_affected = -1;
        self.all_rows_fetched = false;
        tracing::debug!(
            handle,
            statement_type = ?statement_type,
            fields = self.fields.len(),
            parameters = self.parameters.len(),
            "statement prepared"
        );
        self.set_state(StatementState::Prepared);
        Ok(())
    }

    /// Fetch the output descriptor again
    pub async fn describe(&mut self) -> Result<&Descriptor> {
        let fields = self.describe_part("describe", &SELECT_ITEMS).await?;
        self.column_names = Arc::from(fields.names());
        self.fields = fields;
        Ok(&self.fields)
    }

    /// Fetch the input descriptor again
    pub async fn describe_parameters(&mut self) -> Result<&Descriptor> {
        self.parameters = self.describe_part("describe_parameters", &BIND_ITEMS).await?;
        Ok(&self.parameters)
    }

    async fn describe_part(&mut self, operation: &'static str, items: &[u8]) -> Result<Descriptor> {
        self.require(
            operation,
            &[StatementState::Prepared, StatementState::Executed, StatementState::Closed],
        )?;
        let handle = self.handle;
        let result = locked!(&self.session, |inner| {
            async {
                let data = inner
                    .info(op::INFO_SQL, handle, items, buffer_size::PREPARE_INFO)
                    .await?;
                describe_loop(inner, handle, items, data, 1).await
            }
            .await
        });
        let mut descriptors = result.map_err(|e| self.fail(e))?;
        Ok(descriptors.pop().unwrap_or_default())
    }

    /// Execute with `params` in `transaction`
    ///
    /// A select opens a cursor read with [`fetch`](Self::fetch); a procedure
    /// call leaves its output row in
    /// [`output_parameters`](Self::output_parameters).
    pub async fn execute(&mut self, transaction: &Transaction, params: &[DbValue]) -> Result<()> {
        self.sync_with_transaction();
        if self.state == StatementState::Executed && self.statement_type.returns_rows() {
            return Err(Error::StatementState {
                operation: "execute with an open cursor",
                state: self.state.as_str(),
            });
        }
        self.require(
            "execute",
            &[StatementState::Prepared, StatementState::Executed, StatementState::Closed],
        )?;
        if !transaction.belongs_to(&self.session) {
            return Err(Error::TransactionState {
                operation: "execute",
                state: "owned by another connection",
            });
        }
        let tr_handle = transaction.active_handle()?;
        let handle = self.handle;
        let statement_type = self.statement_type;
        let count_records = self.session.config.records_affected && statement_type.affects_rows();

        let input_blr = if self.parameters.is_empty() {
            Vec::new()
        } else {
            self.parameters.to_blr()?
        };
        let output_blr = if statement_type == StatementType::StoredProcedure {
            Some(self.fields.to_blr()?)
        } else {
            None
        };

        self.rows.clear();
        self.output_parameters = None;
        self.records_affected = -1;
        self.all_rows_fetched = false;

        let fields = &self.fields;
        let parameters = &self.parameters;
        let result = locked!(&self.session, |inner| {
            async {
                let format = inner.capabilities.null_format;
                let mut message = WriteBuffer::new();
                if !parameters.is_empty() {
                    encode_params(&mut message, parameters, params, format)?;
                }

                let xdr = inner.xdr()?;
                xdr.write_op(if output_blr.is_some() { op::EXECUTE2 } else { op::EXECUTE })?;
                xdr.write_i32(handle)?;
                xdr.write_i32(tr_handle)?;
                if parameters.is_empty() {
                    xdr.write_buffer(&[])?;
                    xdr.write_i32(0)?;
                    xdr.write_i32(0)?;
                } else {
                    xdr.write_buffer(&input_blr)?;
                    xdr.write_i32(0)?;
                    xdr.write_i32(1)?;
                    xdr.write_bytes(message.as_slice())?;
                }
                if let Some(blr) = &output_blr {
                    xdr.write_buffer(blr)?;
                    xdr.write_i32(0)?;
                }
                xdr.flush().await?;

                let mut output = None;
                if output_blr.is_some() {
                    let response = inner.read_response().await?;
                    match inner.checked(response)? {
                        Response::Sql(sql) => {
                            if sql.count > 0 {
                                output = Some(read_row(inner.xdr()?, fields, format).await?);
                            }
                        }
                        other => {
                            return Err(Error::UnexpectedOperation {
                                expected: "op_sql_response",
                                actual: other.operation(),
                            })
                        }
                    }
                }
                inner.read_generic().await?;

                let records = if count_records {
                    let data = inner
                        .info(op::INFO_SQL, handle, RECORDS_ITEMS, buffer_size::ROWS_AFFECTED)
                        .await?;
                    parse_records_affected(&data)?
                } else {
                    -1
                };
                Ok::<_, Error>((output, records))
            }
            .await
        });
        let (output, records) = result.map_err(|e| self.fail(e))?;

        self.output_parameters = output.map(|values| Row::with_names(values, Arc::clone(&self.column_names)));
        self.records_affected = records;
        self.tr_handle = tr_handle;
        self.transaction = Some(transaction.subscribe());
        tracing::trace!(handle, records, "statement executed");
        self.set_state(StatementState::Executed);
        Ok(())
    }

    /// Next row, or `None` once the cursor is exhausted
    ///
    /// Statements that return no result set yield `None` straight away; a
    /// procedure call yields its output row once.
    pub async fn fetch(&mut self) -> Result<Option<Row>> {
        self.sync_with_transaction();
        self.require("fetch", &[StatementState::Executed])?;

        if self.statement_type == StatementType::StoredProcedure {
            if self.all_rows_fetched {
                return Ok(None);
            }
            self.all_rows_fetched = true;
            return Ok(self.output_parameters.clone());
        }
        if !self.statement_type.returns_rows() {
            return Ok(None);
        }

        if self.rows.is_empty() && !self.all_rows_fetched {
            self.fetch_batch().await?;
        }
        Ok(self.rows.pop_front())
    }

    /// Fetch all remaining rows
    pub async fn fetch_all(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn fetch_batch(&mut self) -> Result<()> {
        let handle = self.handle;
        let fetch_size = self.fetch_size.min(i32::MAX as u32) as i32;
        let blr = self.fields.to_blr()?;
        let fields = &self.fields;
        let result = locked!(&self.session, |inner| {
            async {
                let format = inner.capabilities.null_format;
                let xdr = inner.xdr()?;
                xdr.write_op(op::FETCH)?;
                xdr.write_i32(handle)?;
                xdr.write_buffer(&blr)?;
                xdr.write_i32(0)?;
                xdr.write_i32(fetch_size)?;
                xdr.flush().await?;

                let mut batch = Vec::new();
                let mut exhausted = false;
                loop {
                    let response = inner.read_response().await?;
                    match inner.checked(response)? {
                        Response::Fetch(fetch) if fetch.status == 0 && fetch.count > 0 => {
                            batch.push(read_row(inner.xdr()?, fields, format).await?);
                        }
                        Response::Fetch(fetch) => {
                            exhausted = fetch.status == FETCH_NO_MORE_ROWS;
                            break;
                        }
                        other => {
                            return Err(Error::UnexpectedOperation {
                                expected: "op_fetch_response",
                                actual: other.operation(),
                            })
                        }
                    }
                }
                Ok::<_, Error>((batch, exhausted))
            }
            .await
        });
        let (batch, exhausted) = result.map_err(|e| self.fail(e))?;
        tracing::trace!(handle, rows = batch.len(), exhausted, "fetched batch");
        let names = &self.column_names;
        self.rows
            .extend(batch.into_iter().map(|values| Row::with_names(values, Arc::clone(names))));
        self.all_rows_fetched = exhausted;
        Ok(())
    }

    /// Close the cursor or drop the statement
    ///
    /// `Close` keeps the prepared statement; `Drop` releases the handle and
    /// both descriptors. Freeing a deallocated statement does nothing.
    pub async fn free(&mut self, option: FreeOption) -> Result<()> {
        if self.state == StatementState::Deallocated {
            return Ok(());
        }
        self.rows.clear();
        self.all_rows_fetched = false;
        self.transaction = None;

        match option {
            FreeOption::Close => {
                let cursor_open =
                    self.state == StatementState::Executed && self.statement_type.returns_rows();
                if cursor_open {
                    self.send_free(option).await.map_err(|e| self.fail(e))?;
                }
                if self.state == StatementState::Executed {
                    self.set_state(StatementState::Closed);
                }
                Ok(())
            }
            FreeOption::Drop => {
                let result = self.send_free(option).await;
                self.handle = 0;
                self.fields = Descriptor::default();
                self.parameters = Descriptor::default();
                self.column_names = Arc::from(Vec::<String>::new());
                self.output_parameters = None;
                self.statement_type = StatementType::Unknown;
                self.set_state(StatementState::Deallocated);
                result
            }
        }
    }

    async fn send_free(&self, option: FreeOption) -> Result<()> {
        let handle = self.handle;
        locked!(&self.session, |inner| {
            async {
                let xdr = inner.xdr()?;
                xdr.write_op(op::FREE_STATEMENT)?;
                xdr.write_i32(handle)?;
                xdr.write_i32(option as i32)?;
                inner.call().await.map(|_| ())
            }
            .await
        })
    }

    /// Raw `op_info_sql` for arbitrary items
    pub async fn info(&self, items: &[u8], buffer_length: i32) -> Result<Bytes> {
        self.require(
            "info",
            &[
                StatementState::Allocated,
                StatementState::Prepared,
                StatementState::Executed,
                StatementState::Closed,
            ],
        )?;
        let handle = self.handle;
        locked!(&self.session, |inner| {
            inner.info(op::INFO_SQL, handle, items, buffer_length).await
        })
    }
}

/// Follow truncated describe replies until every descriptor is complete
async fn describe_loop(
    inner: &mut ConnectionInner,
    handle: i32,
    items: &[u8],
    first: Bytes,
    parts: usize,
) -> Result<Vec<Descriptor>> {
    let mut descriptors: Vec<Option<Descriptor>> = vec![None; parts];
    let mut data = first;
    let mut requested = items.to_vec();
    loop {
        match parse_sql_info(&data, items, &mut descriptors)? {
            DescribeOutcome::Complete => break,
            DescribeOutcome::Truncated(next) => {
                if next == requested {
                    return Err(Error::Protocol("describe information did not advance".to_string()));
                }
                tracing::trace!(handle, "describe truncated, resuming");
                data = inner
                    .info(op::INFO_SQL, handle, &next, buffer_size::PREPARE_INFO)
                    .await?;
                requested = next;
            }
        }
    }

    let mut out = Vec::with_capacity(parts);
    for descriptor in descriptors {
        let descriptor = descriptor.unwrap_or_default();
        if let Some(index) = descriptor.iter().position(|f| f.data_type == 0) {
            return Err(Error::Protocol(format!("describe left field {} empty", index + 1)));
        }
        out.push(descriptor);
    }
    Ok(out)
}

impl Drop for Statement {
    fn drop(&mut self) {
        if self.state == StatementState::Deallocated {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let session = Arc::clone(&self.session);
        let handle = self.handle;
        runtime.spawn(async move {
            let mut inner = session.inner.lock().await;
            let result = async {
                let xdr = inner.xdr()?;
                xdr.write_op(op::FREE_STATEMENT)?;
                xdr.write_i32(handle)?;
                xdr.write_i32(FreeOption::Drop as i32)?;
                inner.call().await
            }
            .await;
            if let Err(e) = result {
                tracing::debug!(handle, error = %e, "free of dropped statement failed");
            }
        });
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("statement_type", &self.statement_type)
            .field("sql", &self.sql)
            .finish()
    }
}
