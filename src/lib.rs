#![warn(missing_docs)]

//! # firebird-rs
//!
//! A pure Rust client for Firebird and InterBase servers, speaking the GDS
//! remote wire protocol directly. No fbclient library is required.
//!
//! ## Features
//!
//! - **Async/await** - Built on Tokio; a [`blocking`] facade drives the same code synchronously
//! - **Protocol 10 to 13** - Including continued authentication and the null bitmap row format
//! - **Srp / Srp256 authentication** - With Arc4 wire encryption
//! - **Blobs and arrays** - Segmented and stream blobs, whole-array slices
//! - **Events** - Server notifications delivered over a channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use firebird_rs::{Connection, DbValue, FreeOption, TransactionOptions};
//!
//! #[tokio::main]
//! async fn main() -> firebird_rs::Result<()> {
//!     let conn = Connection::connect("localhost:/data/employee.fdb", "SYSDBA", "masterkey").await?;
//!
//!     let mut tx = conn.begin_transaction(TransactionOptions::default()).await?;
//!     let mut stmt = conn
//!         .prepare(&tx, "SELECT emp_no, first_name FROM employee WHERE dept_no = ?")
//!         .await?;
//!     stmt.execute(&tx, &[DbValue::Text("600".into())]).await?;
//!     while let Some(row) = stmt.fetch().await? {
//!         println!("{:?} {:?}", row.get_i64(0), row.get_string(1));
//!     }
//!     stmt.free(FreeOption::Drop).await?;
//!     tx.commit().await?;
//!
//!     conn.detach().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Transactions
//!
//! Every statement runs inside an explicit [`Transaction`]. Options map onto
//! the transaction parameter buffer:
//!
//! ```rust,no_run
//! use firebird_rs::{Connection, Isolation, TransactionOptions};
//!
//! # async fn example(conn: Connection) -> firebird_rs::Result<()> {
//! let options = TransactionOptions::new()
//!     .isolation(Isolation::ReadCommitted { record_version: true })
//!     .lock_timeout(5);
//! let mut tx = conn.begin_transaction(options).await?;
//! conn.execute_immediate(&tx, "UPDATE accounts SET balance = 0 WHERE id = 1").await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Events
//!
//! ```rust,no_run
//! use firebird_rs::Connection;
//!
//! # async fn example(conn: Connection) -> firebird_rs::Result<()> {
//! let mut events = conn.queue_events(&["ORDER_PLACED"]).await?;
//! while let Some(notification) = events.recv().await? {
//!     println!("orders placed: {}", notification.count("ORDER_PLACED"));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Data Types
//!
//! | Firebird Type | [`DbValue`] |
//! |---------------|-------------|
//! | SMALLINT, INTEGER, BIGINT | `Short`, `Integer`, `BigInt` |
//! | NUMERIC, DECIMAL | `Decimal` (scaled integer) |
//! | FLOAT, DOUBLE PRECISION | `Float`, `Double` |
//! | CHAR, VARCHAR | `Text`, or `Bytes` for `OCTETS` |
//! | DATE, TIME, TIMESTAMP | `chrono` naive types |
//! | BOOLEAN | `Boolean` |
//! | BLOB, ARRAY | `BlobId`, `ArrayId` |

pub mod array;
pub mod auth;
pub mod blob;
pub mod blocking;
pub mod buffer;
pub mod capabilities;
pub mod config;
pub mod connection;
pub mod constants;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod messages;
pub mod params;
pub mod statement;
pub mod status;
pub mod transaction;
pub mod transport;
pub mod value;
pub mod xdr;

// Re-export commonly used types
pub use array::{ArrayBound, ArrayDescriptor};
pub use blob::{blob_parameters, Blob, BlobMode, SeekMode};
pub use capabilities::{Capabilities, NullFormat};
pub use config::{Config, WireCrypt};
pub use connection::{CancelHandle, Connection, ConnectionState, WarningCallback};
pub use constants::{CancelKind, FreeOption, StatementType};
pub use descriptor::{DbField, Descriptor};
pub use error::{Error, Result};
pub use events::{EventNotification, EventStream};
pub use messages::{BlobInfo, DatabaseInfo, TransactionInfo};
pub use params::{BufferKind, ParameterBuffer};
pub use statement::{Statement, StatementState};
pub use status::StatusVector;
pub use transaction::{
    AccessMode, Isolation, LockResolution, TableLock, Transaction, TransactionOptions,
    TransactionState,
};
pub use transport::{TcpTransport, Transport};
pub use value::{Decimal, DbValue, Row};
