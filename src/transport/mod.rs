//! Transport layer for Firebird connections
//!
//! A [`Transport`] opens byte channels; everything above it speaks XDR over
//! whatever stream it hands back. The default is plain TCP, tests plug in
//! in-memory duplex pipes.

mod crypt;
mod tcp;

pub use crypt::Arc4;
pub use tcp::TcpTransport;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Duplex byte stream usable as a wire channel
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Boxed byte channel
pub type BoxedStream = Box<dyn AsyncStream>;

/// Trait for transport implementations
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a channel to `host:port`
    async fn open(&self, host: &str, port: u16) -> Result<BoxedStream>;
}
