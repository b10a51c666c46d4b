//! TCP transport implementation

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::DEFAULT_CONNECT_TIMEOUT;
use crate::error::{Error, Result};

use super::{BoxedStream, Transport};

/// TCP transport for Firebird connections
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// Connection timeout
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create a new TCP transport
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Get the connection timeout
    pub fn timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn open(&self, host: &str, port: u16) -> Result<BoxedStream> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let stream = timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::ConnectionTimeout(self.connect_timeout))?
            .map_err(Error::Io)?;

        stream.set_nodelay(true).map_err(Error::Io)?;
        tracing::debug!(host, port, "tcp channel opened");

        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_transport_defaults() {
        let transport = TcpTransport::new();
        assert_eq!(transport.timeout(), DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_tcp_transport_timeout() {
        let transport = TcpTransport::new().connect_timeout(Duration::from_secs(2));
        assert_eq!(transport.timeout(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_tcp_transport_connects_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let transport = TcpTransport::new();
        let stream = transport.open("127.0.0.1", port).await;
        assert!(stream.is_ok());
        accept.await.unwrap().unwrap();
    }
}
