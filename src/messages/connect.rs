//! Connect request and accept replies
//!
//! `op_connect` offers the client's protocol versions together with the
//! user identification block. The server answers with one of the accept
//! operations; `op_cond_accept` and `op_accept_data` also carry the first
//! round of authentication data.

use bytes::Bytes;

use crate::capabilities::{normalize_version, offered_protocols};
use crate::constants::{op, protocol};
use crate::error::Result;
use crate::xdr::XdrStream;

/// Queue an `op_connect` for `database`
pub fn write_connect(xdr: &mut XdrStream, database: &str, user_identification: &[u8]) -> Result<()> {
    let offers = offered_protocols();
    xdr.write_op(op::CONNECT)?;
    xdr.write_i32(op::ATTACH)?;
    xdr.write_i32(protocol::CONNECT_VERSION3)?;
    xdr.write_i32(protocol::ARCH_GENERIC)?;
    xdr.write_string(database)?;
    xdr.write_i32(offers.len() as i32)?;
    xdr.write_buffer(user_identification)?;
    for offer in &offers {
        xdr.write_i32(offer.version)?;
        xdr.write_i32(offer.architecture)?;
        xdr.write_i32(offer.min_type)?;
        xdr.write_i32(offer.max_type)?;
        xdr.write_i32(offer.weight)?;
    }
    Ok(())
}

/// Auth data carried by `op_cond_accept` / `op_accept_data`
#[derive(Debug, Clone, Default)]
pub struct AcceptAuth {
    /// Plugin data
    pub data: Bytes,
    /// Plugin the server picked
    pub plugin_name: String,
    /// Whether the server already considers the client authenticated
    pub authenticated: bool,
    /// Wire-crypt keys
    pub keys: Bytes,
}

/// Decoded accept reply
#[derive(Debug, Clone)]
pub struct AcceptReply {
    /// Which accept operation was received
    pub operation: i32,
    /// Accepted protocol version
    pub version: i32,
    /// Accepted architecture
    pub architecture: i32,
    /// Accepted packet type
    pub packet_type: i32,
    /// Auth data, for the conditional accept variants
    pub auth: Option<AcceptAuth>,
}

impl AcceptReply {
    /// Whether the server wants the continuation loop run now
    pub fn is_conditional(&self) -> bool {
        self.operation == op::COND_ACCEPT
    }
}

/// Read the body of an accept operation whose code was already consumed
pub async fn read_accept(xdr: &mut XdrStream, operation: i32) -> Result<AcceptReply> {
    let version = normalize_version(xdr.read_i32().await?);
    let architecture = xdr.read_i32().await?;
    let packet_type = xdr.read_i32().await?;

    let auth = if operation == op::COND_ACCEPT || operation == op::ACCEPT_DATA {
        Some(AcceptAuth {
            data: xdr.read_buffer().await?,
            plugin_name: xdr.read_string().await?,
            authenticated: xdr.read_i32().await? != 0,
            keys: xdr.read_buffer().await?,
        })
    } else {
        None
    };

    Ok(AcceptReply {
        operation,
        version,
        architecture,
        packet_type,
        auth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ReadBuffer;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_connect_request_layout() {
        let (client, server) = tokio::io::duplex(4096);
        let mut xdr = XdrStream::new(Box::new(client));
        write_connect(&mut xdr, "employee", &[1, 2, 3]).unwrap();
        let sent = xdr.writer().pending().to_vec();
        drop(server);

        let mut buf = ReadBuffer::from_vec(sent);
        assert_eq!(buf.read_i32().unwrap(), op::CONNECT);
        assert_eq!(buf.read_i32().unwrap(), op::ATTACH);
        assert_eq!(buf.read_i32().unwrap(), 3);
        assert_eq!(buf.read_i32().unwrap(), 1);
        assert_eq!(buf.read_string().unwrap(), "employee");
        assert_eq!(buf.read_i32().unwrap(), 4);
        assert_eq!(&buf.read_buffer().unwrap()[..], &[1, 2, 3]);

        let mut versions = Vec::new();
        for _ in 0..4 {
            versions.push(buf.read_i32().unwrap());
            assert_eq!(buf.read_i32().unwrap(), protocol::ARCH_GENERIC);
            assert_eq!(buf.read_i32().unwrap(), protocol::PTYPE_RPC);
            assert_eq!(buf.read_i32().unwrap(), protocol::PTYPE_BATCH_SEND);
            buf.read_i32().unwrap();
        }
        assert_eq!(
            versions,
            vec![
                protocol::VERSION10,
                protocol::VERSION11,
                protocol::VERSION12,
                protocol::VERSION13
            ]
        );
        assert_eq!(buf.remaining(), 0);
    }

    #[tokio::test]
    async fn test_read_plain_accept() {
        let mock = Builder::new()
            .read(&[0xFF, 0xFF, 0x80, 0x0C, 0, 0, 0, 1, 0, 0, 0, 3])
            .build();
        let mut xdr = XdrStream::new(Box::new(mock));
        let reply = read_accept(&mut xdr, op::ACCEPT).await.unwrap();
        assert_eq!(reply.version, protocol::VERSION12);
        assert!(reply.auth.is_none());
        assert!(!reply.is_conditional());
    }

    #[tokio::test]
    async fn test_read_cond_accept() {
        let mock = Builder::new()
            .read(&[0, 0, 0x80, 0x0D, 0, 0, 0, 1, 0, 0, 0, 3])
            .read(&[0, 0, 0, 1, 7, 0, 0, 0])
            .read(&[0, 0, 0, 6, b'S', b'r', b'p', b'2', b'5', b'6', 0, 0])
            .read(&[0, 0, 0, 0, 0, 0, 0, 0])
            .build();
        let mut xdr = XdrStream::new(Box::new(mock));
        let reply = read_accept(&mut xdr, op::COND_ACCEPT).await.unwrap();
        assert_eq!(reply.version, protocol::VERSION13);
        assert!(reply.is_conditional());
        let auth = reply.auth.unwrap();
        assert_eq!(&auth.data[..], &[7]);
        assert_eq!(auth.plugin_name, "Srp256");
        assert!(!auth.authenticated);
        assert!(auth.keys.is_empty());
    }
}
