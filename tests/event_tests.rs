//! Integration tests for event notifications over the auxiliary channel

mod common;

use std::time::Duration;

use common::{config, MockServer, MockTransport, DB_HANDLE};
use firebird_rs::constants::{op, protocol};
use firebird_rs::Connection;

/// EPB with one counted name
fn epb(name: &str, count: u32) -> Vec<u8> {
    let mut out = vec![1, name.len() as u8];
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out
}

async fn post_event(aux: &mut MockServer, id: i32, name: &str, count: u32) {
    let xdr = aux.xdr();
    xdr.write_op(op::EVENT).unwrap();
    xdr.write_i32(DB_HANDLE).unwrap();
    xdr.write_buffer(&epb(name, count)).unwrap();
    xdr.write_bytes(&[0; 8]).unwrap();
    xdr.write_i32(id).unwrap();
    aux.send().await;
}

/// Answer `op_connect_request` with an address on port 3051
async fn open_aux(server: &mut MockServer) {
    let req = server.expect(op::CONNECT_REQUEST).await;
    assert_eq!(req.ints, vec![1, DB_HANDLE as i64, 0]);
    let mut addr = vec![0, 2, 0x0b, 0xeb, 127, 0, 0, 1];
    addr.resize(16, 0);
    server.ok(0, 0, &addr).await;
}

/// Read `op_que_events`, check the counts it carries, return its id
async fn expect_queue(server: &mut MockServer, name: &str, count: u32) -> i32 {
    let req = server.expect(op::QUE_EVENTS).await;
    assert_eq!(req.int(0), DB_HANDLE as i64);
    assert_eq!(&req.buffers[0][..], &epb(name, count)[..]);
    server.ok_empty().await;
    req.int(3) as i32
}

mod notification_tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_are_reported_as_deltas() {
        let (transport, mut servers) = MockTransport::with_channels(2);
        let mut aux = servers.pop().unwrap();
        let mut server = servers.pop().unwrap();

        let script = tokio::spawn(async move {
            server.handshake(protocol::VERSION13).await;
            open_aux(&mut server).await;
            let first = expect_queue(&mut server, "ORDER_PLACED", 0).await;

            // the first notification only establishes the baseline
            post_event(&mut aux, first, "ORDER_PLACED", 4).await;
            let second = expect_queue(&mut server, "ORDER_PLACED", 4).await;
            assert_ne!(second, first);

            post_event(&mut aux, second, "ORDER_PLACED", 6).await;
            let third = expect_queue(&mut server, "ORDER_PLACED", 6).await;

            let cancel = server.expect(op::CANCEL_EVENTS).await;
            assert_eq!(cancel.ints, vec![DB_HANDLE as i64, third as i64]);
            server.ok_empty().await;

            // the client closes the auxiliary channel once nothing listens
            assert!(aux.next_request().await.is_err());
            server.drain().await;
        });

        let conn = Connection::connect_with_transport(config(), transport).await.unwrap();
        let mut events = conn.queue_events(&["ORDER_PLACED"]).await.unwrap();

        let notification = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(notification.count("ORDER_PLACED"), 2);
        assert_eq!(notification.fired().collect::<Vec<_>>(), vec!["ORDER_PLACED"]);

        events.cancel().await.unwrap();
        assert!(events.recv().await.unwrap().is_none());

        conn.close().await.unwrap();
        script.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_stream_cancels_on_server() {
        let (transport, mut servers) = MockTransport::with_channels(2);
        let mut aux = servers.pop().unwrap();
        let mut server = servers.pop().unwrap();
        let (cancelled_tx, cancelled_rx) = tokio::sync::oneshot::channel();

        let script = tokio::spawn(async move {
            server.handshake(protocol::VERSION13).await;
            open_aux(&mut server).await;
            let id = expect_queue(&mut server, "SHIPPED", 0).await;

            let cancel = server.expect(op::CANCEL_EVENTS).await;
            assert_eq!(cancel.ints, vec![DB_HANDLE as i64, id as i64]);
            server.ok_empty().await;
            // the last registration is gone, so the listener closes its channel
            assert!(aux.next_request().await.is_err());
            cancelled_tx.send(()).unwrap();
            server.drain().await;
        });

        let conn = Connection::connect_with_transport(config(), transport).await.unwrap();
        let events = conn.queue_events(&["SHIPPED"]).await.unwrap();
        drop(events);

        tokio::time::timeout(Duration::from_secs(5), cancelled_rx)
            .await
            .unwrap()
            .unwrap();
        conn.close().await.unwrap();
        script.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_exit_ends_stream() {
        let (transport, mut servers) = MockTransport::with_channels(2);
        let mut aux = servers.pop().unwrap();
        let mut server = servers.pop().unwrap();

        let script = tokio::spawn(async move {
            server.handshake(protocol::VERSION13).await;
            open_aux(&mut server).await;
            expect_queue(&mut server, "SHIPPED", 0).await;
            aux.xdr().write_op(op::EXIT).unwrap();
            aux.send().await;
            server.drain().await;
        });

        let conn = Connection::connect_with_transport(config(), transport).await.unwrap();
        let mut events = conn.queue_events(&["SHIPPED"]).await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(next.is_none());

        conn.close().await.unwrap();
        script.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_name_list_is_rejected() {
        let (transport, mut server) = MockTransport::single();
        let script = tokio::spawn(async move {
            server.handshake(protocol::VERSION13).await;
            server.drain().await;
        });

        let conn = Connection::connect_with_transport(config(), transport).await.unwrap();
        assert!(conn.queue_events(&[]).await.is_err());
        conn.close().await.unwrap();
        script.await.unwrap();
    }
}
