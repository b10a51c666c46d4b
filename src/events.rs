//! Database events
//!
//! Event notifications are pushed by the server over an auxiliary channel,
//! opened on demand at the port returned by `op_connect_request`. A
//! listener task owns the read side of that channel and forwards each
//! `op_event` to the [`EventStream`] that queued it through an unbounded
//! `mpsc` channel, so caller code never runs on the listener.
//!
//! Firebird fires an event once per queue request. Every notification
//! therefore re-queues the same names with the counts just received; the
//! first notification only establishes those counts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::buffer::ReadBuffer;
use crate::connection::{locked, Session};
use crate::constants::{op, EPB_VERSION1};
use crate::error::{Error, Result};
use crate::xdr::{SharedSink, XdrReader, XdrStream};

/// `op_connect_request` type asking for the event channel
const P_REQ_ASYNC: i32 = 1;

/// How long shutdown waits for the listener to finish
const LISTENER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type Registry = Arc<Mutex<HashMap<i32, mpsc::UnboundedSender<Bytes>>>>;

/// Counts of one notification, by event name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNotification {
    /// `(name, occurrences since the previous notification)`
    pub counts: Vec<(String, u32)>,
}

impl EventNotification {
    /// Occurrences of `name`, zero when not part of this registration
    pub fn count(&self, name: &str) -> u32 {
        self.counts
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    /// Names that fired at least once
    pub fn fired(&self) -> impl Iterator<Item = &str> {
        self.counts.iter().filter(|(_, c)| *c > 0).map(|(n, _)| n.as_str())
    }
}

/// Encode an event parameter buffer
pub(crate) fn build_epb(names: &[String], counts: &[u32]) -> Result<Vec<u8>> {
    let mut epb = vec![EPB_VERSION1];
    for (name, count) in names.iter().zip(counts) {
        let len = u8::try_from(name.len())
            .map_err(|_| Error::DataConversion(format!("event name {} is too long", name)))?;
        epb.push(len);
        epb.extend_from_slice(name.as_bytes());
        epb.extend_from_slice(&count.to_le_bytes());
    }
    Ok(epb)
}

/// Decode the counts of an event parameter buffer
pub(crate) fn parse_epb(data: &[u8]) -> Result<Vec<(String, u32)>> {
    let mut buf = ReadBuffer::from_slice(data);
    let version = buf.read_u8()?;
    if version != EPB_VERSION1 {
        return Err(Error::Protocol(format!("unknown event buffer version {}", version)));
    }
    let mut counts = Vec::new();
    while buf.remaining() > 0 {
        let len = buf.read_u8()? as usize;
        let name = buf.read_bytes_owned(len)?;
        let raw = buf.read_bytes_owned(4)?;
        let count = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        counts.push((String::from_utf8_lossy(&name).into_owned(), count));
    }
    Ok(counts)
}

// =============================================================================
// Manager
// =============================================================================

/// The auxiliary channel and its listener task
pub(crate) struct EventManager {
    registry: Registry,
    shutdown: watch::Sender<bool>,
    listener: JoinHandle<()>,
    sink: SharedSink,
    next_id: Arc<AtomicI32>,
}

impl EventManager {
    /// Ask the server for the event port and connect to it
    async fn start(session: &Arc<Session>) -> Result<Self> {
        let response = locked!(session, |inner| {
            async {
                inner.ensure_attached()?;
                let db_handle = inner.db_handle;
                let xdr = inner.xdr()?;
                xdr.write_op(op::CONNECT_REQUEST)?;
                xdr.write_i32(P_REQ_ASYNC)?;
                xdr.write_i32(db_handle)?;
                xdr.write_i32(0)?;
                inner.call().await
            }
            .await
        })?;
        let port = aux_port(&response.data)?;
        let host = session.config.host.clone();
        tracing::debug!(%host, port, "opening event channel");

        let stream = session.transport.open(&host, port).await?;
        let (reader, writer) = XdrStream::new(stream).into_parts();
        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown, signal) = watch::channel(false);
        let listener = tokio::spawn(listen(reader, Arc::clone(&registry), signal));

        Ok(Self {
            registry,
            shutdown,
            listener,
            sink: writer.sink(),
            next_id: Arc::new(AtomicI32::new(1)),
        })
    }

    /// Stop the listener and close the auxiliary channel
    pub(crate) async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.sink.lock().await.shutdown().await {
            tracing::debug!(error = %e, "closing event channel failed");
        }
        if tokio::time::timeout(LISTENER_SHUTDOWN_TIMEOUT, &mut self.listener)
            .await
            .is_err()
        {
            tracing::warn!("event listener did not stop, aborting it");
            self.listener.abort();
        }
        self.registry.lock().await.clear();
        tracing::debug!("event manager stopped");
    }
}

/// Port of the `sockaddr` in an `op_connect_request` reply
fn aux_port(data: &[u8]) -> Result<u16> {
    match data.get(2..4) {
        Some(port) => Ok(u16::from_be_bytes([port[0], port[1]])),
        None => Err(Error::Protocol(format!(
            "event channel address too short ({} bytes)",
            data.len()
        ))),
    }
}

async fn listen(mut reader: XdrReader, registry: Registry, mut signal: watch::Receiver<bool>) {
    loop {
        let operation = tokio::select! {
            _ = signal.changed() => break,
            operation = reader.read_operation() => operation,
        };
        let result = match operation {
            Ok(op::EVENT) => read_event(&mut reader, &registry).await,
            Ok(op::RESPONSE) => drain_response(&mut reader).await,
            Ok(op::EXIT) | Ok(op::DISCONNECT) => {
                tracing::debug!("event channel closed by server");
                break;
            }
            Ok(other) => Err(Error::UnexpectedOperation {
                expected: "op_event",
                actual: other,
            }),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            if !*signal.borrow() {
                tracing::warn!(error = %e, "event listener stopped");
            }
            break;
        }
    }
    // closes every stream
    registry.lock().await.clear();
}

async fn read_event(reader: &mut XdrReader, registry: &Registry) -> Result<()> {
    let _db_handle = reader.read_i32().await?;
    let buffer = reader.read_buffer().await?;
    let _ast = reader.read_bytes(8).await?;
    let event_id = reader.read_i32().await?;
    tracing::trace!(event_id, "event received");
    let registry = registry.lock().await;
    match registry.get(&event_id) {
        Some(sender) => {
            // a dropped stream cancels itself
            let _ = sender.send(buffer);
        }
        None => tracing::debug!(event_id, "event for unknown registration"),
    }
    Ok(())
}

async fn drain_response(reader: &mut XdrReader) -> Result<()> {
    reader.read_i32().await?;
    reader.read_i64().await?;
    reader.read_buffer().await?;
    reader.read_status_vector().await?;
    Ok(())
}

// =============================================================================
// Stream
// =============================================================================

/// Register `names` and return the stream of their notifications
pub(crate) async fn queue_events(session: &Arc<Session>, names: &[&str]) -> Result<EventStream> {
    if names.is_empty() {
        return Err(Error::DataConversion("no event names given".to_string()));
    }
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let counts = vec![0u32; names.len()];
    let epb = build_epb(&names, &counts)?;

    let (registry, next_id) = {
        let mut events = session.events.lock().await;
        if events.is_none() {
            *events = Some(EventManager::start(session).await?);
        }
        match events.as_ref() {
            Some(manager) => (Arc::clone(&manager.registry), Arc::clone(&manager.next_id)),
            None => return Err(Error::ConnectionNotReady),
        }
    };

    let (sender, receiver) = mpsc::unbounded_channel();
    let local_id = next_id.fetch_add(1, Ordering::Relaxed);
    registry.lock().await.insert(local_id, sender);

    let mut stream = EventStream {
        session: Arc::clone(session),
        registry,
        next_id,
        names,
        counts,
        baseline: false,
        local_id,
        receiver,
        active: true,
    };
    if let Err(e) = stream.send_queue(&epb).await {
        stream.registry.lock().await.remove(&local_id);
        stream.active = false;
        return Err(e);
    }
    tracing::debug!(local_id, names = ?stream.names, "events queued");
    Ok(stream)
}

/// Notifications for a set of event names
pub struct EventStream {
    session: Arc<Session>,
    registry: Registry,
    next_id: Arc<AtomicI32>,
    names: Vec<String>,
    counts: Vec<u32>,
    baseline: bool,
    local_id: i32,
    receiver: mpsc::UnboundedReceiver<Bytes>,
    active: bool,
}

impl EventStream {
    /// Registered names
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Wait for the next notification
    ///
    /// Returns `None` once the event channel is gone or the stream was
    /// cancelled.
    pub async fn recv(&mut self) -> Result<Option<EventNotification>> {
        loop {
            if !self.active {
                return Ok(None);
            }
            let Some(buffer) = self.receiver.recv().await else {
                self.active = false;
                return Ok(None);
            };
            let received = parse_epb(&buffer)?;
            let mut deltas = Vec::with_capacity(self.names.len());
            for (name, previous) in self.names.iter().zip(self.counts.iter_mut()) {
                let current = received
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, c)| *c)
                    .unwrap_or(*previous);
                deltas.push((name.clone(), current.saturating_sub(*previous)));
                *previous = current;
            }
            self.requeue().await?;
            if !self.baseline {
                self.baseline = true;
                continue;
            }
            return Ok(Some(EventNotification { counts: deltas }));
        }
    }

    /// Queue again under a fresh id with the counts seen so far
    async fn requeue(&mut self) -> Result<()> {
        let epb = build_epb(&self.names, &self.counts)?;
        let new_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut registry = self.registry.lock().await;
            match registry.remove(&self.local_id) {
                Some(sender) => {
                    registry.insert(new_id, sender);
                }
                None => {
                    self.active = false;
                    return Ok(());
                }
            }
        }
        self.local_id = new_id;
        self.send_queue(&epb).await
    }

    async fn send_queue(&self, epb: &[u8]) -> Result<()> {
        let local_id = self.local_id;
        locked!(&self.session, |inner| {
            async {
                inner.ensure_attached()?;
                let db_handle = inner.db_handle;
                let xdr = inner.xdr()?;
                xdr.write_op(op::QUE_EVENTS)?;
                xdr.write_i32(db_handle)?;
                xdr.write_buffer(epb)?;
                xdr.write_i32(0)?;
                xdr.write_i32(0)?;
                xdr.write_i32(local_id)?;
                inner.call().await.map(|_| ())
            }
            .await
        })
    }

    /// Stop receiving notifications
    ///
    /// The event channel is closed once no stream remains.
    pub async fn cancel(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        release(&self.session, &self.registry, self.local_id).await
    }
}

/// Cancel `local_id` on the server and forget it locally
///
/// The manager is shut down when this was the last registration.
async fn release(session: &Arc<Session>, registry: &Registry, local_id: i32) -> Result<()> {
    let result = locked!(session, |inner| {
        async {
            let db_handle = inner.db_handle;
            let xdr = inner.xdr()?;
            xdr.write_op(op::CANCEL_EVENTS)?;
            xdr.write_i32(db_handle)?;
            xdr.write_i32(local_id)?;
            inner.call().await.map(|_| ())
        }
        .await
    });
    let empty = {
        let mut registry = registry.lock().await;
        registry.remove(&local_id);
        registry.is_empty()
    };
    if empty {
        if let Some(manager) = session.events.lock().await.take() {
            manager.shutdown().await;
        }
    }
    tracing::debug!(local_id, "events cancelled");
    result
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let session = Arc::clone(&self.session);
        let registry = Arc::clone(&self.registry);
        let local_id = self.local_id;
        runtime.spawn(async move {
            if let Err(e) = release(&session, &registry, local_id).await {
                tracing::warn!(local_id, error = %e, "cancel of dropped event stream failed");
            }
        });
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("names", &self.names)
            .field("local_id", &self.local_id)
            .field("active", &self.active)
            .finish()
    }
}
