//! Correlated request/response transport over one socket connection.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use glint_core::{IpcConfig, Message};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};

/// Transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How long `send` waits for the matching response.
    pub request_timeout: Duration,

    /// Longest accepted inbound line, in bytes.
    pub max_frame_len: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from(&IpcConfig::default())
    }
}

impl From<&IpcConfig> for TransportConfig {
    fn from(config: &IpcConfig) -> Self {
        Self {
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            max_frame_len: config.max_frame_len,
        }
    }
}

/// The live half of a connection: where outbound lines go.
struct Link {
    epoch: u64,
    outbound: mpsc::UnboundedSender<String>,
}

type Subscribers = Vec<(u64, mpsc::UnboundedSender<Message>)>;

struct Inner {
    config: TransportConfig,
    link: Mutex<Option<Link>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Message>>>,
    subscriptions: Mutex<HashMap<String, Subscribers>>,
    counter: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    /// Insert a pending entry under a fresh id. Never overwrites a live id.
    fn register(&self, waiter: oneshot::Sender<Message>) -> String {
        let mut pending = lock(&self.pending);
        loop {
            let id = Uuid::new_v4().simple().to_string();
            if let Entry::Vacant(slot) = pending.entry(id.clone()) {
                slot.insert(waiter);
                return id;
            }
        }
    }

    fn dispatch(&self, line: &str) {
        let message = match Message::decode(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed inbound message");
                return;
            }
        };

        if let Some(id) = &message.id {
            let waiter = lock(&self.pending).remove(id);
            if let Some(waiter) = waiter {
                debug!(%id, kind = %message.kind, "Resolved request");
                let _ = waiter.send(message);
                return;
            }
        }

        let subscribers: Vec<_> = lock(&self.subscriptions)
            .get(&message.kind)
            .map(|subs| subs.iter().map(|(_, tx)| tx.clone()).collect())
            .unwrap_or_default();

        if subscribers.is_empty() {
            debug!(kind = %message.kind, id = ?message.id, "Dropping unrouted message");
            return;
        }

        debug!(kind = %message.kind, count = subscribers.len(), "Delivering event");
        for tx in subscribers {
            let _ = tx.send(message.clone());
        }
    }

    /// Tear down the link opened at `epoch` and fail every in-flight request.
    fn disconnect(&self, epoch: u64) {
        {
            let mut link = lock(&self.link);
            match link.as_ref() {
                Some(current) if current.epoch == epoch => *link = None,
                _ => return,
            }
        }

        // Dropping the senders wakes each waiter with a closed-channel error.
        let failed = lock(&self.pending).drain().count();
        if failed > 0 {
            warn!(failed, "Connection lost with requests in flight");
        } else {
            info!("Connection closed");
        }
    }

    fn unsubscribe(&self, kind: &str, id: u64) {
        let mut subscriptions = lock(&self.subscriptions);
        if let Some(subs) = subscriptions.get_mut(kind) {
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
                subscriptions.remove(kind);
            }
        }
    }
}

/// Removes a pending entry when the request future finishes or is dropped.
struct PendingGuard<'a> {
    inner: &'a Inner,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(&self.inner.pending).remove(&self.id);
    }
}

/// A socket transport with request correlation and event subscriptions.
///
/// Cloning is cheap; every clone shares the same connection and maps.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("connected", &self.is_connected())
            .field("pending", &self.pending_len())
            .finish()
    }
}

impl Transport {
    /// Create a disconnected transport.
    pub fn new(config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                link: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                subscriptions: Mutex::new(HashMap::new()),
                counter: AtomicU64::new(1),
            }),
        }
    }

    /// Open a TCP connection to the host-side service.
    pub async fn connect(&self, addr: impl ToSocketAddrs) -> TransportResult<()> {
        if self.is_connected() {
            return Err(TransportError::AlreadyConnected);
        }
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        self.attach(stream)
    }

    /// Adopt an already open byte stream as the connection.
    ///
    /// Spawns one writer and one reader task on the current runtime.
    pub fn attach<IO>(&self, io: IO) -> TransportResult<()>
    where
        IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut link = lock(&self.inner.link);
        if link.is_some() {
            return Err(TransportError::AlreadyConnected);
        }

        let epoch = self.inner.counter.fetch_add(1, Ordering::Relaxed);
        let codec = LinesCodec::new_with_max_length(self.inner.config.max_frame_len);
        let (mut sink, mut stream) = Framed::new(io, codec).split();
        let (outbound, mut queue) = mpsc::unbounded_channel::<String>();
        *link = Some(Link { epoch, outbound });
        drop(link);

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let writer_weak = weak.clone();
        tokio::spawn(async move {
            while let Some(line) = queue.recv().await {
                if let Err(e) = sink.send(line).await {
                    error!(error = %e, "Failed to write to socket");
                    if let Some(inner) = writer_weak.upgrade() {
                        inner.disconnect(epoch);
                    }
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match frame {
                    Ok(line) => inner.dispatch(&line),
                    Err(e) => {
                        error!(error = %e, "Failed to read from socket");
                        break;
                    }
                }
            }
            if let Some(inner) = weak.upgrade() {
                inner.disconnect(epoch);
            }
        });

        debug!(epoch, "Transport attached");
        Ok(())
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.link).is_some()
    }

    /// Number of requests waiting for a response.
    pub fn pending_len(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Number of live subscriptions for an event type.
    pub fn subscriber_count(&self, kind: &str) -> usize {
        lock(&self.inner.subscriptions)
            .get(kind)
            .map_or(0, Vec::len)
    }

    /// The request timeout in use.
    pub fn request_timeout(&self) -> Duration {
        self.inner.config.request_timeout
    }

    /// Send a request and wait for the response carrying the same id.
    ///
    /// `payload` must be a JSON object (or null); its fields are sent next to
    /// `id` and `type`.
    pub async fn send(&self, kind: &str, payload: Value) -> TransportResult<Message> {
        let outbound = lock(&self.inner.link)
            .as_ref()
            .map(|link| link.outbound.clone())
            .ok_or(TransportError::NotConnected)?;

        let message = Message::with_payload(kind, payload).ok_or_else(|| {
            TransportError::InvalidPayload {
                kind: kind.to_string(),
            }
        })?;

        let (waiter, response) = oneshot::channel();
        let id = self.inner.register(waiter);
        let _guard = PendingGuard {
            inner: &self.inner,
            id: id.clone(),
        };

        let line = message
            .with_id(id.clone())
            .encode()
            .map_err(|e| TransportError::Encode(e.to_string()))?;

        if outbound.send(line).is_err() {
            return Err(TransportError::Disconnected { id });
        }
        debug!(%id, kind, "Sent request");

        let timeout = self.inner.config.request_timeout;
        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::Disconnected { id }),
            Err(_) => {
                warn!(%id, kind, "Request timed out");
                Err(TransportError::Timeout {
                    id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Receive every pushed message whose `type` is `kind`.
    pub fn subscribe(&self, kind: impl Into<String>) -> Subscription {
        let kind = kind.into();
        let id = self.inner.counter.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.subscriptions)
            .entry(kind.clone())
            .or_default()
            .push((id, tx));
        debug!(%kind, id, "Subscribed");

        Subscription {
            id,
            kind,
            rx,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// A live event subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    kind: String,
    rx: mpsc::UnboundedReceiver<Message>,
    inner: Weak<Inner>,
}

impl Subscription {
    /// The event type this subscription receives.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Wait for the next event. Returns `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Take the next already delivered event, if any.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving events.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.unsubscribe(&self.kind, self.id);
        }
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_while_disconnected() {
        let transport = Transport::new(TransportConfig::default());
        let err = transport.send("ping", Value::Null).await.unwrap_err();

        assert!(matches!(err, TransportError::NotConnected));
        assert_eq!(transport.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_non_object_payload() {
        let transport = Transport::new(TransportConfig::default());
        let (client, _server) = tokio::io::duplex(1024);
        transport.attach(client).unwrap();

        let err = transport.send("ping", json!("oops")).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidPayload { .. }));
        assert_eq!(transport.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_attach_twice() {
        let transport = Transport::new(TransportConfig::default());
        let (a, _a_peer) = tokio::io::duplex(64);
        let (b, _b_peer) = tokio::io::duplex(64);

        transport.attach(a).unwrap();
        assert!(matches!(
            transport.attach(b),
            Err(TransportError::AlreadyConnected)
        ));
    }

    #[test]
    fn test_subscription_drop_unsubscribes() {
        let transport = Transport::new(TransportConfig::default());
        let first = transport.subscribe("tick");
        let second = transport.subscribe("tick");
        assert_eq!(transport.subscriber_count("tick"), 2);

        drop(first);
        assert_eq!(transport.subscriber_count("tick"), 1);
        second.unsubscribe();
        assert_eq!(transport.subscriber_count("tick"), 0);
    }
}
