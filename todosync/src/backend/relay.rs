//! WebSocket client for the `todosync-relay` server.
//!
//! One connection multiplexes every request: each request carries a fresh
//! `request_id` and the reader task routes the matching reply to the waiting
//! caller. `Changed` notifications are decoded and fanned out to the local
//! subscriptions for that identity; malformed notifications are logged and
//! skipped without dropping the connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use todosync_proto::codec;
use todosync_proto::relay::{self, RelayMessage};
use todosync_proto::task::RemoteRecord;

use super::{Backend, BackendError, LatestRecord, Subscription};
use crate::auth::Identity;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSender = futures_util::stream::SplitSink<WsStream, Message>;
type WsReader = futures_util::stream::SplitStream<WsStream>;

/// Default timeout for establishing the WebSocket connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct LocalSubscription {
    user: String,
    updates: LatestRecord,
}

/// State shared between the client handle and its reader task.
#[derive(Debug, Default)]
struct Shared {
    next_request: AtomicU64,
    next_subscription: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<RelayMessage>>>,
    subscriptions: Mutex<HashMap<u64, LocalSubscription>>,
    connected: AtomicBool,
}

impl Shared {
    fn has_subscribers(&self, user: &str) -> bool {
        self.subscriptions.lock().values().any(|sub| sub.user == user)
    }

    fn dispatch_change(&self, user: &str, payload: &[u8]) {
        let record = match codec::decode_record(payload) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(user = %user, error = %e, "malformed change notification, skipping");
                return;
            }
        };
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|id, sub| {
            if sub.user != user {
                return true;
            }
            if sub.updates.is_closed() {
                tracing::debug!(subscription = id, user = %user, "dropping closed subscription");
                return false;
            }
            sub.updates.offer(record.clone());
            true
        });
    }
}

/// [`Backend`] talking to a `todosync-relay` server over WebSocket.
///
/// Created via [`RelayBackend::connect`]. Dropping the backend closes the
/// connection.
#[derive(Debug)]
pub struct RelayBackend {
    url: String,
    outgoing: mpsc::UnboundedSender<RelayMessage>,
    shared: Arc<Shared>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl RelayBackend {
    /// Connects to the relay at `url` (`ws://` or `wss://`).
    ///
    /// # Errors
    ///
    /// - [`BackendError::Timeout`] if the connection is not established
    ///   within `connect_timeout`.
    /// - [`BackendError::Unreachable`] if nothing is listening at `url`.
    /// - [`BackendError::Io`] for other connection failures.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, BackendError> {
        let (ws_stream, _response) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "relay connect timed out");
                BackendError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, error = %e, "relay connect failed");
                map_connect_error(url, e)
            })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(true),
            ..Shared::default()
        });
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(writer_loop(ws_sender, outgoing_rx, Arc::clone(&shared)));
        let reader = tokio::spawn(reader_loop(ws_reader, Arc::clone(&shared)));
        tracing::info!(url, "connected to relay");

        Ok(Self {
            url: url.to_string(),
            outgoing,
            shared,
            writer,
            reader,
        })
    }

    /// The relay URL this backend is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Sends a request built around a fresh request id and waits for the
    /// reply carrying that id.
    async fn request(
        &self,
        build: impl FnOnce(u64) -> RelayMessage + Send,
    ) -> Result<RelayMessage, BackendError> {
        if !self.is_connected() {
            return Err(BackendError::ConnectionClosed);
        }
        let request_id = self.shared.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(request_id, tx);

        // The reader may have cleared `pending` between the check above and
        // the insert.
        if !self.is_connected() || self.outgoing.send(build(request_id)).is_err() {
            self.shared.pending.lock().remove(&request_id);
            return Err(BackendError::ConnectionClosed);
        }

        match rx.await {
            Ok(RelayMessage::Error { reason, .. }) => Err(BackendError::Rejected(reason)),
            Ok(reply) => Ok(reply),
            Err(_) => Err(BackendError::ConnectionClosed),
        }
    }
}

impl Drop for RelayBackend {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

impl Backend for RelayBackend {
    async fn fetch_state(&self, identity: &Identity) -> Result<Option<RemoteRecord>, BackendError> {
        let user = identity.as_str().to_string();
        match self
            .request(move |request_id| RelayMessage::Fetch { request_id, user })
            .await?
        {
            RelayMessage::State { payload: None, .. } => Ok(None),
            RelayMessage::State {
                payload: Some(bytes),
                ..
            } => codec::decode_record(&bytes)
                .map(Some)
                .map_err(|e| BackendError::Malformed(e.to_string())),
            other => Err(unexpected_reply(&other)),
        }
    }

    async fn upsert_state(
        &self,
        identity: &Identity,
        record: &RemoteRecord,
    ) -> Result<(), BackendError> {
        let payload =
            codec::encode_record(record).map_err(|e| BackendError::Malformed(e.to_string()))?;
        let user = identity.as_str().to_string();
        match self
            .request(move |request_id| RelayMessage::Upsert {
                request_id,
                user,
                payload,
            })
            .await?
        {
            RelayMessage::Ack { .. } => Ok(()),
            other => Err(unexpected_reply(&other)),
        }
    }

    async fn subscribe(
        &self,
        identity: &Identity,
        updates: mpsc::Sender<RemoteRecord>,
    ) -> Result<Subscription, BackendError> {
        let user = identity.as_str().to_string();
        let id = self.shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.shared.subscriptions.lock().insert(
            id,
            LocalSubscription {
                user: user.clone(),
                updates: LatestRecord::spawn(updates),
            },
        );

        let request_user = user.clone();
        let reply = self
            .request(move |request_id| RelayMessage::Subscribe {
                request_id,
                user: request_user,
            })
            .await;
        match reply {
            Ok(RelayMessage::Ack { .. }) => {}
            Ok(other) => {
                self.shared.subscriptions.lock().remove(&id);
                return Err(unexpected_reply(&other));
            }
            Err(e) => {
                self.shared.subscriptions.lock().remove(&id);
                return Err(e);
            }
        }
        tracing::debug!(subscription = id, user = %user, "relay subscription established");

        let shared = Arc::clone(&self.shared);
        let outgoing = self.outgoing.clone();
        Ok(Subscription::new(move || {
            shared.subscriptions.lock().remove(&id);
            if !shared.has_subscribers(&user) {
                // Connection may already be gone; nothing left to tell the server then.
                let _ = outgoing.send(RelayMessage::Unsubscribe { user: user.clone() });
            }
            tracing::debug!(subscription = id, user = %user, "relay subscription released");
        }))
    }
}

fn unexpected_reply(reply: &RelayMessage) -> BackendError {
    tracing::warn!(?reply, "unexpected relay reply");
    BackendError::Malformed("unexpected reply from sync server".into())
}

/// Encodes queued requests onto the socket until the channel or socket closes.
async fn writer_loop(
    mut ws_sender: WsSender,
    mut outgoing: mpsc::UnboundedReceiver<RelayMessage>,
    shared: Arc<Shared>,
) {
    while let Some(msg) = outgoing.recv().await {
        let bytes = match relay::encode(&msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode relay request");
                continue;
            }
        };
        if let Err(e) = ws_sender.send(Message::Binary(bytes.into())).await {
            tracing::warn!(error = %e, "relay write failed");
            break;
        }
    }
    shared.connected.store(false, Ordering::Relaxed);
}

/// Routes replies to pending requests and notifications to subscriptions.
///
/// On exit every pending request is dropped, so its caller sees
/// [`BackendError::ConnectionClosed`].
async fn reader_loop(mut ws_reader: WsReader, shared: Arc<Shared>) {
    while let Some(frame) = ws_reader.next().await {
        match frame {
            Ok(Message::Binary(data)) => match relay::decode(&data) {
                Ok(RelayMessage::Changed { user, payload }) => {
                    shared.dispatch_change(&user, &payload);
                }
                Ok(msg) => {
                    if let Some(request_id) = msg.reply_id() {
                        if let Some(waiter) = shared.pending.lock().remove(&request_id) {
                            let _ = waiter.send(msg);
                        }
                    } else {
                        tracing::warn!(?msg, "unsolicited relay message");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed relay frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("relay closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "relay read error");
                break;
            }
        }
    }
    shared.connected.store(false, Ordering::Relaxed);
    shared.pending.lock().clear();
    shared.subscriptions.lock().clear();
    tracing::info!("relay reader exiting");
}

/// Maps a WebSocket connection error to a [`BackendError`].
fn map_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> BackendError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err)
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable
            ) =>
        {
            BackendError::Unreachable(url.to_string())
        }
        WsError::Io(io_err) => BackendError::Io(io_err),
        WsError::Http(response) => BackendError::Rejected(format!(
            "relay HTTP error: status {}",
            response.status()
        )),
        other => BackendError::Io(std::io::Error::other(format!(
            "relay connection error: {other}"
        ))),
    }
}
