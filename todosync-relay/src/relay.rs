//! Relay server core: shared state, WebSocket handler, request handling and
//! change fan-out.
//!
//! Each connection may fetch and upsert records for any identity and watch
//! any number of identities. Every accepted upsert is acknowledged to the
//! writer and then pushed as `Changed` to every connection watching that
//! identity, the writer included; clients filter their own echoes.
//! Upserts for one identity are serialized, so watchers receive `Changed`
//! frames in the order the store applied them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use todosync_proto::relay::{self, RelayMessage};
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::store::StateStore;

/// Default maximum accepted record size in bytes (256 KB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 256 * 1024;

type ConnectionId = u64;

/// Shared relay server state: stored records, live connections and who
/// watches which identity.
#[derive(Debug)]
pub struct RelayState {
    /// Latest record per identity.
    pub store: StateStore,
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>,
    watchers: RwLock<HashMap<String, HashSet<ConnectionId>>>,
    upsert_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    next_connection: AtomicU64,
    max_payload_size: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates an empty relay state with the default payload limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_PAYLOAD_SIZE, StateStore::new())
    }

    /// Creates a relay state with a custom payload limit and store.
    #[must_use]
    pub fn with_config(max_payload_size: usize, store: StateStore) -> Self {
        Self {
            store,
            connections: RwLock::new(HashMap::new()),
            watchers: RwLock::new(HashMap::new()),
            upsert_locks: Mutex::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            max_payload_size,
        }
    }

    async fn connect(&self, sender: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(id, sender);
        id
    }

    /// Forgets a connection and every watch it held.
    async fn disconnect(&self, conn: ConnectionId) {
        self.connections.write().await.remove(&conn);
        let mut watchers = self.watchers.write().await;
        watchers.retain(|_, conns| {
            conns.remove(&conn);
            !conns.is_empty()
        });
    }

    /// Lock held across store write and fan-out for one identity.
    async fn upsert_lock(&self, user: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.upsert_locks
                .lock()
                .await
                .entry(user.to_string())
                .or_default(),
        )
    }

    async fn watch(&self, conn: ConnectionId, user: &str) {
        self.watchers
            .write()
            .await
            .entry(user.to_string())
            .or_default()
            .insert(conn);
    }

    async fn unwatch(&self, conn: ConnectionId, user: &str) {
        let mut watchers = self.watchers.write().await;
        if let Some(conns) = watchers.get_mut(user) {
            conns.remove(&conn);
            if conns.is_empty() {
                watchers.remove(user);
            }
        }
    }

    /// Number of connections watching `user`.
    pub async fn watcher_count(&self, user: &str) -> usize {
        self.watchers.read().await.get(user).map_or(0, HashSet::len)
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a WebSocket Close frame to every connection.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (conn, sender) in conns.iter() {
            tracing::info!(conn, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }

    async fn send_to(&self, conn: ConnectionId, msg: &RelayMessage) {
        let Some(sender) = self.connections.read().await.get(&conn).cloned() else {
            return;
        };
        send_on(&sender, msg);
    }

    /// Pushes `Changed` to every connection watching `user`.
    async fn broadcast(&self, user: &str, payload: &[u8]) {
        let targets: Vec<ConnectionId> = self
            .watchers
            .read()
            .await
            .get(user)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default();
        if targets.is_empty() {
            return;
        }
        let msg = RelayMessage::Changed {
            user: user.to_string(),
            payload: payload.to_vec(),
        };
        let bytes = match relay::encode(&msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode change notification");
                return;
            }
        };
        let conns = self.connections.read().await;
        for conn in &targets {
            if let Some(sender) = conns.get(conn) {
                let _ = sender.send(Message::Binary(bytes.clone().into()));
            }
        }
        tracing::debug!(user = %user, watchers = targets.len(), "change broadcast");
    }
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Register the connection's outbound channel.
/// 2. Process requests until the socket closes.
/// 3. Drop the connection and all of its watches.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn = state.connect(tx).await;
    tracing::info!(conn, "connection opened");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => handle_binary_message(conn, &data, &reader_state).await,
                Message::Close(_) => {
                    tracing::info!(conn, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.disconnect(conn).await;
    tracing::info!(conn, "connection closed");
}

/// Handles one binary frame from a connection.
async fn handle_binary_message(conn: ConnectionId, data: &[u8], state: &RelayState) {
    let msg = match relay::decode(data) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(conn, error = %e, "failed to decode message");
            let err = RelayMessage::Error {
                request_id: None,
                reason: format!("malformed frame: {e}"),
            };
            state.send_to(conn, &err).await;
            return;
        }
    };

    match msg {
        RelayMessage::Fetch { request_id, user } => {
            let payload = state.store.get(&user).await;
            tracing::debug!(conn, user = %user, found = payload.is_some(), "fetch");
            state
                .send_to(conn, &RelayMessage::State { request_id, payload })
                .await;
        }
        RelayMessage::Upsert {
            request_id,
            user,
            payload,
        } => {
            if let Some(reason) = reject_upsert(&user, payload.len(), state.max_payload_size) {
                tracing::warn!(conn, user = %user, size = payload.len(), reason = %reason, "upsert rejected");
                let err = RelayMessage::Error {
                    request_id: Some(request_id),
                    reason,
                };
                state.send_to(conn, &err).await;
                return;
            }
            tracing::debug!(conn, user = %user, size = payload.len(), "upsert");
            let lock = state.upsert_lock(&user).await;
            let _serialized = lock.lock().await;
            state.store.put(&user, payload.clone()).await;
            state.send_to(conn, &RelayMessage::Ack { request_id }).await;
            state.broadcast(&user, &payload).await;
        }
        RelayMessage::Subscribe { request_id, user } => {
            if user.is_empty() {
                let err = RelayMessage::Error {
                    request_id: Some(request_id),
                    reason: "empty identity".to_string(),
                };
                state.send_to(conn, &err).await;
                return;
            }
            state.watch(conn, &user).await;
            tracing::debug!(conn, user = %user, "subscribed");
            state.send_to(conn, &RelayMessage::Ack { request_id }).await;
        }
        RelayMessage::Unsubscribe { user } => {
            state.unwatch(conn, &user).await;
            tracing::debug!(conn, user = %user, "unsubscribed");
        }
        other => {
            tracing::warn!(conn, msg = ?other, "unexpected message type from client");
            let err = RelayMessage::Error {
                request_id: other.reply_id(),
                reason: "unexpected message from client".to_string(),
            };
            state.send_to(conn, &err).await;
        }
    }
}

fn reject_upsert(user: &str, size: usize, max: usize) -> Option<String> {
    if user.is_empty() {
        Some("empty identity".to_string())
    } else if size > max {
        Some(format!("payload too large: {size} bytes (max {max})"))
    } else {
        None
    }
}

fn send_on(sender: &mpsc::UnboundedSender<Message>, msg: &RelayMessage) {
    match relay::encode(msg) {
        Ok(bytes) => {
            let _ = sender.send(Message::Binary(bytes.into()));
        }
        Err(e) => tracing::error!(error = %e, "failed to encode relay message"),
    }
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });
    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
