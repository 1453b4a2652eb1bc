use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use noties_core::StorePath;
use noties_proto::{ClientMessage, ServerMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{DocKey, FeedEvent, RemoteDocument, RemoteStore, Subscription, WriteAck, WriteRequest};
use crate::error::TransportError;

/// Reply routing for one live connection.
#[derive(Default)]
struct Routes {
    requests: HashMap<u64, oneshot::Sender<ServerMessage>>,
    feeds: HashMap<u64, UnboundedSender<FeedEvent>>,
    closed: bool,
}

#[derive(Clone)]
struct Connection {
    outgoing: UnboundedSender<ClientMessage>,
    routes: Arc<Mutex<Routes>>,
}

impl Connection {
    fn routes(&self) -> MutexGuard<'_, Routes> {
        lock_routes(&self.routes)
    }

    fn is_open(&self) -> bool {
        !self.routes().closed && !self.outgoing.is_closed()
    }
}

fn lock_routes(routes: &Mutex<Routes>) -> MutexGuard<'_, Routes> {
    routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Remote store reached over a WebSocket speaking `noties-proto`.
///
/// The connection is opened lazily and reopened on the next call after it
/// drops. A drop fails every in-flight request and every live feed.
pub struct WsRemote {
    url: String,
    auth_token: Option<String>,
    connection: tokio::sync::Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl WsRemote {
    pub fn new(server_url: &str, auth_token: Option<String>) -> Self {
        Self {
            url: normalize_ws_url(server_url),
            auth_token,
            connection: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn connection(&self) -> Result<Connection, TransportError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            if conn.is_open() {
                return Ok(conn.clone());
            }
        }
        let conn = self.connect().await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn connect(&self) -> Result<Connection, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Protocol(format!("invalid server url: {e}")))?;
        if let Some(token) = &self.auth_token {
            let value = format!("Bearer {token}")
                .parse::<HeaderValue>()
                .map_err(|_| TransportError::Protocol("auth token is not a valid header".into()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        tracing::info!(url = %self.url, "connected to remote store");
        let (mut write, mut read) = ws.split();

        let (outgoing, mut outgoing_rx): (_, UnboundedReceiver<ClientMessage>) =
            unbounded_channel();
        let routes = Arc::new(Mutex::new(Routes::default()));

        let writer_routes = routes.clone();
        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("failed to encode client message: {e}");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::warn!("remote store send failed: {e}");
                    break;
                }
            }
            close_routes(&writer_routes);
        });

        let reader_routes = routes.clone();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(server_msg) => route(&reader_routes, server_msg),
                        Err(e) => tracing::warn!("ignoring malformed server message: {e}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("remote store connection error: {e}");
                        break;
                    }
                }
            }
            tracing::info!("remote store connection closed");
            close_routes(&reader_routes);
        });

        Ok(Connection { outgoing, routes })
    }

    async fn request(
        &self,
        build: impl FnOnce(u64) -> ClientMessage,
    ) -> Result<ServerMessage, TransportError> {
        let conn = self.connection().await?;
        let request_id = self.next_id();
        let (tx, rx) = oneshot::channel();
        {
            let mut routes = conn.routes();
            if routes.closed {
                return Err(TransportError::Disconnected);
            }
            routes.requests.insert(request_id, tx);
        }
        if conn.outgoing.send(build(request_id)).is_err() {
            conn.routes().requests.remove(&request_id);
            return Err(TransportError::Disconnected);
        }

        // no deadline: a request ends with its reply or with the connection
        match rx.await {
            Ok(ServerMessage::RequestError { code, message, .. }) => {
                Err(TransportError::from_code(code, message))
            }
            Ok(reply) => Ok(reply),
            Err(_) => Err(TransportError::Disconnected),
        }
    }
}

fn route(routes: &Mutex<Routes>, msg: ServerMessage) {
    let mut routes = lock_routes(routes);
    if let Some(request_id) = msg.request_id() {
        match routes.requests.remove(&request_id) {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            None => tracing::debug!(request_id, "reply for unknown request"),
        }
        return;
    }
    match msg {
        ServerMessage::Snapshot {
            subscription_id,
            documents,
        } => {
            let delivered = routes
                .feeds
                .get(&subscription_id)
                .map_or(false, |tx| tx.send(FeedEvent::Snapshot(documents)).is_ok());
            if !delivered {
                routes.feeds.remove(&subscription_id);
            }
        }
        ServerMessage::SubscriptionError {
            subscription_id,
            code,
            message,
        } => {
            if let Some(tx) = routes.feeds.remove(&subscription_id) {
                let _ = tx.send(FeedEvent::Error(TransportError::from_code(code, message)));
            }
        }
        _ => {}
    }
}

fn close_routes(routes: &Mutex<Routes>) {
    let mut routes = lock_routes(routes);
    if routes.closed {
        return;
    }
    routes.closed = true;
    // dropping the senders fails the waiting requests
    routes.requests.clear();
    for (_, tx) in routes.feeds.drain() {
        let _ = tx.send(FeedEvent::Error(TransportError::Disconnected));
    }
}

#[async_trait]
impl RemoteStore for WsRemote {
    async fn subscribe(&self, path: &StorePath) -> Result<Subscription, TransportError> {
        let conn = self.connection().await?;
        let subscription_id = self.next_id();
        let (tx, rx) = unbounded_channel();
        {
            let mut routes = conn.routes();
            if routes.closed {
                return Err(TransportError::Disconnected);
            }
            routes.feeds.insert(subscription_id, tx);
        }
        conn.outgoing
            .send(ClientMessage::Subscribe {
                subscription_id,
                path: path.to_string(),
            })
            .map_err(|_| TransportError::Disconnected)?;
        tracing::debug!(subscription_id, %path, "subscribed");

        Ok(Subscription::new(path.clone(), rx, move || {
            conn.routes().feeds.remove(&subscription_id);
            let _ = conn
                .outgoing
                .send(ClientMessage::Unsubscribe { subscription_id });
        }))
    }

    async fn fetch(&self, doc: &StorePath) -> Result<Option<RemoteDocument>, TransportError> {
        let path = doc.to_string();
        match self
            .request(|request_id| ClientMessage::Fetch { request_id, path })
            .await?
        {
            ServerMessage::Fetched { document, .. } => Ok(document),
            other => Err(unexpected(&other)),
        }
    }

    async fn write(&self, request: WriteRequest) -> Result<WriteAck, TransportError> {
        let path = request.collection.to_string();
        let doc_id = match request.key {
            DocKey::Auto => None,
            DocKey::Id(id) => Some(id),
        };
        let reply = self
            .request(|request_id| ClientMessage::Write {
                request_id,
                path,
                doc_id,
                mode: request.mode,
                payload: request.payload,
            })
            .await?;
        match reply {
            ServerMessage::WriteAck { doc_id, .. } => Ok(WriteAck { doc_id }),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(msg: &ServerMessage) -> TransportError {
    TransportError::Protocol(format!("unexpected reply: {msg:?}"))
}

/// Turn an http(s) server url into the store's WebSocket endpoint.
pub fn normalize_ws_url(server_url: &str) -> String {
    let mut ws_url = server_url
        .replace("http://", "ws://")
        .replace("https://", "wss://");

    if !ws_url.ends_with("/api/store") {
        if !ws_url.ends_with('/') {
            ws_url.push('/');
        }
        ws_url.push_str("api/store");
    }

    ws_url
}
