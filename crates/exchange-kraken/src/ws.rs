//! WebSocket manager: two logical sockets (public, private), each connected
//! lazily, each with a registry of active subscriptions that survives
//! reconnects.
//!
//! On socket close, if auto-reconnect is enabled and the registry is
//! non-empty, the socket is reopened after a 1 s delay and every registered
//! subscription is re-sent. Handler channels stay attached throughout.
//! Heartbeat and status frames are ignored; unknown channels log at debug.

use crate::book::{BookSide, BookState};
use crate::error::{KrakenError, Result};
use crate::messages::{classify, decode_book, decode_execution, decode_ohlc, InboundFrame, MethodAck};
use crate::rest::KrakenRestClient;
use crate::token::TokenCache;
use crate::types::{canonical_symbol, GatewayEvent};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Public,
    Private,
}

/// Registry key. OHLC keys carry `(symbol, interval)`, book keys `(symbol)`,
/// executions a singleton. Symbols are canonical (uppercase, no slash).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    Ohlc { symbol: String, interval: u32 },
    Book { symbol: String },
    Executions,
}

struct Subscription {
    /// Slashed symbol form for the wire (`DOGE/USD`), where applicable.
    ws_symbol: Option<String>,
    interval: Option<u32>,
    depth: Option<u32>,
    subscribed: bool,
    sender: mpsc::UnboundedSender<GatewayEvent>,
}

struct SocketShared {
    url: String,
    registry: Mutex<HashMap<ChannelKey, Subscription>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

struct WsInner {
    public: SocketShared,
    private: SocketShared,
    rest: Arc<KrakenRestClient>,
    token: TokenCache,
    books: Mutex<HashMap<String, Arc<RwLock<BookState>>>>,
    auto_reconnect: AtomicBool,
}

/// An opaque unsubscribe capability. Dropping the handle leaves the
/// subscription running; lifetime is the owner's responsibility.
pub struct SubscriptionHandle {
    key: ChannelKey,
    kind: SocketKind,
    inner: Weak<WsInner>,
}

impl SubscriptionHandle {
    #[must_use]
    pub const fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Removes the registration and sends a best-effort unsubscribe.
    pub async fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.unsubscribe(self.kind, &self.key).await;
        }
    }
}

pub struct KrakenWsManager {
    inner: Arc<WsInner>,
}

impl KrakenWsManager {
    #[must_use]
    pub fn new(
        public_url: impl Into<String>,
        private_url: impl Into<String>,
        rest: Arc<KrakenRestClient>,
    ) -> Self {
        Self {
            inner: Arc::new(WsInner {
                public: SocketShared {
                    url: public_url.into(),
                    registry: Mutex::new(HashMap::new()),
                    outbound: Mutex::new(None),
                },
                private: SocketShared {
                    url: private_url.into(),
                    registry: Mutex::new(HashMap::new()),
                    outbound: Mutex::new(None),
                },
                rest,
                token: TokenCache::new(),
                books: Mutex::new(HashMap::new()),
                auto_reconnect: AtomicBool::new(true),
            }),
        }
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.inner.auto_reconnect.store(enabled, Ordering::SeqCst);
    }

    /// Shared book state for `symbol`, created on first access.
    pub async fn book_handle(&self, symbol: &str) -> Arc<RwLock<BookState>> {
        let canonical = canonical_symbol(symbol);
        let mut books = self.inner.books.lock().await;
        books
            .entry(canonical)
            .or_insert_with(|| Arc::new(RwLock::new(BookState::new())))
            .clone()
    }

    /// Subscribes to OHLC candles on the public socket.
    ///
    /// # Errors
    ///
    /// Fails when the socket cannot be opened or the subscribe cannot be sent.
    pub async fn subscribe_ohlc(
        &self,
        ws_symbol: &str,
        interval: u32,
        sender: mpsc::UnboundedSender<GatewayEvent>,
    ) -> Result<SubscriptionHandle> {
        let key = ChannelKey::Ohlc {
            symbol: canonical_symbol(ws_symbol),
            interval,
        };
        self.register_and_subscribe(
            SocketKind::Public,
            key,
            Subscription {
                ws_symbol: Some(ws_symbol.to_string()),
                interval: Some(interval),
                depth: None,
                subscribed: false,
                sender,
            },
        )
        .await
    }

    /// Subscribes to the L2 book on the public socket. Deltas are applied to
    /// the shared [`BookState`]; subscribers receive change notifications.
    ///
    /// # Errors
    ///
    /// Fails when the socket cannot be opened or the subscribe cannot be sent.
    pub async fn subscribe_book(
        &self,
        ws_symbol: &str,
        depth: u32,
        sender: mpsc::UnboundedSender<GatewayEvent>,
    ) -> Result<SubscriptionHandle> {
        let key = ChannelKey::Book {
            symbol: canonical_symbol(ws_symbol),
        };
        self.register_and_subscribe(
            SocketKind::Public,
            key,
            Subscription {
                ws_symbol: Some(ws_symbol.to_string()),
                interval: None,
                depth: Some(depth),
                subscribed: false,
                sender,
            },
        )
        .await
    }

    /// Subscribes to the private executions channel. Requires credentials:
    /// the subscription carries a short-lived token fetched over signed REST.
    ///
    /// # Errors
    ///
    /// Fails when the token cannot be fetched or the socket cannot be opened.
    pub async fn subscribe_executions(
        &self,
        sender: mpsc::UnboundedSender<GatewayEvent>,
    ) -> Result<SubscriptionHandle> {
        self.register_and_subscribe(
            SocketKind::Private,
            ChannelKey::Executions,
            Subscription {
                ws_symbol: None,
                interval: None,
                depth: None,
                subscribed: false,
                sender,
            },
        )
        .await
    }

    /// Disables reconnects, clears both registries and closes both sockets.
    pub async fn close(&self) {
        self.inner.auto_reconnect.store(false, Ordering::SeqCst);
        for kind in [SocketKind::Public, SocketKind::Private] {
            let socket = self.inner.socket(kind);
            socket.registry.lock().await.clear();
            let mut outbound = socket.outbound.lock().await;
            if let Some(tx) = outbound.take() {
                let _ = tx.send(Message::Close(None));
            }
        }
        self.inner.books.lock().await.clear();
    }

    async fn register_and_subscribe(
        &self,
        kind: SocketKind,
        key: ChannelKey,
        subscription: Subscription,
    ) -> Result<SubscriptionHandle> {
        {
            let socket = self.inner.socket(kind);
            let mut registry = socket.registry.lock().await;
            if registry.insert(key.clone(), subscription).is_some() {
                tracing::debug!(?key, "replacing existing subscription");
            }
        }
        WsInner::ensure_connected(&self.inner, kind).await?;
        self.inner.send_subscribe(kind, &key, false).await?;
        Ok(SubscriptionHandle {
            key,
            kind,
            inner: Arc::downgrade(&self.inner),
        })
    }
}

impl WsInner {
    const fn socket(&self, kind: SocketKind) -> &SocketShared {
        match kind {
            SocketKind::Public => &self.public,
            SocketKind::Private => &self.private,
        }
    }

    // Boxed explicitly (rather than a plain `async fn`) because this function
    // is awaited from within a `tokio::spawn`ed block defined in the same
    // impl, which otherwise trips a rustc limitation resolving the opaque
    // return type of a self-referential async fn ("fetching the hidden types
    // of an opaque inside of the defining scope is not supported").
    fn ensure_connected<'a>(
        inner: &'a Arc<Self>,
        kind: SocketKind,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let socket = inner.socket(kind);
            let mut outbound = socket.outbound.lock().await;
            if outbound.is_some() {
                return Ok(());
            }

            let (stream, _) = connect_async(socket.url.as_str())
                .await
                .map_err(|e| KrakenError::transport(format!("connect {}: {e}", socket.url)))?;
            tracing::info!(url = %socket.url, ?kind, "websocket connected");

            let (write, read) = stream.split();
            let (tx, rx) = mpsc::unbounded_channel();
            *outbound = Some(tx);
            drop(outbound);

            tokio::spawn(write_loop(write, rx));
            let reader = Arc::clone(inner);
            tokio::spawn(async move {
                read_loop(reader, kind, read).await;
            });
            Ok(())
        })
    }

    async fn send_raw(&self, kind: SocketKind, message: Message) -> Result<()> {
        let outbound = self.socket(kind).outbound.lock().await;
        match outbound.as_ref() {
            Some(tx) => tx
                .send(message)
                .map_err(|_| KrakenError::transport("socket writer is gone")),
            None => Err(KrakenError::transport("socket is not connected")),
        }
    }

    /// Builds and sends the subscribe request for a registered key.
    async fn send_subscribe(&self, kind: SocketKind, key: &ChannelKey, fresh_token: bool) -> Result<()> {
        let params = {
            let registry = self.socket(kind).registry.lock().await;
            let Some(sub) = registry.get(key) else {
                return Ok(());
            };
            self.subscribe_params(key, sub)
        };
        let params = match key {
            ChannelKey::Executions => {
                let token = if fresh_token {
                    self.token.fresh(&self.rest).await
                } else {
                    self.token.token(&self.rest).await
                }
                .map_err(|e| KrakenError::Token(e.to_string()))?;
                let mut params = params;
                params["token"] = Value::String(token);
                params
            }
            _ => params,
        };
        let request = json!({ "method": "subscribe", "params": params });
        self.send_raw(kind, Message::Text(request.to_string())).await
    }

    fn subscribe_params(&self, key: &ChannelKey, sub: &Subscription) -> Value {
        match key {
            ChannelKey::Ohlc { .. } => json!({
                "channel": "ohlc",
                "symbol": [sub.ws_symbol.clone().unwrap_or_default()],
                "interval": sub.interval.unwrap_or(1),
                "snapshot": true,
            }),
            ChannelKey::Book { .. } => json!({
                "channel": "book",
                "symbol": [sub.ws_symbol.clone().unwrap_or_default()],
                "depth": sub.depth.unwrap_or(10),
                "snapshot": true,
            }),
            ChannelKey::Executions => json!({
                "channel": "executions",
                "snapshot": false,
            }),
        }
    }

    async fn unsubscribe(&self, kind: SocketKind, key: &ChannelKey) {
        let removed = {
            let mut registry = self.socket(kind).registry.lock().await;
            registry.remove(key)
        };
        let Some(sub) = removed else { return };
        if sub.subscribed {
            tracing::debug!(?key, "unsubscribing active channel");
        }

        let mut params = self.subscribe_params(key, &sub);
        if matches!(key, ChannelKey::Executions) {
            match self.token.token(&self.rest).await {
                Ok(token) => params["token"] = Value::String(token),
                Err(e) => {
                    tracing::warn!(error = %e, "cannot token unsubscribe, dropping registration only");
                    return;
                }
            }
        }
        if let Some(obj) = params.as_object_mut() {
            obj.remove("snapshot");
        }
        let request = json!({ "method": "unsubscribe", "params": params });
        if let Err(e) = self.send_raw(kind, Message::Text(request.to_string())).await {
            tracing::warn!(?key, error = %e, "unsubscribe send failed");
        }
        if let ChannelKey::Book { symbol } = key {
            self.books.lock().await.remove(symbol);
        }
    }

    async fn on_disconnect(self: &Arc<Self>, kind: SocketKind) {
        let socket = self.socket(kind);
        *socket.outbound.lock().await = None;
        {
            let mut registry = socket.registry.lock().await;
            for sub in registry.values_mut() {
                sub.subscribed = false;
            }
            if registry.is_empty() {
                return;
            }
        }
        if !self.auto_reconnect.load(Ordering::SeqCst) {
            return;
        }

        tracing::warn!(?kind, "websocket closed, reconnecting in 1s");
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(RECONNECT_DELAY).await;
                if !inner.auto_reconnect.load(Ordering::SeqCst) {
                    return;
                }
                match inner.reconnect(kind).await {
                    Ok(()) => return,
                    Err(e) => {
                        tracing::warn!(?kind, error = %e, "reconnect failed, retrying");
                    }
                }
            }
        });
    }

    async fn reconnect(self: &Arc<Self>, kind: SocketKind) -> Result<()> {
        Self::ensure_connected(self, kind).await?;
        let keys: Vec<ChannelKey> = {
            let registry = self.socket(kind).registry.lock().await;
            registry.keys().cloned().collect()
        };
        for key in keys {
            // A reconnect near the token TTL must not replay a stale token.
            let fresh = matches!(key, ChannelKey::Executions);
            if let Err(e) = self.send_subscribe(kind, &key, fresh).await {
                tracing::warn!(?key, error = %e, "resubscribe failed");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Inbound dispatch
    // =========================================================================

    async fn dispatch(&self, kind: SocketKind, text: &str) {
        match classify(text) {
            Err(e) => tracing::debug!(error = %e, "dropping malformed frame"),
            Ok(InboundFrame::Ignored) => {}
            Ok(InboundFrame::Ack(ack)) => self.handle_ack(kind, ack).await,
            Ok(InboundFrame::Data {
                channel,
                frame_type,
                data,
            }) => match channel.as_str() {
                "ohlc" => self.handle_ohlc(kind, &data).await,
                "book" => self.handle_book(kind, &frame_type, &data).await,
                "executions" => self.handle_executions(kind, &data).await,
                other => tracing::debug!(channel = other, "ignoring unknown channel"),
            },
        }
    }

    async fn handle_ack(&self, kind: SocketKind, ack: MethodAck) {
        if ack.method != "subscribe" {
            tracing::debug!(method = %ack.method, success = ack.success, "ack");
            return;
        }
        let key = ack.result.as_ref().and_then(ack_key);
        let Some(key) = key else {
            if !ack.success {
                tracing::error!(error = ?ack.error, "subscribe rejected");
            }
            return;
        };
        let mut registry = self.socket(kind).registry.lock().await;
        if let Some(sub) = registry.get_mut(&key) {
            sub.subscribed = ack.success;
            if ack.success {
                tracing::info!(?key, "subscribed");
            } else {
                tracing::error!(?key, error = ?ack.error, "subscribe failed");
            }
        }
    }

    async fn handle_ohlc(&self, kind: SocketKind, data: &[Value]) {
        for item in data {
            let event = match decode_ohlc(item) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping bad ohlc item");
                    continue;
                }
            };
            let key = ChannelKey::Ohlc {
                symbol: event.symbol.clone(),
                interval: event.interval,
            };
            let registry = self.socket(kind).registry.lock().await;
            if let Some(sub) = registry.get(&key) {
                if sub.sender.send(GatewayEvent::Ohlc(event)).is_err() {
                    tracing::debug!(?key, "ohlc receiver dropped");
                }
            }
        }
    }

    async fn handle_book(&self, kind: SocketKind, frame_type: &str, data: &[Value]) {
        for item in data {
            let raw = match decode_book(item) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping bad book item");
                    continue;
                }
            };
            let symbol = canonical_symbol(&raw.symbol);
            let book = {
                let mut books = self.books.lock().await;
                books
                    .entry(symbol.clone())
                    .or_insert_with(|| Arc::new(RwLock::new(BookState::new())))
                    .clone()
            };
            {
                let mut book = book.write().await;
                if frame_type == "snapshot" {
                    book.apply_snapshot(&raw.bids, &raw.asks, raw.checksum);
                } else {
                    book.apply_update(BookSide::Bids, &raw.bids);
                    book.apply_update(BookSide::Asks, &raw.asks);
                    book.set_checksum(raw.checksum);
                }
            }
            let key = ChannelKey::Book {
                symbol: symbol.clone(),
            };
            let registry = self.socket(kind).registry.lock().await;
            if let Some(sub) = registry.get(&key) {
                if sub.sender.send(GatewayEvent::BookUpdate { symbol }).is_err() {
                    tracing::debug!(?key, "book receiver dropped");
                }
            }
        }
    }

    async fn handle_executions(&self, kind: SocketKind, data: &[Value]) {
        for item in data {
            match decode_execution(item) {
                Ok(Some(fill)) => {
                    let registry = self.socket(kind).registry.lock().await;
                    if let Some(sub) = registry.get(&ChannelKey::Executions) {
                        if sub.sender.send(GatewayEvent::Fill(fill)).is_err() {
                            tracing::debug!("executions receiver dropped");
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "dropping bad execution item"),
            }
        }
    }
}

/// Maps a subscribe-ack `result` back to its registry key.
fn ack_key(result: &Value) -> Option<ChannelKey> {
    let channel = result.get("channel").and_then(Value::as_str)?;
    match channel {
        "ohlc" => {
            let symbol = result.get("symbol").and_then(Value::as_str)?;
            let interval = result.get("interval").and_then(Value::as_u64)? as u32;
            Some(ChannelKey::Ohlc {
                symbol: canonical_symbol(symbol),
                interval,
            })
        }
        "book" => {
            let symbol = result.get("symbol").and_then(Value::as_str)?;
            Some(ChannelKey::Book {
                symbol: canonical_symbol(symbol),
            })
        }
        "executions" => Some(ChannelKey::Executions),
        _ => None,
    }
}

async fn write_loop(
    mut write: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = write.send(message).await {
            tracing::warn!(error = %e, "websocket send failed");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = write.close().await;
}

async fn read_loop(inner: Arc<WsInner>, kind: SocketKind, mut read: SplitStream<WsStream>) {
    while let Some(item) = read.next().await {
        match item {
            Ok(Message::Text(text)) => inner.dispatch(kind, &text).await,
            Ok(Message::Ping(payload)) => {
                let _ = inner.send_raw(kind, Message::Pong(payload)).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(?kind, error = %e, "websocket read failed");
                break;
            }
        }
    }
    inner.on_disconnect(kind).await;
}

// =============================================================================
// Tests
// =============================================================================
