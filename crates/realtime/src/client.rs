use crate::channel::{DatabaseChanges, Subscription};
use crate::error::RealtimeError;
use crate::message::{ChangeEvent, ChannelEvent, RealtimeMessage};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct RealtimeClientOptions {
    pub heartbeat_interval: Duration,
    /// Buffered changes per subscription before the reader waits
    pub channel_capacity: usize,
}

impl Default for RealtimeClientOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            channel_capacity: 64,
        }
    }
}

struct ChannelEntry {
    changes: DatabaseChanges,
    sender: mpsc::Sender<ChangeEvent>,
}

pub(crate) struct Inner {
    url: String,
    key: String,
    options: RealtimeClientOptions,
    next_ref: AtomicU32,
    access_token: Mutex<Option<String>>,
    channels: Mutex<HashMap<String, ChannelEntry>>,
    socket: Mutex<Option<mpsc::Sender<Message>>>,
    state: Mutex<ConnectionState>,
    state_change: broadcast::Sender<ConnectionState>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    pub(crate) fn frame(&self, topic: &str, event: ChannelEvent, payload: serde_json::Value) -> Message {
        let message = json!({
            "topic": topic,
            "event": event.to_string(),
            "payload": payload,
            "ref": self.next_ref(),
        });
        Message::Text(message.to_string())
    }

    pub(crate) fn socket_sender(&self) -> Option<mpsc::Sender<Message>> {
        lock(&self.socket).clone()
    }

    pub(crate) fn forget_channel(&self, topic: &str) {
        if lock(&self.channels).remove(topic).is_some() {
            debug!("left channel {}", topic);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = lock(&self.state);
        if *current != state {
            info!("realtime state {:?} -> {:?}", *current, state);
            *current = state;
            let _ = self.state_change.send(state);
        }
    }

    fn connection_lost(&self) {
        *lock(&self.socket) = None;
        // Dropping the senders ends every subscriber's stream.
        lock(&self.channels).clear();
        self.set_state(ConnectionState::Disconnected);
    }

    async fn dispatch(&self, message: RealtimeMessage) {
        match message.event {
            ChannelEvent::PostgresChanges => {
                let Some(change) = ChangeEvent::from_payload(&message.payload) else {
                    warn!("unparseable change on {}: {}", message.topic, message.payload);
                    return;
                };
                let sender = {
                    let channels = lock(&self.channels);
                    match channels.get(&message.topic) {
                        Some(entry) if entry.changes.matches(&change) => Some(entry.sender.clone()),
                        Some(_) => None,
                        None => {
                            trace!("change for unsubscribed topic {}", message.topic);
                            None
                        }
                    }
                };
                if let Some(sender) = sender {
                    if sender.send(change).await.is_err() {
                        self.forget_channel(&message.topic);
                    }
                }
            }
            ChannelEvent::PhoenixReply => {
                let status = message.payload.get("status").and_then(|s| s.as_str());
                if status != Some("ok") {
                    warn!("{} replied {:?}: {}", message.topic, status, message.payload);
                }
            }
            ChannelEvent::PhoenixError => {
                error!("channel {} errored: {}", message.topic, message.payload);
            }
            ChannelEvent::PhoenixClose => debug!("channel {} closed", message.topic),
            other => trace!("ignoring {} on {}", other, message.topic),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in [lock(&self.reader).take(), lock(&self.writer).take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

/// Realtime client. Clones share one socket.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl RealtimeClient {
    pub fn new(url: &str, key: &str) -> Self {
        Self::new_with_options(url, key, RealtimeClientOptions::default())
    }

    pub fn new_with_options(url: &str, key: &str, options: RealtimeClientOptions) -> Self {
        let (state_change, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                url: url.to_string(),
                key: key.to_string(),
                options,
                next_ref: AtomicU32::new(1),
                access_token: Mutex::new(None),
                channels: Mutex::new(HashMap::new()),
                socket: Mutex::new(None),
                state: Mutex::new(ConnectionState::Disconnected),
                state_change,
                reader: Mutex::new(None),
                writer: Mutex::new(None),
            }),
        }
    }

    /// Set the user token sent with joins. Pushed to joined channels when connected.
    pub async fn set_auth(&self, token: Option<String>) {
        info!("Setting realtime auth token (is_some: {})", token.is_some());
        *lock(&self.inner.access_token) = token.clone();

        let Some(token) = token else { return };
        let Some(tx) = self.inner.socket_sender() else { return };
        let topics: Vec<String> = lock(&self.inner.channels).keys().cloned().collect();
        for topic in topics {
            let frame = self.inner.frame(
                &topic,
                ChannelEvent::AccessToken,
                json!({ "access_token": token }),
            );
            if tx.send(frame).await.is_err() {
                break;
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    pub fn on_state_change(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.state_change.subscribe()
    }

    fn websocket_url(&self) -> Result<Url, RealtimeError> {
        let mut url = Url::parse(&self.inner.url)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            s => {
                return Err(RealtimeError::ConnectionError(format!(
                    "Unsupported URL scheme: {}",
                    s
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| RealtimeError::ConnectionError("cannot switch URL scheme".to_string()))?;
        url.set_path("/realtime/v1/websocket");
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", &self.inner.key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }

    /// Open the socket if it is not open yet.
    pub async fn connect(&self) -> Result<(), RealtimeError> {
        if self.inner.socket_sender().is_some() {
            return Ok(());
        }
        let ws_url = self.websocket_url()?;
        self.inner.set_state(ConnectionState::Connecting);
        debug!("connecting to {}", ws_url.path());

        let ws_stream = match connect_async(ws_url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(RealtimeError::ConnectionError(format!(
                    "WebSocket connection failed: {}",
                    e
                )));
            }
        };
        let (mut write, mut read) = ws_stream.split();
        let (socket_tx, mut socket_rx) = mpsc::channel::<Message>(100);
        *lock(&self.inner.socket) = Some(socket_tx.clone());
        self.inner.set_state(ConnectionState::Connected);

        let writer = tokio::spawn(async move {
            while let Some(message) = socket_rx.recv().await {
                if let Err(e) = write.send(message).await {
                    error!("WebSocket send error: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
            debug!("writer task finished");
        });

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.options.heartbeat_interval;
        let reader = tokio::spawn(async move {
            let mut heartbeat = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    incoming = read.next() => {
                        let Some(inner) = weak.upgrade() else { break };
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<RealtimeMessage>(&text) {
                                    Ok(message) => inner.dispatch(message).await,
                                    Err(e) => warn!("unparseable frame: {} ({})", e, text),
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                debug!("server closed socket: {:?}", frame);
                                inner.connection_lost();
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("WebSocket read error: {}", e);
                                inner.connection_lost();
                                break;
                            }
                            None => {
                                inner.connection_lost();
                                break;
                            }
                        }
                    }
                    _ = heartbeat.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let frame = inner.frame("phoenix", ChannelEvent::Heartbeat, json!({}));
                        if socket_tx.send(frame).await.is_err() {
                            inner.connection_lost();
                            break;
                        }
                    }
                }
            }
            debug!("reader task finished");
        });

        *lock(&self.inner.writer) = Some(writer);
        *lock(&self.inner.reader) = Some(reader);
        Ok(())
    }

    /// Join `realtime:{name}` and stream the changes selected by `changes`.
    pub async fn subscribe(
        &self,
        name: &str,
        changes: DatabaseChanges,
    ) -> Result<Subscription, RealtimeError> {
        self.connect().await?;
        let topic = format!("realtime:{}", name);

        let (sender, receiver) = mpsc::channel(self.inner.options.channel_capacity.max(1));
        let binding = changes.to_binding();
        {
            let mut channels = lock(&self.inner.channels);
            if channels.contains_key(&topic) {
                return Err(RealtimeError::SubscriptionError(format!(
                    "already subscribed to {}",
                    topic
                )));
            }
            channels.insert(topic.clone(), ChannelEntry { changes, sender });
        }

        let token = lock(&self.inner.access_token).clone();
        let mut payload = json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": [binding],
            }
        });
        if let Some(token) = token {
            payload["access_token"] = json!(token);
        }

        let frame = self.inner.frame(&topic, ChannelEvent::PhoenixJoin, payload);
        let tx = self.inner.socket_sender().ok_or_else(|| {
            RealtimeError::ConnectionError("socket closed before join".to_string())
        })?;
        if tx.send(frame).await.is_err() {
            self.inner.forget_channel(&topic);
            return Err(RealtimeError::ConnectionError(
                "socket closed before join".to_string(),
            ));
        }
        info!("joined {}", topic);
        Ok(Subscription::new(topic, receiver, self.inner.clone()))
    }

    /// Close the socket. Open subscriptions end.
    pub async fn disconnect(&self) {
        // The reader holds a sender for heartbeats; stop it so the writer drains and closes.
        if let Some(reader) = lock(&self.inner.reader).take() {
            reader.abort();
        }
        let sender = lock(&self.inner.socket).take();
        drop(sender);
        lock(&self.inner.channels).clear();
        self.inner.set_state(ConnectionState::Disconnected);
        info!("realtime disconnected");
    }
}
