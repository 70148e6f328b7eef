//! Transport connection lifecycle: websocket connect, heartbeats,
//! subscription registry, publish, and automatic reconnect.

use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::{future::BoxFuture, SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use shared::{
    error::TransportError,
    protocol::{inbox_destination, Frame},
};
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(4000);

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// ws:// or wss:// endpoint of the chat server.
    pub server_url: String,
    pub reconnect_delay: Duration,
    pub heartbeat: Duration,
}

impl ConnectionConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }
}

/// Handler invoked with the body of every MESSAGE frame delivered on a
/// subscribed destination. Invocations are serialized per connection, but a
/// handler must tolerate being called again while an outbound call it
/// triggered is still in flight.
pub type InboundHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

struct ConnectionState {
    writer: Option<mpsc::UnboundedSender<WsMessage>>,
    subscriptions: HashMap<String, InboundHandler>,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
    /// Bumped by connect()/close(); a reconnect loop from a superseded
    /// session observes the mismatch and stands down.
    generation: u64,
}

struct ConnectionInner {
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    connected: watch::Sender<bool>,
}

/// Owns the duplex channel to the chat server. One instance may feed any
/// number of subscribed handlers; it never interprets message bodies itself.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ConnectionInner>,
}

pub struct SubscriptionHandle {
    inner: Arc<ConnectionInner>,
    destination: String,
}

impl SubscriptionHandle {
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Drop the handler so no further inbound traffic reaches it, and tell
    /// the server to stop delivering on this destination.
    pub async fn unsubscribe(self) {
        let writer = {
            let mut state = self.inner.state.lock().await;
            state.subscriptions.remove(&self.destination);
            state.writer.clone()
        };
        if let Some(writer) = writer {
            let frame = Frame::Unsubscribe {
                destination: self.destination.clone(),
            };
            if let Err(err) = send_frame(&writer, &frame) {
                debug!(destination = %self.destination, "unsubscribe frame not sent: {err}");
            }
        }
    }
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(ConnectionInner {
                config,
                state: Mutex::new(ConnectionState {
                    writer: None,
                    subscriptions: HashMap::new(),
                    tasks: Vec::new(),
                    closed: false,
                    generation: 0,
                }),
                connected,
            }),
        }
    }

    /// Establish the websocket, arm heartbeats, and re-issue SUBSCRIBE
    /// frames for every registered destination.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let generation = {
            let mut state = self.inner.state.lock().await;
            state.closed = false;
            state.generation += 1;
            state.generation
        };
        establish(Arc::clone(&self.inner), generation).await
    }

    /// Register the single handler for a user's inbox destination. A second
    /// subscribe for the same user replaces the previous handler instead of
    /// stacking a duplicate.
    pub async fn subscribe(
        &self,
        self_id: &shared::domain::UserId,
        handler: InboundHandler,
    ) -> Result<SubscriptionHandle, TransportError> {
        let destination = inbox_destination(self_id);
        let (replaced, writer) = {
            let mut state = self.inner.state.lock().await;
            let replaced = state
                .subscriptions
                .insert(destination.clone(), handler)
                .is_some();
            (replaced, state.writer.clone())
        };
        if replaced {
            debug!(%destination, "replaced previous inbox handler");
        }
        // While disconnected the registration is kept and the SUBSCRIBE
        // frame goes out on the next (re)connect.
        if let Some(writer) = writer {
            send_frame(
                &writer,
                &Frame::Subscribe {
                    destination: destination.clone(),
                },
            )?;
        }
        Ok(SubscriptionHandle {
            inner: Arc::clone(&self.inner),
            destination,
        })
    }

    /// Serialize and send a payload. Fire-and-forget: there is no transport
    /// acknowledgment, and a publish while disconnected fails synchronously
    /// instead of being queued or silently dropped.
    pub async fn publish<T: Serialize>(
        &self,
        destination: &str,
        payload: &T,
    ) -> Result<(), TransportError> {
        let body =
            serde_json::to_value(payload).map_err(|err| TransportError::Send(err.to_string()))?;
        let writer = self
            .inner
            .state
            .lock()
            .await
            .writer
            .clone()
            .ok_or(TransportError::NotConnected)?;
        send_frame(
            &writer,
            &Frame::Send {
                destination: destination.to_string(),
                body,
            },
        )
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.lock().await.writer.is_some()
    }

    /// Observe connect/disconnect transitions.
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    /// Tear the connection down and suppress any further reconnects.
    /// Registered subscriptions are kept and re-armed by a later connect().
    pub async fn close(&self) {
        let mut state = self.inner.state.lock().await;
        state.closed = true;
        state.generation += 1;
        state.writer = None;
        for task in state.tasks.drain(..) {
            task.abort();
        }
        let _ = self.inner.connected.send(false);
        info!("chat transport closed");
    }
}

// Type-erased so the reconnect loop can await it without creating a
// recursive opaque-future cycle (establish -> reader task ->
// handle_disconnect -> establish).
fn establish(
    inner: Arc<ConnectionInner>,
    generation: u64,
) -> BoxFuture<'static, Result<(), TransportError>> {
    Box::pin(establish_inner(inner, generation))
}

async fn establish_inner(
    inner: Arc<ConnectionInner>,
    generation: u64,
) -> Result<(), TransportError> {
    let url = Url::parse(&inner.config.server_url).map_err(|err| TransportError::InvalidUrl {
        url: inner.config.server_url.clone(),
        reason: err.to_string(),
    })?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(TransportError::InvalidUrl {
            url: inner.config.server_url.clone(),
            reason: "scheme must be ws or wss".to_string(),
        });
    }

    let (socket, _) = connect_async(url.as_str())
        .await
        .map_err(|err| TransportError::Connect {
            url: inner.config.server_url.clone(),
            reason: err.to_string(),
        })?;
    let (mut sink, mut stream) = socket.split();

    let (writer, mut outbound) = mpsc::unbounded_channel::<WsMessage>();

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    let heartbeat_writer = writer.clone();
    let heartbeat = inner.config.heartbeat;
    let heartbeat_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if heartbeat_writer.send(WsMessage::Ping(Vec::new())).is_err() {
                break;
            }
        }
    });

    let resubscribe = {
        let mut state = inner.state.lock().await;
        if state.closed || state.generation != generation {
            writer_task.abort();
            heartbeat_task.abort();
            return Err(TransportError::NotConnected);
        }
        for task in state.tasks.drain(..) {
            task.abort();
        }
        state.writer = Some(writer.clone());
        state.tasks.push(writer_task);
        state.tasks.push(heartbeat_task);
        state.subscriptions.keys().cloned().collect::<Vec<_>>()
    };

    for destination in resubscribe {
        send_frame(&writer, &Frame::Subscribe { destination })?;
    }

    let reader_inner = Arc::clone(&inner);
    let pong_writer = writer.clone();
    let reader_task = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(WsMessage::Text(text)) => dispatch(&reader_inner, &text).await,
                Ok(WsMessage::Ping(payload)) => {
                    let _ = pong_writer.send(WsMessage::Pong(payload));
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!("chat transport receive failed: {err}");
                    break;
                }
            }
        }
        handle_disconnect(reader_inner, generation).await;
    });

    {
        let mut state = inner.state.lock().await;
        if state.generation == generation {
            state.tasks.push(reader_task);
        } else {
            reader_task.abort();
        }
    }

    let _ = inner.connected.send(true);
    info!(url = %inner.config.server_url, "chat transport connected");
    Ok(())
}

async fn dispatch(inner: &Arc<ConnectionInner>, text: &str) {
    match serde_json::from_str::<Frame>(text) {
        Ok(Frame::Message { destination, body }) => {
            let handler = {
                let state = inner.state.lock().await;
                state.subscriptions.get(&destination).cloned()
            };
            match handler {
                Some(handler) => handler(body).await,
                None => debug!(%destination, "no subscriber for inbound frame"),
            }
        }
        Ok(frame) => debug!("ignoring unexpected frame from server: {frame:?}"),
        Err(err) => warn!("ignoring malformed frame from server: {err}"),
    }
}

async fn handle_disconnect(inner: Arc<ConnectionInner>, generation: u64) {
    {
        let mut state = inner.state.lock().await;
        if state.generation != generation {
            // A newer connect()/close() superseded this session.
            return;
        }
        state.writer = None;
        if state.closed {
            return;
        }
    }
    let _ = inner.connected.send(false);
    warn!(
        delay_ms = inner.config.reconnect_delay.as_millis() as u64,
        "chat transport disconnected; scheduling reconnect"
    );

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(inner.config.reconnect_delay).await;
            {
                let state = inner.state.lock().await;
                if state.closed || state.generation != generation {
                    return;
                }
            }
            match establish(Arc::clone(&inner), generation).await {
                Ok(()) => {
                    info!("chat transport reconnected");
                    return;
                }
                Err(err) => warn!("chat transport reconnect failed: {err}"),
            }
        }
    });
}

fn send_frame(
    writer: &mpsc::UnboundedSender<WsMessage>,
    frame: &Frame,
) -> Result<(), TransportError> {
    let text = serde_json::to_string(frame).map_err(|err| TransportError::Send(err.to_string()))?;
    writer
        .send(WsMessage::Text(text))
        .map_err(|_| TransportError::NotConnected)
}
