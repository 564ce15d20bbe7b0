//! Connection handlers for the relay.
//!
//! Each WebSocket connection runs in one task. A subscription spawns a
//! forwarder that filters channel traffic into the connection's outbound
//! queue, and the same queue is the user's inbox for directed publishes.

use crate::channel::validate_name;
use crate::config::Config;
use crate::message::Envelope;
use crate::metrics;
use crate::router::{Router as RelayRouter, RouterConfig, RouterError};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use bytes::{Bytes, BytesMut};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tether_protocol::{code, codec, ChannelType, Frame, Version, PROTOCOL_VERSION};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Shared relay state.
pub struct AppState {
    /// The message router.
    pub router: RelayRouter,
    /// Relay configuration.
    pub config: Config,
    connections: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let router_config = RouterConfig {
            max_channels: config.limits.max_channels,
            max_subscriptions_per_connection: config.limits.max_subscriptions_per_connection,
            channel_capacity: 4096,
            auto_delete_empty_channels: true,
        };

        Self {
            router: RelayRouter::with_config(router_config),
            config,
            connections: AtomicUsize::new(0),
        }
    }

    /// Number of open WebSocket connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }
}

/// Bind the configured address and run the relay.
///
/// # Errors
///
/// Returns an error if the address is invalid or the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::install(config.metrics.port) {
            error!("Failed to start metrics exporter: {:#}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Tether relay listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, Arc::new(AppState::new(config))).await
}

/// Serve the relay on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server stops with an I/O error.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let ws_path = state.config.transport.websocket_path.clone();
    let app = Router::new()
        .route(&ws_path, get(ws_handler))
        .with_state(state);

    axum::serve(listener, app).await?;

    Ok(())
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    metrics::connections(state.connections.fetch_add(1, Ordering::AcqRel) + 1);

    let connection_id = format!("conn_{}", NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed));
    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut inbox) = mpsc::unbounded_channel::<Arc<Envelope>>();
    let mut connection = Connection::new(connection_id, outbound);

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    'conn: loop {
        tokio::select! {
            biased;

            // Channel traffic and directed publishes for this connection
            Some(envelope) = inbox.recv() => {
                if send_frame(&mut sender, &envelope.to_frame()).await.is_err() {
                    break;
                }
                metrics::delivered(&envelope);
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_from(&mut read_buffer) {
                                Ok(Some(frame)) => {
                                    if let Some(response) = connection.handle_frame(frame, &state) {
                                        if send_frame(&mut sender, &response).await.is_err() {
                                            break 'conn;
                                        }
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(connection = %connection.id, error = %e, "Undecodable frame");
                                    metrics::frame_error("decode");
                                    read_buffer.clear();
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Text(_))) => {
                        debug!(connection = %connection.id, "Ignoring text message");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection.id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection.id, error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!(connection = %connection.id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    connection.release(&state);
    metrics::connections(state.connections.fetch_sub(1, Ordering::AcqRel).saturating_sub(1));

    debug!(connection = %connection.id, "WebSocket disconnected");
}

/// A request refused with a protocol result code.
#[derive(Debug)]
struct Rejection {
    code: u16,
    reason: String,
}

fn reject(code: u16, reason: impl Into<String>) -> Rejection {
    Rejection {
        code,
        reason: reason.into(),
    }
}

impl From<RouterError> for Rejection {
    fn from(e: RouterError) -> Self {
        reject(e.code(), e.to_string())
    }
}

type Outcome = std::result::Result<(), Rejection>;

/// Per-connection session state.
struct Connection {
    id: String,
    user_id: Option<String>,
    subscriptions: HashMap<String, JoinHandle<()>>,
    outbound: mpsc::UnboundedSender<Arc<Envelope>>,
}

impl Connection {
    fn new(id: String, outbound: mpsc::UnboundedSender<Arc<Envelope>>) -> Self {
        Self {
            id,
            user_id: None,
            subscriptions: HashMap::new(),
            outbound,
        }
    }

    fn user(&self) -> std::result::Result<&str, Rejection> {
        self.user_id
            .as_deref()
            .ok_or_else(|| reject(code::NOT_LOGGED_IN, "login first"))
    }

    /// Apply one inbound frame, returning the frame to answer with.
    fn handle_frame(&mut self, frame: Frame, state: &AppState) -> Option<Frame> {
        let op = frame.frame_type();
        let (id, outcome) = match frame {
            Frame::Login {
                id,
                version,
                app_id,
                user_id,
                token,
            } => (id, self.login(state, version, &app_id, &user_id, &token)),
            Frame::Logout { id } => (id, self.logout(state)),
            Frame::Subscribe {
                id,
                channel,
                with_presence,
            } => (id, self.subscribe(state, &channel, with_presence)),
            Frame::Unsubscribe { id, channel } => (id, self.unsubscribe(state, &channel)),
            Frame::Publish {
                id,
                channel,
                channel_type,
                payload,
            } => (id, self.publish(state, channel, channel_type, payload)),
            Frame::RenewToken { id, token } => (id, self.renew_token(&token)),
            Frame::Ping { timestamp } => return Some(Frame::pong(timestamp)),
            Frame::Pong { .. } => return None,
            other => {
                warn!(connection = %self.id, frame_type = ?other.frame_type(), "Unexpected frame type");
                metrics::frame_error("unexpected_frame");
                return None;
            }
        };

        Some(match outcome {
            Ok(()) => {
                metrics::request(op, code::OK);
                Frame::ok(id, op)
            }
            Err(rejection) => {
                debug!(
                    connection = %self.id,
                    op = ?op,
                    code = rejection.code,
                    reason = %rejection.reason,
                    "Request refused"
                );
                metrics::request(op, rejection.code);
                Frame::failure(id, op, rejection.code, rejection.reason)
            }
        })
    }

    fn login(
        &mut self,
        state: &AppState,
        version: u8,
        app_id: &str,
        user_id: &str,
        token: &str,
    ) -> Outcome {
        let version = Version::from_byte(version);
        if !PROTOCOL_VERSION.is_compatible_with(&version) {
            return Err(reject(
                code::VERSION_MISMATCH,
                format!("relay speaks {PROTOCOL_VERSION}, client sent {version}"),
            ));
        }
        if let Some(current) = &self.user_id {
            return Err(reject(
                code::ALREADY_LOGGED_IN,
                format!("already logged in as {current}"),
            ));
        }
        if !state.config.auth.accepts_app(app_id) {
            return Err(reject(
                code::INVALID_APP_ID,
                format!("unknown app id {app_id}"),
            ));
        }
        if state.config.auth.require_token && token.is_empty() {
            return Err(reject(code::INVALID_TOKEN, "token required"));
        }

        if let Some(previous) = state
            .router
            .register_user(user_id, &self.id, self.outbound.clone())?
        {
            info!(user = %user_id, connection = %self.id, replaced = %previous, "Login replaced an older session");
        }
        info!(connection = %self.id, user = %user_id, app = %app_id, "Logged in");

        self.user_id = Some(user_id.to_string());
        metrics::occupancy(&state.router.stats());
        Ok(())
    }

    fn logout(&mut self, state: &AppState) -> Outcome {
        let user = self.user()?.to_string();
        self.release(state);
        info!(connection = %self.id, user = %user, "Logged out");
        Ok(())
    }

    fn subscribe(&mut self, state: &AppState, channel: &str, with_presence: bool) -> Outcome {
        let user = self.user()?.to_string();
        let rx = state.router.subscribe(&self.id, &user, channel)?;

        let handle = tokio::spawn(forward(
            rx,
            self.outbound.clone(),
            self.id.clone(),
            user,
            with_presence,
        ));
        self.subscriptions.insert(channel.to_string(), handle);

        metrics::occupancy(&state.router.stats());
        Ok(())
    }

    fn unsubscribe(&mut self, state: &AppState, channel: &str) -> Outcome {
        self.user()?;
        state.router.unsubscribe(&self.id, channel)?;

        if let Some(handle) = self.subscriptions.remove(channel) {
            handle.abort();
        }
        metrics::occupancy(&state.router.stats());
        Ok(())
    }

    fn publish(
        &mut self,
        state: &AppState,
        channel: String,
        channel_type: ChannelType,
        payload: Vec<u8>,
    ) -> Outcome {
        let user = self.user()?.to_string();
        let limit = state.config.limits.max_message_size;
        let size = payload.len();
        if size > limit {
            return Err(reject(
                code::PAYLOAD_TOO_LARGE,
                format!("payload of {size} bytes exceeds {limit}"),
            ));
        }
        let payload = Bytes::from(payload);

        match channel_type {
            ChannelType::Message => {
                validate_name(&channel).map_err(RouterError::InvalidName)?;
                let recipients = state.router.publish(
                    &channel,
                    Envelope::Broadcast {
                        source: self.id.clone(),
                        publisher: user,
                        channel: channel.clone(),
                        payload,
                    },
                );
                debug!(connection = %self.id, channel = %channel, recipients, "Published");
            }
            ChannelType::User => {
                state.router.send_to_user(
                    &channel,
                    Envelope::Direct {
                        publisher: user,
                        target: channel.clone(),
                        payload,
                    },
                )?;
                debug!(connection = %self.id, target = %channel, "Sent directed message");
            }
        }
        Ok(())
    }

    fn renew_token(&self, token: &str) -> Outcome {
        self.user()?;
        if token.is_empty() {
            return Err(reject(code::INVALID_TOKEN, "token cannot be empty"));
        }
        debug!(connection = %self.id, "Token renewed");
        Ok(())
    }

    /// Drop every subscription and the user's session.
    fn release(&mut self, state: &AppState) {
        for (_, handle) in self.subscriptions.drain() {
            handle.abort();
        }
        state.router.unsubscribe_all(&self.id);
        if let Some(user) = self.user_id.take() {
            state.router.unregister_user(&user, &self.id);
        }
        metrics::occupancy(&state.router.stats());
    }
}

/// Copy channel traffic into a connection's outbound queue.
///
/// A connection never hears its own broadcasts or its own presence, and
/// hears other users' presence only if it asked for it.
async fn forward(
    mut rx: broadcast::Receiver<Arc<Envelope>>,
    outbound: mpsc::UnboundedSender<Arc<Envelope>>,
    connection_id: String,
    user_id: String,
    with_presence: bool,
) {
    loop {
        match rx.recv().await {
            Ok(envelope) => {
                let wanted = match envelope.as_ref() {
                    Envelope::Broadcast { source, .. } => source != &connection_id,
                    Envelope::Presence { user_id: who, .. } => with_presence && who != &user_id,
                    Envelope::Direct { .. } => true,
                };
                if wanted && outbound.send(envelope).is_err() {
                    break; // Connection gone
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(connection = %connection_id, skipped, "Subscriber lagged behind channel");
                metrics::frame_error("lagged");
            }
        }
    }
}

/// Send a frame to the WebSocket.
async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<()> {
    let data = codec::encode(frame)?;
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}
