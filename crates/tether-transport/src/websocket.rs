//! WebSocket link implementation.
//!
//! The link owns a dedicated thread running a single-threaded tokio runtime.
//! Frames sent by the caller go through a bounded queue; inbound frames and
//! state changes are reported to the [`LinkHandler`] on the link thread.

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tether_protocol::{codec, Frame, ProtocolError};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use crate::traits::{LinkConnector, LinkEvent, LinkHandler, LinkState, ServiceLink, TransportError};

/// WebSocket link configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Service URL, e.g. `ws://127.0.0.1:8080/ws`.
    pub endpoint: String,
    /// Maximum message size in bytes, both directions.
    pub max_message_size: usize,
    /// Frames that may wait in the outbound queue.
    pub queue_capacity: usize,
    /// How long to wait for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Interval between keep-alive pings, if any.
    pub heartbeat_interval: Option<Duration>,
}

impl WebSocketConfig {
    /// Defaults for `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_message_size: 64 * 1024, // 64 KB
            queue_capacity: 1024,
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self::new("ws://127.0.0.1:8080/ws")
    }
}

/// Opens [`WebSocketLink`]s.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    /// A connector using `config`.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

impl LinkConnector for WebSocketConnector {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn connect(&self, handler: Arc<dyn LinkHandler>) -> Result<Box<dyn ServiceLink>, TransportError> {
        let link = WebSocketLink::connect(self.config.clone(), handler)?;
        Ok(Box::new(link))
    }
}

/// A link to the service over one WebSocket connection.
pub struct WebSocketLink {
    endpoint: String,
    commands: Option<mpsc::Sender<Bytes>>,
    thread: Option<thread::JoinHandle<()>>,
    open: Arc<AtomicBool>,
    max_message_size: usize,
}

impl WebSocketLink {
    /// Connect to `config.endpoint`, waiting at most `connect_timeout` for
    /// the handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the link thread cannot start, the service cannot
    /// be reached, or the handshake times out.
    pub fn connect(
        config: WebSocketConfig,
        handler: Arc<dyn LinkHandler>,
    ) -> Result<Self, TransportError> {
        let (commands, queue) = mpsc::channel(config.queue_capacity.max(1));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let open = Arc::new(AtomicBool::new(false));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let thread = {
            let config = config.clone();
            let open = Arc::clone(&open);
            thread::Builder::new()
                .name("tether-link".into())
                .spawn(move || runtime.block_on(run(config, handler, queue, ready_tx, open)))?
        };

        match ready_rx.recv_timeout(config.connect_timeout) {
            Ok(Ok(())) => Ok(Self {
                endpoint: config.endpoint,
                commands: Some(commands),
                thread: Some(thread),
                open,
                max_message_size: config.max_message_size,
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                // A handshake finishing now sees the dropped receiver and
                // shuts the socket instead of announcing the link.
                drop(ready_rx);
                drop(commands);
                if thread.join().is_err() {
                    warn!(endpoint = %config.endpoint, "Link thread panicked");
                }
                Err(TransportError::Timeout)
            }
        }
    }

    /// Service URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ServiceLink for WebSocketLink {
    fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let commands = self.commands.as_ref().ok_or(TransportError::ConnectionClosed)?;
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let data = codec::encode(&frame)?;
        if data.len() > self.max_message_size {
            return Err(TransportError::Protocol(ProtocolError::FrameTooLarge(
                data.len(),
            )));
        }

        commands.try_send(data).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    fn close(&mut self) {
        // Dropping the sender lets the link thread flush and exit.
        self.commands.take();

        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            debug!(endpoint = %self.endpoint, "Link closed from its own thread");
            return;
        }
        if thread.join().is_err() {
            warn!(endpoint = %self.endpoint, "Link thread panicked");
        }
        info!(endpoint = %self.endpoint, "Link released");
    }

    fn is_open(&self) -> bool {
        self.commands.is_some() && self.open.load(Ordering::SeqCst)
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        self.close();
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn run(
    config: WebSocketConfig,
    handler: Arc<dyn LinkHandler>,
    mut queue: mpsc::Receiver<Bytes>,
    ready: std_mpsc::SyncSender<Result<(), TransportError>>,
    open: Arc<AtomicBool>,
) {
    let connect = tokio::time::timeout(config.connect_timeout, connect_async(config.endpoint.as_str()));
    let stream = match connect.await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(err)) => {
            let _ = ready.send(Err(TransportError::ConnectFailed(err.to_string())));
            return;
        }
        Err(_) => {
            let _ = ready.send(Err(TransportError::Timeout));
            return;
        }
    };

    if ready.send(Ok(())).is_err() {
        debug!(endpoint = %config.endpoint, "Handshake finished after the caller gave up");
        let mut stream = stream;
        if let Err(err) = stream.close(None).await {
            debug!(error = %err, "Close handshake failed");
        }
        return;
    }
    open.store(true, Ordering::SeqCst);
    info!(endpoint = %config.endpoint, "Link connected");
    handler.on_event(LinkEvent::State(LinkState::Connected));

    let (mut sink, mut source) = stream.split();
    let mut read_buffer = BytesMut::with_capacity(4096);
    let mut heartbeat = config
        .heartbeat_interval
        .map(|period| tokio::time::interval_at(Instant::now() + period, period));

    let reason = loop {
        tokio::select! {
            command = queue.recv() => match command {
                Some(data) => {
                    trace!(bytes = data.len(), "Link sending frame");
                    if let Err(err) = sink.send(Message::Binary(data.to_vec())).await {
                        break Some(format!("send failed: {err}"));
                    }
                }
                None => {
                    debug!(endpoint = %config.endpoint, "Link closing");
                    if let Err(err) = sink.close().await {
                        debug!(error = %err, "Close handshake failed");
                    }
                    break None;
                }
            },

            message = source.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    if data.len() > config.max_message_size {
                        warn!(
                            "Message too large: {} bytes (max: {})",
                            data.len(),
                            config.max_message_size
                        );
                        continue;
                    }
                    read_buffer.extend_from_slice(&data);
                    deliver_frames(&mut read_buffer, handler.as_ref());
                }
                Some(Ok(Message::Text(text))) => {
                    // For compatibility, treat text as binary
                    read_buffer.extend_from_slice(text.as_bytes());
                    deliver_frames(&mut read_buffer, handler.as_ref());
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(err) = sink.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", err);
                    }
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    break Some("closed by service".to_string());
                }
                Some(Err(err)) => {
                    break Some(err.to_string());
                }
            },

            () = tick(&mut heartbeat) => {
                match codec::encode(&Frame::ping()) {
                    Ok(data) => {
                        if let Err(err) = sink.send(Message::Binary(data.to_vec())).await {
                            break Some(format!("heartbeat failed: {err}"));
                        }
                    }
                    Err(err) => warn!(error = %err, "Failed to encode heartbeat"),
                }
            }
        }
    };

    open.store(false, Ordering::SeqCst);
    match &reason {
        Some(reason) => warn!(endpoint = %config.endpoint, %reason, "Link lost"),
        None => debug!(endpoint = %config.endpoint, "Link closed"),
    }
    handler.on_event(LinkEvent::State(LinkState::Disconnected { reason }));
}

fn deliver_frames(buffer: &mut BytesMut, handler: &dyn LinkHandler) {
    loop {
        match codec::decode_from(buffer) {
            Ok(Some(frame)) => handler.on_event(LinkEvent::Frame(frame)),
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "Discarding undecodable data");
                buffer.clear();
                return;
            }
        }
    }
}
