//! Link abstraction traits.
//!
//! These traits describe the external client a vendor-backed backend drives,
//! so the backend is independent of how frames reach the service.

use std::fmt;
use std::sync::Arc;
use tether_protocol::Frame;
use thiserror::Error;

/// Link errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The link was closed.
    #[error("Link closed")]
    ConnectionClosed,

    /// Connecting took longer than allowed.
    #[error("Connect timed out")]
    Timeout,

    /// Could not reach the service.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// The outbound queue is full.
    #[error("Outbound queue full")]
    QueueFull,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] tether_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Link connection state, as reported to the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Connected to the service.
    Connected,
    /// The connection ended. `reason` is set when it ended abnormally.
    Disconnected {
        /// What went wrong, if anything.
        reason: Option<String>,
    },
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Connected => f.write_str("connected"),
            LinkState::Disconnected { reason: None } => f.write_str("disconnected"),
            LinkState::Disconnected {
                reason: Some(reason),
            } => write!(f, "disconnected ({reason})"),
        }
    }
}

/// Something the link observed.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A frame arrived from the service.
    Frame(Frame),
    /// The connection state changed.
    State(LinkState),
}

/// Receives link events, on the link's own thread.
pub trait LinkHandler: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: LinkEvent);
}

impl<F> LinkHandler for F
where
    F: Fn(LinkEvent) + Send + Sync,
{
    fn on_event(&self, event: LinkEvent) {
        self(event);
    }
}

/// An open link to the messaging service.
///
/// `send` enqueues and returns; it never waits for the network. Results for
/// requests arrive later as `Result` frames.
pub trait ServiceLink: Send {
    /// Queue `frame` for the service.
    fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Flush queued frames and release the link. Idempotent; the handler
    /// receives nothing once this returns, unless called from the handler
    /// itself.
    fn close(&mut self);

    /// Whether the link can still carry frames.
    fn is_open(&self) -> bool;
}

/// Creates links.
pub trait LinkConnector: Send + Sync {
    /// Short name for logs (e.g. "websocket").
    fn name(&self) -> &'static str;

    /// Open a link reporting to `handler`.
    fn connect(&self, handler: Arc<dyn LinkHandler>) -> Result<Box<dyn ServiceLink>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_state_display() {
        assert_eq!(LinkState::Connected.to_string(), "connected");
        assert_eq!(
            LinkState::Disconnected {
                reason: Some("reset".into())
            }
            .to_string(),
            "disconnected (reset)"
        );
    }

    #[test]
    fn test_closure_handler() {
        let seen = std::sync::Mutex::new(Vec::new());
        let handler = |event: LinkEvent| seen.lock().unwrap().push(event);
        handler.on_event(LinkEvent::State(LinkState::Connected));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
