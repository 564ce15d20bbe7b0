//! Delivery model for Tether.
//!
//! Outbound traffic is addressed with a [`Route`]; the operation a caller
//! invokes picks the route, never the payload. Inbound traffic arrives as an
//! [`InboundEvent`] built by the backend.

use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;

/// How a message was addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    /// Published to a channel; every member receives it.
    Broadcast,
    /// Sent to one participant.
    Directed,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Broadcast => f.write_str("broadcast"),
            DeliveryMode::Directed => f.write_str("directed"),
        }
    }
}

/// Outbound address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    /// A named channel.
    Channel(String),
    /// A participant identifier.
    Peer(String),
}

impl Route {
    /// The delivery mode this route implies.
    #[must_use]
    pub fn mode(&self) -> DeliveryMode {
        match self {
            Route::Channel(_) => DeliveryMode::Broadcast,
            Route::Peer(_) => DeliveryMode::Directed,
        }
    }

    /// The channel name or participant id.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Route::Channel(name) | Route::Peer(name) => name,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Channel(name) => write!(f, "channel:{name}"),
            Route::Peer(id) => write!(f, "peer:{id}"),
        }
    }
}

/// A message delivered to this client.
///
/// Events are handed to the handler by reference and dropped once it
/// returns; clone what you need to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Participant that sent the message.
    pub sender_id: String,
    /// Message payload.
    pub payload: Bytes,
    /// How the sender addressed it.
    pub mode: DeliveryMode,
    /// Channel a broadcast arrived on. `None` for directed messages.
    pub channel: Option<String>,
}

impl InboundEvent {
    /// A broadcast received on `channel`.
    #[must_use]
    pub fn broadcast(
        sender_id: impl Into<String>,
        channel: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            payload: payload.into(),
            mode: DeliveryMode::Broadcast,
            channel: Some(channel.into()),
        }
    }

    /// A directed message from `sender_id`.
    #[must_use]
    pub fn directed(sender_id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            sender_id: sender_id.into(),
            payload: payload.into(),
            mode: DeliveryMode::Directed,
            channel: None,
        }
    }

    /// Payload as text, replacing invalid UTF-8.
    #[must_use]
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_mode() {
        assert_eq!(Route::Channel("room1".into()).mode(), DeliveryMode::Broadcast);
        assert_eq!(Route::Peer("peer42".into()).mode(), DeliveryMode::Directed);
        assert_eq!(Route::Peer("peer42".into()).target(), "peer42");
        assert_eq!(Route::Channel("room1".into()).to_string(), "channel:room1");
    }

    #[test]
    fn test_inbound_constructors() {
        let event = InboundEvent::broadcast("u1", "room1", "hello");
        assert_eq!(event.mode, DeliveryMode::Broadcast);
        assert_eq!(event.channel.as_deref(), Some("room1"));
        assert_eq!(event.payload_str(), "hello");

        let event = InboundEvent::directed("peer42", b"ping".to_vec());
        assert_eq!(event.mode, DeliveryMode::Directed);
        assert!(event.channel.is_none());
        assert_eq!(event.payload_size(), 4);
    }

    #[test]
    fn test_payload_str_is_lossy() {
        let event = InboundEvent::directed("p", vec![0xff, b'a']);
        assert_eq!(event.payload_str(), "\u{fffd}a");
    }
}
