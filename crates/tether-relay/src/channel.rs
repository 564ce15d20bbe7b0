//! Channel abstraction for the relay.
//!
//! Channels are named rooms where connections subscribe to receive
//! broadcasts and presence notices.

use crate::message::Envelope;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Maximum channel or user name length.
pub const MAX_NAME_LENGTH: usize = 256;

/// Default broadcast channel capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A channel identifier.
pub type ChannelId = String;

/// Validate a channel or user name.
///
/// # Errors
///
/// Returns an error message if the name is invalid.
pub fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Name cannot be empty");
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err("Name too long");
    }
    if name.starts_with('$') {
        return Err("Names starting with '$' are reserved");
    }
    // Check for valid ASCII printable characters
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Name contains invalid characters");
    }
    Ok(())
}

/// A channel for pub/sub messaging.
#[derive(Debug)]
pub struct Channel {
    name: ChannelId,
    sender: broadcast::Sender<Arc<Envelope>>,
    subscribers: HashSet<String>,
}

impl Channel {
    /// Create a new channel.
    #[must_use]
    pub fn new(name: impl Into<ChannelId>) -> Self {
        Self::with_capacity(name, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new channel with a specific broadcast capacity.
    #[must_use]
    pub fn with_capacity(name: impl Into<ChannelId>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            sender,
            subscribers: HashSet::new(),
        }
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if a connection is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, connection_id: &str) -> bool {
        self.subscribers.contains(connection_id)
    }

    /// Subscribe a connection to this channel.
    pub fn subscribe(&mut self, connection_id: impl Into<String>) -> broadcast::Receiver<Arc<Envelope>> {
        let conn_id = connection_id.into();
        debug!(channel = %self.name, connection = %conn_id, "Connection subscribed");
        self.subscribers.insert(conn_id);
        self.sender.subscribe()
    }

    /// Unsubscribe a connection. Returns `true` if it was subscribed.
    pub fn unsubscribe(&mut self, connection_id: &str) -> bool {
        let removed = self.subscribers.remove(connection_id);
        if removed {
            debug!(channel = %self.name, connection = %connection_id, "Connection unsubscribed");
        }
        removed
    }

    /// Broadcast to every receiver. Returns how many received it.
    pub fn publish(&self, envelope: Envelope) -> usize {
        trace!(channel = %self.name, "Publishing envelope");
        self.sender.send(Arc::new(envelope)).unwrap_or_default()
    }

    /// Check if the channel has no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_channel_subscribe_unsubscribe() {
        let mut channel = Channel::new("room1");

        let _rx = channel.subscribe("conn-1");
        let _rx2 = channel.subscribe("conn-2");
        assert_eq!(channel.subscriber_count(), 2);
        assert!(channel.is_subscribed("conn-1"));

        assert!(channel.unsubscribe("conn-1"));
        assert!(!channel.unsubscribe("conn-1"));
        assert_eq!(channel.subscriber_count(), 1);
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("room1").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("$system").is_err());
        assert!(validate_name("tab\there").is_err());
        assert!(validate_name(&"a".repeat(MAX_NAME_LENGTH + 1)).is_err());
    }

    #[tokio::test]
    async fn test_channel_publish() {
        let mut channel = Channel::new("room1");
        let mut rx = channel.subscribe("conn-1");

        let count = channel.publish(Envelope::Broadcast {
            source: "conn-2".into(),
            publisher: "u2".into(),
            channel: "room1".into(),
            payload: Bytes::from_static(b"hello"),
        });
        assert_eq!(count, 1);

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.payload_size(), 5);
    }
}
