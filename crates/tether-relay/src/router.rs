//! Message router for the relay.
//!
//! The router manages channels, per-user inboxes and presence, and routes
//! broadcasts and directed publishes between connections.

use crate::channel::{validate_name, Channel, ChannelId};
use crate::message::Envelope;
use crate::presence::Presence;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tether_protocol::{code, PresenceAction};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace};

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Invalid channel or user name.
    #[error("Invalid name: {0}")]
    InvalidName(&'static str),

    /// Not subscribed to channel.
    #[error("Not subscribed to channel: {0}")]
    NotSubscribed(String),

    /// Already subscribed to channel.
    #[error("Already subscribed to channel: {0}")]
    AlreadySubscribed(String),

    /// Maximum subscriptions reached.
    #[error("Maximum subscriptions reached")]
    MaxSubscriptionsReached,

    /// Maximum channels reached.
    #[error("Maximum channels reached")]
    MaxChannelsReached,

    /// The target user has no live session.
    #[error("User is offline: {0}")]
    UserOffline(String),
}

impl RouterError {
    /// Protocol result code reported for this error.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            RouterError::InvalidName(_) => code::INVALID_CHANNEL,
            RouterError::NotSubscribed(_) => code::NOT_SUBSCRIBED,
            RouterError::AlreadySubscribed(_) => code::ALREADY_SUBSCRIBED,
            RouterError::MaxSubscriptionsReached | RouterError::MaxChannelsReached => {
                code::SUBSCRIPTION_LIMIT
            }
            RouterError::UserOffline(_) => code::PEER_OFFLINE,
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum number of channels.
    pub max_channels: usize,
    /// Maximum subscriptions per connection.
    pub max_subscriptions_per_connection: usize,
    /// Channel broadcast capacity.
    pub channel_capacity: usize,
    /// Whether to auto-delete empty channels.
    pub auto_delete_empty_channels: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_channels: 10_000,
            max_subscriptions_per_connection: 100,
            channel_capacity: 1024,
            auto_delete_empty_channels: true,
        }
    }
}

/// Channel entry with presence tracking.
struct ChannelEntry {
    channel: Channel,
    presence: Presence,
}

impl ChannelEntry {
    fn new(name: impl Into<ChannelId>, capacity: usize) -> Self {
        Self {
            channel: Channel::with_capacity(name, capacity),
            presence: Presence::new(),
        }
    }
}

/// A logged-in user's inbox.
struct UserEntry {
    connection_id: String,
    inbox: mpsc::UnboundedSender<Arc<Envelope>>,
}

/// The central message router.
pub struct Router {
    /// Channels indexed by name.
    channels: DashMap<ChannelId, ChannelEntry>,
    /// Connection subscriptions (connection_id -> set of channel names).
    subscriptions: DashMap<String, DashSet<ChannelId>>,
    /// Logged-in users (user_id -> inbox).
    users: DashMap<String, UserEntry>,
    config: RouterConfig,
}

impl Router {
    /// Create a new router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a new router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!("Creating router with config: {:?}", config);
        Self {
            channels: DashMap::new(),
            subscriptions: DashMap::new(),
            users: DashMap::new(),
            config,
        }
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            channel_count: self.channels.len(),
            connection_count: self.subscriptions.len(),
            total_subscriptions: self.subscriptions.iter().map(|s| s.len()).sum(),
            online_users: self.users.len(),
        }
    }

    /// Register `user_id` as reachable through `connection_id`.
    ///
    /// A newer login replaces an older one. Returns the connection that was
    /// replaced, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the user id is invalid.
    pub fn register_user(
        &self,
        user_id: &str,
        connection_id: &str,
        inbox: mpsc::UnboundedSender<Arc<Envelope>>,
    ) -> Result<Option<String>, RouterError> {
        validate_name(user_id).map_err(RouterError::InvalidName)?;
        let previous = self.users.insert(
            user_id.to_string(),
            UserEntry {
                connection_id: connection_id.to_string(),
                inbox,
            },
        );
        debug!(user = %user_id, connection = %connection_id, "User online");
        Ok(previous.map(|entry| entry.connection_id))
    }

    /// Remove `user_id` if it is still registered to `connection_id`.
    pub fn unregister_user(&self, user_id: &str, connection_id: &str) -> bool {
        let removed = self
            .users
            .remove_if(user_id, |_, entry| entry.connection_id == connection_id)
            .is_some();
        if removed {
            debug!(user = %user_id, connection = %connection_id, "User offline");
        }
        removed
    }

    /// Whether `user_id` has a live session.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// Deliver a directed publish to the target's inbox.
    ///
    /// # Errors
    ///
    /// Returns `UserOffline` if the target has no live session.
    pub fn send_to_user(&self, target: &str, envelope: Envelope) -> Result<(), RouterError> {
        let offline = || RouterError::UserOffline(target.to_string());
        let entry = self.users.get(target).ok_or_else(offline)?;
        entry.inbox.send(Arc::new(envelope)).map_err(|_| offline())?;
        trace!(user = %target, "Delivered directed message");
        Ok(())
    }

    /// Subscribe a connection to a channel and announce its presence.
    ///
    /// Returns a receiver for broadcasts and presence notices on the channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel name is invalid or limits are exceeded.
    pub fn subscribe(
        &self,
        connection_id: &str,
        user_id: &str,
        channel_name: &str,
    ) -> Result<broadcast::Receiver<Arc<Envelope>>, RouterError> {
        validate_name(channel_name).map_err(RouterError::InvalidName)?;

        let conn_subs = self
            .subscriptions
            .entry(connection_id.to_string())
            .or_default();

        if conn_subs.len() >= self.config.max_subscriptions_per_connection {
            return Err(RouterError::MaxSubscriptionsReached);
        }
        if conn_subs.contains(channel_name) {
            return Err(RouterError::AlreadySubscribed(channel_name.to_string()));
        }
        if !self.channels.contains_key(channel_name)
            && self.channels.len() >= self.config.max_channels
        {
            return Err(RouterError::MaxChannelsReached);
        }

        let mut entry = self
            .channels
            .entry(channel_name.to_string())
            .or_insert_with(|| {
                debug!(channel = %channel_name, "Creating new channel");
                ChannelEntry::new(channel_name, self.config.channel_capacity)
            });

        let receiver = entry.channel.subscribe(connection_id);
        conn_subs.insert(channel_name.to_string());

        if entry.presence.join(connection_id, user_id) {
            entry.channel.publish(Envelope::Presence {
                channel: channel_name.to_string(),
                user_id: user_id.to_string(),
                action: PresenceAction::Join,
            });
        }

        debug!(
            channel = %channel_name,
            connection = %connection_id,
            subscribers = entry.channel.subscriber_count(),
            "Subscribed"
        );

        Ok(receiver)
    }

    /// Unsubscribe a connection from a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if not subscribed.
    pub fn unsubscribe(&self, connection_id: &str, channel_name: &str) -> Result<(), RouterError> {
        let removed = self
            .subscriptions
            .get(connection_id)
            .and_then(|subs| subs.remove(channel_name))
            .is_some();
        if !removed {
            return Err(RouterError::NotSubscribed(channel_name.to_string()));
        }

        self.leave_channel(connection_id, channel_name);
        Ok(())
    }

    /// Unsubscribe a connection from all channels.
    pub fn unsubscribe_all(&self, connection_id: &str) {
        if let Some((_, channels)) = self.subscriptions.remove(connection_id) {
            for channel_name in channels.iter() {
                self.leave_channel(connection_id, channel_name.as_str());
            }
        }

        debug!(connection = %connection_id, "Unsubscribed from all channels");
    }

    fn leave_channel(&self, connection_id: &str, channel_name: &str) {
        let Some(mut entry) = self.channels.get_mut(channel_name) else {
            return;
        };
        entry.channel.unsubscribe(connection_id);
        if let Some(user_id) = entry.presence.leave(connection_id) {
            entry.channel.publish(Envelope::Presence {
                channel: channel_name.to_string(),
                user_id,
                action: PresenceAction::Leave,
            });
        }

        debug!(
            channel = %channel_name,
            connection = %connection_id,
            subscribers = entry.channel.subscriber_count(),
            "Unsubscribed"
        );

        // Auto-delete empty channels
        if self.config.auto_delete_empty_channels && entry.channel.is_empty() {
            drop(entry);
            if self
                .channels
                .remove_if(channel_name, |_, e| e.channel.is_empty())
                .is_some()
            {
                debug!(channel = %channel_name, "Deleted empty channel");
            }
        }
    }

    /// Broadcast an envelope on its channel.
    ///
    /// Returns the number of receivers. Publishing to a channel nobody
    /// subscribes to is not an error.
    pub fn publish(&self, channel_name: &str, envelope: Envelope) -> usize {
        match self.channels.get(channel_name) {
            Some(entry) => {
                let count = entry.channel.publish(envelope);
                trace!(channel = %channel_name, recipients = count, "Published message");
                count
            }
            None => {
                trace!(channel = %channel_name, "Publish to channel without subscribers");
                0
            }
        }
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn channel_exists(&self, channel_name: &str) -> bool {
        self.channels.contains_key(channel_name)
    }

    /// Get the subscriber count for a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel_name: &str) -> usize {
        self.channels
            .get(channel_name)
            .map(|e| e.channel.subscriber_count())
            .unwrap_or(0)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Router statistics.
#[derive(Debug, Clone)]
pub struct RouterStats {
    /// Number of active channels.
    pub channel_count: usize,
    /// Number of connections with subscriptions.
    pub connection_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
    /// Number of logged-in users.
    pub online_users: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn broadcast(channel: &str) -> Envelope {
        Envelope::Broadcast {
            source: "conn-1".into(),
            publisher: "u1".into(),
            channel: channel.into(),
            payload: Bytes::from_static(b"hello"),
        }
    }

    #[test]
    fn test_router_subscribe_unsubscribe() {
        let router = Router::new();

        let rx = router.subscribe("conn-1", "u1", "room1").unwrap();
        assert!(router.channel_exists("room1"));
        assert_eq!(router.subscriber_count("room1"), 1);
        drop(rx);

        router.unsubscribe("conn-1", "room1").unwrap();
        assert!(!router.channel_exists("room1"));
        assert!(matches!(
            router.unsubscribe("conn-1", "room1"),
            Err(RouterError::NotSubscribed(_))
        ));
    }

    #[test]
    fn test_router_publish_and_presence() {
        let router = Router::new();

        let mut rx1 = router.subscribe("conn-1", "u1", "room1").unwrap();
        let _rx2 = router.subscribe("conn-2", "u2", "room1").unwrap();

        // conn-1 sees its own join, then u2's.
        assert!(matches!(
            rx1.try_recv().unwrap().as_ref(),
            Envelope::Presence { action: PresenceAction::Join, .. }
        ));
        assert!(matches!(
            rx1.try_recv().unwrap().as_ref(),
            Envelope::Presence { user_id, .. } if user_id == "u2"
        ));

        assert_eq!(router.publish("room1", broadcast("room1")), 2);
        assert_eq!(rx1.try_recv().unwrap().payload_size(), 5);

        router.unsubscribe("conn-2", "room1").unwrap();
        assert!(matches!(
            rx1.try_recv().unwrap().as_ref(),
            Envelope::Presence { user_id, action: PresenceAction::Leave, .. } if user_id == "u2"
        ));
        assert_eq!(router.subscriber_count("room1"), 1);
    }

    #[test]
    fn test_router_invalid_channel() {
        let router = Router::new();
        let err = router.subscribe("conn-1", "u1", "$system").unwrap_err();
        assert_eq!(err.code(), code::INVALID_CHANNEL);
        assert!(router.subscribe("conn-1", "u1", "").is_err());
    }

    #[test]
    fn test_router_limits() {
        let router = Router::with_config(RouterConfig {
            max_subscriptions_per_connection: 1,
            ..RouterConfig::default()
        });

        let _rx = router.subscribe("conn-1", "u1", "a").unwrap();
        assert!(matches!(
            router.subscribe("conn-1", "u1", "a"),
            Err(RouterError::MaxSubscriptionsReached)
        ));
        assert!(matches!(
            router.subscribe("conn-1", "u1", "b"),
            Err(RouterError::MaxSubscriptionsReached)
        ));
    }

    #[test]
    fn test_router_user_inbox() {
        let router = Router::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let direct = || Envelope::Direct {
            publisher: "u1".into(),
            target: "u2".into(),
            payload: Bytes::from_static(b"ping"),
        };

        assert!(matches!(
            router.send_to_user("u2", direct()),
            Err(RouterError::UserOffline(_))
        ));

        assert_eq!(router.register_user("u2", "conn-2", tx).unwrap(), None);
        router.send_to_user("u2", direct()).unwrap();
        assert_eq!(rx.try_recv().unwrap().as_ref(), &direct());

        // Only the owning connection can unregister.
        assert!(!router.unregister_user("u2", "conn-9"));
        assert!(router.unregister_user("u2", "conn-2"));
        assert!(!router.is_online("u2"));
    }

    #[test]
    fn test_router_unsubscribe_all() {
        let router = Router::new();

        let _rx1 = router.subscribe("conn-1", "u1", "channel-1").unwrap();
        let _rx2 = router.subscribe("conn-1", "u1", "channel-2").unwrap();
        let _rx3 = router.subscribe("conn-2", "u2", "channel-1").unwrap();

        let stats = router.stats();
        assert_eq!(stats.channel_count, 2);
        assert_eq!(stats.total_subscriptions, 3);

        router.unsubscribe_all("conn-1");
        assert!(router.channel_exists("channel-1"));
        assert!(!router.channel_exists("channel-2"));
    }
}
