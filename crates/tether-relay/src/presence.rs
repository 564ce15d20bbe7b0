//! Presence tracking for the relay.
//!
//! Presence records which users are subscribed to a channel, keyed by
//! connection so a user connected twice is tracked per connection.

use std::collections::HashMap;
use tracing::debug;

/// Subscribers of one channel, as connection id to user id.
#[derive(Debug, Default)]
pub struct Presence {
    members: HashMap<String, String>,
}

impl Presence {
    /// Create a new presence tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member. Returns `true` if the connection was not present yet.
    pub fn join(&mut self, connection_id: &str, user_id: &str) -> bool {
        if self.members.contains_key(connection_id) {
            return false;
        }
        debug!(connection = %connection_id, user = %user_id, "Presence: member joined");
        self.members
            .insert(connection_id.to_string(), user_id.to_string());
        true
    }

    /// Remove a member, returning the user it belonged to.
    pub fn leave(&mut self, connection_id: &str) -> Option<String> {
        let user = self.members.remove(connection_id);
        if user.is_some() {
            debug!(connection = %connection_id, "Presence: member left");
        }
        user
    }
}
