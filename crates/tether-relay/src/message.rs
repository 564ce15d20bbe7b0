//! Internal message types for the relay.

use bytes::Bytes;
use tether_protocol::{ChannelType, Frame, PresenceAction};

/// Something routed to one or more connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// A channel broadcast.
    Broadcast {
        /// Connection that published it.
        source: String,
        /// Publishing user.
        publisher: String,
        /// Target channel.
        channel: String,
        /// Message payload.
        payload: Bytes,
    },
    /// A publish on a user's own channel.
    Direct {
        /// Publishing user.
        publisher: String,
        /// Receiving user.
        target: String,
        /// Message payload.
        payload: Bytes,
    },
    /// A subscriber joined or left a channel.
    Presence {
        /// Channel concerned.
        channel: String,
        /// User who joined or left.
        user_id: String,
        /// Join or leave.
        action: PresenceAction,
    },
}

impl Envelope {
    /// The frame delivered to a receiving connection.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        match self {
            Envelope::Broadcast {
                publisher,
                channel,
                payload,
                ..
            } => Frame::message(publisher, channel, ChannelType::Message, payload.to_vec()),
            Envelope::Direct {
                publisher,
                target,
                payload,
            } => Frame::message(publisher, target, ChannelType::User, payload.to_vec()),
            Envelope::Presence {
                channel,
                user_id,
                action,
            } => Frame::Presence {
                channel: channel.clone(),
                user_id: user_id.clone(),
                action: *action,
            },
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Broadcast { .. } => "broadcast",
            Envelope::Direct { .. } => "direct",
            Envelope::Presence { .. } => "presence",
        }
    }

    /// Payload size in bytes; zero for presence notices.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        match self {
            Envelope::Broadcast { payload, .. } | Envelope::Direct { payload, .. } => payload.len(),
            Envelope::Presence { .. } => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_becomes_user_channel_message() {
        let envelope = Envelope::Direct {
            publisher: "u1".into(),
            target: "u2".into(),
            payload: Bytes::from_static(b"ping"),
        };
        assert_eq!(
            envelope.to_frame(),
            Frame::message("u1", "u2", ChannelType::User, b"ping".to_vec())
        );
        assert_eq!(envelope.payload_size(), 4);
        assert_eq!(envelope.kind(), "direct");
    }

    #[test]
    fn test_broadcast_frame_drops_source() {
        let envelope = Envelope::Broadcast {
            source: "conn_1".into(),
            publisher: "u1".into(),
            channel: "room1".into(),
            payload: Bytes::from_static(b"hello"),
        };
        assert_eq!(
            envelope.to_frame(),
            Frame::message("u1", "room1", ChannelType::Message, b"hello".to_vec())
        );
    }
}
