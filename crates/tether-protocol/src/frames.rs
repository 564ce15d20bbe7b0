//! Frame types for the Tether protocol.
//!
//! Frames are serialized with MessagePack (named fields) and tagged by a
//! `type` string so unknown fields from newer minor versions are skipped.

use serde::{Deserialize, Serialize};

/// Identifier a link assigns to each outbound request.
pub type RequestId = u64;

/// Result codes carried by [`Frame::Result`].
pub mod code {
    /// Request succeeded.
    pub const OK: u16 = 0;
    /// The frame could not be decoded or was unexpected.
    pub const INVALID_FRAME: u16 = 1001;
    /// The request requires a logged-in session.
    pub const NOT_LOGGED_IN: u16 = 1002;
    /// The token was rejected.
    pub const INVALID_TOKEN: u16 = 1003;
    /// The app id is unknown to this service.
    pub const INVALID_APP_ID: u16 = 1004;
    /// The channel or user id is malformed.
    pub const INVALID_CHANNEL: u16 = 1005;
    /// Unsubscribe or publish on a channel the session has not joined.
    pub const NOT_SUBSCRIBED: u16 = 1006;
    /// The session already subscribed to this channel.
    pub const ALREADY_SUBSCRIBED: u16 = 1007;
    /// Per-session subscription limit reached.
    pub const SUBSCRIPTION_LIMIT: u16 = 1008;
    /// Payload exceeds the service's message size limit.
    pub const PAYLOAD_TOO_LARGE: u16 = 1009;
    /// A second login on a session that is already logged in.
    pub const ALREADY_LOGGED_IN: u16 = 1010;
    /// The login carried an incompatible protocol version.
    pub const VERSION_MISMATCH: u16 = 1011;
    /// The target of a directed publish is not logged in.
    pub const PEER_OFFLINE: u16 = 1012;
    /// Unexpected failure inside the service.
    pub const INTERNAL: u16 = 1500;

    /// Short description of a result code, for logs.
    #[must_use]
    pub fn describe(code: u16) -> &'static str {
        match code {
            OK => "ok",
            INVALID_FRAME => "invalid frame",
            NOT_LOGGED_IN => "not logged in",
            INVALID_TOKEN => "invalid token",
            INVALID_APP_ID => "invalid app id",
            INVALID_CHANNEL => "invalid channel",
            NOT_SUBSCRIBED => "not subscribed",
            ALREADY_SUBSCRIBED => "already subscribed",
            SUBSCRIPTION_LIMIT => "subscription limit reached",
            PAYLOAD_TOO_LARGE => "payload too large",
            ALREADY_LOGGED_IN => "already logged in",
            VERSION_MISMATCH => "protocol version mismatch",
            PEER_OFFLINE => "peer offline",
            INTERNAL => "internal error",
            _ => "unknown",
        }
    }
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Login = 0x01,
    Logout = 0x02,
    Subscribe = 0x03,
    Unsubscribe = 0x04,
    Publish = 0x05,
    RenewToken = 0x06,
    Result = 0x07,
    Message = 0x08,
    Presence = 0x09,
    TokenWillExpire = 0x0A,
    Ping = 0x0B,
    Pong = 0x0C,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Login),
            0x02 => Ok(FrameType::Logout),
            0x03 => Ok(FrameType::Subscribe),
            0x04 => Ok(FrameType::Unsubscribe),
            0x05 => Ok(FrameType::Publish),
            0x06 => Ok(FrameType::RenewToken),
            0x07 => Ok(FrameType::Result),
            0x08 => Ok(FrameType::Message),
            0x09 => Ok(FrameType::Presence),
            0x0A => Ok(FrameType::TokenWillExpire),
            0x0B => Ok(FrameType::Ping),
            0x0C => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

/// Routing primitive a publish targets.
///
/// `Message` channels are named broadcast groups. `User` channels are the
/// per-user inbox every logged-in session implicitly owns; publishing to a
/// user channel is how directed messages travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum ChannelType {
    /// Broadcast channel.
    Message = 0,
    /// Per-user inbox.
    User = 1,
}

impl From<ChannelType> for u8 {
    fn from(ct: ChannelType) -> u8 {
        ct as u8
    }
}

impl TryFrom<u8> for ChannelType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChannelType::Message),
            1 => Ok(ChannelType::User),
            _ => Err("Invalid channel type"),
        }
    }
}

/// Presence action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum PresenceAction {
    /// A user subscribed to the channel.
    Join = 0,
    /// A user unsubscribed or went away.
    Leave = 1,
}

impl From<PresenceAction> for u8 {
    fn from(pa: PresenceAction) -> u8 {
        pa as u8
    }
}

impl TryFrom<u8> for PresenceAction {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PresenceAction::Join),
            1 => Ok(PresenceAction::Leave),
            _ => Err("Invalid presence action"),
        }
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Open a session as `user_id`.
    #[serde(rename = "login")]
    Login {
        /// Request ID.
        id: RequestId,
        /// Packed protocol version, see [`crate::Version::as_byte`].
        version: u8,
        /// Tenant/application identifier.
        app_id: String,
        /// Local participant identifier.
        user_id: String,
        /// Credential; may be empty when the service does not check tokens.
        token: String,
    },

    /// Close the session. The connection stays open.
    #[serde(rename = "logout")]
    Logout {
        /// Request ID.
        id: RequestId,
    },

    /// Subscribe to a broadcast channel.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Request ID.
        id: RequestId,
        /// Channel name to subscribe to.
        channel: String,
        /// Whether to receive presence notifications for the channel.
        #[serde(default)]
        with_presence: bool,
    },

    /// Unsubscribe from a broadcast channel.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Request ID.
        id: RequestId,
        /// Channel name to unsubscribe from.
        channel: String,
    },

    /// Publish a payload to a channel or a user inbox.
    #[serde(rename = "publish")]
    Publish {
        /// Request ID.
        id: RequestId,
        /// Channel name, or target user id when `channel_type` is `User`.
        channel: String,
        /// Routing primitive.
        channel_type: ChannelType,
        /// Message payload.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Replace the session token.
    #[serde(rename = "renew_token")]
    RenewToken {
        /// Request ID.
        id: RequestId,
        /// New credential.
        token: String,
    },

    /// Outcome of a request.
    #[serde(rename = "result")]
    Result {
        /// ID of the request this answers.
        id: RequestId,
        /// Which request kind this answers.
        op: FrameType,
        /// Result code, see [`code`].
        code: u16,
        /// Optional human-readable detail.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// A payload delivered to this session.
    #[serde(rename = "message")]
    Message {
        /// User id of the publisher.
        publisher: String,
        /// Channel the payload was published on; the recipient's own user id
        /// for `User` deliveries.
        channel: String,
        /// Routing primitive the publisher used.
        channel_type: ChannelType,
        /// Message payload.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Presence change on a subscribed channel.
    #[serde(rename = "presence")]
    Presence {
        /// Channel name.
        channel: String,
        /// User whose presence changed.
        user_id: String,
        /// What happened.
        action: PresenceAction,
    },

    /// The session token expires soon.
    #[serde(rename = "token_will_expire")]
    TokenWillExpire {
        /// Seconds until expiry.
        remaining_secs: u64,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Login { .. } => FrameType::Login,
            Frame::Logout { .. } => FrameType::Logout,
            Frame::Subscribe { .. } => FrameType::Subscribe,
            Frame::Unsubscribe { .. } => FrameType::Unsubscribe,
            Frame::Publish { .. } => FrameType::Publish,
            Frame::RenewToken { .. } => FrameType::RenewToken,
            Frame::Result { .. } => FrameType::Result,
            Frame::Message { .. } => FrameType::Message,
            Frame::Presence { .. } => FrameType::Presence,
            Frame::TokenWillExpire { .. } => FrameType::TokenWillExpire,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Request id of an outbound request frame, if this is one.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Frame::Login { id, .. }
            | Frame::Logout { id }
            | Frame::Subscribe { id, .. }
            | Frame::Unsubscribe { id, .. }
            | Frame::Publish { id, .. }
            | Frame::RenewToken { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Create a Login frame for the current protocol version.
    #[must_use]
    pub fn login(
        id: RequestId,
        app_id: impl Into<String>,
        user_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Frame::Login {
            id,
            version: crate::PROTOCOL_VERSION.as_byte(),
            app_id: app_id.into(),
            user_id: user_id.into(),
            token: token.into(),
        }
    }

    /// Create a Subscribe frame.
    #[must_use]
    pub fn subscribe(id: RequestId, channel: impl Into<String>, with_presence: bool) -> Self {
        Frame::Subscribe {
            id,
            channel: channel.into(),
            with_presence,
        }
    }

    /// Create an Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(id: RequestId, channel: impl Into<String>) -> Self {
        Frame::Unsubscribe {
            id,
            channel: channel.into(),
        }
    }

    /// Create a Publish frame.
    #[must_use]
    pub fn publish(
        id: RequestId,
        channel: impl Into<String>,
        channel_type: ChannelType,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Frame::Publish {
            id,
            channel: channel.into(),
            channel_type,
            payload: payload.into(),
        }
    }

    /// Create a successful Result frame.
    #[must_use]
    pub fn ok(id: RequestId, op: FrameType) -> Self {
        Frame::Result {
            id,
            op,
            code: code::OK,
            reason: None,
        }
    }

    /// Create a failed Result frame.
    #[must_use]
    pub fn failure(id: RequestId, op: FrameType, code: u16, reason: impl Into<String>) -> Self {
        Frame::Result {
            id,
            op,
            code,
            reason: Some(reason.into()),
        }
    }

    /// Create a Message frame.
    #[must_use]
    pub fn message(
        publisher: impl Into<String>,
        channel: impl Into<String>,
        channel_type: ChannelType,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Frame::Message {
            publisher: publisher.into(),
            channel: channel.into(),
            channel_type,
            payload: payload.into(),
        }
    }

    /// Create a Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}
