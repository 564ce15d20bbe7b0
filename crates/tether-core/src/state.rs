//! Connection state machine.
//!
//! A [`Session`] owns the connection state together with the data that is
//! only meaningful in some states: the authenticated participant and token,
//! and the joined channel. Every mutator validates the current state first,
//! so `Authenticated` is unreachable without `Connected` and `ChannelJoined`
//! is unreachable without `Authenticated`.

use crate::error::ClientError;
use std::fmt;
use tracing::debug;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection. Initial state and the target of every disconnect.
    #[default]
    Disconnected,
    /// Connected but not authenticated.
    Connected,
    /// Authenticated as a participant.
    Authenticated,
    /// Authenticated and member of exactly one channel.
    ChannelJoined,
}

impl ConnectionState {
    /// Numeric form used by the C ABI.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Authenticated => 2,
            ConnectionState::ChannelJoined => 3,
        }
    }

    /// Whether any connection exists.
    #[must_use]
    pub fn is_connected(self) -> bool {
        self != ConnectionState::Disconnected
    }

    /// Whether a participant is authenticated.
    #[must_use]
    pub fn is_authenticated(self) -> bool {
        matches!(
            self,
            ConnectionState::Authenticated | ConnectionState::ChannelJoined
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::ChannelJoined => "channel joined",
        })
    }
}

/// Operations gated by connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Connect,
    Authenticate,
    JoinChannel,
    LeaveChannel,
    PublishToChannel,
    SendToPeer,
    RenewToken,
}

impl Action {
    /// Whether this action is legal in `state`.
    #[must_use]
    pub fn allowed_in(self, state: ConnectionState) -> bool {
        use ConnectionState::{Authenticated, ChannelJoined, Connected, Disconnected};
        match self {
            Action::Connect => state == Disconnected,
            Action::Authenticate => state == Connected,
            Action::JoinChannel | Action::RenewToken => matches!(state, Authenticated | ChannelJoined),
            Action::LeaveChannel | Action::PublishToChannel => state == ChannelJoined,
            Action::SendToPeer => state != Disconnected,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Connect => "connect",
            Action::Authenticate => "authenticate",
            Action::JoinChannel => "join channel",
            Action::LeaveChannel => "leave channel",
            Action::PublishToChannel => "publish to channel",
            Action::SendToPeer => "send to peer",
            Action::RenewToken => "renew token",
        })
    }
}

/// Connection state plus the data tied to it.
#[derive(Debug, Clone, Default)]
pub struct Session {
    state: ConnectionState,
    participant_id: Option<String>,
    token: Option<String>,
    channel: Option<String>,
}

impl Session {
    /// A disconnected session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Authenticated participant, if any.
    #[must_use]
    pub fn participant_id(&self) -> Option<&str> {
        self.participant_id.as_deref()
    }

    /// Token recorded at authentication (possibly renewed since).
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Joined channel. `Some` exactly when the state is `ChannelJoined`.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Check that `action` is legal right now.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` naming the action and the current state.
    pub fn permits(&self, action: Action) -> Result<(), ClientError> {
        if action.allowed_in(self.state) {
            Ok(())
        } else {
            Err(ClientError::InvalidState {
                action,
                state: self.state,
            })
        }
    }

    /// `Disconnected` → `Connected`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless disconnected.
    pub fn connect(&mut self) -> Result<(), ClientError> {
        self.permits(Action::Connect)?;
        self.transition(ConnectionState::Connected);
        Ok(())
    }

    /// `Connected` → `Authenticated`, recording the participant and token.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless connected, `InvalidArgument` if
    /// `participant_id` is empty.
    pub fn authenticate(
        &mut self,
        participant_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.permits(Action::Authenticate)?;
        let participant_id = participant_id.into();
        if participant_id.is_empty() {
            return Err(ClientError::InvalidArgument("participant_id must not be empty"));
        }
        self.participant_id = Some(participant_id);
        self.token = Some(token.into());
        self.transition(ConnectionState::Authenticated);
        Ok(())
    }

    /// `Authenticated | ChannelJoined` → `ChannelJoined`.
    ///
    /// Membership is replaced, never stacked. Returns the channel that was
    /// replaced, if any.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless authenticated, `InvalidArgument` if
    /// `channel_id` is empty.
    pub fn join(&mut self, channel_id: impl Into<String>) -> Result<Option<String>, ClientError> {
        self.permits(Action::JoinChannel)?;
        let channel_id = channel_id.into();
        if channel_id.is_empty() {
            return Err(ClientError::InvalidArgument("channel_id must not be empty"));
        }
        let previous = self.channel.replace(channel_id);
        self.transition(ConnectionState::ChannelJoined);
        Ok(previous)
    }

    /// `ChannelJoined` → `Authenticated`. Returns the channel left.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless a channel is joined.
    pub fn leave(&mut self) -> Result<String, ClientError> {
        self.permits(Action::LeaveChannel)?;
        let channel = self.channel.take().unwrap_or_default();
        self.transition(ConnectionState::Authenticated);
        Ok(channel)
    }

    /// Replace the recorded token.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless authenticated, `InvalidArgument` if
    /// `token` is empty.
    pub fn renew_token(&mut self, token: impl Into<String>) -> Result<(), ClientError> {
        self.permits(Action::RenewToken)?;
        let token = token.into();
        if token.is_empty() {
            return Err(ClientError::InvalidArgument("token must not be empty"));
        }
        self.token = Some(token);
        Ok(())
    }

    /// Back to `Disconnected` from any state, clearing membership and
    /// authentication. Returns the state that was left.
    pub fn reset(&mut self) -> ConnectionState {
        let previous = self.state;
        self.participant_id = None;
        self.token = None;
        self.channel = None;
        if previous != ConnectionState::Disconnected {
            self.transition(ConnectionState::Disconnected);
        }
        previous
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!(from = %self.state, to = %next, "Session transition");
        self.state = next;
    }
}
