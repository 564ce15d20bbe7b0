//! The public client.
//!
//! A [`Client`] owns one [`Session`], one mounted [`Backend`] and the
//! [`Dispatcher`] feeding its handler. Every operation validates the session
//! state and its arguments before touching the backend, and only commits the
//! transition once the backend has accepted the request.

use crate::backend::{Backend, EventSink};
use crate::config::ClientConfig;
use crate::dispatch::{DispatchHold, Dispatcher, MessageHandler};
use crate::error::ClientError;
use crate::simulator::SimulatorBackend;
use crate::state::{Action, ConnectionState, Session};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// A realtime messaging client.
pub struct Client {
    config: ClientConfig,
    session: Session,
    backend: Box<dyn Backend>,
    dispatcher: Arc<Dispatcher>,
    closed: bool,
}

impl Client {
    /// Create a client over `backend`, delivering inbound traffic to
    /// `handler`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an incomplete config, or a backend error
    /// if the backend cannot be opened.
    pub fn new<B, H>(config: ClientConfig, backend: B, handler: H) -> Result<Self, ClientError>
    where
        B: Backend + 'static,
        H: MessageHandler + 'static,
    {
        Self::with_handler(config, Box::new(backend), Arc::new(handler))
    }

    /// Create a client over the in-process simulator.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an incomplete config.
    pub fn simulated<H>(config: ClientConfig, handler: H) -> Result<Self, ClientError>
    where
        H: MessageHandler + 'static,
    {
        Self::new(config, SimulatorBackend::new(), handler)
    }

    /// Create a client from already boxed parts.
    ///
    /// # Errors
    ///
    /// Same as [`Client::new`].
    pub fn with_handler(
        config: ClientConfig,
        mut backend: Box<dyn Backend>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let dispatcher = Arc::new(Dispatcher::new(handler));
        backend.open(&config, EventSink::new(Arc::clone(&dispatcher)))?;

        info!(
            app = %config.app_id,
            client = %config.client_id,
            backend = backend.name(),
            "Client created"
        );

        Ok(Self {
            config,
            session: Session::new(),
            backend,
            dispatcher,
            closed: false,
        })
    }

    /// Settings captured at creation.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Joined channel, if any.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.session.channel()
    }

    /// Authenticated participant, if any.
    #[must_use]
    pub fn participant_id(&self) -> Option<&str> {
        self.session.participant_id()
    }

    /// Name of the mounted backend.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The dispatcher delivering to this client's handler.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Defer handler invocations until the returned hold is dropped.
    ///
    /// Take the hold before locking anything the handler may also lock
    /// (such as a mutex around this client), and drop it after unlocking.
    pub fn hold_deliveries(&self) -> DispatchHold {
        self.dispatcher.hold()
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed {
            Err(ClientError::InvalidHandle)
        } else {
            Ok(())
        }
    }

    /// `Disconnected` → `Connected`.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless disconnected.
    pub fn connect(&mut self) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.session.connect()
    }

    /// `Connected` → `Authenticated`.
    ///
    /// The session token is `token` when non-empty, else the configured
    /// default, else empty.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless connected, `InvalidArgument` for an empty
    /// participant, or the backend's refusal.
    pub fn authenticate(
        &mut self,
        token: Option<&str>,
        participant_id: &str,
    ) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.session.permits(Action::Authenticate)?;
        if participant_id.is_empty() {
            return Err(ClientError::InvalidArgument("participant_id must not be empty"));
        }

        let token = self.config.resolve_token(token).to_string();
        self.backend.set_session(&token, participant_id)?;
        self.session.authenticate(participant_id, token)
    }

    /// Join `channel_id`, replacing any current membership.
    ///
    /// The previous channel is unsubscribed first. If the backend then
    /// refuses the new subscription the client is left `Authenticated` with
    /// no membership.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless authenticated, `InvalidArgument` for an empty
    /// channel, or the backend's refusal.
    pub fn join_channel(&mut self, channel_id: &str) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.session.permits(Action::JoinChannel)?;
        if channel_id.is_empty() {
            return Err(ClientError::InvalidArgument("channel_id must not be empty"));
        }

        if let Some(previous) = self.session.channel().map(str::to_owned) {
            if let Err(err) = self.backend.unsubscribe(&previous) {
                warn!(channel = %previous, error = %err, "Unsubscribe before rejoin failed");
            }
        }

        if let Err(err) = self.backend.subscribe(channel_id) {
            if self.session.state() == ConnectionState::ChannelJoined {
                self.session.leave()?;
            }
            return Err(err.into());
        }

        if let Some(previous) = self.session.join(channel_id)? {
            debug!(from = %previous, to = %channel_id, "Channel membership replaced");
        }
        Ok(())
    }

    /// Leave the joined channel, back to `Authenticated`.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless a channel is joined, or the backend's refusal.
    pub fn leave_channel(&mut self) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.session.permits(Action::LeaveChannel)?;
        if let Some(channel) = self.session.channel() {
            self.backend.unsubscribe(channel)?;
        }
        self.session.leave()?;
        Ok(())
    }

    /// Back to `Disconnected` from any state.
    ///
    /// Ending the backend session is best effort; a refusal is logged and
    /// the local state is reset regardless. Calling this while disconnected
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` after [`close`](Self::close).
    pub fn disconnect(&mut self) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.end_session();
        Ok(())
    }

    fn end_session(&mut self) {
        if self.session.state().is_authenticated() {
            if let Err(err) = self.backend.end_session() {
                warn!(error = %err, "Ending backend session failed");
            }
        }
        self.session.reset();
    }

    /// Broadcast `payload` on the joined channel.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless a channel is joined, `InvalidArgument` for an
    /// empty payload, or the backend's refusal.
    pub fn publish_to_channel(&mut self, payload: impl Into<Bytes>) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.session.permits(Action::PublishToChannel)?;
        let payload = payload.into();
        if payload.is_empty() {
            return Err(ClientError::InvalidArgument("payload must not be empty"));
        }

        let channel = self.session.channel().unwrap_or_default().to_string();
        trace!(channel = %channel, bytes = payload.len(), "Publishing to channel");
        self.backend.publish(&channel, payload)?;
        Ok(())
    }

    /// Send `payload` to one participant. Needs a connection, not a
    /// channel.
    ///
    /// # Errors
    ///
    /// `InvalidState` while disconnected, `InvalidArgument` for an empty
    /// target or payload, or the backend's refusal.
    pub fn send_to_peer(
        &mut self,
        target_id: &str,
        payload: impl Into<Bytes>,
    ) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.session.permits(Action::SendToPeer)?;
        if target_id.is_empty() {
            return Err(ClientError::InvalidArgument("target_id must not be empty"));
        }
        let payload = payload.into();
        if payload.is_empty() {
            return Err(ClientError::InvalidArgument("payload must not be empty"));
        }

        trace!(target = %target_id, bytes = payload.len(), "Sending to peer");
        self.backend.direct_send(target_id, payload)?;
        Ok(())
    }

    /// Replace the session credential.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless authenticated, `InvalidArgument` for an empty
    /// token, or the backend's refusal.
    pub fn renew_token(&mut self, token: &str) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.session.permits(Action::RenewToken)?;
        if token.is_empty() {
            return Err(ClientError::InvalidArgument("token must not be empty"));
        }
        self.backend.renew_token(token)?;
        self.session.renew_token(token)
    }

    /// Connect if needed, authenticate as `participant_id` and join
    /// `channel_id` (or the configured default channel).
    ///
    /// # Errors
    ///
    /// The first failing step's error. Steps already taken are not undone.
    pub fn login_and_join(
        &mut self,
        token: Option<&str>,
        participant_id: &str,
        channel_id: Option<&str>,
    ) -> Result<(), ClientError> {
        if self.state() == ConnectionState::Disconnected {
            self.connect()?;
        }
        self.authenticate(token, participant_id)?;
        let channel = channel_id
            .filter(|c| !c.is_empty())
            .unwrap_or(self.config.default_channel())
            .to_string();
        self.join_channel(&channel)
    }

    /// Stop deliveries, end the session and release the backend.
    ///
    /// No handler invocation starts after this returns. Idempotent; every
    /// later operation fails with `InvalidHandle`.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.dispatcher.close();
        self.end_session();
        self.backend.close();

        info!(
            client = %self.config.client_id,
            delivered = self.dispatcher.delivered(),
            dropped = self.dispatcher.dropped(),
            "Client closed"
        );
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.config.client_id)
            .field("backend", &self.backend.name())
            .field("state", &self.session.state())
            .field("channel", &self.session.channel())
            .field("closed", &self.closed)
            .finish()
    }
}
