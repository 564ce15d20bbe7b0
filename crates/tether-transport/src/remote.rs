//! Vendor-backed backend.
//!
//! [`RemoteBackend`] drives a [`ServiceLink`]: each client operation becomes
//! one request frame with a fresh request id, queued on the link and
//! answered later by a `Result` frame on the link thread. Directed sends are
//! publishes on the target's per-user channel (`ChannelType::User`); inbound
//! messages on a user channel come back as directed events.

use bytes::Bytes;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tether_core::{
    Backend, BackendError, BackendFailure, ClientConfig, DeliveryMode, EventSink, InboundEvent,
    Request, Route,
};
use tether_protocol::{code, ChannelType, Frame, FrameType, RequestId};
use tracing::{debug, info, trace, warn};

use crate::traits::{LinkConnector, LinkEvent, LinkHandler, LinkState, ServiceLink, TransportError};

/// Requests awaiting their `Result` frame.
type Pending = Arc<DashMap<RequestId, Request>>;

/// Backend adapter over a service link.
pub struct RemoteBackend {
    connector: Box<dyn LinkConnector>,
    link: Option<Box<dyn ServiceLink>>,
    app_id: String,
    next_id: RequestId,
    pending: Pending,
}

impl RemoteBackend {
    /// A closed backend that opens its link through `connector`.
    #[must_use]
    pub fn new(connector: impl LinkConnector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            link: None,
            app_id: String::new(),
            next_id: 0,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// A backend over a WebSocket link.
    #[cfg(feature = "websocket")]
    #[must_use]
    pub fn websocket(config: crate::websocket::WebSocketConfig) -> Self {
        Self::new(crate::websocket::WebSocketConnector::new(config))
    }

    /// Requests sent but not yet answered.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    fn request(
        &mut self,
        request: Request,
        frame: impl FnOnce(RequestId) -> Frame,
    ) -> Result<(), BackendError> {
        let link = self.link.as_mut().ok_or(BackendError::NotOpen)?;
        self.next_id += 1;
        let id = self.next_id;

        self.pending.insert(id, request);
        if let Err(err) = link.send(frame(id)) {
            self.pending.remove(&id);
            warn!(%request, id, error = %err, "Request not queued");
            return Err(match err {
                TransportError::Protocol(err) => BackendError::Rejected(err.to_string()),
                other => BackendError::Unavailable(other.to_string()),
            });
        }

        trace!(%request, id, "Request queued");
        Ok(())
    }

    fn send_routed(&mut self, route: &Route, payload: Bytes) -> Result<(), BackendError> {
        let (request, channel_type) = match route.mode() {
            DeliveryMode::Broadcast => (Request::Publish, ChannelType::Message),
            DeliveryMode::Directed => (Request::DirectSend, ChannelType::User),
        };
        let target = route.target().to_string();
        self.request(request, |id| {
            Frame::publish(id, target, channel_type, payload.to_vec())
        })
    }
}

impl fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("connector", &self.connector.name())
            .field("open", &self.link.is_some())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Backend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn open(&mut self, config: &ClientConfig, sink: EventSink) -> Result<(), BackendError> {
        if self.link.is_some() {
            return Err(BackendError::AlreadyOpen);
        }

        let inbound = InboundRouter {
            sink,
            pending: Arc::clone(&self.pending),
        };
        let link = self
            .connector
            .connect(Arc::new(inbound))
            .map_err(|err| BackendError::Unavailable(err.to_string()))?;

        self.app_id = config.app_id.clone();
        self.link = Some(link);
        info!(link = self.connector.name(), app = %self.app_id, "Remote backend opened");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
            let abandoned = self.pending.len();
            self.pending.clear();
            info!(link = self.connector.name(), abandoned, "Remote backend closed");
        }
    }

    fn set_session(&mut self, token: &str, participant_id: &str) -> Result<(), BackendError> {
        let app_id = self.app_id.clone();
        self.request(Request::Login, |id| {
            Frame::login(id, app_id, participant_id, token)
        })
    }

    fn subscribe(&mut self, channel_id: &str) -> Result<(), BackendError> {
        self.request(Request::Subscribe, |id| Frame::subscribe(id, channel_id, true))
    }

    fn unsubscribe(&mut self, channel_id: &str) -> Result<(), BackendError> {
        self.request(Request::Unsubscribe, |id| Frame::unsubscribe(id, channel_id))
    }

    fn end_session(&mut self) -> Result<(), BackendError> {
        self.request(Request::Logout, |id| Frame::Logout { id })
    }

    fn publish(&mut self, channel_id: &str, payload: Bytes) -> Result<(), BackendError> {
        self.send_routed(&Route::Channel(channel_id.to_string()), payload)
    }

    fn direct_send(&mut self, target_id: &str, payload: Bytes) -> Result<(), BackendError> {
        self.send_routed(&Route::Peer(target_id.to_string()), payload)
    }

    fn renew_token(&mut self, token: &str) -> Result<(), BackendError> {
        self.request(Request::RenewToken, |id| Frame::RenewToken {
            id,
            token: token.to_string(),
        })
    }
}

/// Request kind implied by a result's `op`, when the id is unknown.
fn request_for(op: FrameType) -> Option<Request> {
    match op {
        FrameType::Login => Some(Request::Login),
        FrameType::Logout => Some(Request::Logout),
        FrameType::Subscribe => Some(Request::Subscribe),
        FrameType::Unsubscribe => Some(Request::Unsubscribe),
        FrameType::Publish => Some(Request::Publish),
        FrameType::RenewToken => Some(Request::RenewToken),
        _ => None,
    }
}

/// Turns link events into client events. Runs on the link thread.
struct InboundRouter {
    sink: EventSink,
    pending: Pending,
}

impl InboundRouter {
    fn on_result(&self, id: RequestId, op: FrameType, result: u16, reason: Option<String>) {
        let request = self
            .pending
            .remove(&id)
            .map(|(_, request)| request)
            .or_else(|| request_for(op));

        if result == code::OK {
            trace!(id, ?op, "Request accepted");
            return;
        }

        let Some(request) = request else {
            warn!(id, code = result, "Failure result for unknown request");
            return;
        };
        let reason = reason.unwrap_or_else(|| code::describe(result).to_string());
        warn!(%request, id, code = result, %reason, "Service rejected request");
        self.sink.report(BackendFailure {
            request,
            request_id: id,
            code: result,
            reason: Some(reason),
        });
    }
}

impl LinkHandler for InboundRouter {
    fn on_event(&self, event: LinkEvent) {
        let frame = match event {
            LinkEvent::Frame(frame) => frame,
            LinkEvent::State(LinkState::Connected) => {
                info!("Service link connected");
                return;
            }
            LinkEvent::State(LinkState::Disconnected { reason: None }) => {
                info!("Service link disconnected");
                return;
            }
            LinkEvent::State(LinkState::Disconnected {
                reason: Some(reason),
            }) => {
                warn!(%reason, "Service link lost");
                return;
            }
        };

        match frame {
            Frame::Message {
                publisher,
                channel,
                channel_type,
                payload,
            } => {
                let event = match channel_type {
                    ChannelType::Message => InboundEvent::broadcast(publisher, channel, payload),
                    ChannelType::User => InboundEvent::directed(publisher, payload),
                };
                self.sink.deliver(event);
            }
            Frame::Result {
                id,
                op,
                code,
                reason,
            } => self.on_result(id, op, code, reason),
            Frame::Presence {
                channel,
                user_id,
                action,
            } => {
                info!(%channel, user = %user_id, ?action, "Presence");
            }
            Frame::TokenWillExpire { remaining_secs } => {
                warn!(remaining_secs, "Session token will expire");
            }
            Frame::Ping { .. } | Frame::Pong { .. } => trace!("Heartbeat"),
            other => debug!(frame = ?other.frame_type(), "Ignoring unexpected frame"),
        }
    }
}
