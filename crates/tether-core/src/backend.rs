//! Backend capability contract.
//!
//! A [`Backend`] turns the client's logical operations into actions on some
//! messaging service and feeds inbound traffic back through the [`EventSink`]
//! it receives in [`Backend::open`]. The client never knows which backend is
//! mounted; both the in-process simulator and the vendor-backed adapter
//! present the same `Result` shapes.

use crate::config::ClientConfig;
use crate::dispatch::{Dispatch, Dispatcher};
use crate::message::InboundEvent;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Synchronous backend errors.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend has not been opened, or was closed.
    #[error("Backend is not open")]
    NotOpen,

    /// `open` called twice.
    #[error("Backend is already open")]
    AlreadyOpen,

    /// The backend's outbound queue is full or gone.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The request was refused before it left the process.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Service-level request kinds, used when reporting asynchronous failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Request {
    Login,
    Logout,
    Subscribe,
    Unsubscribe,
    Publish,
    DirectSend,
    RenewToken,
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Request::Login => "login",
            Request::Logout => "logout",
            Request::Subscribe => "subscribe",
            Request::Unsubscribe => "unsubscribe",
            Request::Publish => "publish",
            Request::DirectSend => "direct send",
            Request::RenewToken => "renew token",
        })
    }
}

/// A request the service rejected after the originating call returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    /// What was requested.
    pub request: Request,
    /// Backend-assigned request id.
    pub request_id: u64,
    /// Service result code.
    pub code: u16,
    /// Optional detail from the service.
    pub reason: Option<String>,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} request {} failed with code {}",
            self.request, self.request_id, self.code
        )?;
        if let Some(reason) = &self.reason {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}

/// Inbound path handed to a backend in [`Backend::open`].
///
/// Cheap to clone and safe to use from any thread. Once the owning client is
/// closed every emission is silently dropped.
#[derive(Clone)]
pub struct EventSink {
    dispatcher: Arc<Dispatcher>,
}

impl EventSink {
    /// A sink feeding `dispatcher`.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Deliver an inbound message to the registered handler.
    pub fn deliver(&self, event: InboundEvent) {
        self.dispatcher.push(Dispatch::Message(event));
    }

    /// Report an asynchronous request failure to the registered handler.
    pub fn report(&self, failure: BackendFailure) {
        self.dispatcher.push(Dispatch::Failure(failure));
    }

    /// Whether emissions still reach the handler.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.dispatcher.is_closed()
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("live", &self.is_live())
            .finish()
    }
}

/// A messaging backend.
///
/// Calls arrive sequentially from the owning client. A successful return
/// means the request was accepted, not that it was delivered; asynchronous
/// outcomes travel through the [`EventSink`].
pub trait Backend: Send {
    /// Short name for logs (e.g. "simulator", "remote").
    fn name(&self) -> &'static str;

    /// Create the underlying service handle and start emitting to `sink`.
    fn open(&mut self, config: &ClientConfig, sink: EventSink) -> Result<(), BackendError>;

    /// Release the underlying service handle. Idempotent; nothing is emitted
    /// after this returns.
    fn close(&mut self);

    /// Establish the participant session.
    fn set_session(&mut self, token: &str, participant_id: &str) -> Result<(), BackendError>;

    /// Start receiving broadcasts on `channel_id`.
    fn subscribe(&mut self, channel_id: &str) -> Result<(), BackendError>;

    /// Broadcast `payload` on `channel_id`.
    fn publish(&mut self, channel_id: &str, payload: Bytes) -> Result<(), BackendError>;

    /// Send `payload` to one participant.
    fn direct_send(&mut self, target_id: &str, payload: Bytes) -> Result<(), BackendError>;

    /// Stop receiving broadcasts on `channel_id`.
    fn unsubscribe(&mut self, channel_id: &str) -> Result<(), BackendError> {
        let _ = channel_id;
        Ok(())
    }

    /// Tear down the participant session, keeping the handle open.
    fn end_session(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Replace the session credential.
    fn renew_token(&mut self, token: &str) -> Result<(), BackendError> {
        let _ = token;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display() {
        let failure = BackendFailure {
            request: Request::DirectSend,
            request_id: 7,
            code: 1002,
            reason: Some("not logged in".into()),
        };
        assert_eq!(
            failure.to_string(),
            "direct send request 7 failed with code 1002: not logged in"
        );
    }
}
