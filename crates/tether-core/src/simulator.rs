//! In-process simulator backend.
//!
//! The simulator does not talk to any service. Every send is looped straight
//! back to the sending client through its own event sink, before the send
//! call returns:
//!
//! - a channel publish arrives as a broadcast from the local `client_id`;
//! - a directed send arrives as if the target had sent it back.
//!
//! That makes it useful for deterministic tests of the state machine and the
//! dispatch path. It says nothing about real delivery.

use crate::backend::{Backend, BackendError, EventSink};
use crate::config::ClientConfig;
use crate::message::InboundEvent;
use bytes::Bytes;
use tracing::{debug, trace};

/// Loopback backend.
#[derive(Debug, Default)]
pub struct SimulatorBackend {
    sink: Option<EventSink>,
    client_id: String,
    participant_id: Option<String>,
    channel: Option<String>,
    sent: u64,
}

impl SimulatorBackend {
    /// A closed simulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sends looped back so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Channel most recently subscribed, if still subscribed.
    #[must_use]
    pub fn subscribed_channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    fn sink(&self) -> Result<&EventSink, BackendError> {
        self.sink.as_ref().ok_or(BackendError::NotOpen)
    }
}

impl Backend for SimulatorBackend {
    fn name(&self) -> &'static str {
        "simulator"
    }

    fn open(&mut self, config: &ClientConfig, sink: EventSink) -> Result<(), BackendError> {
        if self.sink.is_some() {
            return Err(BackendError::AlreadyOpen);
        }
        self.client_id = config.client_id.clone();
        self.sink = Some(sink);
        debug!(client = %self.client_id, "Simulator opened");
        Ok(())
    }

    fn close(&mut self) {
        if self.sink.take().is_some() {
            self.participant_id = None;
            self.channel = None;
            debug!(client = %self.client_id, sent = self.sent, "Simulator closed");
        }
    }

    fn set_session(&mut self, _token: &str, participant_id: &str) -> Result<(), BackendError> {
        self.sink()?;
        self.participant_id = Some(participant_id.to_string());
        Ok(())
    }

    fn subscribe(&mut self, channel_id: &str) -> Result<(), BackendError> {
        self.sink()?;
        self.channel = Some(channel_id.to_string());
        Ok(())
    }

    fn unsubscribe(&mut self, channel_id: &str) -> Result<(), BackendError> {
        self.sink()?;
        if self.channel.as_deref() == Some(channel_id) {
            self.channel = None;
        }
        Ok(())
    }

    fn end_session(&mut self) -> Result<(), BackendError> {
        self.sink()?;
        self.participant_id = None;
        self.channel = None;
        Ok(())
    }

    fn publish(&mut self, channel_id: &str, payload: Bytes) -> Result<(), BackendError> {
        let event = InboundEvent::broadcast(self.client_id.clone(), channel_id, payload);
        trace!(channel = %channel_id, "Simulator loopback publish");
        self.sink()?.deliver(event);
        self.sent += 1;
        Ok(())
    }

    fn direct_send(&mut self, target_id: &str, payload: Bytes) -> Result<(), BackendError> {
        let event = InboundEvent::directed(target_id, payload);
        trace!(target = %target_id, "Simulator loopback direct send");
        self.sink()?.deliver(event);
        self.sent += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::message::DeliveryMode;
    use std::sync::{Arc, Mutex};

    fn open_simulator() -> (SimulatorBackend, Arc<Mutex<Vec<InboundEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let handler = move |event: &InboundEvent| record.lock().unwrap().push(event.clone());
        let sink = EventSink::new(Arc::new(Dispatcher::new(Arc::new(handler))));

        let mut sim = SimulatorBackend::new();
        sim.open(&ClientConfig::new("A", "u1"), sink).unwrap();
        (sim, seen)
    }

    #[test]
    fn test_requires_open() {
        let mut sim = SimulatorBackend::new();
        assert!(matches!(
            sim.publish("c1", Bytes::from_static(b"x")),
            Err(BackendError::NotOpen)
        ));
    }

    #[test]
    fn test_open_twice_is_rejected() {
        let (mut sim, _) = open_simulator();
        let sink = EventSink::new(Arc::new(Dispatcher::new(Arc::new(|_: &InboundEvent| {}))));
        assert!(matches!(
            sim.open(&ClientConfig::new("A", "u1"), sink),
            Err(BackendError::AlreadyOpen)
        ));
    }

    #[test]
    fn test_loopback_semantics() {
        let (mut sim, seen) = open_simulator();

        sim.subscribe("room1").unwrap();
        sim.publish("room1", Bytes::from_static(b"hello")).unwrap();
        sim.direct_send("peer42", Bytes::from_static(b"ping")).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].sender_id, "u1");
        assert_eq!(seen[0].channel.as_deref(), Some("room1"));
        assert_eq!(seen[0].mode, DeliveryMode::Broadcast);
        assert_eq!(seen[1].sender_id, "peer42");
        assert_eq!(seen[1].mode, DeliveryMode::Directed);
        assert_eq!(sim.sent(), 2);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut sim, _) = open_simulator();
        sim.subscribe("room1").unwrap();
        sim.close();
        sim.close();
        assert!(sim.subscribed_channel().is_none());
        assert!(sim.subscribe("room1").is_err());
    }
}
