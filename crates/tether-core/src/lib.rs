//! # tether-core
//!
//! Client-side core of the Tether realtime messaging client.
//!
//! This crate provides the building blocks every backend shares:
//!
//! - **Session** - Connection state machine (connect → authenticate → join)
//! - **Message** - Broadcast and directed delivery model
//! - **Backend** - Capability contract implemented by the simulator and the
//!   vendor-backed adapter
//! - **Dispatcher** - Serialized delivery of inbound events to the registered
//!   handler, from whichever thread the backend signals on
//! - **Client** - The public API tying the above together
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Client    │────▶│   Backend   │────▶│  Service    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │ inbound
//!        ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐
//! │   Session   │     │ Dispatcher  │────▶ handler
//! └─────────────┘     └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use tether_core::{Client, ClientConfig, InboundEvent};
//!
//! let config = ClientConfig::new("app", "u1").with_channel("room1");
//! let mut client = Client::simulated(config, |event: &InboundEvent| {
//!     println!("{} says {}", event.sender_id, event.payload_str());
//! })
//! .unwrap();
//!
//! client.connect().unwrap();
//! client.authenticate(Some("tok"), "u1").unwrap();
//! client.join_channel("room1").unwrap();
//! client.publish_to_channel("hello").unwrap();
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod simulator;
pub mod state;

pub use backend::{Backend, BackendError, BackendFailure, EventSink, Request};
pub use client::Client;
pub use config::{ClientConfig, ConfigError};
pub use dispatch::{DispatchHold, Dispatcher, EventReceiver, MessageHandler};
pub use error::{ClientError, ErrorKind};
pub use message::{DeliveryMode, InboundEvent, Route};
pub use simulator::SimulatorBackend;
pub use state::{Action, ConnectionState, Session};
