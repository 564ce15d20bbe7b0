//! # tether-relay
//!
//! A development messaging service for Tether clients.
//!
//! The relay speaks `tether-protocol` over WebSocket and provides what the
//! vendor-backed client expects from a real service:
//!
//! - **Sessions** - Login with app id, user id and token
//! - **Channels** - Subscribe, unsubscribe and broadcast
//! - **User inboxes** - Directed publishes on per-user channels
//! - **Presence** - Join/leave notices to subscribers who ask for them
//!
//! Messages are not stored: a broadcast reaches whoever is subscribed at
//! that moment and a directed publish to an offline user fails.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Router    │────▶│  Channel    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                     ┌──────┴──────┐
//!                     ▼             ▼
//!              ┌─────────────┐ ┌─────────────┐
//!              │  Presence   │ │ User inbox  │
//!              └─────────────┘ └─────────────┘
//! ```

pub mod channel;
pub mod config;
pub mod handlers;
pub mod message;
pub mod metrics;
pub mod presence;
pub mod router;

pub use channel::{Channel, ChannelId};
pub use crate::config::Config;
pub use handlers::{run_server, serve, AppState};
pub use message::Envelope;
pub use presence::Presence;
pub use router::{Router, RouterConfig, RouterError};
