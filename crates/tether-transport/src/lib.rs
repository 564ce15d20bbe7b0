//! # tether-transport
//!
//! Service links for the Tether client.
//!
//! A *link* is the external client object the vendor-backed backend drives:
//! it accepts protocol frames without blocking, owns its own I/O thread, and
//! reports inbound frames and connection changes to a [`LinkHandler`] on that
//! thread.
//!
//! - **WebSocket** - The default link, speaking `tether-protocol` to a
//!   messaging service
//! - **RemoteBackend** - Adapts any link to the client's `Backend` contract
//!
//! ```rust,ignore
//! use tether_core::{Client, ClientConfig, InboundEvent};
//! use tether_transport::{RemoteBackend, WebSocketConfig};
//!
//! let backend = RemoteBackend::websocket(WebSocketConfig::new("ws://127.0.0.1:8080/ws"));
//! let mut client = Client::new(config, backend, |event: &InboundEvent| {
//!     println!("{}: {}", event.sender_id, event.payload_str());
//! })?;
//! ```

pub mod remote;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use remote::RemoteBackend;
pub use traits::{LinkConnector, LinkEvent, LinkHandler, LinkState, ServiceLink, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketConnector, WebSocketLink};
