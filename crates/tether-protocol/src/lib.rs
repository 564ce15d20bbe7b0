//! # tether-protocol
//!
//! Wire protocol spoken between a Tether link and the messaging service.
//!
//! Every request a link sends carries a request id; the service answers each
//! one with a `Result` frame carrying the same id and a result code. Inbound
//! traffic (`Message`, `Presence`, `TokenWillExpire`) is unsolicited.
//!
//! ## Frame Types
//!
//! - `Login` / `Logout` - Session with the service
//! - `Subscribe` / `Unsubscribe` - Channel membership
//! - `Publish` - Broadcast to a channel or direct to a user
//! - `RenewToken` - Swap the session credential
//! - `Result` - Outcome of a request
//! - `Message` / `Presence` / `TokenWillExpire` - Service notifications
//!
//! ## Example
//!
//! ```rust
//! use tether_protocol::{codec, ChannelType, Frame};
//!
//! let frame = Frame::publish(7, "lobby", ChannelType::Message, b"hi".to_vec());
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{code, ChannelType, Frame, FrameType, PresenceAction, RequestId};
pub use version::{Version, PROTOCOL_VERSION};
