//! Wire protocol for Electrum-compatible servers.
//!
//! Requests are newline-terminated JSON objects carrying an `id`, a
//! `method`, and a `params` list. Replies are read off the socket until a
//! structurally complete JSON object has been observed (see
//! [`codec::is_complete`]). Server-initiated subscription events arrive on
//! the same socket as id-less frames and are surfaced as
//! [`Frame::Notification`].

pub mod codec;
pub mod handshake;
pub mod methods;
pub mod request;
pub mod scripthash;

mod error;

pub use error::ProtocolError;
pub use handshake::{handshake_request, ServerVersion, CLIENT_NAME, PROTOCOL_VERSION};
pub use request::{parse_frame, Frame, Notification, Response, RpcRequest};
pub use scripthash::address_to_scripthash;
