//! The persistent socket channel.
//!
//! A single background task owns the connection, its [`ConnectionState`],
//! the room membership and the queue of calls waiting for the channel to
//! become ready. It reconnects with exponential backoff on any failure and
//! replays membership before anything else once it is ready again.

mod backoff;
mod channel;
#[cfg(test)]
pub(crate) mod mock;
mod protocol;
mod queue;
mod state;
mod transport;

pub use backoff::Backoff;
pub use channel::{SocketChannel, AUTH_METHOD};
pub(crate) use protocol::error_message;
pub use protocol::{CallRequest, Inbound, MembershipRequest, Outbound};
pub use state::ConnectionState;
pub use transport::{Connector, Transport, WsConnector};
