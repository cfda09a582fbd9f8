//! Protocol values shared by every component
//!
//! Frame encoding is owned by the transport layer. The core only sees decoded
//! [`Packet`] values and the [`Transport`] they arrived on.

mod packet;
mod transport;

pub use packet::{Packet, PacketType};
pub use transport::Transport;
