//! Namespaces, rooms and broadcast fan-out
//!
//! A [`NamespacesHub`] holds every [`Namespace`]. Each namespace keeps its own
//! two-way room index; room operations that must be seen cluster-wide
//! (`join_room`, `leave_room`, broadcasts) also publish through the node's
//! pub/sub store.

mod broadcast;
mod hub;
mod listener;
mod rooms;
mod socket_namespace;

pub use broadcast::BroadcastOperations;
pub use hub::NamespacesHub;
pub use listener::{ConnectListener, DisconnectListener, EventListener};
pub use rooms::RoomMembership;
pub use socket_namespace::Namespace;

/// Name of the namespace every session connects to first
pub const DEFAULT_NAMESPACE: &str = "";
