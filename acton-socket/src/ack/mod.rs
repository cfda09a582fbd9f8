//! Acknowledgement correlation
//!
//! Outbound events that expect an answer register an [`AckCallback`] with the
//! [`AckManager`] and receive a per-session ack id. The answer (or a timeout,
//! or the session going away) resolves the callback exactly once.
//!
//! Inbound events that carry an ack id are answered through an [`AckRequest`],
//! driven by the configured [`AckMode`].

mod callback;
mod manager;
mod mode;
mod request;

pub use callback::{AckCallback, AckCallbackInfo, AckCallbackKind, AckHandler};
pub use manager::AckManager;
pub use mode::AckMode;
pub use request::AckRequest;
