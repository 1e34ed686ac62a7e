//! IPC layer for the peer channel.
//!
//! - `wire`: envelope layout, flags, message types
//! - `codec`: MODE / VERDICT / PACKET / ERROR payloads
//! - `security`: credentials and authorization rules
//! - `handler`: frame dispatch into the queue

pub mod codec;
pub mod handler;
pub mod security;
pub mod wire;

pub use codec::Notification;
pub use handler::ControlHandler;
pub use security::{AuthorizationRules, Capabilities, Credentials};
pub use wire::{flags, msg_type, Envelope, EnvelopeValidator, ENVELOPE_LEN};
