//! Ports layer - trait definitions for hexagonal architecture.
//!
//! - `inbound`: PacketInterceptor, called by the hook
//! - `outbound`: InterceptHook and PeerTransport, driven by the queue

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
