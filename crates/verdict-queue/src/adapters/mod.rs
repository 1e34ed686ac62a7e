//! Adapters implementing the outbound ports.
//!
//! - `memory`: RecordingHook, an in-memory intercept hook
//! - `channel`: ChannelTransport over a bounded tokio channel
//! - `unix`: UnixStreamTransport and the socket accept loop

pub mod channel;
pub mod memory;
pub mod unix;

pub use channel::{ChannelTransport, PeerFrame};
pub use memory::{RecordingHook, ReinjectedPacket};
pub use unix::{serve_unix_peer, UnixStreamTransport};
