//! Verdict queue error types.

use thiserror::Error;

use super::config::ConfigError;
use super::entities::{ElementId, PeerPid};

/// errno values carried in negative acknowledgements.
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EBUSY: i32 = 16;
    pub const EINVAL: i32 = 22;
    pub const ESHUTDOWN: i32 = 108;
}

/// Structural errors in wire messages.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("message truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("declared length {declared} does not fit {available} available bytes")]
    LengthMismatch { declared: usize, available: usize },

    #[error("message is not a request")]
    NotRequest,

    #[error("multi-part messages are not accepted")]
    Fragmented,

    #[error("source id must be non-zero")]
    InvalidSource,

    #[error("unknown message type {0:#06x}")]
    UnknownType(u16),

    #[error("unknown copy mode {0}")]
    UnknownMode(u8),

    #[error("unknown verdict code {0}")]
    UnknownVerdict(i32),

    #[error("payload of {len} bytes exceeds maximum {max}")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Verdict queue error type.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A flush is in progress; retry once it completes.
    #[error("queue busy: flush in progress")]
    Busy,

    #[error("queue is shutting down")]
    ShuttingDown,

    /// The element is not pending (already flushed, reinjected or never shown).
    #[error("element {0} not found")]
    NotFound(ElementId),

    #[error("sender {pid} is not authorized")]
    Unauthorized { pid: PeerPid },

    #[error("source id {claimed} does not match transport credentials {actual}")]
    SourceMismatch { claimed: PeerPid, actual: PeerPid },

    #[error("malformed message: {0}")]
    Malformed(#[from] CodecError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("hook error: {0}")]
    Hook(String),

    #[error("worker did not go idle within {waited_ms} ms")]
    ShutdownTimeout { waited_ms: u64 },
}

impl QueueError {
    /// errno reported to the peer in a negative acknowledgement.
    pub fn errno(&self) -> i32 {
        match self {
            Self::Busy => errno::EBUSY,
            Self::ShuttingDown => errno::ESHUTDOWN,
            Self::NotFound(_) => errno::ENOENT,
            Self::Unauthorized { .. } | Self::SourceMismatch { .. } => errno::EPERM,
            Self::Malformed(_) | Self::Config(_) => errno::EINVAL,
            Self::Hook(_) | Self::ShutdownTimeout { .. } => errno::EIO,
        }
    }
}
