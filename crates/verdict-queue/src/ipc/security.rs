//! Authorization for peer control messages.
//!
//! Checked after envelope validation and before any payload is parsed.
//!
//! | Message Type | Requirement |
//! |--------------|-------------|
//! | `MODE` | `net_admin` capability; source matches transport pid |
//! | `VERDICT` | `net_admin` capability; source matches transport pid |

use crate::domain::{PeerPid, QueueError};
use crate::ipc::wire::Envelope;

/// Capabilities granted to a transport endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// May configure and answer the queue.
    pub net_admin: bool,
}

/// Identity of the process behind a transport endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    /// 0 when the transport cannot tell.
    pub pid: PeerPid,
    pub uid: u32,
    pub capabilities: Capabilities,
}

impl Credentials {
    /// Credentials of a privileged in-process peer.
    pub fn admin(pid: PeerPid) -> Self {
        Self {
            pid,
            uid: 0,
            capabilities: Capabilities { net_admin: true },
        }
    }

    pub fn unprivileged(pid: PeerPid, uid: u32) -> Self {
        Self {
            pid,
            uid,
            capabilities: Capabilities::default(),
        }
    }
}

/// Authorization rules for peer messages.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationRules {
    /// Non-root uids granted `net_admin`.
    admin_uids: Vec<u32>,
}

impl AuthorizationRules {
    pub fn new(admin_uids: Vec<u32>) -> Self {
        Self { admin_uids }
    }

    /// Derives credentials for a socket peer. Root always gets `net_admin`.
    pub fn credentials_for(&self, pid: PeerPid, uid: u32) -> Credentials {
        Credentials {
            pid,
            uid,
            capabilities: Capabilities {
                net_admin: uid == 0 || self.admin_uids.contains(&uid),
            },
        }
    }

    /// Validates that the sender may issue `envelope`.
    ///
    /// When the transport knows the sender pid, the envelope must not claim
    /// another one.
    pub fn validate(credentials: &Credentials, envelope: &Envelope) -> Result<(), QueueError> {
        if !credentials.capabilities.net_admin {
            return Err(QueueError::Unauthorized {
                pid: envelope.source,
            });
        }

        if credentials.pid != 0 && credentials.pid != envelope.source {
            return Err(QueueError::SourceMismatch {
                claimed: envelope.source,
                actual: credentials.pid,
            });
        }

        Ok(())
    }
}
