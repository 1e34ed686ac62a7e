//! IPC message handler for the verdict queue.
//!
//! Processes frames from the peer with envelope validation and authorization
//! ahead of any payload parsing.
//!
//! ```text
//! raw frame
//!   │ < 16 bytes ────────────────────────→ dropped silently
//!   ▼
//! envelope checks ── fail ──────────────→ nack EINVAL
//!   │ type <= BASE ─────────────────────→ ignored
//!   ▼
//! authorization ──── fail ──────────────→ nack EPERM
//!   ▼
//! payload parse ──── fail ──────────────→ nack EINVAL
//!   ▼
//! register peer, apply ── fail ─────────→ nack errno
//!   ▼
//! ack (only if ACK flag set)
//! ```

use bytes::Bytes;
use tracing::{debug, warn};

use crate::domain::{CodecError, QueueError};
use crate::ipc::codec::{ack_frame, decode_mode, decode_verdict};
use crate::ipc::security::{AuthorizationRules, Credentials};
use crate::ipc::wire::{flags, msg_type, Envelope, EnvelopeValidator, ENVELOPE_LEN};
use crate::service::VerdictQueue;

/// Dispatches peer frames into a queue.
#[derive(Clone)]
pub struct ControlHandler {
    queue: VerdictQueue,
}

impl ControlHandler {
    pub fn new(queue: VerdictQueue) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &VerdictQueue {
        &self.queue
    }

    /// Handles one complete frame. Returns the acknowledgement to send back,
    /// if any.
    pub fn handle_frame(&self, raw: Bytes, credentials: &Credentials) -> Option<Bytes> {
        let envelope = match Envelope::decode(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(len = raw.len(), error = %e, "Dropping runt frame");
                return None;
            }
        };

        if let Err(e) = EnvelopeValidator::validate(&envelope, raw.len()) {
            warn!(source = envelope.source, error = %e, "Rejected malformed envelope");
            return Some(ack_frame(QueueError::from(e).errno(), &envelope));
        }

        if envelope.msg_type <= msg_type::BASE {
            return None;
        }

        let payload = raw.slice(ENVELOPE_LEN..envelope.length as usize);
        match self.dispatch(&envelope, payload, credentials) {
            Ok(()) => envelope
                .has_flag(flags::ACK)
                .then(|| ack_frame(0, &envelope)),
            Err(e) => {
                warn!(
                    source = envelope.source,
                    msg_type = envelope.msg_type,
                    error = %e,
                    "Peer request failed"
                );
                Some(ack_frame(e.errno(), &envelope))
            }
        }
    }

    fn dispatch(
        &self,
        envelope: &Envelope,
        payload: Bytes,
        credentials: &Credentials,
    ) -> Result<(), QueueError> {
        AuthorizationRules::validate(credentials, envelope)?;

        match envelope.msg_type {
            msg_type::MODE => {
                let change = decode_mode(&payload)?;
                self.queue.set_mode(change)?;
                self.queue.register_peer(envelope.source);
                Ok(())
            }
            msg_type::VERDICT => {
                let record = decode_verdict(payload)?;
                self.queue.register_peer(envelope.source);
                match self.queue.apply_verdict(record) {
                    Err(QueueError::NotFound(id)) => {
                        debug!(element_id = id, "Verdict for unknown element ignored");
                        Ok(())
                    }
                    other => other,
                }
            }
            other => Err(CodecError::UnknownType(other).into()),
        }
    }
}
