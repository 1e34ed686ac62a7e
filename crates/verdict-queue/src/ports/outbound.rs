//! Outbound (Driven) ports for the verdict queue.
//!
//! The queue depends on two external systems: the intercept hook that owns
//! packet delivery and reinjection, and the transport that carries frames to
//! the peer.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::domain::{HookInfo, PacketBuffer, PeerPid, ProtocolFamily, QueueError, Verdict};
use crate::ports::inbound::PacketInterceptor;

/// Policy checkpoint that diverts packets into the queue.
pub trait InterceptHook: Send + Sync {
    /// Routes packets of `family` to `interceptor`.
    ///
    /// # Errors
    /// `Hook` if another interceptor already owns the family.
    fn register(
        &self,
        family: ProtocolFamily,
        interceptor: Arc<dyn PacketInterceptor>,
    ) -> Result<(), QueueError>;

    /// Stops diverting packets of `family`.
    fn unregister(&self, family: ProtocolFamily);

    /// Hands a packet back with its final disposition.
    ///
    /// Called exactly once per delivered packet, never under the queue lock.
    fn reinject(&self, packet: PacketBuffer, hook: HookInfo, verdict: Verdict);
}

/// Transport failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Send buffer full; the frame can be retried later.
    #[error("transport would block")]
    WouldBlock,

    /// The peer endpoint is gone.
    #[error("peer disconnected")]
    Disconnected,

    #[error("transport I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Transient failures defer the notification; others mean peer death.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WouldBlock)
    }
}

/// Channel to the decision peer.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Sends one complete frame to `pid`.
    ///
    /// The worker's only outward blocking call.
    async fn send(&self, pid: PeerPid, frame: Bytes) -> Result<(), TransportError>;

    /// Releases the transport. Later sends fail with `Disconnected`.
    async fn close(&self);
}

/// Transport with a scripted failure sequence, for testing.
#[cfg(test)]
pub struct ScriptedTransport {
    sent: parking_lot::Mutex<Vec<(PeerPid, Bytes)>>,
    script: parking_lot::Mutex<std::collections::VecDeque<TransportError>>,
    closed: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            sent: parking_lot::Mutex::new(Vec::new()),
            script: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Queues `error` as the outcome of the next send.
    pub fn fail_next(&self, error: TransportError) {
        self.script.lock().push_back(error);
    }

    pub fn sent(&self) -> Vec<(PeerPid, Bytes)> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl PeerTransport for ScriptedTransport {
    async fn send(&self, pid: PeerPid, frame: Bytes) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Disconnected);
        }
        if let Some(error) = self.script.lock().pop_front() {
            return Err(error);
        }
        self.sent.lock().push((pid, frame));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}
