//! Value objects for the verdict queue.
//!
//! Admission outcomes, decoded peer requests, worker pass plans and the
//! read-only diagnostics snapshot.

use std::fmt;

use bytes::Bytes;
use serde::Serialize;

use super::entities::{
    CopyMode, Element, ElementId, HookInfo, Peer, PeerPid, QueueState, Verdict,
};
use super::packet::PacketBuffer;

/// Result of offering a packet to the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Linked as a NEW element.
    Accepted(ElementId),
    /// Queue at capacity (or element allocation failed); dropped.
    RejectedFull,
    /// No peer in COPY mode, a flush pending, or shutting down; dropped.
    RejectedInactive,
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Why a packet was refused at admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    Full,
    Inactive,
    Alloc,
}

impl RejectReason {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Inactive => "inactive",
            Self::Alloc => "alloc",
        }
    }

    pub fn admission(self) -> Admission {
        match self {
            Self::Full | Self::Alloc => Admission::RejectedFull,
            Self::Inactive => Admission::RejectedInactive,
        }
    }
}

/// A refused packet, handed back so the caller can reinject it with DROP.
#[derive(Debug)]
pub struct Rejection {
    pub reason: RejectReason,
    pub packet: PacketBuffer,
    pub hook: HookInfo,
}

/// Decoded mode-change request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModeChange {
    pub mode: CopyMode,
    pub range: u32,
}

impl ModeChange {
    pub fn new(mode: CopyMode, range: u32) -> Self {
        Self { mode, range }
    }
}

/// Decoded verdict request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerdictRecord {
    pub id: ElementId,
    pub verdict: Verdict,
    /// Replacement payload, if the peer rewrote the packet.
    pub payload: Option<Bytes>,
}

impl VerdictRecord {
    pub fn new(id: ElementId, verdict: Verdict) -> Self {
        Self {
            id,
            verdict,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// Everything needed to build one notification, captured under the lock.
#[derive(Clone, Debug)]
pub struct NotifyJob {
    pub id: ElementId,
    pub hook: HookInfo,
    pub timestamp: (i64, i64),
    /// Payload view; present iff the copy mode is PACKET.
    pub payload: Option<Bytes>,
}

impl NotifyJob {
    /// Snapshots `element` under the peer's negotiated copy mode.
    pub fn snapshot(element: &Element, peer: &Peer) -> Self {
        let payload = match peer.copy_mode {
            CopyMode::Packet => Some(element.packet.view(peer.copy_range as usize)),
            CopyMode::Meta | CopyMode::None => None,
        };
        Self {
            id: element.id,
            hook: element.hook.clone(),
            timestamp: element.packet.timestamp_parts(),
            payload,
        }
    }
}

/// A dequeued packet awaiting reinjection.
#[derive(Debug)]
pub struct Reinjection {
    pub id: ElementId,
    pub packet: PacketBuffer,
    pub hook: HookInfo,
    pub verdict: Verdict,
}

impl Reinjection {
    pub fn new(element: Element, verdict: Verdict) -> Self {
        let id = element.id;
        let (packet, hook) = element.into_parts();
        Self {
            id,
            packet,
            hook,
            verdict,
        }
    }
}

/// Work captured by one worker pass.
#[derive(Debug, Default)]
pub struct PassPlan {
    /// True if this pass executed a flush.
    pub flushed: bool,
    /// Dequeued elements, oldest first.
    pub reinject: Vec<Reinjection>,
    /// Notifications to send, oldest first.
    pub jobs: Vec<NotifyJob>,
    /// Destination of `jobs`.
    pub peer: Option<PeerPid>,
}

/// Cumulative counters kept by the queue core.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub rejected_full: u64,
    pub rejected_inactive: u64,
    pub notified: u64,
    pub send_deferred: u64,
    pub verdicts: u64,
    /// Elements handed back to the hook, any verdict.
    pub reinjected: u64,
    /// Reinjections that carried DROP (flush, device-down, stale).
    pub dropped: u64,
    pub flushes: u64,
    pub peer_deaths: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorkerDiagnostics {
    pub worker_id: u64,
    pub terminate: bool,
    pub running: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PeerDiagnostics {
    pub pid: Option<PeerPid>,
    pub died: bool,
    pub copy_mode: CopyMode,
    pub copy_range: u32,
}

/// Read-only status snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct QueueDiagnostics {
    pub worker: WorkerDiagnostics,
    pub peer: PeerDiagnostics,
    pub length: usize,
    pub max_len: usize,
    pub state: QueueState,
    pub stats: QueueStats,
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

impl fmt::Display for QueueDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Worker id          : {}", self.worker.worker_id)?;
        writeln!(f, "Terminate          : {}", yes_no(self.worker.terminate))?;
        writeln!(f, "Running            : {}", yes_no(self.worker.running))?;
        match self.peer.pid {
            Some(pid) => writeln!(f, "Peer pid           : {pid}")?,
            None => writeln!(f, "Peer pid           : none")?,
        }
        writeln!(f, "Peer died          : {}", yes_no(self.peer.died))?;
        writeln!(f, "Copy mode          : {}", self.peer.copy_mode.as_str())?;
        writeln!(f, "Copy range         : {}", self.peer.copy_range)?;
        writeln!(f, "Queue length       : {}", self.length)?;
        writeln!(f, "Queue max length   : {}", self.max_len)?;
        writeln!(f, "Queue state        : {}", self.state.as_str())?;
        writeln!(f, "Enqueued           : {}", self.stats.enqueued)?;
        writeln!(f, "Rejected (full)    : {}", self.stats.rejected_full)?;
        writeln!(f, "Rejected (inactive): {}", self.stats.rejected_inactive)?;
        writeln!(f, "Notified           : {}", self.stats.notified)?;
        writeln!(f, "Send deferred      : {}", self.stats.send_deferred)?;
        writeln!(f, "Verdicts           : {}", self.stats.verdicts)?;
        writeln!(f, "Reinjected         : {}", self.stats.reinjected)?;
        writeln!(f, "Dropped            : {}", self.stats.dropped)?;
        writeln!(f, "Flushes            : {}", self.stats.flushes)?;
        write!(f, "Peer deaths        : {}", self.stats.peer_deaths)
    }
}
