//! Core domain entities for the verdict queue.
//!
//! Defines the element state machine, verdicts, copy modes and the peer
//! registration record.

use serde::Serialize;

use super::packet::PacketBuffer;

/// Identity of a queued element. Used by the peer to address its verdict.
pub type ElementId = u64;

/// Process id of the decision peer.
pub type PeerPid = u32;

/// Final disposition applied when a packet is reinjected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Drop,
    Accept,
    Stolen,
    Queue,
    Repeat,
}

impl Verdict {
    /// Highest verdict code accepted on the wire.
    pub const MAX_CODE: i32 = 4;

    /// Parses a wire verdict code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Drop),
            1 => Some(Self::Accept),
            2 => Some(Self::Stolen),
            3 => Some(Self::Queue),
            4 => Some(Self::Repeat),
            _ => None,
        }
    }

    /// Wire code of this verdict.
    pub fn code(self) -> i32 {
        match self {
            Self::Drop => 0,
            Self::Accept => 1,
            Self::Stolen => 2,
            Self::Queue => 3,
            Self::Repeat => 4,
        }
    }

    /// Lower-case label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::Accept => "accept",
            Self::Stolen => "stolen",
            Self::Queue => "queue",
            Self::Repeat => "repeat",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of each packet accompanies a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyMode {
    /// Queue disabled.
    #[default]
    None,
    /// Metadata only.
    Meta,
    /// Metadata plus up to `copy_range` payload bytes.
    Packet,
}

impl CopyMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Meta),
            2 => Some(Self::Packet),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Meta => 1,
            Self::Packet => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Meta => "meta",
            Self::Packet => "packet",
        }
    }
}

/// Queue-wide state.
///
/// ```text
/// [HOLD] ──set_mode(META|PACKET)──→ [COPY]
///   ↑                                  │
///   └──── flush pass completes ←── [FLUSH] ←── set_mode(NONE) / peer death / shutdown
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Neutral: no packets are admitted.
    #[default]
    Hold,
    /// A peer is registered and packets are copied to it.
    Copy,
    /// Every pending element is dropped on the next worker pass.
    Flush,
}

impl QueueState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::Copy => "copy",
            Self::Flush => "flush",
        }
    }
}

/// Per-element verdict processing state.
///
/// ```text
/// [NEW] ──worker pass──→ [NOTIFYING] ──send ok──→ [WAITING] ──verdict──→ [VERDICT_SET]
///   ↑                         │                                              │
///   └──── transient failure ──┘                             worker pass: reinject
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementState {
    /// Admitted, not yet shown to the peer.
    New,
    /// Owned by the worker while its notification is in flight.
    Notifying,
    /// Shown to the peer, awaiting a verdict.
    Waiting,
    /// Verdict stored; reinjected on the next worker pass.
    VerdictSet(Verdict),
}

impl ElementState {
    /// True once the peer has been (or is being) shown the element.
    pub fn is_visible_to_peer(&self) -> bool {
        matches!(self, Self::Notifying | Self::Waiting)
    }
}

/// Address family a hook is registered for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ProtocolFamily {
    #[default]
    Ipv4,
    Ipv6,
}

/// Checkpoint context carried with a packet and handed back at reinjection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HookInfo {
    /// Address family of the checkpoint.
    pub family: ProtocolFamily,
    /// Checkpoint identifier within the family.
    pub hook: u32,
    /// Inbound interface name, if any.
    pub in_dev: Option<String>,
    /// Outbound interface name, if any.
    pub out_dev: Option<String>,
    /// Packet mark.
    pub mark: u32,
    /// Link-layer protocol number.
    pub hw_protocol: u16,
}

impl HookInfo {
    pub fn new(family: ProtocolFamily, hook: u32) -> Self {
        Self {
            family,
            hook,
            ..Self::default()
        }
    }

    pub fn with_in_dev(mut self, name: impl Into<String>) -> Self {
        self.in_dev = Some(name.into());
        self
    }

    pub fn with_out_dev(mut self, name: impl Into<String>) -> Self {
        self.out_dev = Some(name.into());
        self
    }

    /// True if either interface is `name`.
    pub fn uses_device(&self, name: &str) -> bool {
        self.in_dev.as_deref() == Some(name) || self.out_dev.as_deref() == Some(name)
    }
}

/// A queued packet and its verdict-processing state.
#[derive(Debug)]
pub struct Element {
    pub id: ElementId,
    pub packet: PacketBuffer,
    pub state: ElementState,
    pub hook: HookInfo,
    /// CRC-32 of the payload as it was admitted.
    pub fingerprint: u32,
}

impl Element {
    pub fn new(id: ElementId, packet: PacketBuffer, hook: HookInfo) -> Self {
        let fingerprint = packet.fingerprint();
        Self {
            id,
            packet,
            state: ElementState::New,
            hook,
            fingerprint,
        }
    }

    /// Releases the packet and its hook context for reinjection.
    pub fn into_parts(self) -> (PacketBuffer, HookInfo) {
        (self.packet, self.hook)
    }
}

/// The registered decision peer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Peer {
    /// Registered process id, if any.
    pub pid: Option<PeerPid>,
    /// Set when the last peer was lost to a fatal transport failure or release.
    pub died: bool,
    pub copy_mode: CopyMode,
    /// Payload bytes per notification; 0 means the whole packet.
    pub copy_range: u32,
}

impl Peer {
    /// Registers `pid`, returning the previously registered pid when it differs.
    pub fn register(&mut self, pid: PeerPid) -> Option<PeerPid> {
        let previous = self.pid.filter(|p| *p != pid);
        self.pid = Some(pid);
        self.died = false;
        previous
    }

    /// Forgets the peer after it was lost.
    pub fn mark_dead(&mut self) {
        self.pid = None;
        self.died = true;
        self.copy_mode = CopyMode::None;
        self.copy_range = 0;
    }

    pub fn is_registered(&self) -> bool {
        self.pid.is_some()
    }
}
