//! # Queue Core - Ordered Element Store and Verdict State Machine
//!
//! Pure, synchronous state of one verdict queue. The service wraps it in a
//! single `parking_lot::Mutex`; nothing here blocks, allocates under I/O, or
//! calls out to the hook or transport.
//!
//! ## Data Structures
//!
//! - `elements`: `VecDeque<Element>` in enqueue order. Identities come from a
//!   monotonic counter, so the deque is also sorted by id and lookups use
//!   binary search.
//! - `peer`: the single registered decision peer and its copy mode.
//!
//! ## Invariants Enforced
//!
//! - Length is `elements.len()`; there is no separate counter to drift.
//! - `admit()` never links past `max_len`.
//! - Every linked element leaves through exactly one `Reinjection`
//!   (`begin_pass()` or `drain_all()`).
//! - Ids are never reused, so a late verdict cannot hit a newer element.

use std::collections::VecDeque;

use tracing::{debug, warn};

use super::config::ConfigError;
use super::entities::{
    CopyMode, Element, ElementId, ElementState, HookInfo, Peer, PeerPid, QueueState, Verdict,
};
use super::errors::QueueError;
use super::packet::PacketBuffer;
use super::value_objects::{
    ModeChange, NotifyJob, PassPlan, PeerDiagnostics, QueueDiagnostics, QueueStats, Reinjection,
    RejectReason, Rejection, VerdictRecord, WorkerDiagnostics,
};

/// State of one verdict queue.
#[derive(Debug)]
pub struct QueueCore {
    elements: VecDeque<Element>,
    max_len: usize,
    state: QueueState,
    peer: Peer,
    next_id: ElementId,
    closing: bool,
    stats: QueueStats,
}

impl QueueCore {
    /// Creates an empty queue in HOLD. Ids start at `first_id`.
    pub fn new(max_len: usize, first_id: ElementId) -> Self {
        Self {
            elements: VecDeque::new(),
            max_len,
            state: QueueState::Hold,
            peer: Peer::default(),
            next_id: first_id,
            closing: false,
            stats: QueueStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// State of element `id`, if it is still linked.
    pub fn element_state(&self, id: ElementId) -> Option<ElementState> {
        self.position(id).map(|idx| self.elements[idx].state)
    }

    /// Ids currently linked, oldest first.
    pub fn ids(&self) -> Vec<ElementId> {
        self.elements.iter().map(|e| e.id).collect()
    }

    fn position(&self, id: ElementId) -> Option<usize> {
        self.elements.binary_search_by_key(&id, |e| e.id).ok()
    }

    /// Links a packet as a NEW element.
    ///
    /// # Errors
    /// Returns the packet inside a `Rejection` when the queue is inactive,
    /// full, or cannot grow its element index. The caller reinjects it with
    /// DROP once the lock is released.
    pub fn admit(&mut self, packet: PacketBuffer, hook: HookInfo) -> Result<ElementId, Rejection> {
        let reason = if self.closing || self.state != QueueState::Copy || !self.peer.is_registered()
        {
            Some(RejectReason::Inactive)
        } else if self.elements.len() >= self.max_len {
            Some(RejectReason::Full)
        } else if self.elements.try_reserve(1).is_err() {
            Some(RejectReason::Alloc)
        } else {
            None
        };

        if let Some(reason) = reason {
            match reason {
                RejectReason::Inactive => self.stats.rejected_inactive += 1,
                RejectReason::Full | RejectReason::Alloc => self.stats.rejected_full += 1,
            }
            return Err(Rejection {
                reason,
                packet,
                hook,
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.elements.push_back(Element::new(id, packet, hook));
        self.stats.enqueued += 1;
        Ok(id)
    }

    /// Registers `pid` as the peer. Returns the replaced pid, if different.
    pub fn register_peer(&mut self, pid: PeerPid) -> Option<PeerPid> {
        self.peer.register(pid)
    }

    /// Applies a mode change.
    ///
    /// NONE schedules a flush. META and PACKET enter COPY unless a flush is
    /// still pending.
    ///
    /// # Errors
    /// - `ShuttingDown` once `begin_shutdown()` ran
    /// - `Busy` when enabling copy while a flush is pending
    pub fn set_mode(&mut self, change: ModeChange, max_copy_range: u32) -> Result<(), QueueError> {
        if self.closing {
            return Err(QueueError::ShuttingDown);
        }

        match change.mode {
            CopyMode::None => {
                self.peer.copy_mode = CopyMode::None;
                self.peer.copy_range = 0;
                self.state = QueueState::Flush;
            }
            CopyMode::Meta | CopyMode::Packet => {
                if self.state == QueueState::Flush {
                    return Err(QueueError::Busy);
                }
                self.peer.copy_mode = change.mode;
                self.peer.copy_range = if change.mode == CopyMode::Packet {
                    change.range.min(max_copy_range)
                } else {
                    0
                };
                self.state = QueueState::Copy;
            }
        }
        Ok(())
    }

    /// Stores a verdict for an element the peer has been shown.
    ///
    /// A replacement payload is written only if its length or CRC-32 differs
    /// from the admitted pre-image.
    ///
    /// # Errors
    /// `NotFound` if the element is gone, was never notified, or already
    /// carries a verdict.
    pub fn apply_verdict(&mut self, record: VerdictRecord) -> Result<(), QueueError> {
        let idx = self
            .position(record.id)
            .ok_or(QueueError::NotFound(record.id))?;
        let element = &mut self.elements[idx];
        if !element.state.is_visible_to_peer() {
            return Err(QueueError::NotFound(record.id));
        }

        if let Some(payload) = record.payload {
            if payload.len() != element.packet.len()
                || crc32fast::hash(&payload) != element.fingerprint
            {
                element.packet.replace_payload(&payload);
            }
        }

        element.state = ElementState::VerdictSet(record.verdict);
        self.stats.verdicts += 1;
        Ok(())
    }

    /// Runs the locked half of a worker pass.
    ///
    /// In FLUSH every element is dequeued with DROP and the state returns to
    /// HOLD. Otherwise decided elements are dequeued, NEW elements become
    /// NOTIFYING with a snapshot job, and leftover NOTIFYING elements are
    /// dropped.
    pub fn begin_pass(&mut self) -> PassPlan {
        if self.state == QueueState::Flush {
            let reinject: Vec<Reinjection> = self
                .elements
                .drain(..)
                .map(|element| Reinjection::new(element, Verdict::Drop))
                .collect();
            self.state = QueueState::Hold;
            self.stats.flushes += 1;
            self.record_reinjections(&reinject);
            return PassPlan {
                flushed: true,
                reinject,
                ..PassPlan::default()
            };
        }

        let notify = self.peer.is_registered() && self.state == QueueState::Copy;
        let mut reinject = Vec::new();
        let mut jobs = Vec::new();
        let mut kept = VecDeque::with_capacity(self.elements.len());

        for mut element in self.elements.drain(..) {
            match element.state {
                ElementState::VerdictSet(verdict) => {
                    reinject.push(Reinjection::new(element, verdict));
                }
                ElementState::New if notify => {
                    element.state = ElementState::Notifying;
                    jobs.push(NotifyJob::snapshot(&element, &self.peer));
                    kept.push_back(element);
                }
                ElementState::New | ElementState::Waiting => kept.push_back(element),
                ElementState::Notifying => {
                    warn!(element_id = element.id, "Element left in flight, dropping");
                    reinject.push(Reinjection::new(element, Verdict::Drop));
                }
            }
        }
        self.elements = kept;
        self.record_reinjections(&reinject);

        PassPlan {
            flushed: false,
            reinject,
            jobs,
            peer: self.peer.pid,
        }
    }

    fn record_reinjections(&mut self, reinject: &[Reinjection]) {
        self.stats.reinjected += reinject.len() as u64;
        self.stats.dropped += reinject
            .iter()
            .filter(|r| r.verdict == Verdict::Drop)
            .count() as u64;
    }

    /// NOTIFYING → WAITING after a successful send.
    ///
    /// Returns false if the element changed meanwhile (device-down verdict,
    /// flush).
    pub fn mark_notified(&mut self, id: ElementId) -> bool {
        let Some(idx) = self.position(id) else {
            return false;
        };
        let element = &mut self.elements[idx];
        if element.state != ElementState::Notifying {
            return false;
        }
        element.state = ElementState::Waiting;
        self.stats.notified += 1;
        true
    }

    /// NOTIFYING → NEW after a transient send failure. Returns how many
    /// elements were deferred.
    pub fn defer<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = ElementId>,
    {
        let mut deferred = 0;
        for id in ids {
            if let Some(idx) = self.position(id) {
                let element = &mut self.elements[idx];
                if element.state == ElementState::Notifying {
                    element.state = ElementState::New;
                    deferred += 1;
                }
            }
        }
        if deferred > 0 {
            self.stats.send_deferred += 1;
        }
        deferred
    }

    /// Clears the peer after a fatal transport failure and schedules a flush.
    pub fn peer_lost(&mut self) -> Option<PeerPid> {
        let pid = self.peer.pid;
        self.peer.mark_dead();
        self.state = QueueState::Flush;
        self.stats.peer_deaths += 1;
        pid
    }

    /// Treats a released endpoint as peer death if it belongs to the peer.
    pub fn peer_released(&mut self, pid: PeerPid) -> bool {
        if self.peer.pid != Some(pid) {
            return false;
        }
        self.peer_lost();
        true
    }

    /// Gives DROP to every undecided element routed through `ifname`.
    pub fn drop_device(&mut self, ifname: &str) -> usize {
        let mut dropped = 0;
        for element in self.elements.iter_mut() {
            if matches!(element.state, ElementState::VerdictSet(_)) {
                continue;
            }
            if element.hook.uses_device(ifname) {
                element.state = ElementState::VerdictSet(Verdict::Drop);
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(ifname, dropped, "Device down, elements marked for drop");
        }
        dropped
    }

    /// Changes the admission limit. Never evicts.
    pub fn set_max_len(&mut self, max_len: usize) -> Result<(), QueueError> {
        if max_len == 0 {
            return Err(ConfigError::ZeroMaxLen.into());
        }
        self.max_len = max_len;
        Ok(())
    }

    /// Stops admissions and schedules a final flush.
    pub fn begin_shutdown(&mut self) {
        self.closing = true;
        self.state = QueueState::Flush;
    }

    /// Dequeues every element with DROP, bypassing the worker.
    pub fn drain_all(&mut self) -> Vec<Reinjection> {
        let reinject: Vec<Reinjection> = self
            .elements
            .drain(..)
            .map(|element| Reinjection::new(element, Verdict::Drop))
            .collect();
        self.record_reinjections(&reinject);
        if self.state == QueueState::Flush {
            self.state = QueueState::Hold;
        }
        reinject
    }

    pub fn diagnostics(&self, worker: WorkerDiagnostics) -> QueueDiagnostics {
        QueueDiagnostics {
            worker,
            peer: PeerDiagnostics {
                pid: self.peer.pid,
                died: self.peer.died,
                copy_mode: self.peer.copy_mode,
                copy_range: self.peer.copy_range,
            },
            length: self.elements.len(),
            max_len: self.max_len,
            state: self.state,
            stats: self.stats,
        }
    }
}
