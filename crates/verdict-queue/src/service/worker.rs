//! # Verdict Worker
//!
//! One tokio task per queue. Every wake-up runs a full pass:
//!
//! ```text
//! ┌─ lock ──────────────────────────────────────────────┐
//! │ FLUSH?  → dequeue all (DROP), state := HOLD          │
//! │ else    → dequeue VERDICT_SET, NEW → NOTIFYING,      │
//! │           leftover NOTIFYING → DROP                  │
//! └──────────────────────────────────────────────────────┘
//!   reinject dequeued packets          (no lock)
//!   send notifications oldest first    (no lock)
//!     ok        → WAITING
//!     transient → NEW (rest of pass too), retry later
//!     fatal     → peer death, FLUSH, pass again
//! ```
//!
//! Decided packets are reinjected before any notification is attempted, so a
//! stalled peer never holds up packets that already have a verdict.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, warn};
use verdict_telemetry::{FLUSHES, NOTIFICATIONS, PACKETS_REINJECTED, PEER_DEATHS};

use crate::domain::{NotifyJob, PeerPid, QueueState};
use crate::ipc::codec::notification_frame;
use crate::service::queue::Shared;

/// Outcome of the notification half of a pass.
#[derive(Debug, PartialEq, Eq)]
enum NotifyOutcome {
    Done,
    Deferred,
    PeerDead,
}

/// Worker main loop. Exits once termination is requested and the queue is
/// drained.
pub(crate) async fn run(shared: Arc<Shared>) {
    info!(worker_id = shared.worker_id, "Verdict worker started");

    loop {
        let deferred = run_pass(&shared).await;

        if shared.terminate.load(Ordering::SeqCst) {
            let core = shared.core.lock();
            if core.is_empty() && core.state() != QueueState::Flush {
                break;
            }
        }

        if deferred {
            // Wake early on new work, otherwise retry after the interval.
            let _ = tokio::time::timeout(shared.config.retry_interval, shared.wake.notified())
                .await;
        } else {
            shared.wake.notified().await;
        }
    }

    shared.running.store(false, Ordering::SeqCst);
    info!(worker_id = shared.worker_id, "Verdict worker stopped");
}

/// Runs one pass, repeating it after a peer death so the flush happens in
/// the same wake-up. Returns true if notifications were deferred.
async fn run_pass(shared: &Shared) -> bool {
    loop {
        let plan = {
            let mut core = shared.core.lock();
            let plan = core.begin_pass();
            shared.length.set(core.len() as i64);
            plan
        };

        if plan.flushed {
            FLUSHES.inc();
            info!(dropped = plan.reinject.len(), "Queue flushed");
        }

        for r in plan.reinject {
            PACKETS_REINJECTED
                .with_label_values(&[r.verdict.as_str()])
                .inc();
            debug!(element_id = r.id, verdict = r.verdict.as_str(), "Reinjecting");
            shared.reinject(r.packet, r.hook, r.verdict);
        }

        let Some(pid) = plan.peer else {
            return false;
        };
        if plan.jobs.is_empty() {
            return false;
        }

        match notify(shared, pid, plan.jobs).await {
            NotifyOutcome::Done => return false,
            NotifyOutcome::Deferred => return true,
            NotifyOutcome::PeerDead => continue,
        }
    }
}

async fn notify(shared: &Shared, pid: PeerPid, jobs: Vec<NotifyJob>) -> NotifyOutcome {
    let mut jobs = jobs.into_iter();

    while let Some(job) = jobs.next() {
        let frame = notification_frame(&job, shared.next_seq());
        match shared.transport.send(pid, frame).await {
            Ok(()) => {
                NOTIFICATIONS.with_label_values(&["sent"]).inc();
                if !shared.core.lock().mark_notified(job.id) {
                    debug!(element_id = job.id, "Element decided while notifying");
                }
            }
            Err(e) if e.is_transient() => {
                let ids = std::iter::once(job.id).chain(jobs.map(|j| j.id));
                let deferred = shared.core.lock().defer(ids);
                NOTIFICATIONS
                    .with_label_values(&["deferred"])
                    .inc_by(deferred as u64);
                debug!(pid, deferred, error = %e, "Notifications deferred");
                return NotifyOutcome::Deferred;
            }
            Err(e) => {
                NOTIFICATIONS.with_label_values(&["fatal"]).inc();
                PEER_DEATHS.inc();
                shared.core.lock().peer_lost();
                warn!(pid, error = %e, "Peer lost, flushing queue");
                return NotifyOutcome::PeerDead;
            }
        }
    }

    NotifyOutcome::Done
}
