//! Verdict queue handle - the subsystem's main entry point.
//!
//! `VerdictQueue` is a cheap, cloneable handle over shared state. The hook
//! holds one clone (as its `PacketInterceptor`), the control handler another,
//! and the worker task the shared state itself.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use verdict_telemetry::{
    forget_queue, queue_length, register_metrics, IntGauge, PACKETS_ENQUEUED, PACKETS_REJECTED,
    PEER_DEATHS, VERDICTS,
};

use crate::domain::{
    Admission, ElementId, ElementState, HookInfo, ModeChange, PacketBuffer, PeerPid, QueueConfig,
    QueueCore, QueueDiagnostics, QueueError, QueueState, Verdict, VerdictRecord,
    WorkerDiagnostics,
};
use crate::ports::{InterceptHook, PacketInterceptor, PeerTransport};
use crate::service::worker;

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// State shared between handles and the worker task.
pub(crate) struct Shared {
    pub(crate) core: Mutex<QueueCore>,
    pub(crate) wake: Notify,
    pub(crate) hook: Arc<dyn InterceptHook>,
    pub(crate) transport: Arc<dyn PeerTransport>,
    pub(crate) config: QueueConfig,
    pub(crate) worker_id: u64,
    /// `vq_queue_length` series of this queue.
    pub(crate) length: IntGauge,
    pub(crate) terminate: AtomicBool,
    pub(crate) running: AtomicBool,
    seq: AtomicU32,
    worker: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Shared {
    /// Sequence number for the next outbound frame.
    pub(crate) fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Hands a packet back to the hook. Never called under the queue lock.
    pub(crate) fn reinject(&self, packet: PacketBuffer, hook: HookInfo, verdict: Verdict) {
        self.hook.reinject(packet, hook, verdict);
    }
}

/// Handle to a running verdict queue.
#[derive(Clone)]
pub struct VerdictQueue {
    shared: Arc<Shared>,
}

impl VerdictQueue {
    /// Validates `config`, spawns the worker and registers with the hook.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// - `Config` if the configuration is invalid
    /// - `Hook` if the hook refuses the registration
    pub fn start(
        config: QueueConfig,
        hook: Arc<dyn InterceptHook>,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Self, QueueError> {
        config.validate()?;
        if let Err(e) = register_metrics() {
            warn!(error = %e, "Queue metrics not exported");
        }

        let worker_id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Shared {
            core: Mutex::new(QueueCore::new(config.max_len, first_element_id())),
            wake: Notify::new(),
            hook,
            transport,
            config,
            worker_id,
            length: queue_length(worker_id),
            terminate: AtomicBool::new(false),
            running: AtomicBool::new(true),
            seq: AtomicU32::new(1),
            worker: Mutex::new(None),
            stopped: AtomicBool::new(false),
        });

        let handle = tokio::spawn(worker::run(Arc::clone(&shared)));
        *shared.worker.lock() = Some(handle);

        let queue = Self { shared };
        let family = queue.shared.config.family;
        let interceptor: Arc<dyn PacketInterceptor> = Arc::new(queue.clone());
        if let Err(e) = queue.shared.hook.register(family, interceptor) {
            queue.shared.terminate.store(true, Ordering::SeqCst);
            queue.shared.core.lock().begin_shutdown();
            queue.shared.wake.notify_one();
            return Err(e);
        }

        info!(
            worker_id,
            family = ?family,
            max_len = queue.shared.config.max_len,
            "Verdict queue started"
        );
        Ok(queue)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Offers a packet to the queue.
    ///
    /// Rejected packets are reinjected with DROP before this returns.
    pub fn enqueue(&self, packet: PacketBuffer, hook: HookInfo) -> Admission {
        let (result, len) = {
            let mut core = self.shared.core.lock();
            let result = core.admit(packet, hook);
            (result, core.len())
        };
        self.shared.length.set(len as i64);

        match result {
            Ok(id) => {
                PACKETS_ENQUEUED.inc();
                self.shared.wake.notify_one();
                debug!(element_id = id, len, "Packet queued");
                Admission::Accepted(id)
            }
            Err(rejection) => {
                PACKETS_REJECTED
                    .with_label_values(&[rejection.reason.as_str()])
                    .inc();
                debug!(reason = rejection.reason.as_str(), "Packet rejected, dropping");
                self.shared
                    .reinject(rejection.packet, rejection.hook, Verdict::Drop);
                rejection.reason.admission()
            }
        }
    }

    /// Registers `pid` as the decision peer. A pid change is accepted with a
    /// warning.
    pub fn register_peer(&self, pid: PeerPid) -> Option<PeerPid> {
        let previous = self.shared.core.lock().register_peer(pid);
        if let Some(old) = previous {
            warn!(old_pid = old, new_pid = pid, "Peer pid changed");
        }
        previous
    }

    /// Changes the copy mode.
    ///
    /// # Errors
    /// - `Busy` when enabling copy while a flush is pending
    /// - `ShuttingDown` after `shutdown()` started
    pub fn set_mode(&self, change: ModeChange) -> Result<(), QueueError> {
        let max_copy_range = self.shared.config.max_copy_range;
        self.shared.core.lock().set_mode(change, max_copy_range)?;
        info!(mode = change.mode.as_str(), range = change.range, "Copy mode set");
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Stores the peer's verdict for a notified element.
    ///
    /// # Errors
    /// `NotFound` if the element is not awaiting a verdict.
    pub fn apply_verdict(&self, record: VerdictRecord) -> Result<(), QueueError> {
        let id = record.id;
        let verdict = record.verdict;
        self.shared.core.lock().apply_verdict(record)?;
        VERDICTS.with_label_values(&[verdict.as_str()]).inc();
        debug!(element_id = id, verdict = verdict.as_str(), "Verdict set");
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Drops every pending packet routed through `ifname`.
    pub fn drop_device(&self, ifname: &str) -> usize {
        let dropped = self.shared.core.lock().drop_device(ifname);
        if dropped > 0 {
            self.shared.wake.notify_one();
        }
        dropped
    }

    /// Called by a transport when the endpoint of `pid` closed.
    pub fn peer_released(&self, pid: PeerPid) -> bool {
        let released = self.shared.core.lock().peer_released(pid);
        if released {
            PEER_DEATHS.inc();
            info!(pid, "Peer released, flushing queue");
            self.shared.wake.notify_one();
        }
        released
    }

    /// Changes the admission limit at runtime.
    pub fn set_max_len(&self, max_len: usize) -> Result<(), QueueError> {
        self.shared.core.lock().set_max_len(max_len)?;
        info!(max_len, "Queue max length changed");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.shared.core.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.core.lock().is_empty()
    }

    pub fn state(&self) -> QueueState {
        self.shared.core.lock().state()
    }

    /// State of a linked element.
    pub fn element_state(&self, id: ElementId) -> Option<ElementState> {
        self.shared.core.lock().element_state(id)
    }

    pub fn diagnostics(&self) -> QueueDiagnostics {
        let worker = WorkerDiagnostics {
            worker_id: self.shared.worker_id,
            terminate: self.shared.terminate.load(Ordering::SeqCst),
            running: self.shared.running.load(Ordering::SeqCst),
        };
        self.shared.core.lock().diagnostics(worker)
    }

    /// Tears the queue down.
    ///
    /// Flushes, waits up to `shutdown_timeout` for the worker to finish, then
    /// unregisters from the hook and closes the transport, in that order.
    /// Idempotent.
    ///
    /// # Errors
    /// `ShutdownTimeout` if the worker had to be aborted. Teardown still
    /// completes and every pending packet is dropped.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        let shared = &self.shared;
        if shared.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(worker_id = shared.worker_id, "Shutting down verdict queue");
        shared.terminate.store(true, Ordering::SeqCst);
        shared.core.lock().begin_shutdown();
        shared.wake.notify_one();

        let deadline = Instant::now() + shared.config.shutdown_timeout;
        let mut timed_out = false;
        while shared.running.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                timed_out = true;
                break;
            }
            tokio::time::sleep(shared.config.shutdown_poll_interval).await;
        }

        let handle = shared.worker.lock().take();
        if let Some(handle) = handle {
            if timed_out {
                warn!(worker_id = shared.worker_id, "Worker did not go idle, aborting");
                handle.abort();
            }
            // An aborted worker may still be inside a reinject; nothing is
            // drained or unregistered until it has actually stopped.
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Worker task failed");
                }
            }
            shared.running.store(false, Ordering::SeqCst);
        }

        let leftovers = shared.core.lock().drain_all();
        for r in leftovers {
            shared.reinject(r.packet, r.hook, r.verdict);
        }

        shared.hook.unregister(shared.config.family);
        shared.transport.close().await;
        forget_queue(shared.worker_id);
        info!(worker_id = shared.worker_id, "Verdict queue stopped");

        if timed_out {
            return Err(QueueError::ShutdownTimeout {
                waited_ms: shared.config.shutdown_timeout.as_millis() as u64,
            });
        }
        Ok(())
    }
}

impl PacketInterceptor for VerdictQueue {
    fn intercept(&self, packet: PacketBuffer, hook: HookInfo) -> Admission {
        self.enqueue(packet, hook)
    }
}

/// Ids start at the wall clock in microseconds, so a restarted queue does
/// not reissue ids a previous instance handed out.
fn first_element_id() -> ElementId {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as ElementId)
        .unwrap_or(1)
        .max(1)
}
