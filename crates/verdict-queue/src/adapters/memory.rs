//! In-memory intercept hook.
//!
//! Stands in for a real packet checkpoint: `deliver()` pushes a packet into
//! whichever interceptor is registered for its family, and every reinjection
//! is recorded for inspection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use crate::domain::{Admission, HookInfo, PacketBuffer, ProtocolFamily, QueueError, Verdict};
use crate::ports::{InterceptHook, PacketInterceptor};

/// A packet handed back by the queue.
#[derive(Clone, Debug)]
pub struct ReinjectedPacket {
    pub packet: PacketBuffer,
    pub hook: HookInfo,
    pub verdict: Verdict,
}

/// Hook that records reinjections.
#[derive(Default)]
pub struct RecordingHook {
    interceptors: RwLock<HashMap<ProtocolFamily, Arc<dyn PacketInterceptor>>>,
    reinjected: Mutex<Vec<ReinjectedPacket>>,
    changed: Notify,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, family: ProtocolFamily) -> bool {
        self.interceptors.read().contains_key(&family)
    }

    /// Diverts a packet into the interceptor registered for `hook.family`.
    ///
    /// Returns `None`, passing the packet through untouched, when nothing is
    /// registered.
    pub fn deliver(&self, packet: PacketBuffer, hook: HookInfo) -> Option<Admission> {
        let interceptor = self.interceptors.read().get(&hook.family).cloned()?;
        Some(interceptor.intercept(packet, hook))
    }

    pub fn reinjected(&self) -> Vec<ReinjectedPacket> {
        self.reinjected.lock().clone()
    }

    pub fn reinjected_count(&self) -> usize {
        self.reinjected.lock().len()
    }

    /// Number of reinjections that carried `verdict`.
    pub fn count_verdict(&self, verdict: Verdict) -> usize {
        self.reinjected
            .lock()
            .iter()
            .filter(|r| r.verdict == verdict)
            .count()
    }

    /// Waits until at least `count` packets were reinjected.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let changed = self.changed.notified();
            if self.reinjected_count() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return self.reinjected_count() >= count;
            }
        }
    }
}

impl InterceptHook for RecordingHook {
    fn register(
        &self,
        family: ProtocolFamily,
        interceptor: Arc<dyn PacketInterceptor>,
    ) -> Result<(), QueueError> {
        let mut interceptors = self.interceptors.write();
        if interceptors.contains_key(&family) {
            return Err(QueueError::Hook(format!("{family:?} already has an interceptor")));
        }
        interceptors.insert(family, interceptor);
        Ok(())
    }

    fn unregister(&self, family: ProtocolFamily) {
        self.interceptors.write().remove(&family);
    }

    fn reinject(&self, packet: PacketBuffer, hook: HookInfo, verdict: Verdict) {
        self.reinjected.lock().push(ReinjectedPacket {
            packet,
            hook,
            verdict,
        });
        self.changed.notify_waiters();
    }
}
