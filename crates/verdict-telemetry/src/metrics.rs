//! Prometheus metrics for the verdict queue.
//!
//! All metrics follow the naming convention: `vq_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., packets_enqueued_total)
//! - **Gauge**: Value that can go up or down (e.g., queue_length)
//!
//! Several queues may run in one process; per-queue gauges carry a `worker`
//! label with the queue's worker id.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Elements currently linked, per queue
    pub static ref QUEUE_LENGTH: IntGaugeVec = IntGaugeVec::new(
        Opts::new("vq_queue_length", "Number of packets currently held in the verdict queue"),
        &["worker"]
    ).expect("metric creation failed");

    /// Packets admitted into the queue
    pub static ref PACKETS_ENQUEUED: IntCounter = IntCounter::new(
        "vq_packets_enqueued_total",
        "Total packets admitted into the verdict queue"
    ).expect("metric creation failed");

    /// Packets refused at admission
    pub static ref PACKETS_REJECTED: IntCounterVec = IntCounterVec::new(
        Opts::new("vq_packets_rejected_total", "Packets dropped at admission"),
        &["reason"]  // reason: full/inactive/alloc
    ).expect("metric creation failed");

    /// Packets handed back to the hook
    pub static ref PACKETS_REINJECTED: IntCounterVec = IntCounterVec::new(
        Opts::new("vq_packets_reinjected_total", "Packets reinjected by the worker"),
        &["verdict"]
    ).expect("metric creation failed");

    /// Verdicts accepted from the peer
    pub static ref VERDICTS: IntCounterVec = IntCounterVec::new(
        Opts::new("vq_verdicts_total", "Verdicts applied to pending packets"),
        &["verdict"]
    ).expect("metric creation failed");

    /// Notification attempts
    pub static ref NOTIFICATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("vq_notifications_total", "Notifications sent to the peer"),
        &["outcome"]  // outcome: sent/deferred/fatal
    ).expect("metric creation failed");

    /// Completed flush passes
    pub static ref FLUSHES: IntCounter = IntCounter::new(
        "vq_flushes_total",
        "Total flush passes completed by the worker"
    ).expect("metric creation failed");

    /// Peer deaths detected
    pub static ref PEER_DEATHS: IntCounter = IntCounter::new(
        "vq_peer_deaths_total",
        "Peers dropped after a fatal transport failure or release"
    ).expect("metric creation failed");
}

/// Length gauge of the queue served by `worker_id`.
pub fn queue_length(worker_id: u64) -> IntGauge {
    let worker = worker_id.to_string();
    QUEUE_LENGTH.with_label_values(&[worker.as_str()])
}

/// Removes the length series of a stopped queue.
pub fn forget_queue(worker_id: u64) {
    let worker = worker_id.to_string();
    let _ = QUEUE_LENGTH.remove_label_values(&[worker.as_str()]);
}

/// Handle proving the collectors are registered.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    registry: Registry,
}

impl MetricsHandle {
    /// Registry the queue collectors live in.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Register all metrics with the global registry.
///
/// Idempotent: collectors that are already registered are skipped.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(QUEUE_LENGTH.clone()),
        Box::new(PACKETS_ENQUEUED.clone()),
        Box::new(PACKETS_REJECTED.clone()),
        Box::new(PACKETS_REINJECTED.clone()),
        Box::new(VERDICTS.clone()),
        Box::new(NOTIFICATIONS.clone()),
        Box::new(FLUSHES.clone()),
        Box::new(PEER_DEATHS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        registry: REGISTRY.clone(),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
