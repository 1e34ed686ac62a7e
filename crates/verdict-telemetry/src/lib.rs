//! # Verdict Telemetry
//!
//! Observability for the packet verdict queue.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` with an `EnvFilter`, pretty or JSON output
//! - **Metrics**: Prometheus collectors recorded by the queue and its worker
//!
//! ## Usage
//!
//! ```rust,ignore
//! use verdict_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! // queue runs here; metrics are available through `encode_metrics()`
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `verdict-queue` | Service name attached to log lines |
//! | `VQ_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `VQ_JSON_LOGS` | `false` | Emit JSON formatted logs |
//! | `VQ_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{init_logging, LoggingHandle};
pub use metrics::{
    encode_metrics, forget_queue, queue_length, register_metrics, MetricsHandle, FLUSHES,
    NOTIFICATIONS, PACKETS_ENQUEUED, PACKETS_REINJECTED, PACKETS_REJECTED, PEER_DEATHS,
    QUEUE_LENGTH, VERDICTS,
};
pub use prometheus::IntGauge;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and metrics in one call.
///
/// Returns a guard that must be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first: they do not depend on the subscriber.
    let metrics = register_metrics()?;
    let logging = init_logging(&config)?;

    Ok(TelemetryGuard {
        _logging: logging,
        _metrics: metrics,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _logging: LoggingHandle,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry");
    }
}
