//! # Integration Suites
//!
//! - `scenarios`: copy modes, capacity, flush and peer death end to end
//! - `ordering`: verdict ordering and payload rewrites
//! - `stress`: exactly-once reinjection under concurrent producers
//! - `telemetry`: metrics recorded by a live queue

pub mod scenarios;
pub mod stress;
