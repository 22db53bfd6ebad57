// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging and metrics.
//!
//! - **Logging**: `tracing` events, filtered with `RUST_LOG` or the CLI's
//!   `--verbose` flag
//! - **Metrics**: per-vendor call counters, latency histograms and token
//!   totals collected in [`GLOBAL_METRICS`]
//!
//! Initialize once at startup:
//!
//! ```rust,ignore
//! use colloquy::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```
//!
//! Hot-path debug events and metric updates are compiled only with the
//! `telemetry` feature (on by default).

mod init;
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{CallMetrics, Histogram, Metrics, MetricsSnapshot, OperationMetrics, GLOBAL_METRICS};
