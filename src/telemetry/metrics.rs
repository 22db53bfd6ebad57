// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process metrics for vendor calls, retries and compactions.
//!
//! Lightweight counters kept behind a global; nothing is exported over the
//! network. The CLI prints a report on exit when asked to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use serde::Serialize;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Vendor calls keyed by operation (`openai.chat`, `anthropic.stream`, ...).
    calls: RwLock<HashMap<String, CallMetrics>>,

    /// Timed operations that are not vendor calls.
    operations: RwLock<HashMap<String, OperationMetrics>>,

    tokens: Counters,

    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            calls: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            tokens: Counters::default(),
            start_time: Instant::now(),
        }
    }

    /// Record one vendor request.
    pub fn record_vendor_call(&self, operation: &str, duration: Duration, success: bool) {
        let mut calls = self.calls.write().unwrap_or_else(PoisonError::into_inner);
        calls
            .entry(operation.to_string())
            .or_default()
            .record(duration, success);
    }

    /// Record a retry of a failed vendor request.
    pub fn record_retry(&self, operation: &str) {
        let mut calls = self.calls.write().unwrap_or_else(PoisonError::into_inner);
        calls.entry(operation.to_string()).or_default().retries += 1;
    }

    /// Record a generic timed operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        ops.entry(name.to_string()).or_default().record(duration);
    }

    /// Record token usage.
    pub fn record_tokens(&self, input: u64, output: u64) {
        self.tokens.input.fetch_add(input, Ordering::Relaxed);
        self.tokens.output.fetch_add(output, Ordering::Relaxed);
    }

    /// Metrics for one vendor operation.
    pub fn call_metrics(&self, operation: &str) -> Option<CallMetrics> {
        self.calls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation)
            .cloned()
    }

    /// Metrics for one generic operation.
    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Total (input, output) tokens.
    pub fn token_counts(&self) -> (u64, u64) {
        (
            self.tokens.input.load(Ordering::Relaxed),
            self.tokens.output.load(Ordering::Relaxed),
        )
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (input_tokens, output_tokens) = self.token_counts();
        MetricsSnapshot {
            calls: self
                .calls
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            operations: self
                .operations
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            input_tokens,
            output_tokens,
            uptime: self.uptime(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.tokens.input.store(0, Ordering::Relaxed);
        self.tokens.output.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics for one vendor operation.
#[derive(Debug, Clone, Serialize)]
pub struct CallMetrics {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    /// Requests that were retried after a failure.
    pub retries: u64,
    pub latency: Histogram,
    #[serde(skip)]
    total_duration: Duration,
}

impl CallMetrics {
    pub fn new() -> Self {
        Self {
            requests: 0,
            successes: 0,
            failures: 0,
            retries: 0,
            latency: Histogram::default(),
            total_duration: Duration::ZERO,
        }
    }

    /// Record a single request.
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.requests += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.latency.record(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        if self.requests == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.requests as u32
        }
    }

    /// Fraction of requests that succeeded (1.0 when there were none).
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            1.0
        } else {
            self.successes as f64 / self.requests as f64
        }
    }
}

impl Default for CallMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Generic operation metrics with histogram.
#[derive(Debug, Clone, Serialize)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
    pub histogram: Histogram,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket latency histogram.
#[derive(Debug, Clone, Serialize)]
pub struct Histogram {
    /// Bucket upper bounds in milliseconds.
    buckets: Vec<u64>,
    /// Count per bucket, plus one overflow bucket.
    counts: Vec<u64>,
}

impl Histogram {
    /// Create a histogram with custom bucket bounds (in milliseconds).
    pub fn with_buckets(buckets: Vec<u64>) -> Self {
        let counts = vec![0; buckets.len() + 1];
        Self { buckets, counts }
    }

    pub fn record(&mut self, duration: Duration) {
        let millis = duration.as_millis() as u64;
        let idx = self
            .buckets
            .iter()
            .position(|&b| millis <= b)
            .unwrap_or(self.buckets.len());
        self.counts[idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Approximate percentile, reported as the upper bound of its bucket.
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;
        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let millis = match self.buckets.get(i) {
                    Some(&bound) => bound,
                    None => self.buckets.last().copied().unwrap_or(0) * 2,
                };
                return Duration::from_millis(millis);
            }
        }
        Duration::ZERO
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // LLM calls: 250ms up to the default five minute request timeout
        Self::with_buckets(vec![250, 1_000, 5_000, 15_000, 60_000, 300_000])
    }
}

#[derive(Debug, Default)]
struct Counters {
    input: AtomicU64,
    output: AtomicU64,
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub calls: HashMap<String, CallMetrics>,
    pub operations: HashMap<String, OperationMetrics>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Metrics Report ===\n\n");
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        report.push_str(&format!(
            "Tokens: {} input, {} output\n\n",
            self.input_tokens, self.output_tokens
        ));

        let mut names: Vec<&String> = self.calls.keys().collect();
        names.sort();
        if !names.is_empty() {
            report.push_str("Vendor Calls:\n");
            for name in names {
                let m = &self.calls[name];
                report.push_str(&format!(
                    "  {}: {} requests, {:.1}% success, {} retries, avg {:.2?}, p99 {:.2?}\n",
                    name,
                    m.requests,
                    m.success_rate() * 100.0,
                    m.retries,
                    m.avg_duration(),
                    m.latency.p99()
                ));
            }
            report.push('\n');
        }

        let mut names: Vec<&String> = self.operations.keys().collect();
        names.sort();
        if !names.is_empty() {
            report.push_str("Operations:\n");
            for name in names {
                let m = &self.operations[name];
                report.push_str(&format!(
                    "  {}: {} ops, avg {:.2?}, max {:.2?}\n",
                    name,
                    m.count,
                    m.avg_duration(),
                    m.max_duration
                ));
            }
        }

        report
    }
}
