//! Metrics collection and export for Murmur.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const MESSAGES_TOTAL: &str = "murmur_messages_total";
    pub const MESSAGES_BYTES: &str = "murmur_messages_bytes";
    pub const WAITERS_TOTAL: &str = "murmur_waiters_total";
    pub const WAITERS_PENDING: &str = "murmur_waiters_pending";
    pub const POLLS_TOTAL: &str = "murmur_polls_total";
    pub const ROOMS_ACTIVE: &str = "murmur_rooms_active";
    pub const WAIT_SECONDS: &str = "murmur_wait_seconds";
    pub const ERRORS_TOTAL: &str = "murmur_errors_total";
}

/// How a long-poll request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Answered from the replay window without waiting.
    CatchUp,
    /// Resolved by a publish.
    Delivered,
    /// Gave up after the poll timeout.
    TimedOut,
    /// Client went away before anything arrived.
    Cancelled,
}

impl PollOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::CatchUp => "catch_up",
            Self::Delivered => "delivered",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of published messages");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of published message bodies");
    metrics::describe_counter!(names::WAITERS_TOTAL, "Total number of registered waiters");
    metrics::describe_gauge!(
        names::WAITERS_PENDING,
        "Current number of long-poll requests waiting for messages"
    );
    metrics::describe_counter!(names::POLLS_TOTAL, "Long-poll requests by outcome");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of rooms");
    metrics::describe_histogram!(
        names::WAIT_SECONDS,
        "Time a long-poll request spent waiting in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a published message.
pub fn record_publish(bytes: usize) {
    counter!(names::MESSAGES_TOTAL).increment(1);
    counter!(names::MESSAGES_BYTES).increment(bytes as u64);
}

/// Record the end of a long-poll request.
pub fn record_poll(outcome: PollOutcome, waited_seconds: f64) {
    counter!(names::POLLS_TOTAL, "outcome" => outcome.as_str()).increment(1);
    if outcome != PollOutcome::CatchUp {
        histogram!(names::WAIT_SECONDS).record(waited_seconds);
    }
}

/// Update active room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that tracks a registered waiter until it is dropped.
pub struct WaiterMetricsGuard;

impl WaiterMetricsGuard {
    /// Create a new metrics guard, recording a registered waiter.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::WAITERS_TOTAL).increment(1);
        gauge!(names::WAITERS_PENDING).increment(1.0);
        Self
    }
}

impl Default for WaiterMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WaiterMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::WAITERS_PENDING).decrement(1.0);
    }
}
