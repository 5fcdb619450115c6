//! Prometheus Metrics Module
//!
//! Exposes broker metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Upstream**: Messages received, parse errors, reconnects, connection gauge
//! - **Consumers**: Messages delivered and dropped, active sessions
//! - **Subscriptions**: Topics requested upstream
//! - **Latency**: Time from upstream frame to consumer outboxes
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns `BuildError` if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Upstream
    describe_counter!(
        "token_broker_upstream_messages_total",
        "Total events parsed from the upstream feed"
    );
    describe_counter!(
        "token_broker_parse_errors_total",
        "Total upstream frames discarded because they could not be decoded"
    );
    describe_counter!(
        "token_broker_reconnects_total",
        "Total upstream reconnection attempts"
    );
    describe_gauge!(
        "token_broker_upstream_connected",
        "1 when the upstream connection is open"
    );

    // Consumers
    describe_counter!(
        "token_broker_messages_sent_total",
        "Total messages queued to consumer sessions"
    );
    describe_counter!(
        "token_broker_messages_dropped_total",
        "Total messages dropped for slow or closed consumers"
    );
    describe_gauge!(
        "token_broker_sessions",
        "Number of attached consumer sessions"
    );

    // Subscriptions
    describe_gauge!(
        "token_broker_topics",
        "Number of topics requested upstream"
    );

    // Latency
    describe_histogram!(
        "token_broker_dispatch_seconds",
        "Time to fan one upstream event out to consumer outboxes"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an event parsed from the upstream feed.
pub fn record_upstream_message(event_type: &'static str) {
    counter!(
        "token_broker_upstream_messages_total",
        "event_type" => event_type
    )
    .increment(1);
}

/// Record an upstream frame that failed to decode.
pub fn record_parse_error() {
    counter!("token_broker_parse_errors_total").increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("token_broker_reconnects_total").increment(1);
}

/// Update the upstream connection gauge.
pub fn set_upstream_connected(connected: bool) {
    gauge!("token_broker_upstream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record messages queued to consumers.
pub fn record_messages_sent(message_type: &'static str, count: u64) {
    counter!(
        "token_broker_messages_sent_total",
        "message_type" => message_type
    )
    .increment(count);
}

/// Record messages dropped for a consumer.
pub fn record_messages_dropped(reason: &'static str, count: u64) {
    counter!(
        "token_broker_messages_dropped_total",
        "reason" => reason
    )
    .increment(count);
}

/// Update the attached session count.
#[allow(clippy::cast_precision_loss)]
pub fn set_sessions(count: usize) {
    gauge!("token_broker_sessions").set(count as f64);
}

/// Update the upstream topic count.
#[allow(clippy::cast_precision_loss)]
pub fn set_topics(count: usize) {
    gauge!("token_broker_topics").set(count as f64);
}

/// Record how long one dispatch took.
pub fn record_dispatch_duration(duration: Duration) {
    histogram!("token_broker_dispatch_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
