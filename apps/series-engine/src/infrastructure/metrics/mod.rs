//! Prometheus Metrics Module
//!
//! Exposes engine metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: ticks ingested, bars finalized/seeded, rejects
//! - **Series**: materialized series and active subscription counts
//! - **Streams**: resumable session resets by reason
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
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
    describe_counter!(
        "series_engine_ticks_ingested_total",
        "Total ticks folded into series aggregators"
    );
    describe_counter!(
        "series_engine_bars_finalized_total",
        "Total bars finalized across all series"
    );
    describe_counter!(
        "series_engine_bars_seeded_total",
        "Total historical bars seeded at first subscribe"
    );
    describe_counter!(
        "series_engine_ingest_rejects_total",
        "Total inputs rejected by the aggregation path, by reason"
    );
    describe_counter!(
        "series_engine_stream_resets_total",
        "Total resumable stream resets signalled to clients, by reason"
    );

    describe_gauge!(
        "series_engine_active_series",
        "Number of materialized (symbol, timeframe) series"
    );
    describe_gauge!(
        "series_engine_active_subscriptions",
        "Number of symbols with at least one logical subscriber"
    );
    describe_gauge!(
        "series_engine_bus_subscribers",
        "Number of handlers registered on the event bus"
    );

    describe_histogram!(
        "series_engine_ingest_seconds",
        "Time to fold one feed event into all of its series"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for ingestion rejects.
#[derive(Debug, Clone, Copy)]
pub enum RejectReason {
    /// Malformed tick or bar.
    Invalid,
    /// Data older than the open interval.
    OutOfOrder,
}

impl RejectReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::OutOfOrder => "out_of_order",
        }
    }
}

/// Metric labels for stream reset signals.
#[derive(Debug, Clone, Copy)]
pub enum ResetReason {
    /// Cursor predates the current process epoch.
    EpochMismatch,
    /// Cursor points below retained history.
    HistoryEvicted,
}

impl ResetReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::EpochMismatch => "epoch_mismatch",
            Self::HistoryEvicted => "history_evicted",
        }
    }
}

/// Record an ingested tick.
pub fn record_tick_ingested() {
    counter!("series_engine_ticks_ingested_total").increment(1);
}

/// Record finalized bars for one timeframe.
pub fn record_bars_finalized(timeframe: &str, count: u64) {
    counter!(
        "series_engine_bars_finalized_total",
        "timeframe" => timeframe.to_string()
    )
    .increment(count);
}

/// Record historical bars seeded at first subscribe.
pub fn record_bars_seeded(count: u64) {
    counter!("series_engine_bars_seeded_total").increment(count);
}

/// Record a rejected input.
pub fn record_ingest_reject(reason: RejectReason) {
    counter!(
        "series_engine_ingest_rejects_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a reset signalled to a resuming client.
pub fn record_stream_reset(reason: ResetReason) {
    counter!(
        "series_engine_stream_resets_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the materialized series count.
pub fn set_active_series(count: f64) {
    gauge!("series_engine_active_series").set(count);
}

/// Update the active subscription count.
pub fn set_active_subscriptions(count: f64) {
    gauge!("series_engine_active_subscriptions").set(count);
}

/// Update the bus subscriber count.
pub fn set_bus_subscribers(count: f64) {
    gauge!("series_engine_bus_subscribers").set(count);
}

/// Record time spent folding one feed event.
pub fn record_ingest_duration(duration: Duration) {
    histogram!("series_engine_ingest_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_reason_as_str() {
        assert_eq!(RejectReason::Invalid.as_str(), "invalid");
        assert_eq!(RejectReason::OutOfOrder.as_str(), "out_of_order");
    }

    #[test]
    fn reset_reason_as_str() {
        assert_eq!(ResetReason::EpochMismatch.as_str(), "epoch_mismatch");
        assert_eq!(ResetReason::HistoryEvicted.as_str(), "history_evicted");
    }
}
