use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::state::snapshot::ConnectionStatus;

/// Start the Prometheus HTTP exporter on `port`.
/// After this call, any metrics recorded via the `metrics` crate
/// macros (counter!, histogram!) are automatically exported at /metrics.
pub fn init_metrics_server(port: u16) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()?;
    Ok(())
}

// ── Feed metrics ─────────────────────────────────────────────────

pub fn record_message(kind: &'static str) {
    counter!("feed_messages_total", "kind" => kind).increment(1);
}

pub fn record_decode_error() {
    counter!("feed_decode_errors_total").increment(1);
}

/// Spread updates for a (symbol, broker) the snapshot doesn't know yet.
pub fn record_dropped_update() {
    counter!("feed_dropped_updates_total").increment(1);
}

pub fn record_reconcile_latency_us(kind: &'static str, latency_us: u128) {
    histogram!("feed_reconcile_duration_us", "kind" => kind).record(latency_us as f64);
}

// ── Connection metrics ───────────────────────────────────────────

pub fn record_status_transition(status: ConnectionStatus) {
    counter!("feed_status_transitions_total", "status" => status.to_string()).increment(1);
}

pub fn set_subscriber_count(count: usize) {
    gauge!("feed_subscribers").set(count as f64);
}
