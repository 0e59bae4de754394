use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: lifecycle operations. Labels: op, outcome (ok/conflict/error).
pub const LIFECYCLE_OPS_TOTAL: &str = "bookd_lifecycle_ops_total";

/// Counter: operations that failed on a time-overlap with approved bookings.
pub const CONFLICTS_TOTAL: &str = "bookd_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: bookings auto-completed by the sweep.
pub const SWEEP_COMPLETED_TOTAL: &str = "bookd_sweep_completed_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookd_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
