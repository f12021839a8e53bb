use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "hostbook_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "hostbook_http_request_duration_seconds";

/// Counter: bookings admitted as pending.
pub const BOOKINGS_CREATED_TOTAL: &str = "hostbook_bookings_created_total";

/// Counter: applied lifecycle transitions. Labels: transition.
pub const TRANSITIONS_TOTAL: &str = "hostbook_transitions_total";

/// Counter: pending bookings cancelled because an overlapping one was approved.
pub const CASCADE_CANCELLATIONS_TOTAL: &str = "hostbook_cascade_cancellations_total";

/// Counter: rejected engine calls. Labels: kind.
pub const ENGINE_ERRORS_TOTAL: &str = "hostbook_engine_errors_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: time spent waiting for a host section, in seconds.
pub const HOST_LOCK_WAIT_SECONDS: &str = "hostbook_host_lock_wait_seconds";

/// Counter: host section acquisitions that timed out.
pub const HOST_LOCK_TIMEOUTS_TOTAL: &str = "hostbook_host_lock_timeouts_total";

/// Gauge: hosts known to the engine.
pub const HOSTS_ACTIVE: &str = "hostbook_hosts_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "hostbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "hostbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        tracing::error!("failed to install Prometheus exporter: {e}");
        return;
    }
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
