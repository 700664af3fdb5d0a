//! Prometheus metrics endpoint.

use crate::service::CounterService;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const PREFIX: &str = "counter_server";

/// Prometheus metrics handler.
///
/// Gauges reflect current state; counters are monotonic since startup.
pub async fn metrics_handler(
    Extension(service): Extension<Arc<CounterService>>,
) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&service).await,
    )
}

async fn render(service: &CounterService) -> String {
    let m = service.metrics();
    let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
    let mut out = String::new();

    gauge(
        &mut out,
        "connections_active",
        "Number of connected clients",
        service.registry().count() as u64,
    );
    gauge(
        &mut out,
        "counter_value",
        "Current counter value",
        service.current_value().await,
    );
    gauge(
        &mut out,
        "visitors_total",
        "Last known visitor total",
        service.current_visitors().await,
    );
    gauge(
        &mut out,
        "rate_limit_keys",
        "Connections tracked by the event rate limiter",
        service.rate_limits().tracked_keys() as u64,
    );
    let _ = writeln!(
        out,
        "# HELP {PREFIX}_info Server information\n# TYPE {PREFIX}_info gauge\n{PREFIX}_info{{version=\"{}\"}} 1\n",
        env!("CARGO_PKG_VERSION")
    );

    let counters: [(&str, &str, &AtomicU64); 13] = [
        ("connections_total", "Total connections accepted", &m.connections_total),
        ("increments_total", "Total increments applied", &m.increments_total),
        ("decrements_total", "Total decrements applied", &m.decrements_total),
        ("events_rejected_total", "Events refused during shutdown", &m.events_rejected),
        ("rate_limit_hits_total", "Events dropped by rate limiting", &m.rate_limit_hits),
        ("invalid_messages_total", "Frames that failed to decode", &m.invalid_messages),
        ("clients_evicted_total", "Clients dropped for a full or closed queue", &m.clients_evicted),
        ("store_writes_total", "Successful store writes", &m.store_writes_total),
        ("store_write_failures_total", "Failed store write attempts", &m.store_write_failures),
        ("store_retries_total", "Store write retries", &m.store_retries),
        ("store_writes_dropped_total", "Store writes abandoned after retry", &m.store_writes_dropped),
        ("store_writes_superseded_total", "Counter writes skipped for a newer value", &m.store_writes_superseded),
        ("visitor_snapshot_fallbacks_total", "Visitor snapshots served from memory", &m.visitor_snapshot_fallbacks),
    ];
    for (name, help, value) in counters {
        counter(&mut out, name, help, load(value));
    }

    out
}

fn gauge(out: &mut String, name: &str, help: &str, value: impl std::fmt::Display) {
    let _ = writeln!(
        out,
        "# HELP {PREFIX}_{name} {help}\n# TYPE {PREFIX}_{name} gauge\n{PREFIX}_{name} {value}\n"
    );
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(
        out,
        "# HELP {PREFIX}_{name} {help}\n# TYPE {PREFIX}_{name} counter\n{PREFIX}_{name} {value}\n"
    );
}
