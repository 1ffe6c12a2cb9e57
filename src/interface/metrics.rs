//! Prometheus metrics exporter

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_gauge!(
        "relay_connected_users",
        "Number of users connected to the signaling relay"
    );
    describe_gauge!("relay_live_calls", "Number of calls routed by the relay");
    describe_counter!(
        "relay_messages_total",
        "Signaling messages received by the relay"
    );
    describe_counter!(
        "peercall_calls_started_total",
        "Calls placed or received by an orchestrator"
    );
    describe_counter!(
        "peercall_calls_ended_total",
        "Calls that returned to idle, by end reason"
    );
    describe_counter!(
        "peercall_media_failures_total",
        "Local media acquisition failures, by cause"
    );

    Ok(handle)
}

/// `/metrics` route with its own state
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(handle)
}

pub async fn metrics_handler(State(prometheus_handle): State<PrometheusHandle>) -> Response {
    let metrics = prometheus_handle.render();
    (StatusCode::OK, metrics).into_response()
}

pub fn update_connected_users(count: usize) {
    gauge!("relay_connected_users").set(count as f64);
}

pub fn update_live_calls(count: usize) {
    gauge!("relay_live_calls").set(count as f64);
}

pub fn record_relayed_message(kind: &'static str) {
    counter!("relay_messages_total", "kind" => kind).increment(1);
}
