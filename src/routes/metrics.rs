use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics — worker counters in Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for the metrics the worker loop records.
pub fn describe() {
    metrics::describe_counter!(
        "worker_polls_total",
        "Request queue polls, labelled by result (empty, message, error)"
    );
    metrics::describe_counter!("worker_jobs_completed_total", "Jobs completed");
    metrics::describe_counter!("worker_jobs_failed_total", "Jobs whose recognition failed");
    metrics::describe_counter!(
        "worker_jobs_abandoned_total",
        "Deliveries left on the queue because the job could not be loaded"
    );
    metrics::describe_counter!(
        "worker_shutdown_requests_total",
        "Host shutdowns requested after reaching the idle threshold"
    );
    metrics::describe_gauge!("worker_idle_polls", "Consecutive empty polls");
    metrics::describe_histogram!(
        "worker_recognition_seconds",
        "Time spent in the external recognizer"
    );
}
