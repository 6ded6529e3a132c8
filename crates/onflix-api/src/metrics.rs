//! Prometheus metrics for the API server.

use std::sync::LazyLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "onflix_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "onflix_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "onflix_http_requests_in_flight";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "onflix_rate_limit_hits_total";

    // Entitlement and lifecycle
    pub const ENTITLEMENT_DENIALS_TOTAL: &str = "onflix_entitlement_denials_total";
    pub const SUBSCRIPTION_TRANSITIONS_TOTAL: &str = "onflix_subscription_transitions_total";

    // Provider webhooks
    pub const WEBHOOK_EVENTS_TOTAL: &str = "onflix_webhook_events_total";

    // Background tasks
    pub const TASKS_ENQUEUED_TOTAL: &str = "onflix_tasks_enqueued_total";
    pub const TASKS_DROPPED_TOTAL: &str = "onflix_tasks_dropped_total";
    pub const TASKS_FAILED_TOTAL: &str = "onflix_tasks_failed_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Record a refused streaming request.
pub fn record_entitlement_denial(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::ENTITLEMENT_DENIALS_TOTAL, &labels).increment(1);
}

/// Record a subscription reaching `status`, labelled by what caused it.
pub fn record_transition(status: &str, trigger: &str) {
    let labels = [("status", status.to_string()), ("trigger", trigger.to_string())];
    counter!(names::SUBSCRIPTION_TRANSITIONS_TOTAL, &labels).increment(1);
}

/// Record a provider webhook and how it was handled.
pub fn record_webhook_event(event_type: &str, outcome: &str) {
    let labels = [
        ("type", event_type.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(names::WEBHOOK_EVENTS_TOTAL, &labels).increment(1);
}

pub fn record_task_enqueued(kind: &str) {
    let labels = [("type", kind.to_string())];
    counter!(names::TASKS_ENQUEUED_TOTAL, &labels).increment(1);
}

pub fn record_task_dropped(kind: &str) {
    let labels = [("type", kind.to_string())];
    counter!(names::TASKS_DROPPED_TOTAL, &labels).increment(1);
}

pub fn record_task_failed(kind: &str) {
    let labels = [("type", kind.to_string())];
    counter!(names::TASKS_FAILED_TOTAL, &labels).increment(1);
}

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .expect("valid uuid pattern")
});

static NUMERIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/[0-9]+(/|$)").expect("valid numeric pattern"));

static GENRE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/genres/[^/]+").expect("valid genre pattern"));

static PAYMENT_METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/payment-methods/[A-Za-z0-9_]+").expect("valid payment method pattern")
});

/// Sanitize path for metrics labels (remove IDs, etc.).
fn sanitize_path(path: &str) -> String {
    let path = UUID_RE.replace_all(path, ":id");
    // Applied twice: adjacent numeric segments share a slash
    let path = NUMERIC_RE.replace_all(&path, "/:n$1");
    let path = NUMERIC_RE.replace_all(&path, "/:n$1");
    let path = GENRE_RE.replace_all(&path, "/genres/:genre");
    let path = PAYMENT_METHOD_RE.replace_all(&path, "/payment-methods/:method_id");
    path.to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/v1/content/550e8400-e29b-41d4-a716-446655440000/stream/4k"),
            "/api/v1/content/:id/stream/4k"
        );
        assert_eq!(
            sanitize_path("/api/v1/content/tv-shows/550e8400-e29b-41d4-a716-446655440000/seasons/2/episodes/5"),
            "/api/v1/content/tv-shows/:id/seasons/:n/episodes/:n"
        );
        assert_eq!(
            sanitize_path("/api/v1/content/genres/Science%20Fiction"),
            "/api/v1/content/genres/:genre"
        );
        assert_eq!(
            sanitize_path("/api/v1/subscriptions/payment-methods/pm_123/default"),
            "/api/v1/subscriptions/payment-methods/:method_id/default"
        );
    }
}
