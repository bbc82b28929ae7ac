use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;

/// Build the router of the Prometheus scrape endpoint, rendering from the given recorder handle.
pub fn router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(prometheus_scrape)).with_state(handle)
}

/// Handle Prometheus metrics scraping.
async fn prometheus_scrape(State(handle): State<PrometheusHandle>) -> (StatusCode, HeaderMap, String) {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"));
    (StatusCode::OK, headers, handle.render())
}
