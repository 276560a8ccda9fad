//! One `tracing` span per HTTP request, carrying `method`, `path`, `status`,
//! `latency_ms`.

use axum::body::Body;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{info, warn};

pub async fn request_span(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let latency_ms = start.elapsed().as_millis();
    let status = response.status();
    if status.is_server_error() {
        warn!(%method, %path, %status, latency_ms, "request failed");
    } else {
        info!(%method, %path, %status, latency_ms, "request completed");
    }
    response
}
