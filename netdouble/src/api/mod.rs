pub mod metrics;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;

/// Exactly one route accepts submissions; every other method or path gets a
/// bare 404 with an empty body.
pub fn make_router(metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, post(metrics::post_metrics).fallback(not_found))
        .fallback(not_found)
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
