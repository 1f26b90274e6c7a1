use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use bytes::Bytes;

/// Ingests one telemetry submission.
///
/// The payload is logged as a structured field when it parses; when it does
/// not, the error is logged and the submission is still acknowledged — the
/// double favors availability over validation and never rejects telemetry.
pub(super) async fn post_metrics(
    ConnectInfo(source_addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> &'static str {
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(payload) => {
            info!(client = %source_addr, %payload, "Received telemetry payload");
        }
        Err(error) => {
            warn!(client = %source_addr, %error, size = body.len(), "Received unparsable telemetry payload");
        }
    }

    "Received!"
}
