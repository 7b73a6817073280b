//! Webhook handler for deployment notifications

use axum::{
    Json,
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::SharedState;
use crate::signature::{SIGNATURE_HEADER, verify};
use crate::webhook::PushSummary;

/// POST /deploy-webhook
///
/// The body is taken as raw bytes so the signature is checked against exactly
/// what was sent. The response goes out as soon as the deployment has been
/// handed to the dispatcher; its outcome is only logged.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    info!("Received deployment webhook ({} bytes)", body.len());

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            info!("Could not parse JSON body: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid JSON payload" })),
            );
        }
    };

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if !verify(state.secret.expose(), &body, signature) {
        if signature.is_none() {
            warn!("Rejected webhook: no {} header", SIGNATURE_HEADER);
        } else {
            warn!("Rejected webhook: invalid signature");
        }
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid signature" })),
        );
    }
    info!("Signature verified");

    let summary = PushSummary::from_payload(&payload);
    info!("Deployment requested: {}", summary);

    let outcome = state.dispatcher.trigger().await;
    debug!("Dispatch outcome: {:?}", outcome);

    (
        StatusCode::OK,
        Json(json!({
            "status": "accepted",
            "message": "Deployment started"
        })),
    )
}
