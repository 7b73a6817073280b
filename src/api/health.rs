use axum::Json;
use serde_json::{Value, json};

/// GET /health - liveness probe with a fixed payload
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "webhook-listener"
    }))
}
