// Model listing, health, and IDE event-logging noise.

use axum::{extract::Json, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::proxy::common::model_mapping::public_model_ids;

pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"ok": true}))
}

pub async fn handle_list_models() -> impl IntoResponse {
    let data: Vec<_> = public_model_ids()
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": 0,
                "owned_by": "kiro"
            })
        })
        .collect();

    Json(json!({
        "object": "list",
        "data": data
    }))
}

/// Kiro IDE clients post telemetry batches; acknowledge and drop them.
pub async fn handle_silent_ok() -> impl IntoResponse {
    StatusCode::OK
}
