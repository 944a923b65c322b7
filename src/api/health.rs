use axum::response::Json;
use serde_json::{json, Value};

/// GET /api/health
pub(super) async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
