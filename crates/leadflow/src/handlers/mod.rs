pub mod directory;
pub mod intake;
pub mod leads;
pub mod orgs;
pub mod pipelines;
pub mod pool;
pub mod queues;
pub mod rules;

use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
