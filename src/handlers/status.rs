// handlers/status.rs - Unauthenticated service description and health check

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api::API_PREFIX;
use crate::state::AppState;

/// GET /
pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    let resources: Vec<_> = state
        .registry
        .iter()
        .map(|r| {
            json!({
                "name": r.name,
                "path": format!("{}/{}", API_PREFIX, r.collection()),
                "fields": r.fields,
                "relations": r.relations.iter().map(|rel| &rel.name).collect::<Vec<_>>(),
            })
        })
        .collect();

    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "api": API_PREFIX,
        "resources": resources,
    }))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}
