use crate::AppState;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::path::Path;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub public_dir: String,
    pub staging_dir: String,
    pub slots: Vec<String>,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let public_dir = dir_status(state.store.public_dir()).await;
    let staging_dir = dir_status(state.store.staging().dir()).await;

    let status = if public_dir == "ok" && staging_dir == "ok" {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        public_dir: public_dir.to_string(),
        staging_dir: staging_dir.to_string(),
        slots: state.store.allowlist().iter().map(str::to_string).collect(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn dir_status(path: &Path) -> &'static str {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => "ok",
        _ => "missing",
    }
}
