//! Admin HTTP handlers

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;

use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check handler
pub async fn health_handler() -> &'static str {
    "ok"
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Live planners and schedulers
pub async fn controller_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.controller.snapshot())
}
