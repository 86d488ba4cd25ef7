//! Health check endpoints

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub library: bool,
    pub records: usize,
    pub active_torrents: usize,
}

/// Health check - always returns OK if the server is running
async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check - the library file must be reachable
async fn readyz(State(state): State<AppState>) -> Json<ReadyResponse> {
    let library_ok = tokio::fs::metadata(state.store.path()).await.is_ok();
    let records = if library_ok {
        state.store.load().await.len()
    } else {
        0
    };

    Json(ReadyResponse {
        ready: library_ok,
        library: library_ok,
        records,
        active_torrents: state.registry.len(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
