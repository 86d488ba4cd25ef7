//! Application state and HTTP router construction.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::library::LibraryStore;
use crate::services::{IngestService, PlaybackResolver};
use crate::torrent::HandleRegistry;

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<LibraryStore>,
    pub registry: Arc<HandleRegistry>,
    pub ingest: Arc<IngestService>,
    pub playback: PlaybackResolver,
}

/// Build the full Axum router: API routes, layers, and the static fallback.
/// Returns Router<()> (state fully applied) for use with axum::serve.
pub fn build_app(state: AppState) -> Router<()> {
    let static_dir = state.config.static_dir.clone();

    crate::api::router()
        .with_state(state)
        .route_service("/admin", ServeFile::new(static_dir.join("admin.html")))
        .nest_service("/static", ServeDir::new(&static_dir))
        .fallback_service(
            ServeDir::new(&static_dir).not_found_service(ServeFile::new(static_dir.join("index.html"))),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
