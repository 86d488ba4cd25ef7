//! Range-capable video streaming from the library root

use axum::{
    Json,
    body::Body,
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, error};

use super::movies::ErrorResponse;
use crate::app::AppState;
use crate::services::PlaybackError;

/// Stream the file behind `key`. Range, conditional and HEAD requests are
/// handled by `ServeFile`.
pub async fn stream_video(
    State(state): State<AppState>,
    Path(key): Path<String>,
    request: Request,
) -> Response {
    let path = match state.playback.resolve_async(key.clone()).await {
        Ok(path) => path,
        Err(e) => {
            debug!(key = %key, error = %e, "Video not resolved");
            return e.into_response();
        }
    };

    match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(infallible) => match infallible {},
    }
}

impl IntoResponse for PlaybackError {
    fn into_response(self) -> Response {
        let status = match &self {
            PlaybackError::InvalidKey => StatusCode::BAD_REQUEST,
            PlaybackError::NotFound | PlaybackError::NoVideoFile(_) => StatusCode::NOT_FOUND,
            PlaybackError::Io(e) => {
                error!(error = %e, "Failed to resolve video");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
