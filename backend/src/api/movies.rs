//! Library listing and add endpoints

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::app::AppState;
use crate::library::MovieRecord;
use crate::services::{IngestError, IngestOutcome, SourceKind};

#[derive(Debug, Deserialize)]
pub struct AddMovieRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "type")]
    pub kind: SourceKind,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movie: Option<MovieRecord>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

pub async fn list_movies(State(state): State<AppState>) -> Json<Vec<MovieRecord>> {
    Json(state.store.load().await)
}

pub async fn add_movie(
    State(state): State<AppState>,
    payload: Result<Json<AddMovieRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    match state.ingest.ingest(&request.url, request.kind).await {
        Ok(outcome) => outcome.into_response(),
        Err(e) => e.into_response(),
    }
}

impl IntoResponse for IngestOutcome {
    fn into_response(self) -> Response {
        let status = match &self {
            IngestOutcome::AlreadyExists { .. } | IngestOutcome::TorrentExists { .. } => StatusCode::OK,
            IngestOutcome::Added(_) => StatusCode::CREATED,
            IngestOutcome::Buffering(_) | IngestOutcome::Resolving(_) => StatusCode::ACCEPTED,
        };
        let body = MessageResponse {
            message: self.message(),
            movie: self.record().cloned(),
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::Validation(message) => error_response(StatusCode::BAD_REQUEST, message),
            other => {
                error!(error = %other, "Failed to add to library");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}
