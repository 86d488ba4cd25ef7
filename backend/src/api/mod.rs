//! HTTP API routes
//!
//! - `GET /movies` lists the library
//! - `POST /add_movie` adds a direct link, hosted video or torrent
//! - `GET /video/{*key}` streams a downloaded torrent with range support

pub mod health;
pub mod movies;
pub mod video;

use axum::{
    Router,
    routing::{get, post},
};

use crate::app::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/movies", get(movies::list_movies))
        .route("/add_movie", post(movies::add_movie))
        .route("/video/{*key}", get(video::stream_video))
        .merge(health::router())
}
