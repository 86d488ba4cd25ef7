//! streamshelf - a torrent-backed movie library with progressive playback
//!
//! Movies are added as direct links, hosted-video pages or torrents. Torrents
//! download into the library root and become playable once a small part of
//! the file has arrived; a background job tracks their progress.

pub mod api;
pub mod app;
pub mod config;
pub mod jobs;
pub mod library;
pub mod services;
pub mod torrent;

#[cfg(test)]
pub(crate) mod testing;
