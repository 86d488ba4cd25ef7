//! Playback path resolution
//!
//! Maps a playback key (a torrent name, possibly with a sub-path) to a file
//! under the library root. Keys naming a directory resolve to the largest
//! video inside it. Nothing outside the root is ever returned.

use std::cmp::Ordering;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Containers browsers (or the player) can handle
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov"];

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Invalid video path")]
    InvalidKey,
    #[error("Video not found")]
    NotFound,
    #[error("No video file found in {0}")]
    NoVideoFile(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct PlaybackResolver {
    root: PathBuf,
}

impl PlaybackResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve on the blocking pool; directory walks touch the disk
    pub async fn resolve_async(&self, key: String) -> Result<PathBuf, PlaybackError> {
        let resolver = self.clone();
        tokio::task::spawn_blocking(move || resolver.resolve(&key))
            .await
            .map_err(|e| PlaybackError::Io(io::Error::other(e)))?
    }

    pub fn resolve(&self, key: &str) -> Result<PathBuf, PlaybackError> {
        check_key(key)?;

        let root = canonical(&self.root)?;
        let target = canonical(&root.join(key))?;
        // Symlinks inside the library may point anywhere
        if !target.starts_with(&root) {
            return Err(PlaybackError::InvalidKey);
        }

        let metadata = std::fs::metadata(&target)?;
        if metadata.is_file() {
            return Ok(target);
        }

        let chosen = largest_video(&target).ok_or_else(|| PlaybackError::NoVideoFile(key.to_string()))?;
        debug!(key = %key, file = %chosen.display(), "Resolved directory to video file");
        Ok(chosen)
    }
}

/// Relative, no parent components, no NULs
fn check_key(key: &str) -> Result<(), PlaybackError> {
    if key.trim().is_empty() || key.contains('\0') {
        return Err(PlaybackError::InvalidKey);
    }
    let safe = Path::new(key)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe {
        Ok(())
    } else {
        Err(PlaybackError::InvalidKey)
    }
}

fn canonical(path: &Path) -> Result<PathBuf, PlaybackError> {
    path.canonicalize().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => PlaybackError::NotFound,
        _ => PlaybackError::Io(e),
    })
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.as_str()))
}

/// Largest video file anywhere below `dir`; ties go to the lexicographically
/// first path.
fn largest_video(dir: &Path) -> Option<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_video_file(e.path()))
        .filter_map(|e| {
            let len = e.metadata().ok()?.len();
            Some((len, e.into_path()))
        })
        .max_by(|(a_len, a_path), (b_len, b_path)| match a_len.cmp(b_len) {
            Ordering::Equal => b_path.cmp(a_path),
            other => other,
        })
        .map(|(_, path)| path)
}
