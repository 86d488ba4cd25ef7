//! Movie records and the per-poll status advance

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::MovieStatus;
use crate::torrent::HandleStatus;

/// One entry in the library file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    /// Older library files have no ids; one is minted on first load
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub title: String,
    /// Remote URL the player streams from (direct and hosted-video sources)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    /// Torrent name; key into the handle registry and the library root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// URL the user submitted for a torrent (magnet or .torrent link)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub status: MovieStatus,
    /// Percent downloaded, 0..=100
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub poster: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
}

/// What a single status poll did to a record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Advance {
    pub progress_changed: bool,
    pub from: Option<MovieStatus>,
    pub to: Option<MovieStatus>,
}

impl Advance {
    pub fn changed(&self) -> bool {
        self.progress_changed || self.to.is_some()
    }

    /// The handle must leave the registry
    pub fn reached_terminal(&self) -> bool {
        self.to.is_some_and(MovieStatus::is_terminal)
    }
}

impl MovieRecord {
    fn new(title: String, status: MovieStatus, poster: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            stream_url: None,
            filename: None,
            source_url: None,
            status,
            progress: 0.0,
            poster,
            error: None,
            added_at: Some(Utc::now()),
        }
    }

    /// A link that needs no local storage
    pub fn streamable(
        title: impl Into<String>,
        stream_url: impl Into<String>,
        source_url: Option<String>,
        poster: impl Into<String>,
    ) -> Self {
        let mut record = Self::new(title.into(), MovieStatus::Streamable, poster.into());
        record.stream_url = Some(stream_url.into());
        record.source_url = source_url;
        record
    }

    /// A torrent whose metadata is known; `name` is both title and registry key
    pub fn buffering(
        name: impl Into<String>,
        source_url: impl Into<String>,
        poster: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let mut record = Self::new(name.clone(), MovieStatus::BufferingTorrent, poster.into());
        record.filename = Some(name);
        record.source_url = Some(source_url.into());
        record
    }

    /// A torrent still waiting for metadata; `filename` is filled in later
    pub fn resolving(
        title: impl Into<String>,
        source_url: impl Into<String>,
        poster: impl Into<String>,
    ) -> Self {
        let mut record = Self::new(title.into(), MovieStatus::ResolvingTorrent, poster.into());
        record.source_url = Some(source_url.into());
        record
    }

    /// Resolving -> buffering once the engine has named the torrent.
    /// Returns false when the record is not in a state that allows it.
    pub fn begin_buffering(&mut self, filename: &str) -> bool {
        if !self.status.can_transition(MovieStatus::BufferingTorrent) {
            return false;
        }
        if self.filename.is_none() {
            self.filename = Some(filename.to_string());
        }
        self.status = MovieStatus::BufferingTorrent;
        true
    }

    /// Move an in-flight record to `failed`. Terminal records are left alone.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> bool {
        if !self.status.can_transition(MovieStatus::Failed) {
            return false;
        }
        self.status = MovieStatus::Failed;
        self.error = Some(reason.into());
        true
    }

    /// Fold one status snapshot into the record.
    ///
    /// Progress only moves up. The buffer check runs before the seeding check so
    /// a swarm that finishes between polls goes straight to `completed`.
    pub fn apply_snapshot(&mut self, snapshot: HandleStatus, threshold: f64) -> Advance {
        let mut advance = Advance::default();
        if !self.status.is_polled() {
            return advance;
        }

        let reported = snapshot.percent();
        if reported > self.progress {
            self.progress = reported;
            advance.progress_changed = true;
        }

        let from = self.status;
        if self.status == MovieStatus::BufferingTorrent && snapshot.progress > threshold {
            self.status = MovieStatus::StreamingTorrent;
        }
        if snapshot.is_seeding {
            self.status = MovieStatus::Completed;
            if self.progress < 100.0 {
                self.progress = 100.0;
                advance.progress_changed = true;
            }
        }

        if self.status != from {
            advance.from = Some(from);
            advance.to = Some(self.status);
        }
        advance
    }
}
