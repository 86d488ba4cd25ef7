//! Movie status state machine
//!
//! ```text
//! streamable                                   (terminal, direct/hosted links)
//! resolving_torrent -> buffering_torrent -> streaming_torrent -> completed
//!         |                  |   \_____________________________/^
//!         +------------------+----------------------> failed
//! ```
//!
//! No transition ever moves backward.

use serde::{Deserialize, Serialize};

/// Fraction of the torrent that must be on disk before playback is offered.
pub const DEFAULT_BUFFER_THRESHOLD: f64 = 0.05;

/// Lifecycle status of a library entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovieStatus {
    /// Hosted elsewhere, playable immediately
    Streamable,
    /// Torrent added but the engine has not produced metadata yet
    ResolvingTorrent,
    /// Downloading, not enough sequential data for playback
    BufferingTorrent,
    /// Downloading, playable from the start
    StreamingTorrent,
    /// Fully downloaded and seeding
    Completed,
    /// Gave up on this entry; see the record's `error`
    Failed,
}

impl MovieStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Streamable | Self::Completed | Self::Failed)
    }

    /// Statuses that expect a download handle to exist (or to appear)
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            Self::ResolvingTorrent | Self::BufferingTorrent | Self::StreamingTorrent
        )
    }

    /// Statuses the progress monitor polls
    pub fn is_polled(self) -> bool {
        matches!(self, Self::BufferingTorrent | Self::StreamingTorrent)
    }

    /// Whether `self -> to` is a legal forward transition
    pub fn can_transition(self, to: MovieStatus) -> bool {
        use MovieStatus::*;
        matches!(
            (self, to),
            (ResolvingTorrent, BufferingTorrent)
                | (ResolvingTorrent, Failed)
                | (BufferingTorrent, StreamingTorrent)
                | (BufferingTorrent, Completed)
                | (BufferingTorrent, Failed)
                | (StreamingTorrent, Completed)
                | (StreamingTorrent, Failed)
        )
    }
}

impl std::fmt::Display for MovieStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MovieStatus::Streamable => write!(f, "streamable"),
            MovieStatus::ResolvingTorrent => write!(f, "resolving_torrent"),
            MovieStatus::BufferingTorrent => write!(f, "buffering_torrent"),
            MovieStatus::StreamingTorrent => write!(f, "streaming_torrent"),
            MovieStatus::Completed => write!(f, "completed"),
            MovieStatus::Failed => write!(f, "failed"),
        }
    }
}
