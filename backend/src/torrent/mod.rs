//! Torrent engine seam
//!
//! The library only needs three things from a torrent engine: add a source,
//! learn its name once metadata arrives, and poll `{progress, is_seeding}`.
//! [`rqbit::RqbitEngine`] provides them on top of librqbit; tests use fakes.

pub mod descriptor;
pub mod registry;
pub mod rqbit;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

pub use registry::HandleRegistry;
pub use rqbit::{RqbitEngine, RqbitEngineConfig};

/// Status snapshot of one download
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandleStatus {
    /// Fraction downloaded, 0.0..=1.0
    pub progress: f64,
    pub is_seeding: bool,
}

impl HandleStatus {
    /// Progress as a percentage clamped to 0..=100; garbage reads as 0
    pub fn percent(&self) -> f64 {
        if !self.progress.is_finite() {
            return 0.0;
        }
        (self.progress * 100.0).clamp(0.0, 100.0)
    }
}

/// Where a torrent comes from
#[derive(Debug, Clone)]
pub enum TorrentSource {
    Magnet(String),
    /// A `.torrent` descriptor already fetched from `url`
    Descriptor { url: String, bytes: Vec<u8> },
}

impl TorrentSource {
    /// The URL the user submitted
    pub fn url(&self) -> &str {
        match self {
            TorrentSource::Magnet(uri) => uri,
            TorrentSource::Descriptor { url, .. } => url,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AddOptions {
    /// Fetch pieces in file order so the head of the file lands first
    pub sequential: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self { sequential: true }
    }
}

/// A live download inside the engine
pub trait TorrentHandle: Send + Sync {
    /// Torrent name from the metadata; also the on-disk file or directory name
    fn name(&self) -> String;

    fn info_hash(&self) -> String;

    fn status(&self) -> HandleStatus;
}

#[async_trait]
pub trait TorrentEngine: Send + Sync {
    /// Add a torrent. Resolves once metadata is available, which for a magnet
    /// on a dead swarm may be never; callers bound the wait themselves.
    async fn add(&self, source: TorrentSource, options: AddOptions)
    -> Result<Arc<dyn TorrentHandle>>;

    /// Stop and drop a torrent, keeping whatever it already wrote to disk
    async fn forget(&self, info_hash: &str) -> Result<()>;
}

/// The `dn` (display name) parameter of a magnet URI, if present
pub fn magnet_display_name(uri: &str) -> Option<String> {
    let parsed = url::Url::parse(uri).ok()?;
    if parsed.scheme() != "magnet" {
        return None;
    }
    parsed
        .query_pairs()
        .find(|(key, _)| key == "dn")
        .map(|(_, value)| value.trim().to_string())
        .filter(|name| !name.is_empty())
}
