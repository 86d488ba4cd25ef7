//! Torrent engine backed by librqbit
//!
//! Wraps a librqbit [`Session`] with JSON persistence so downloads survive a
//! restart inside the engine; the library re-attaches them on startup.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use librqbit::api::TorrentIdOrHash;
use librqbit::dht::PersistentDhtConfig;
use librqbit::{AddTorrent, AddTorrentOptions, AddTorrentResponse, Session, SessionOptions};
use tracing::{debug, info, warn};

use super::{AddOptions, HandleStatus, TorrentEngine, TorrentHandle, TorrentSource};

/// Configuration for the librqbit session
#[derive(Debug, Clone)]
pub struct RqbitEngineConfig {
    pub download_dir: PathBuf,
    pub session_dir: PathBuf,
    pub enable_dht: bool,
    pub listen_port: u16,
}

pub struct RqbitEngine {
    session: Arc<Session>,
    download_dir: PathBuf,
}

fn get_info_hash_hex<T: AsRef<librqbit::ManagedTorrent>>(handle: &T) -> String {
    handle
        .as_ref()
        .info_hash()
        .0
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn add_torrent_opts() -> AddTorrentOptions {
    AddTorrentOptions {
        // Resume into files a previous run left in the library
        overwrite: true,
        ..Default::default()
    }
}

impl RqbitEngine {
    /// Create the session. Downloads land directly in the library root so
    /// the torrent name is also the playback key.
    pub async fn start(config: RqbitEngineConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.download_dir)
            .await
            .with_context(|| {
                format!(
                    "Could not create download directory {}",
                    config.download_dir.display()
                )
            })?;

        let session_dir = match tokio::fs::create_dir_all(&config.session_dir).await {
            Ok(_) => config.session_dir.clone(),
            Err(e) => {
                let temp_dir = std::env::temp_dir().join("streamshelf-session");
                warn!(path = %config.session_dir.display(), error = %e,
                    fallback = %temp_dir.display(), "Could not create session directory, using temp directory");
                tokio::fs::create_dir_all(&temp_dir)
                    .await
                    .context("Failed to create fallback session directory")?;
                temp_dir
            }
        };

        let dht_config = if config.enable_dht {
            Some(PersistentDhtConfig {
                config_filename: Some(session_dir.join("dht.json")),
                ..Default::default()
            })
        } else {
            None
        };

        let session_opts = SessionOptions {
            disable_dht: !config.enable_dht,
            disable_dht_persistence: !config.enable_dht,
            dht_config,
            persistence: Some(librqbit::SessionPersistenceConfig::Json {
                folder: Some(session_dir.clone()),
            }),
            listen_port_range: if config.listen_port > 0 {
                Some(config.listen_port..config.listen_port.saturating_add(1))
            } else {
                None
            },
            ..Default::default()
        };

        let session = Session::new_with_opts(config.download_dir.clone(), session_opts)
            .await
            .context("Failed to create torrent session")?;

        info!(
            download_dir = %config.download_dir.display(),
            session_dir = %session_dir.display(),
            dht = config.enable_dht,
            "Torrent engine started"
        );

        Ok(Self {
            session,
            download_dir: config.download_dir,
        })
    }

    pub fn download_dir(&self) -> &PathBuf {
        &self.download_dir
    }

    /// Number of torrents the session currently manages
    pub fn managed_count(&self) -> usize {
        self.session.with_torrents(|iter| iter.count())
    }
}

#[async_trait]
impl TorrentEngine for RqbitEngine {
    async fn add(
        &self,
        source: TorrentSource,
        options: AddOptions,
    ) -> Result<Arc<dyn TorrentHandle>> {
        if options.sequential {
            // librqbit reserves the lowest-index missing piece first, so the
            // head of the file arrives first without extra configuration.
            debug!("Sequential delivery requested");
        }

        let add = match source {
            TorrentSource::Magnet(uri) => AddTorrent::from_url(uri),
            TorrentSource::Descriptor { bytes, .. } => AddTorrent::from_bytes(bytes),
        };

        let response = self
            .session
            .add_torrent(add, Some(add_torrent_opts()))
            .await
            .context("Failed to add torrent")?;

        let handle = match response {
            AddTorrentResponse::Added(id, handle) => {
                info!(id = %id, info_hash = %get_info_hash_hex(&handle), "Torrent added");
                handle
            }
            AddTorrentResponse::AlreadyManaged(id, handle) => {
                debug!(id = %id, info_hash = %get_info_hash_hex(&handle), "Torrent already managed");
                handle
            }
            AddTorrentResponse::ListOnly(_) => anyhow::bail!("Torrent was added in list-only mode"),
        };

        Ok(Arc::new(RqbitHandle { handle }))
    }

    async fn forget(&self, info_hash: &str) -> Result<()> {
        let id = self
            .session
            .with_torrents(|iter| {
                for (id, handle) in iter {
                    if get_info_hash_hex(&handle) == info_hash {
                        return Some(id);
                    }
                }
                None
            })
            .context("Torrent not found")?;

        self.session
            .delete(TorrentIdOrHash::Id(id), false)
            .await
            .context("Failed to remove torrent")?;
        info!(id = %id, info_hash = %info_hash, "Torrent removed, files kept");
        Ok(())
    }
}

struct RqbitHandle {
    handle: Arc<librqbit::ManagedTorrent>,
}

impl TorrentHandle for RqbitHandle {
    fn name(&self) -> String {
        self.handle
            .name()
            .unwrap_or_else(|| get_info_hash_hex(&self.handle))
    }

    fn info_hash(&self) -> String {
        get_info_hash_hex(&self.handle)
    }

    fn status(&self) -> HandleStatus {
        let stats = self.handle.stats();
        HandleStatus {
            progress: stats.progress_bytes as f64 / stats.total_bytes.max(1) as f64,
            is_seeding: stats.finished,
        }
    }
}
