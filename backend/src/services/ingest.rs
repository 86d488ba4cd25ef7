//! Adding sources to the library
//!
//! Three kinds of source are accepted:
//! - direct links, stored as-is
//! - hosted-video pages, resolved to a playable URL through yt-dlp
//! - torrents (magnet URIs or `.torrent` links), handed to the engine
//!
//! A torrent add waits a bounded time for metadata. If the engine has not
//! named the torrent by then, a `resolving_torrent` record is written and a
//! background task finishes the job (or fails the record after
//! `metadata_give_up`).

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::library::{
    LibraryStore, MovieRecord, MovieStatus, StoreError, has_source_url, has_stream_url, has_title,
    has_torrent_name,
};
use crate::services::poster::PosterLookup;
use crate::services::resolver::{StreamResolver, direct_title};
use crate::torrent::descriptor::parse_descriptor;
use crate::torrent::{
    AddOptions, HandleRegistry, TorrentEngine, TorrentHandle, TorrentSource, magnet_display_name,
};

/// Descriptors larger than this are not torrents anyone should be streaming
const MAX_DESCRIPTOR_BYTES: usize = 10 * 1024 * 1024;

type PendingAdd = JoinHandle<anyhow::Result<Arc<dyn TorrentHandle>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Direct,
    #[serde(alias = "youtube", alias = "hosted")]
    HostedVideo,
    Torrent,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0}")]
    Validation(String),
    #[error("Failed to download torrent descriptor: {0}")]
    Download(String),
    #[error("Could not resolve stream: {0}")]
    Resolver(String),
    #[error("Torrent engine error: {0}")]
    Engine(String),
    #[error("Failed to update library: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Failed(String),
}

impl IngestError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// What an add did to the library
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    AlreadyExists { title: String },
    /// A torrent with this source or name is already in the library
    TorrentExists { title: String },
    /// A streamable record was created
    Added(MovieRecord),
    /// A torrent record was created and its download started
    Buffering(MovieRecord),
    /// A torrent record was created; metadata is still being fetched
    Resolving(MovieRecord),
}

impl IngestOutcome {
    pub fn message(&self) -> String {
        match self {
            IngestOutcome::AlreadyExists { .. } => "Movie already exists.".to_string(),
            IngestOutcome::TorrentExists { .. } => "Torrent already in library.".to_string(),
            IngestOutcome::Added(record) => format!("Added: {}", record.title),
            IngestOutcome::Buffering(record) => format!("Buffering torrent for: {}", record.title),
            IngestOutcome::Resolving(record) => {
                format!("Fetching torrent metadata for: {}", record.title)
            }
        }
    }

    pub fn record(&self) -> Option<&MovieRecord> {
        match self {
            IngestOutcome::AlreadyExists { .. } | IngestOutcome::TorrentExists { .. } => None,
            IngestOutcome::Added(record)
            | IngestOutcome::Buffering(record)
            | IngestOutcome::Resolving(record) => Some(record),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// How long an add request waits for metadata
    pub metadata_timeout: Duration,
    /// How long a background resolution waits before failing the record
    pub metadata_give_up: Duration,
    /// Poster for records whose title is not known yet
    pub poster_placeholder: String,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            metadata_timeout: config.metadata_timeout,
            metadata_give_up: config.metadata_give_up,
            poster_placeholder: config.poster_placeholder.clone(),
        }
    }
}

enum Attach {
    Attached(String),
    Duplicate,
    Gone,
}

#[derive(Clone)]
pub struct IngestService {
    store: Arc<LibraryStore>,
    registry: Arc<HandleRegistry>,
    engine: Arc<dyn TorrentEngine>,
    posters: Arc<dyn PosterLookup>,
    hosted: Arc<dyn StreamResolver>,
    http: reqwest::Client,
    settings: IngestSettings,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl IngestService {
    pub fn new(
        store: Arc<LibraryStore>,
        registry: Arc<HandleRegistry>,
        engine: Arc<dyn TorrentEngine>,
        posters: Arc<dyn PosterLookup>,
        hosted: Arc<dyn StreamResolver>,
        settings: IngestSettings,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            store,
            registry,
            engine,
            posters,
            hosted,
            http,
            settings,
            shutdown,
            tasks: TaskTracker::new(),
        })
    }

    /// Background resolutions and re-attachments in flight
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    pub async fn ingest(&self, url: &str, kind: SourceKind) -> Result<IngestOutcome, IngestError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(IngestError::validation("URL is required"));
        }

        info!(url = %url, kind = ?kind, "Adding to library");
        let outcome = match kind {
            SourceKind::Direct => self.add_direct(url).await,
            SourceKind::HostedVideo => self.add_hosted(url).await,
            SourceKind::Torrent => self.add_torrent(url).await,
        }?;

        if let IngestOutcome::AlreadyExists { title } | IngestOutcome::TorrentExists { title } =
            &outcome
        {
            info!(url = %url, title = %title, "Already in library");
        }
        Ok(outcome)
    }

    async fn add_direct(&self, url: &str) -> Result<IngestOutcome, IngestError> {
        let parsed = parse_http_url(url)?;
        let title = direct_title(&parsed);

        if has_stream_url(&self.store.load().await, url) {
            return Ok(IngestOutcome::AlreadyExists { title });
        }

        let poster = self.posters.poster_for(&title).await;
        let record = MovieRecord::streamable(title, url, None, poster);
        self.insert_streamable(record, move |records| has_stream_url(records, url))
            .await
    }

    async fn add_hosted(&self, url: &str) -> Result<IngestOutcome, IngestError> {
        parse_http_url(url)?;

        if has_source_url(&self.store.load().await, url) {
            return Ok(IngestOutcome::AlreadyExists {
                title: url.to_string(),
            });
        }

        let resolved = self
            .hosted
            .resolve(url)
            .await
            .map_err(|e| IngestError::Resolver(format!("{:#}", e)))?;

        if has_title(&self.store.load().await, &resolved.title) {
            return Ok(IngestOutcome::AlreadyExists {
                title: resolved.title,
            });
        }

        let poster = self.posters.poster_for(&resolved.title).await;
        let title = resolved.title.clone();
        let record =
            MovieRecord::streamable(resolved.title, resolved.stream_url, Some(url.to_string()), poster);
        self.insert_streamable(record, move |records| {
            has_title(records, &title) || has_source_url(records, url)
        })
        .await
    }

    async fn insert_streamable<F>(
        &self,
        record: MovieRecord,
        is_duplicate: F,
    ) -> Result<IngestOutcome, IngestError>
    where
        F: FnOnce(&[MovieRecord]) -> bool + Send,
    {
        let outcome = self
            .store
            .update(move |records| {
                if is_duplicate(records.as_slice()) {
                    return IngestOutcome::AlreadyExists {
                        title: record.title,
                    };
                }
                records.push(record.clone());
                IngestOutcome::Added(record)
            })
            .await?;

        if let IngestOutcome::Added(record) = &outcome {
            info!(id = %record.id, title = %record.title, "Added streamable record");
        }
        Ok(outcome)
    }

    /// Runs on the task tracker so a caller that stops waiting (a dropped
    /// request) never leaves an engine download without its record.
    async fn add_torrent(&self, url: &str) -> Result<IngestOutcome, IngestError> {
        let this = self.clone();
        let url = url.to_string();
        self.tasks
            .spawn(async move { this.run_torrent_add(&url).await })
            .await
            .map_err(|e| IngestError::Failed(format!("Torrent add did not finish: {}", e)))?
    }

    async fn run_torrent_add(&self, url: &str) -> Result<IngestOutcome, IngestError> {
        let (source, name_hint) = self.torrent_source(url).await?;

        let records = self.store.load().await;
        if has_source_url(&records, url) {
            return Ok(IngestOutcome::TorrentExists {
                title: name_hint.unwrap_or_else(|| url.to_string()),
            });
        }
        // A descriptor names the torrent up front; a magnet `dn` is only a hint
        if let (TorrentSource::Descriptor { .. }, Some(name)) = (&source, &name_hint) {
            if has_torrent_name(&records, name) {
                return Ok(IngestOutcome::TorrentExists {
                    title: name.clone(),
                });
            }
        }

        let engine = self.engine.clone();
        let mut pending: PendingAdd =
            tokio::spawn(async move { engine.add(source, AddOptions::default()).await });

        match tokio::time::timeout(self.settings.metadata_timeout, &mut pending).await {
            Ok(joined) => {
                let handle = engine_result(joined)?;
                self.register_torrent(url, handle).await
            }
            Err(_) => {
                info!(
                    url = %url,
                    timeout_secs = self.settings.metadata_timeout.as_secs_f64(),
                    "Torrent metadata not available yet, resolving in background"
                );
                self.defer_torrent(url, name_hint, pending).await
            }
        }
    }

    /// Metadata arrived within the request: create a buffering record
    async fn register_torrent(
        &self,
        url: &str,
        handle: Arc<dyn TorrentHandle>,
    ) -> Result<IngestOutcome, IngestError> {
        let name = handle.name();
        if has_torrent_name(&self.store.load().await, &name) {
            self.release_duplicate(&handle).await;
            return Ok(IngestOutcome::TorrentExists { title: name });
        }

        let poster = self.posters.poster_for(&name).await;
        let record = MovieRecord::buffering(name.clone(), url, poster);
        let key = name.clone();

        let outcome = self
            .store
            .update(move |records| {
                if has_torrent_name(records, &name) {
                    return IngestOutcome::TorrentExists { title: name };
                }
                records.push(record.clone());
                IngestOutcome::Buffering(record)
            })
            .await?;

        match &outcome {
            IngestOutcome::Buffering(record) => {
                self.registry.insert(key, handle);
                info!(id = %record.id, name = %record.title, "Torrent buffering");
            }
            _ => self.release_duplicate(&handle).await,
        }
        Ok(outcome)
    }

    /// Metadata is late: persist a resolving record and finish in the background
    async fn defer_torrent(
        &self,
        url: &str,
        name_hint: Option<String>,
        pending: PendingAdd,
    ) -> Result<IngestOutcome, IngestError> {
        let (title, poster) = match name_hint {
            Some(name) => {
                let poster = self.posters.poster_for(&name).await;
                (name, poster)
            }
            None => (url.to_string(), self.settings.poster_placeholder.clone()),
        };

        let record = MovieRecord::resolving(title, url, poster);
        let id = record.id;
        let outcome = self
            .store
            .update(move |records| {
                if has_source_url(records, url) {
                    return IngestOutcome::TorrentExists {
                        title: record.title,
                    };
                }
                records.push(record.clone());
                IngestOutcome::Resolving(record)
            })
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                pending.abort();
                return Err(e.into());
            }
        };

        if matches!(outcome, IngestOutcome::Resolving(_)) {
            let this = self.clone();
            self.tasks
                .spawn(async move { this.finish_resolution(id, pending).await });
        } else {
            pending.abort();
        }
        Ok(outcome)
    }

    async fn finish_resolution(&self, id: Uuid, mut pending: PendingAdd) {
        let give_up = self.settings.metadata_give_up;
        let waited = tokio::select! {
            _ = self.shutdown.cancelled() => {
                pending.abort();
                debug!(id = %id, "Shutting down, torrent will be re-added on next start");
                return;
            }
            waited = tokio::time::timeout(give_up, &mut pending) => waited,
        };

        let result = match waited {
            Ok(joined) => engine_result(joined),
            Err(_) => {
                pending.abort();
                Err(IngestError::Engine(format!(
                    "no torrent metadata after {}s",
                    give_up.as_secs()
                )))
            }
        };

        match result {
            Ok(handle) => self.attach_handle(id, handle).await,
            Err(e) => self.fail_record(id, e.to_string()).await,
        }
    }

    /// Bind a handle the engine produced late to its record.
    ///
    /// Resolving records move to buffering. Records that were already
    /// buffering or streaming (re-added after a restart) only get their
    /// registry entry back.
    async fn attach_handle(&self, id: Uuid, handle: Arc<dyn TorrentHandle>) {
        let name = handle.name();

        let Some(current) = self.store.load().await.into_iter().find(|r| r.id == id) else {
            debug!(id = %id, "Record removed before its torrent resolved");
            return;
        };
        // Records created without a display name are titled by their URL
        let rename_poster = if current.status == MovieStatus::ResolvingTorrent
            && current.source_url.as_deref() == Some(current.title.as_str())
        {
            Some(self.posters.poster_for(&name).await)
        } else {
            None
        };

        let result = self
            .store
            .update(move |records| {
                let taken = records.iter().any(|r| {
                    r.id != id && (r.title == name || r.filename.as_deref() == Some(name.as_str()))
                });
                let Some(record) = records.iter_mut().find(|r| r.id == id) else {
                    return Attach::Gone;
                };

                match record.status {
                    MovieStatus::ResolvingTorrent if taken => {
                        record.mark_failed(format!("Duplicate of torrent already in library: {}", name));
                        Attach::Duplicate
                    }
                    MovieStatus::ResolvingTorrent => {
                        if let Some(poster) = rename_poster {
                            record.title = name.clone();
                            record.poster = poster;
                        }
                        record.begin_buffering(&name);
                        Attach::Attached(name)
                    }
                    status if status.is_polled() => {
                        Attach::Attached(record.filename.clone().unwrap_or(name))
                    }
                    _ => Attach::Gone,
                }
            })
            .await;

        match result {
            Ok(Attach::Attached(key)) => {
                info!(id = %id, key = %key, "Torrent handle attached");
                self.registry.insert(key, handle);
            }
            Ok(Attach::Duplicate) => {
                warn!(id = %id, "Resolved torrent duplicates an existing record");
                self.release_duplicate(&handle).await;
            }
            Ok(Attach::Gone) => debug!(id = %id, "Record no longer waiting for a handle"),
            Err(e) => error!(id = %id, error = %e, "Failed to persist resolved torrent"),
        }
    }

    /// Drop a handle whose name another record already owns. When the engine
    /// handed back the owner's own live download, it stays.
    async fn release_duplicate(&self, handle: &Arc<dyn TorrentHandle>) {
        let name = handle.name();
        let info_hash = handle.info_hash();
        if self
            .registry
            .get(&name)
            .is_some_and(|owner| owner.info_hash() == info_hash)
        {
            debug!(name = %name, "Duplicate add returned the live download");
            return;
        }

        match self.engine.forget(&info_hash).await {
            Ok(()) => info!(name = %name, info_hash = %info_hash, "Released duplicate torrent"),
            Err(e) => {
                warn!(name = %name, info_hash = %info_hash, error = %e, "Failed to release duplicate torrent")
            }
        }
    }

    async fn fail_record(&self, id: Uuid, reason: String) {
        let logged = reason.clone();
        let result = self
            .store
            .update(move |records| {
                records
                    .iter_mut()
                    .find(|r| r.id == id)
                    .is_some_and(|r| r.mark_failed(reason))
            })
            .await;

        match result {
            Ok(true) => warn!(id = %id, reason = %logged, "Torrent failed"),
            Ok(false) => debug!(id = %id, "Record already settled, not failing it"),
            Err(e) => error!(id = %id, error = %e, "Failed to persist torrent failure"),
        }
    }

    /// Re-add in-flight torrents that have no live handle, as happens after a
    /// restart. Returns how many records were orphaned.
    pub async fn rehydrate_orphans(&self) -> usize {
        let orphans: Vec<MovieRecord> = self
            .store
            .load()
            .await
            .into_iter()
            .filter(|r| r.status.is_in_flight())
            .filter(|r| {
                !r.filename
                    .as_deref()
                    .is_some_and(|key| self.registry.contains(key))
            })
            .collect();

        for record in &orphans {
            let Some(source_url) = record.source_url.clone() else {
                self.fail_record(record.id, "Download lost and no source to re-add".to_string())
                    .await;
                continue;
            };

            info!(id = %record.id, title = %record.title, "Re-adding torrent");
            let this = self.clone();
            let id = record.id;
            self.tasks
                .spawn(async move { this.rehydrate(id, source_url).await });
        }

        orphans.len()
    }

    async fn rehydrate(&self, id: Uuid, source_url: String) {
        let source = match self.torrent_source(&source_url).await {
            Ok((source, _)) => source,
            Err(e) => {
                self.fail_record(id, e.to_string()).await;
                return;
            }
        };

        let engine = self.engine.clone();
        let pending: PendingAdd =
            tokio::spawn(async move { engine.add(source, AddOptions::default()).await });
        self.finish_resolution(id, pending).await;
    }

    /// Classify a torrent URL, fetching and checking `.torrent` descriptors.
    /// Returns the source and the best name known before the engine runs.
    async fn torrent_source(
        &self,
        url: &str,
    ) -> Result<(TorrentSource, Option<String>), IngestError> {
        if url.starts_with("magnet:") {
            let parsed =
                Url::parse(url).map_err(|_| IngestError::validation("Invalid magnet URI"))?;
            let has_info_hash = parsed
                .query_pairs()
                .any(|(key, value)| key == "xt" && value.starts_with("urn:btih:"));
            if !has_info_hash {
                return Err(IngestError::validation("Magnet URI has no info hash"));
            }
            return Ok((TorrentSource::Magnet(url.to_string()), magnet_display_name(url)));
        }

        let parsed = parse_http_url(url).map_err(|_| {
            IngestError::validation(
                "Torrent source must be a magnet URI or an http(s) link to a .torrent file",
            )
        })?;
        let bytes = self.fetch_descriptor(parsed).await?;
        let summary = parse_descriptor(&bytes).map_err(|e| IngestError::Failed(format!("{:#}", e)))?;

        debug!(
            url = %url,
            name = %summary.name,
            files = summary.file_count,
            size = summary.total_size,
            "Fetched torrent descriptor"
        );
        Ok((
            TorrentSource::Descriptor {
                url: url.to_string(),
                bytes,
            },
            Some(summary.name),
        ))
    }

    async fn fetch_descriptor(&self, url: Url) -> Result<Vec<u8>, IngestError> {
        let download = |e: reqwest::Error| IngestError::Download(e.to_string());

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(download)?
            .error_for_status()
            .map_err(download)?;

        if response
            .content_length()
            .is_some_and(|len| len as usize > MAX_DESCRIPTOR_BYTES)
        {
            return Err(IngestError::Failed("Torrent descriptor is too large".to_string()));
        }

        let bytes = response.bytes().await.map_err(download)?;
        if bytes.len() > MAX_DESCRIPTOR_BYTES {
            return Err(IngestError::Failed("Torrent descriptor is too large".to_string()));
        }
        Ok(bytes.to_vec())
    }
}

fn parse_http_url(url: &str) -> Result<Url, IngestError> {
    let parsed = Url::parse(url).map_err(|e| IngestError::validation(format!("Invalid URL: {}", e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(IngestError::validation(format!(
            "Unsupported URL scheme: {}",
            scheme
        ))),
    }
}

fn engine_result(
    joined: Result<anyhow::Result<Arc<dyn TorrentHandle>>, JoinError>,
) -> Result<Arc<dyn TorrentHandle>, IngestError> {
    match joined {
        Ok(Ok(handle)) => Ok(handle),
        Ok(Err(e)) => Err(IngestError::Engine(format!("{:#}", e))),
        Err(e) => Err(IngestError::Engine(format!("add task did not finish: {}", e))),
    }
}
