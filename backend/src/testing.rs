//! In-process fakes for the engine and the outbound collaborators

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::services::poster::PosterLookup;
use crate::services::resolver::{ResolvedStream, StreamResolver};
use crate::torrent::{
    AddOptions, HandleStatus, TorrentEngine, TorrentHandle, TorrentSource, magnet_display_name,
};

pub struct FakeHandle {
    name: String,
    info_hash: String,
    status: Mutex<HandleStatus>,
}

impl FakeHandle {
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_hash(name, &format!("fake-{}", name))
    }

    pub fn with_hash(name: &str, info_hash: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            info_hash: info_hash.to_string(),
            status: Mutex::new(HandleStatus {
                progress: 0.0,
                is_seeding: false,
            }),
        })
    }

    pub fn set_progress(&self, progress: f64) {
        self.status.lock().progress = progress;
    }

    pub fn set_seeding(&self, is_seeding: bool) {
        self.status.lock().is_seeding = is_seeding;
    }
}

impl TorrentHandle for FakeHandle {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn info_hash(&self) -> String {
        self.info_hash.clone()
    }

    fn status(&self) -> HandleStatus {
        *self.status.lock()
    }
}

/// How the fake engine answers an add for a given source URL
#[derive(Debug, Clone)]
pub enum FakeAdd {
    /// Metadata is available immediately under this name
    Ready(String),
    /// Metadata arrives after the delay
    Delayed(Duration, String),
    /// Metadata never arrives
    Never,
    Fail(String),
}

/// Each source URL is its own torrent; adding it again returns the same handle
#[derive(Default)]
pub struct FakeEngine {
    behaviors: Mutex<HashMap<String, FakeAdd>>,
    handles: Mutex<HashMap<String, Arc<FakeHandle>>>,
    forgotten: Mutex<Vec<String>>,
    adds: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, url: &str, behavior: FakeAdd) {
        self.behaviors.lock().insert(url.to_string(), behavior);
    }

    pub fn add_count(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    /// Info hashes released through `forget`
    pub fn forgotten(&self) -> Vec<String> {
        self.forgotten.lock().clone()
    }

    pub fn hash_for(url: &str) -> String {
        format!("hash-{}", url)
    }

    fn handle_for(&self, url: &str, name: String) -> Arc<dyn TorrentHandle> {
        let handle: Arc<FakeHandle> = self
            .handles
            .lock()
            .entry(url.to_string())
            .or_insert_with(|| FakeHandle::with_hash(&name, &Self::hash_for(url)))
            .clone();
        handle
    }
}

#[async_trait]
impl TorrentEngine for FakeEngine {
    async fn add(&self, source: TorrentSource, _options: AddOptions) -> Result<Arc<dyn TorrentHandle>> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behaviors.lock().get(source.url()).cloned();
        let behavior = behavior.unwrap_or_else(|| {
            FakeAdd::Ready(magnet_display_name(source.url()).unwrap_or_else(|| "Unnamed".to_string()))
        });

        match behavior {
            FakeAdd::Ready(name) => Ok(self.handle_for(source.url(), name)),
            FakeAdd::Delayed(delay, name) => {
                tokio::time::sleep(delay).await;
                Ok(self.handle_for(source.url(), name))
            }
            FakeAdd::Never => std::future::pending().await,
            FakeAdd::Fail(message) => Err(anyhow::anyhow!(message)),
        }
    }

    async fn forget(&self, info_hash: &str) -> Result<()> {
        self.handles.lock().retain(|_, h| h.info_hash != info_hash);
        self.forgotten.lock().push(info_hash.to_string());
        Ok(())
    }
}

/// Returns the same poster for everything
pub struct StaticPosters {
    url: String,
}

impl StaticPosters {
    pub fn new(url: &str) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl PosterLookup for StaticPosters {
    async fn poster_for(&self, _title: &str) -> String {
        self.url.clone()
    }
}

#[derive(Default)]
pub struct FakeResolver {
    answers: Mutex<HashMap<String, std::result::Result<ResolvedStream, String>>>,
}

impl FakeResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer(&self, page_url: &str, title: &str, stream_url: &str) {
        self.answers.lock().insert(
            page_url.to_string(),
            Ok(ResolvedStream {
                title: title.to_string(),
                stream_url: stream_url.to_string(),
            }),
        );
    }

    pub fn fail(&self, page_url: &str, message: &str) {
        self.answers
            .lock()
            .insert(page_url.to_string(), Err(message.to_string()));
    }
}

#[async_trait]
impl StreamResolver for FakeResolver {
    async fn resolve(&self, page_url: &str) -> Result<ResolvedStream> {
        let answer = self.answers.lock().get(page_url).cloned();
        match answer {
            Some(Ok(resolved)) => Ok(resolved),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("no stream found for {}", page_url)),
        }
    }
}
