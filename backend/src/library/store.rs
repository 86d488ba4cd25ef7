//! JSON-file library store
//!
//! The whole record sequence is the unit of persistence. Writes go to a
//! sibling temp file that is renamed over the target, and every
//! read-modify-write goes through [`LibraryStore::update`], which holds the
//! store mutex for the full load -> mutate -> save cycle.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::record::MovieRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("library file I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize library: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub struct LibraryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LibraryStore {
    /// Open the store, creating the parent directory and an empty library
    /// file when neither exists yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let store = Self {
            path,
            lock: Mutex::new(()),
        };

        if !tokio::fs::try_exists(&store.path)
            .await
            .map_err(|e| StoreError::io(&store.path, e))?
        {
            debug!(path = %store.path.display(), "Creating empty library file");
            store.write(&[]).await?;
        } else {
            // Persist ids minted for records written without one
            store.update(|_| ()).await?;
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record. A missing or unparseable file reads as an empty library.
    pub async fn load(&self) -> Vec<MovieRecord> {
        let (records, minted) = self.read().await;
        if !minted {
            return records;
        }
        match self.update(|records| records.clone()).await {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not persist minted record ids");
                records
            }
        }
    }

    /// Replace the persisted set with `records`.
    pub async fn save(&self, records: &[MovieRecord]) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        self.write(records).await
    }

    /// Run one serialized read-modify-write transaction.
    ///
    /// The closure sees the current records and may mutate them; the file is
    /// rewritten only if the set actually changed.
    pub async fn update<T, F>(&self, mutate: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<MovieRecord>) -> T,
    {
        let _guard = self.lock.lock().await;
        let (mut records, minted) = self.read().await;
        let before = records.clone();

        let out = mutate(&mut records);

        if minted || records != before {
            self.write(&records).await?;
        }
        Ok(out)
    }

    /// Read the file. The flag is set when some record had no id and got a
    /// fresh one, so the caller knows the file must be rewritten.
    async fn read(&self) -> (Vec<MovieRecord>, bool) {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return (Vec::new(), false),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not read library file, treating as empty");
                return (Vec::new(), false);
            }
        };

        let parsed = serde_json::from_slice::<Vec<serde_json::Value>>(&bytes).and_then(|values| {
            let minted = values.iter().any(|v| v.get("id").is_none_or(|id| id.is_null()));
            let records = values
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<MovieRecord>, _>>()?;
            Ok((records, minted))
        });

        match parsed {
            Ok((records, minted)) => {
                if minted {
                    debug!(path = %self.path.display(), "Minted ids for records without one");
                }
                (records, minted)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Library file is corrupt, treating as empty");
                (Vec::new(), false)
            }
        }
    }

    async fn write(&self, records: &[MovieRecord]) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.temp_path();

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(&json)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        file.sync_all().await.map_err(|e| StoreError::io(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;

        debug!(path = %self.path.display(), records = records.len(), "Library saved");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "library.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::library::MovieStatus;

    async fn store_in(dir: &TempDir) -> LibraryStore {
        LibraryStore::open(dir.path().join("movies.json")).await.unwrap()
    }

    fn sample_records() -> Vec<MovieRecord> {
        let mut torrent = MovieRecord::buffering("Big.Buck.Bunny", "magnet:?xt=urn:btih:aa", "p.png");
        torrent.progress = 12.5;
        vec![
            MovieRecord::streamable("Clip.mp4", "https://cdn.example/Clip.mp4", None, "p.png"),
            torrent,
            MovieRecord::resolving("Pending", "magnet:?xt=urn:btih:bb", "p.png"),
        ]
    }

    #[tokio::test]
    async fn test_open_creates_empty_library() {
        let dir = TempDir::new().unwrap();
        let store = LibraryStore::open(dir.path().join("nested/movies.json")).await.unwrap();

        assert!(store.path().exists());
        assert!(store.load().await.is_empty());
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw.trim(), "[]");
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        let records = sample_records();

        store.save(&records).await.unwrap();

        assert_eq!(store.load().await, records);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        std::fs::write(store.path(), b"{ this is not json").unwrap();

        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        std::fs::remove_file(store.path()).unwrap();

        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_skips_write_when_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store.save(&sample_records()).await.unwrap();
        std::fs::remove_file(store.path()).unwrap();

        // Reads empty, leaves it empty, so nothing is written back
        let count = store.update(|records| records.len()).await.unwrap();
        assert_eq!(count, 0);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_update_persists_mutation() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store.save(&sample_records()).await.unwrap();

        store
            .update(|records| {
                records[1].status = MovieStatus::StreamingTorrent;
            })
            .await
            .unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded[1].status, MovieStatus::StreamingTorrent);
        assert_eq!(loaded.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store_in(&dir).await);

        let mut tasks = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .update(move |records| {
                        records.push(MovieRecord::streamable(
                            format!("Clip {}", i),
                            format!("https://cdn.example/{}.mp4", i),
                            None,
                            "p.png",
                        ));
                    })
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let loaded = store.load().await;
        assert_eq!(loaded.len(), 32);
        for i in 0..32 {
            let title = format!("Clip {}", i);
            assert!(loaded.iter().any(|r| r.title == title), "missing {}", title);
        }
    }

    const LEGACY_LIBRARY: &str = r#"[
        {"title": "Old.Movie.2001", "filename": "Old.Movie.2001", "status": "buffering_torrent", "progress": 40},
        {"title": "clip.mp4", "stream_url": "https://cdn.example/clip.mp4", "status": "streamable"}
    ]"#;

    #[tokio::test]
    async fn test_legacy_records_keep_their_minted_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("movies.json");
        std::fs::write(&path, LEGACY_LIBRARY).unwrap();

        let store = LibraryStore::open(&path).await.unwrap();
        let first: Vec<_> = store.load().await.iter().map(|r| r.id).collect();
        let second: Vec<_> = store.load().await.iter().map(|r| r.id).collect();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);

        let raw: Vec<serde_json::Value> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(raw.iter().all(|v| v.get("id").is_some()));
    }

    #[tokio::test]
    async fn test_ids_minted_after_open_are_persisted_on_load() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        std::fs::write(store.path(), LEGACY_LIBRARY).unwrap();

        let first = store.load().await;
        let second = store.load().await;
        assert_eq!(first, second);
        assert_eq!(first[0].status, MovieStatus::BufferingTorrent);
        assert_eq!(first[0].progress, 40.0);
    }
}
