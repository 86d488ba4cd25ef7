//! Progress monitoring job
//!
//! Every cycle polls the handle of each buffering or streaming record and
//! folds the snapshot into the record:
//! 1. progress is raised (never lowered) to the reported percentage
//! 2. buffering becomes streaming once the buffer threshold is passed
//! 3. a seeding torrent is completed and its handle released
//!
//! The whole cycle runs as one store transaction, so it cannot interleave with
//! an add, and the library is written at most once per cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::library::{LibraryStore, StoreError};
use crate::torrent::HandleRegistry;

/// What one cycle did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub polled: usize,
    /// Records whose progress or status changed
    pub changed: usize,
    /// Polled records with no live handle
    pub orphaned: usize,
    pub completed: usize,
}

pub struct ProgressMonitor {
    store: Arc<LibraryStore>,
    registry: Arc<HandleRegistry>,
    buffer_threshold: f64,
    interval: Duration,
}

impl ProgressMonitor {
    pub fn new(
        store: Arc<LibraryStore>,
        registry: Arc<HandleRegistry>,
        buffer_threshold: f64,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            buffer_threshold,
            interval,
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, StoreError> {
        let registry = self.registry.clone();
        let threshold = self.buffer_threshold;

        let (report, released) = self
            .store
            .update(move |records| {
                let mut report = CycleReport::default();
                let mut released = Vec::new();

                for record in records.iter_mut().filter(|r| r.status.is_polled()) {
                    let Some(handle) = record.filename.as_deref().and_then(|key| registry.get(key))
                    else {
                        debug!(
                            job = "progress_monitor",
                            id = %record.id,
                            title = %record.title,
                            "No live handle for record, skipping"
                        );
                        report.orphaned += 1;
                        continue;
                    };

                    report.polled += 1;
                    let advance = record.apply_snapshot(handle.status(), threshold);
                    if advance.changed() {
                        report.changed += 1;
                    }
                    if let (Some(from), Some(to)) = (advance.from, advance.to) {
                        info!(
                            job = "progress_monitor",
                            title = %record.title,
                            from = %from,
                            to = %to,
                            progress = record.progress,
                            "Status changed"
                        );
                    }
                    if advance.reached_terminal() {
                        report.completed += 1;
                        released.extend(record.filename.clone());
                    }
                }

                (report, released)
            })
            .await?;

        // Only after the completed state is on disk
        for key in released {
            self.registry.remove(&key);
        }

        if report.changed > 0 {
            debug!(
                job = "progress_monitor",
                polled = report.polled,
                changed = report.changed,
                completed = report.completed,
                "Progress cycle persisted"
            );
        }
        Ok(report)
    }

    /// Run cycles on the configured interval until `cancel` fires
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                job = "progress_monitor",
                interval_secs = self.interval.as_secs(),
                "Progress monitor started"
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.run_cycle().await {
                            error!(job = "progress_monitor", error = %e, "Progress cycle failed");
                        }
                    }
                }
            }

            info!(job = "progress_monitor", "Progress monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::library::{DEFAULT_BUFFER_THRESHOLD, MovieRecord, MovieStatus};
    use crate::testing::FakeHandle;

    async fn setup(records: &[MovieRecord]) -> (TempDir, Arc<LibraryStore>, Arc<HandleRegistry>, ProgressMonitor) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LibraryStore::open(dir.path().join("movies.json")).await.unwrap());
        store.save(records).await.unwrap();
        let registry = Arc::new(HandleRegistry::new());
        let monitor = ProgressMonitor::new(
            store.clone(),
            registry.clone(),
            DEFAULT_BUFFER_THRESHOLD,
            Duration::from_millis(10),
        );
        (dir, store, registry, monitor)
    }

    fn torrent(name: &str) -> MovieRecord {
        MovieRecord::buffering(name, format!("magnet:?xt=urn:btih:{}", name), "p.png")
    }

    #[tokio::test]
    async fn test_buffering_becomes_streaming() {
        let (_dir, store, registry, monitor) = setup(&[torrent("Movie")]).await;
        let handle = FakeHandle::new("Movie");
        handle.set_progress(0.2);
        registry.insert("Movie", handle);

        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.polled, 1);
        assert_eq!(report.changed, 1);

        let records = store.load().await;
        assert_eq!(records[0].status, MovieStatus::StreamingTorrent);
        assert_eq!(records[0].progress, 20.0);
        assert!(registry.contains("Movie"));
    }

    #[tokio::test]
    async fn test_seeding_completes_and_releases_handle() {
        let (_dir, store, registry, monitor) = setup(&[torrent("Movie")]).await;
        let handle = FakeHandle::new("Movie");
        handle.set_progress(1.0);
        handle.set_seeding(true);
        registry.insert("Movie", handle);

        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.completed, 1);

        let records = store.load().await;
        assert_eq!(records[0].status, MovieStatus::Completed);
        assert_eq!(records[0].progress, 100.0);
        assert!(!registry.contains("Movie"));

        // Completed records are not polled again
        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report, CycleReport::default());
    }

    #[tokio::test]
    async fn test_orphans_are_skipped() {
        let (_dir, store, _registry, monitor) = setup(&[torrent("Lost")]).await;

        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.orphaned, 1);
        assert_eq!(report.polled, 0);
        assert_eq!(store.load().await[0].status, MovieStatus::BufferingTorrent);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_across_cycles() {
        let (_dir, store, registry, monitor) = setup(&[torrent("Movie")]).await;
        let handle = FakeHandle::new("Movie");
        registry.insert("Movie", handle.clone());

        handle.set_progress(0.4);
        monitor.run_cycle().await.unwrap();
        handle.set_progress(0.1);
        let report = monitor.run_cycle().await.unwrap();

        assert_eq!(report.changed, 0);
        assert_eq!(store.load().await[0].progress, 40.0);
    }

    #[tokio::test]
    async fn test_unchanged_cycle_does_not_write() {
        let (_dir, store, registry, monitor) = setup(&[torrent("Movie")]).await;
        let handle = FakeHandle::new("Movie");
        handle.set_progress(0.01);
        registry.insert("Movie", handle);

        monitor.run_cycle().await.unwrap();
        let modified = std::fs::metadata(store.path()).unwrap().modified().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.changed, 0);
        assert_eq!(std::fs::metadata(store.path()).unwrap().modified().unwrap(), modified);
    }

    #[tokio::test]
    async fn test_several_records_in_one_cycle() {
        let streamable = MovieRecord::streamable("Clip", "https://cdn.example/clip.mp4", None, "p");
        let (_dir, store, registry, monitor) =
            setup(&[torrent("A"), torrent("B"), streamable]).await;
        let a = FakeHandle::new("A");
        a.set_progress(0.5);
        let b = FakeHandle::new("B");
        b.set_progress(0.03125);
        registry.insert("A", a);
        registry.insert("B", b);

        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.polled, 2);
        assert_eq!(report.changed, 2);

        let records = store.load().await;
        assert_eq!(records[0].status, MovieStatus::StreamingTorrent);
        assert_eq!(records[1].status, MovieStatus::BufferingTorrent);
        assert_eq!(records[1].progress, 3.125);
        assert_eq!(records[2].status, MovieStatus::Streamable);
    }

    #[tokio::test]
    async fn test_spawned_loop_stops_on_cancel() {
        let (_dir, store, registry, monitor) = setup(&[torrent("Movie")]).await;
        let handle = FakeHandle::new("Movie");
        handle.set_progress(1.0);
        handle.set_seeding(true);
        registry.insert("Movie", handle);

        let cancel = CancellationToken::new();
        let task = Arc::new(monitor).spawn(cancel.clone());

        tokio::time::timeout(Duration::from_secs(2), async {
            while store.load().await[0].status != MovieStatus::Completed {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        task.await.unwrap();
    }
}
