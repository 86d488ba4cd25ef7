//! streamshelf server entry point

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use streamshelf::app::{AppState, build_app};
use streamshelf::config::Config;
use streamshelf::jobs::ProgressMonitor;
use streamshelf::library::LibraryStore;
use streamshelf::services::logging::init_tracing;
use streamshelf::services::{
    IngestService, IngestSettings, PlaybackResolver, TmdbPosterClient, YtDlpResolver,
};
use streamshelf::torrent::{HandleRegistry, RqbitEngine, RqbitEngineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env()?);
    init_tracing(&config);

    info!("Starting streamshelf");
    info!(
        library = %config.library_path.display(),
        library_file = %config.library_file.display(),
        "Configuration loaded"
    );

    let store = Arc::new(
        LibraryStore::open(&config.library_file)
            .await
            .context("Failed to open library file")?,
    );
    let registry = Arc::new(HandleRegistry::new());

    let engine = Arc::new(
        RqbitEngine::start(RqbitEngineConfig {
            download_dir: config.library_path.clone(),
            session_dir: config.session_path.clone(),
            enable_dht: config.torrent_enable_dht,
            listen_port: config.torrent_listen_port,
        })
        .await?,
    );
    info!(
        download_dir = %engine.download_dir().display(),
        managed = engine.managed_count(),
        "Torrent engine ready"
    );

    if config.tmdb_api_key.is_none() {
        warn!("TMDB_API_KEY not set, posters will use the placeholder");
    }
    let posters = Arc::new(TmdbPosterClient::new(
        config.tmdb_api_key.clone(),
        config.poster_placeholder.clone(),
    )?);
    let hosted = Arc::new(YtDlpResolver::new(config.ytdlp_path.clone()));

    let shutdown = CancellationToken::new();
    let ingest = Arc::new(IngestService::new(
        store.clone(),
        registry.clone(),
        engine,
        posters,
        hosted,
        IngestSettings::from_config(&config),
        shutdown.child_token(),
    )?);

    let orphans = ingest.rehydrate_orphans().await;
    if orphans > 0 {
        info!(count = orphans, "Re-adding torrents from the previous run");
    }

    let monitor = Arc::new(ProgressMonitor::new(
        store.clone(),
        registry.clone(),
        config.buffer_threshold,
        config.monitor_interval,
    ));
    let monitor_task = monitor.spawn(shutdown.child_token());

    let state = AppState {
        config: config.clone(),
        store,
        registry,
        ingest: ingest.clone(),
        playback: PlaybackResolver::new(config.library_path.clone()),
    };
    let app = build_app(state);

    let host = config.host.as_deref().unwrap_or("0.0.0.0");
    let listener = tokio::net::TcpListener::bind((host, config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, config.port))?;
    info!(address = %listener.local_addr()?, "Listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
            signal.cancel();
        })
        .await
        .context("HTTP server error")?;

    shutdown.cancel();
    if let Err(e) = monitor_task.await {
        warn!(error = %e, "Progress monitor did not stop cleanly");
    }
    ingest.tasks().close();
    ingest.tasks().wait().await;

    info!("Shutdown complete");
    Ok(())
}
