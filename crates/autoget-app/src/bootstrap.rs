//! Boot sequence: load config, open the store, build one engine per
//! downloader, spawn the pass loops, and serve the API until INT/TERM.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use autoget_api::{ApiServer, ApiState, Indexer};
use autoget_config::Config;
use autoget_engine::{LifecycleEngine, scheduler};
use autoget_organizer::OrganizerClient;
use autoget_store::DownloadStore;
use autoget_torrent::TransmissionClient;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::telemetry::{LoggingConfig, init_logging};

/// How long in-flight HTTP requests may drain after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Entry point for the daemon boot sequence.
///
/// # Errors
///
/// Returns an error on any fatal startup failure: unreadable config,
/// unreachable database, invalid downloader or organizer URL, or a listen
/// failure.
pub async fn run_app() -> AppResult<()> {
    let config_path = config_path_from(
        std::env::var("AUTOGET_CONFIG").ok(),
        std::env::args().nth(1),
    )
    .ok_or(AppError::MissingConfigPath)?;
    let config = Config::load(&config_path).map_err(|source| AppError::Config { source })?;

    init_logging(&LoggingConfig::default()).map_err(|source| AppError::Telemetry { source })?;
    info!(config = %config_path.display(), "AutoGet bootstrap starting");

    let store = DownloadStore::connect(&config.database_path)
        .await
        .map_err(|source| AppError::Store { source })?;
    let organizer = OrganizerClient::new(&config.organizer_url)
        .map_err(|source| AppError::Organizer { source })?;

    let (engines, workers) = build_engines(&config, &store, &organizer)?;

    // Indexer adapters register themselves here; the core runs fine with
    // none configured.
    let indexers: BTreeMap<String, Arc<dyn Indexer>> = BTreeMap::new();

    let state = Arc::new(ApiState::new(store, engines, indexers));
    let api = ApiServer::new(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let shutdown = shutdown_signal().shared();
    let drain_deadline = {
        let shutdown = shutdown.clone();
        async move {
            shutdown.await;
            tokio::time::sleep(DRAIN_TIMEOUT).await;
        }
    };

    tokio::select! {
        result = api.serve(addr, shutdown.clone()) => {
            result.map_err(|source| AppError::ApiServer { source })?;
        }
        () = drain_deadline => {
            warn!("drain deadline exceeded; abandoning in-flight requests");
        }
    }

    // Pass loops run to natural completion of the current cycle or are
    // abandoned; both are safe because passes are idempotent on restart.
    for worker in workers {
        worker.abort();
    }
    info!("shutdown complete");
    Ok(())
}

type EngineMap = BTreeMap<String, Arc<LifecycleEngine>>;

fn build_engines(
    config: &Config,
    store: &DownloadStore,
    organizer: &OrganizerClient,
) -> AppResult<(EngineMap, Vec<JoinHandle<()>>)> {
    let mut engines = BTreeMap::new();
    let mut workers = Vec::new();

    for (name, downloader) in &config.downloaders {
        let transmission = &downloader.transmission;
        let client = TransmissionClient::new(
            &transmission.url,
            transmission.username.as_deref(),
            transmission.password.as_deref(),
        )
        .map_err(|source| AppError::Downloader {
            downloader: name.clone(),
            source,
        })?;

        let engine = Arc::new(LifecycleEngine::new(
            name.clone(),
            store.clone(),
            Arc::new(client),
            organizer.clone(),
            transmission.finished_dir.clone(),
            downloader.seeding_policy,
        ));

        workers.push(scheduler::spawn_progress_loop(engine.clone()));
        if let Some(worker) = scheduler::spawn_seeding_loop(engine.clone()) {
            workers.push(worker);
        }
        engines.insert(name.clone(), engine);
        info!(
            downloader = %name,
            seeding_policy = downloader.seeding_policy.is_some(),
            "downloader engine ready"
        );
    }

    Ok((engines, workers))
}

fn config_path_from(env: Option<String>, arg: Option<String>) -> Option<PathBuf> {
    env.filter(|value| !value.is_empty())
        .or(arg)
        .map(PathBuf::from)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received; draining");
}
