use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vidra::api::{ApiServer, AppState};
use vidra::config::Config;
use vidra::depmanager::DependencyManager;
use vidra::downloader::YtDlp;
use vidra::proxy::ProxyManager;
use vidra::registry::JobRegistry;
use vidra::scheduler::Scheduler;
use vidra::{logging, utils};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env()?);
    logging::init(&config.app.log_level);

    tracing::info!("vidra v{}", env!("CARGO_PKG_VERSION"));

    // Root cancellation: SIGINT/SIGTERM fan out to every long-running task.
    let root = CancellationToken::new();
    spawn_signal_handler(root.clone());

    utils::fs::ensure_dir_all(&config.dir.downloads).await?;
    utils::fs::ensure_dir_all(&config.dir.cache).await?;

    // Binaries must be in place before any job can run; a failed install
    // here is fatal.
    tracing::info!("checking extractor and transcoder binaries, this may take a while");
    let deps = Arc::new(DependencyManager::new(config.depmanager.clone()));
    deps.start(root.child_token()).await?;

    for binary in [
        vidra::depmanager::Binary::YtDlp,
        vidra::depmanager::Binary::Ffmpeg,
        vidra::depmanager::Binary::GalleryDl,
    ] {
        match deps.binary_version(binary).await {
            Some(version) => tracing::info!(binary = %binary, version = %version, "binary ready"),
            None => tracing::warn!(binary = %binary, "could not detect binary version"),
        }
    }

    let registry = Arc::new(JobRegistry::new());
    {
        let registry = registry.clone();
        let interval = config.storage.cleanup_interval;
        let token = root.child_token();
        tokio::spawn(async move { registry.sweep_loop(interval, token).await });
    }

    let proxies = Arc::new(ProxyManager::new(config.proxy.clone()));
    {
        let proxies = proxies.clone();
        let token = root.child_token();
        tokio::spawn(async move { proxies.health_check_loop(token).await });
    }

    let extractor = Arc::new(YtDlp::new(config.clone(), deps.clone(), proxies.clone()));
    let scheduler = Arc::new(Scheduler::new(config.clone(), extractor, registry.clone()));
    scheduler.start(root.child_token());

    let state = AppState::new(config.clone(), registry, scheduler.clone());
    let server = ApiServer::new(state, root.clone());

    tracing::info!(port = %config.http.port, "vidra started");

    server.run().await?;

    // The listener is down; give in-flight jobs the shutdown timeout to
    // drain before exiting.
    scheduler.shutdown(config.http.shutdown_timeout).await;

    tracing::info!("vidra shut down gracefully");
    Ok(())
}

fn spawn_signal_handler(root: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("installing SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => tracing::info!("received SIGINT"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("received interrupt");
        }

        root.cancel();
    });
}
