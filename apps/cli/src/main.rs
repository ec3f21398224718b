mod args;
mod config;
mod manifest;

use std::io;
use std::sync::Arc;

use overuse_app::{
    AppPaths, OveruseService, ServiceDeps, UnixSocketDaemonClient, ensure_app_data_dir,
    serve_callbacks,
};
use tokio::net::UnixListener;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::manifest::ManifestPackageManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args = args::parse_args().map_err(|err| {
        eprintln!("{err}");
        args::print_help();
        io::Error::new(io::ErrorKind::InvalidInput, "invalid arguments")
    })?;

    let loaded = config::load_or_create(args.config).map_err(io::Error::other)?;
    if loaded.created {
        info!(path = %loaded.file.display(), "created default config");
    }
    let config = loaded.config;

    let paths = AppPaths::new(config.data_dir.clone());
    ensure_app_data_dir(&paths).map_err(|err| io::Error::other(err.to_string()))?;
    info!(data_dir = %paths.app_data_dir.display(), "using data dir");

    let packages = ManifestPackageManager::load(&config.packages_manifest).map_err(io::Error::other)?;
    let daemon = UnixSocketDaemonClient::new(
        config.daemon_socket.clone(),
        config.handler.daemon_wait_timeout(),
    );
    let deps = ServiceDeps::new(
        paths.store(),
        Arc::new(daemon.clone()),
        Arc::new(packages),
        config.handler.clone(),
    );
    let service = OveruseService::start(deps)
        .await
        .map_err(|err| io::Error::other(format!("failed to start handler: {}", err)))?;

    if config.service_socket.exists() {
        std::fs::remove_file(&config.service_socket)?;
    }
    let listener = UnixListener::bind(&config.service_socket)?;
    info!(socket = %config.service_socket.display(), "serving daemon callbacks");
    let callbacks = tokio::spawn(serve_callbacks(listener, service.clone()));

    let poller = tokio::spawn(watch_daemon(
        daemon,
        service.clone(),
        config.daemon_poll_interval(),
    ));

    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
    poller.abort();
    callbacks.abort();

    if let Err(err) = service.flush().await {
        error!(error = %err, "final flush failed");
    }
    if let Err(err) = std::fs::remove_file(&config.service_socket) {
        debug!(error = %err, "removing callback socket failed");
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Pings the daemon and reports every connectivity transition to the handler.
async fn watch_daemon(
    daemon: UnixSocketDaemonClient,
    service: OveruseService,
    interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut connected = false;
    loop {
        ticker.tick().await;
        let reachable = match daemon.ping().await {
            Ok(()) => true,
            Err(err) => {
                if connected {
                    warn!(error = %err, "lost connection to the watchdog daemon");
                }
                false
            }
        };
        if reachable != connected {
            connected = reachable;
            info!(connected, "watchdog daemon connection changed");
            service.daemon_connection_changed(connected);
        }
    }
}
