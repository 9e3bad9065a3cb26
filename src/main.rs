//! pg-sandbox: serve each query on a fresh, disposable PostgreSQL container.

use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

use pg_sandbox::http::{AppState, build_router};
use pg_sandbox::settings::DEFAULT_CONFIG_PATH;
use pg_sandbox::{DockerProvisioner, PoolManager, Settings};

/// Serve SQL queries, each on its own freshly seeded PostgreSQL container.
#[derive(Debug, Parser)]
#[command(name = "pg-sandbox", version, about)]
struct Cli {
    /// Configuration file path.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Verbosity level (-v, -vv). Ignored when RUST_LOG is set.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = Settings::load(&cli.config);
    tracing::debug!(?settings, "settings loaded");

    // Bind before any container is started; this is the only fatal error.
    let listener = TcpListener::bind(&settings.listen)
        .await
        .with_context(|| format!("failed to bind {}", settings.listen))?;
    tracing::info!(addr = %settings.listen, "listening");

    let provisioner = DockerProvisioner::new(settings.docker_options());
    let manager = Arc::new(PoolManager::start(provisioner, settings.pool_config()));

    let app = build_router(AppState {
        manager: Arc::clone(&manager),
        default_query: settings.default_query.as_str().into(),
    });

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .into_future(),
    );

    tokio::select! {
        _ = shutdown_signal() => {}
        joined = &mut server => {
            tracing::error!(result = ?joined, "server stopped unexpectedly");
            manager.shutdown().await;
            return Ok(());
        }
    }

    tracing::info!("shutting server down");
    let _ = stop_tx.send(());

    let deadline = settings.shutdown_timeout();
    let graceful = async {
        manager.shutdown().await;
        server.await
    };
    match tokio::time::timeout(deadline, graceful).await {
        Ok(Ok(Ok(()))) => tracing::info!("server exiting"),
        Ok(Ok(Err(err))) => tracing::error!(error = %err, "server error during shutdown"),
        Ok(Err(err)) => tracing::error!(error = %err, "server task failed"),
        Err(_) => tracing::warn!(?deadline, "shutdown deadline exceeded, exiting anyway"),
    }

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
