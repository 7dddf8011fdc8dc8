use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use exhibition_core::config::ExhibitionConfig;
use exhibition_metrics::{SnapshotAggregator, SqliteStore};
use exhibition_scheduler::Scheduler;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

mod app;
mod cycle;
mod http;
mod ws;

/// Real-time metrics dashboard server.
#[derive(Debug, Parser)]
#[command(name = "exhibition-gateway", version, about)]
struct Cli {
    /// TOML config file; defaults to ./exhibition.toml when present.
    #[arg(short, long, env = "EXHIBITION_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "exhibition_gateway=info,exhibition_metrics=info,exhibition_scheduler=info,tower_http=info"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = ExhibitionConfig::load(cli.config.as_deref()).context("invalid configuration")?;

    // data store: one SQLite connection, queries serialized on the blocking pool
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let store = SqliteStore::open(db_path)
        .with_context(|| format!("opening database {db_path}"))?
        .with_timeout(config.database.query_timeout());

    let aggregator = SnapshotAggregator::new(Arc::new(store), config.metrics.clone());
    info!(
        counters = aggregator.schema().counters.len(),
        ranking_fields = aggregator.schema().ranking_arity(),
        "metric schema loaded"
    );

    let registry = Arc::new(ws::registry::ClientRegistry::new());
    let snapshot_cycle = Arc::new(cycle::SnapshotCycle::new(aggregator, Arc::clone(&registry)));

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.gateway.bind, config.gateway.port))?;
    let scheduler = Scheduler::new(config.broadcast.interval(), config.broadcast.shutdown_grace());
    let index_path = config.gateway.index_path();
    let ws_path = config.gateway.ws_path();

    let state = Arc::new(app::AppState::new(config, Arc::clone(&registry)));
    let router = app::build_router(Arc::clone(&state));

    // bind before the scheduler starts so a taken port fails fast
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(snapshot_cycle, shutdown_rx.clone()));

    let mut server_stop = shutdown_rx;
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_stop.wait_for(|stop| *stop).await;
            })
            .await
    });

    info!(%addr, dashboard = %index_path, websocket = %ws_path, "exhibition gateway listening");
    tokio::select! {
        _ = shutdown_signal() => {}
        joined = &mut server => {
            let _ = shutdown_tx.send(true);
            joined.context("server task panicked")??;
            anyhow::bail!("server stopped before a shutdown signal");
        }
    }

    // stop accepting first so no session registers after close_all
    let _ = shutdown_tx.send(true);
    let grace = state.config.broadcast.shutdown_grace();
    let stopped = tokio::time::timeout(grace, &mut server).await;
    match stopped {
        Ok(Ok(Ok(()))) => info!("listener closed"),
        Ok(Ok(Err(e))) => warn!(error = %e, "server stopped with an error"),
        Ok(Err(e)) => warn!(error = %e, "server task failed"),
        Err(_) => {
            warn!("listener did not stop within the grace period");
            server.abort();
        }
    }

    match scheduler_task.await {
        Ok(stats) => info!(
            cycles = stats.cycles,
            skipped = stats.skipped,
            abandoned = stats.abandoned,
            "scheduler finished"
        ),
        Err(e) => warn!(error = %e, "scheduler task failed"),
    }

    let closed = registry.close_all();
    let drained = state.drain_connections(grace).await;
    info!(closed, drained, "client sessions closed");

    info!("exhibition gateway stopped");
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

/// Resolves on Ctrl+C or SIGTERM. A handler that fails to install never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
