//! recharge-daemon: the recharge-and-win draw service.
//!
//! Single OS process running a Tokio async runtime. Operators and the
//! HTTP front end talk to it with line-delimited JSON-RPC over TCP.

mod commands;
mod config;
mod rpc;
mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use recharge_db::SharedDb;
use recharge_draw::DrawEngine;
use recharge_notify::{Dispatcher, Failover, HttpGateway, OutboxHandoff};
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use crate::config::DaemonConfig;
use crate::rpc::RpcServer;

/// Daemon-wide shared state.
pub struct DaemonState {
    pub engine: DrawEngine<OutboxHandoff>,
    pub config: DaemonConfig,
    /// Flips to `true` on shutdown; running draws stop and fail.
    pub cancel: watch::Receiver<bool>,
}

impl DaemonState {
    pub fn new(db: SharedDb, config: DaemonConfig, cancel: watch::Receiver<bool>) -> Self {
        let engine = DrawEngine::new(
            db.clone(),
            OutboxHandoff::new(db),
            config.points.bands.clone(),
            config.digits.clone(),
            config.draws.clone(),
        );
        Self {
            engine,
            config,
            cancel,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("recharge daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open database
    let db_path = config.db_path();
    info!("Opening database at {:?}", db_path);
    let db = recharge_db::shared(recharge_db::open(&db_path)?);

    // 3. Shutdown and cancellation channels
    let (shutdown_tx, _shutdown_rx) = broadcast::channel(4);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    // 4. Build daemon state
    let listen_addr = config.listen_addr();
    let state = Arc::new(DaemonState::new(db.clone(), config, cancel_rx));

    let mut tasks = Vec::new();

    // 5. Notification dispatcher
    match build_gateway(&state.config)? {
        Some(gateway) => {
            let dispatcher = Dispatcher::new(db.clone(), gateway, state.config.sms.dispatcher());
            let rx = shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move { dispatcher.run(rx).await }));
        }
        None => warn!("no primary SMS gateway configured; winner notifications stay queued"),
    }

    // 6. Day-boundary scheduler
    if state.config.scheduler.enabled {
        let rx = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(scheduler::run(state.clone(), rx)));
    }

    // 7. Run the RPC server until shutdown
    let rpc_server = RpcServer::bind(state.clone(), &listen_addr).await?;
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    // Graceful shutdown
    info!("Daemon shutting down gracefully");
    let _ = cancel_tx.send(true);
    let _ = shutdown_tx.send(());
    for task in tasks {
        if tokio::time::timeout(Duration::from_secs(10), task).await.is_err() {
            warn!("background task did not stop in time");
        }
    }

    info!("Daemon stopped");
    Ok(())
}

/// Primary gateway with optional fallback, if configured.
fn build_gateway(config: &DaemonConfig) -> anyhow::Result<Option<Failover<HttpGateway>>> {
    let timeout = Duration::from_secs(config.sms.timeout_secs);
    let Some(primary) = config.sms.primary.clone() else {
        return Ok(None);
    };
    let primary = HttpGateway::new(primary, timeout)?;
    let fallback = config
        .sms
        .fallback
        .clone()
        .map(|g| HttpGateway::new(g, timeout))
        .transpose()?;
    Ok(Some(Failover::new(primary, fallback)))
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("could not listen for SIGTERM: {}", e);
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
