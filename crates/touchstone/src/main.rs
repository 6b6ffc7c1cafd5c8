mod cli;
mod config;
mod health;
mod logging;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mcp::{ServerInfo, ToolServer};
use network_server::{Chassis, ChassisConfig};
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Cmd};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Serve { config, addr } => serve(&config, addr).await,
    }
}

async fn serve(config_path: &Path, addr: Option<SocketAddr>) -> Result<()> {
    let mut config = Config::load(config_path)?;
    if let Some(addr) = addr {
        config.addr = addr;
    }
    logging::init(&config.log_level).context("installing log subscriber")?;

    let tools = Arc::new(ToolServer::new(ServerInfo::new("touchstone", env!("CARGO_PKG_VERSION"))));
    let health = health::endpoint();
    health::register_tool(&tools, health.clone());

    let chassis_config = ChassisConfig::new(config.addr, health::router(health))
        .with_tls(config.tls_source()?)
        .with_rpc_server(tools)
        .with_handshake_timeout(config.handshake_timeout())
        .with_shutdown_policy(config.shutdown_policy());
    let chassis = Chassis::new(chassis_config).context("preparing TLS material")?;

    let cancel = CancellationToken::new();
    let bound = chassis
        .start(&cancel)
        .with_context(|| format!("starting server on {}", config.addr))?;
    tracing::info!(addr = %bound, "touchstone listening (tcp + udp)");

    shutdown_signal().await;
    tracing::info!(timeout_secs = config.shutdown_timeout_secs, "shutting down");
    cancel.cancel();
    chassis
        .shutdown(config.shutdown_timeout())
        .await
        .context("graceful shutdown")?;
    Ok(())
}

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
            Ok(mut sig) => {
                sig.recv().await;
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
