use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use timeagent_core::config::{AgentOverride, ConfigOverrides, GatewayOverride, TimeAgentConfig};
use timeagent_scheduler::{AgentScheduler, SearchEngine};
use timeagent_store::HistoryStore;
use tracing::{info, warn};

mod agent;
mod app;
mod http;

#[derive(Parser)]
#[command(name = "timeagent-gateway")]
#[command(about = "Scheduled job runner with an HTTP admin surface")]
struct Args {
    /// Path of the TOML config file
    #[arg(long, env = "TIMEAGENT_CONFIG")]
    config: Option<String>,

    /// Agent name, overrides `agent.name`
    #[arg(long)]
    agent_name: Option<String>,

    /// Listen port, overrides `gateway.port`
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "timeagent_gateway=info,timeagent_scheduler=info,timeagent_store=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    // config: --config > TIMEAGENT_CONFIG > ./timeagent.toml
    let args = Args::parse();
    let overrides = ConfigOverrides {
        agent: args.agent_name.map(|name| AgentOverride { name }),
        gateway: args.port.map(|port| GatewayOverride { port }),
    };
    let config = TimeAgentConfig::load_with(args.config.as_deref(), overrides)?;

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let store = HistoryStore::open(
        db_path,
        Duration::from_millis(config.database.busy_timeout_ms),
    )?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler = AgentScheduler::new(
        &config.agent.name,
        Arc::new(agent::DemoAgent),
        store.clone(),
        shutdown_rx,
    );
    let current = scheduler.init_agent_info().await?;
    info!(agent = %config.agent.name, id = ?current.id, status = %current.status, "agent ready");

    let search = SearchEngine::new(&config.agent.name, config.agent.max_limit_search, store);

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, scheduler, search));
    let router = app::build_router(state.clone());

    info!("TimeAgent gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop cron firings, then the worker
    state.scheduler.shutdown().await;
    if shutdown_tx.send(true).is_err() {
        warn!("agent worker already stopped");
    }
    info!("TimeAgent gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(path = %parent.display(), error = %e, "could not create database directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_parent_dir_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested/deeper/timeagent.db");

        ensure_parent_dir(db.to_str().unwrap());

        assert!(dir.path().join("nested/deeper").is_dir());
    }

    #[test]
    fn ensure_parent_dir_tolerates_unusable_parent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain-file");
        std::fs::write(&file, b"").unwrap();

        // the parent is a file; the failure is logged, not raised
        ensure_parent_dir(file.join("timeagent.db").to_str().unwrap());

        assert!(file.is_file());
    }
}
