use anyhow::Result;
use clap::Parser;
use knox_pos::connectivity::Connectivity;
use knox_pos::remote::{FirebaseClient, RemoteStore};
use knox_pos::sync::SyncEngine;
use knox_pos::{config, db};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/knox-pos.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let remote = Arc::new(FirebaseClient::new(
        &cfg.remote.base_url,
        cfg.remote.auth.clone(),
    )?);
    let connectivity = Connectivity::new(false);
    let engine = Arc::new(SyncEngine::new(
        pool.clone(),
        remote.clone() as Arc<dyn RemoteStore>,
        connectivity.clone(),
        cfg.policy.max_sync_attempts,
    ));

    let pending = db::count_changes(&pool).await?;
    info!(pending, "starting knox-pos sync daemon");

    // The worker drains the queue whenever the probe brings us back online.
    let worker = engine.clone();
    let debounce = Duration::from_millis(cfg.app.sync_debounce_ms);
    tokio::spawn(async move { worker.run_reconnect_worker(debounce).await });

    let probe_sleep = Duration::from_millis(cfg.app.probe_interval_ms);
    loop {
        let online = remote.probe().await;
        connectivity.set_online(online);
        tokio::time::sleep(probe_sleep).await;
    }
}
