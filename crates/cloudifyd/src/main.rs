//! cloudifyd — the Cloudify daemon.
//!
//! Single binary that assembles all Cloudify subsystems:
//! - State store (redb)
//! - Edge execution engine + epoch ticker
//! - Deployment pipeline
//! - Rate-limited REST API
//!
//! # Usage
//!
//! ```text
//! cloudifyd standalone --port 8080 --data-dir /var/lib/cloudify
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use cloudify_core::CloudifyConfig;

mod edge_entry;

#[derive(Parser)]
#[command(name = "cloudifyd", about = "Cloudify daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run in standalone mode (single-node, all subsystems in one process).
    Standalone {
        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/cloudify")]
        data_dir: PathBuf,

        /// Optional cloudify.toml path; flags override its values.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cloudifyd=debug,cloudify=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            port,
            data_dir,
            config,
        } => run_standalone(port, data_dir, config).await,
    }
}

async fn run_standalone(
    port: u16,
    data_dir: PathBuf,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("cloudify daemon starting in standalone mode");

    let config = match config_path {
        Some(path) => CloudifyConfig::from_file(&path)?,
        None => CloudifyConfig::default(),
    };

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("cloudify.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = cloudify_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let engine = cloudify_sandbox::EdgeEngine::new()?;
    let _epoch_ticker = engine.spawn_epoch_ticker();
    info!("edge engine initialized");

    let executor = Arc::new(cloudify_sandbox::EdgeExecutor::new(
        engine,
        store.clone(),
        cloudify_sandbox::ExecutorConfig {
            memory_limit_bytes: config.edge.memory_limit_bytes as usize,
            region: None,
        },
    ));

    let ab = cloudify_abtest::AbTestEngine::new(store.clone());
    let orchestrator = Arc::new(cloudify_middleware::EdgeOrchestrator::new(
        store.clone(),
        executor,
        ab,
        config.ab.secure_cookies,
    ));
    info!("edge orchestrator initialized");

    let pipeline = Arc::new(cloudify_pipeline::BuildPipeline::new(
        store.clone(),
        Arc::new(cloudify_pipeline::InstantDriver),
        &config.server.base_domain,
    ));
    info!(base_domain = %config.server.base_domain, "pipeline initialized");

    let counters = Arc::new(cloudify_ratelimit::CounterBackend::from_config(
        &config.store.counter_backend,
        config.store.redis_addr.as_deref(),
    ));

    // ── API server ─────────────────────────────────────────────

    // API routes own /deploy; everything else is edge traffic,
    // resolved to a project by Host subdomain. Standalone mode uses
    // the project slug as its id.
    let edge = axum::routing::any(edge_entry::handle).with_state(edge_entry::EdgeEntryState {
        orchestrator,
        base_domain: config.server.base_domain.clone(),
    });
    let router = cloudify_api::build_router(cloudify_api::ApiState {
        store,
        pipeline,
        counters,
    })
    .fallback_service(edge);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "api listening");

    axum_serve(listener, router).await?;
    info!("cloudify daemon stopped");
    Ok(())
}

/// Serve until ctrl-c.
async fn axum_serve(
    listener: tokio::net::TcpListener,
    router: axum::Router,
) -> anyhow::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
