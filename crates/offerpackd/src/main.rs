//! offerpackd — the offerpack placement daemon.
//!
//! Runs the placement engine against a remote resource manager and host
//! manager, serving Prometheus metrics and a liveness probe. `simulate`
//! runs the same engine against in-memory authorities.
//!
//! # Usage
//!
//! ```text
//! offerpackd run --config /etc/offerpack/offerpack.toml
//! offerpackd simulate --tasks 500 --hosts 40
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use offerpack_core::{PlacementConfig, parse_duration};
use offerpack_engine::{EngineSettings, PlacementEngine, PlacementMetrics};
use offerpack_rpc::{HttpHostManager, HttpResourceManager};
use offerpackd::{SimulationSpec, build_router, run_simulation};

#[derive(Parser)]
#[command(name = "offerpackd", about = "offerpack placement daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Place tasks against remote authorities until Ctrl-C.
    Run {
        /// Path to offerpack.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the metrics port from the config.
        #[arg(long)]
        metrics_port: Option<u16>,
    },
    /// Place a synthetic workload on in-memory hosts and print a report.
    Simulate {
        #[arg(long, default_value = "100")]
        tasks: usize,

        #[arg(long, default_value = "20")]
        hosts: usize,

        /// CPU cores per host.
        #[arg(long, default_value = "16")]
        host_cpu: f64,

        /// Memory per host, in MB.
        #[arg(long, default_value = "65536")]
        host_mem_mb: f64,

        /// Stop waiting for placements after this long.
        #[arg(long, default_value = "60s")]
        timeout: String,

        /// Engine tunables; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,offerpack=debug"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PlacementConfig> {
    match path {
        Some(path) => PlacementConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(PlacementConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config, metrics_port } => run(config.as_deref(), metrics_port).await,
        Command::Simulate {
            tasks,
            hosts,
            host_cpu,
            host_mem_mb,
            timeout,
            config,
        } => {
            let timeout = parse_duration(&timeout).with_context(|| format!("invalid --timeout {timeout:?}"))?;
            let spec = SimulationSpec {
                tasks,
                hosts,
                host_cpu,
                host_mem_mb,
                timeout,
            };
            let settings = EngineSettings::from_config(&load_config(config.as_deref())?)?;
            let report = run_simulation(&spec, settings).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn run(config_path: Option<&Path>, metrics_port: Option<u16>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let settings = EngineSettings::from_config(&config)?;
    info!(
        resource_manager = %config.resource_manager_url,
        host_manager = %config.host_manager_url,
        "offerpackd starting"
    );

    let resource_manager = HttpResourceManager::new(&config.resource_manager_url, settings.rpc_timeout)?;
    let host_manager = HttpHostManager::new(&config.host_manager_url, settings.rpc_timeout)?;
    let engine = Arc::new(PlacementEngine::new(
        settings,
        Arc::new(resource_manager),
        Arc::new(host_manager),
        Arc::new(PlacementMetrics::new()),
    ));
    engine.start();

    let addr = SocketAddr::from(([0, 0, 0, 0], metrics_port.unwrap_or(config.metrics_port)));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "metrics server listening");

    axum::serve(listener, build_router(engine.clone()))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    engine.shutdown().await;
    info!("offerpackd stopped");
    Ok(())
}
