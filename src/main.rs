//! harmony-mesh main entry point
//!
//! This binary runs the mesh controller: control socket, metrics endpoint
//! and change notifications. It also compiles stored network records
//! offline for inspection.

use anyhow::Context;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use clap::{Parser, Subcommand};
use harmony_mesh::{
    config::Config,
    control::{CommandHandler, ControlServer},
    model::NetworkRecord,
    monitoring::Monitor,
    policy,
    store::{JsonFileStore, MemoryStore, Store},
    wireguard::render_wg_quick,
    Mesh, APP_NAME, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// WireGuard overlay mesh controller
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller
    Serve {
        /// Configuration file path
        #[arg(short, long, default_value = "/etc/harmony-mesh/config.toml")]
        config: PathBuf,
    },

    /// Compile a stored network record and print the result
    Compile {
        /// Network record (JSON)
        record: PathBuf,

        /// Print the wg-quick file of this peer instead of the full output
        #[arg(short, long)]
        peer: Option<String>,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize structured logging with tracing
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Run the CLI command
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve { config } => serve(config).await,
        Commands::Compile { record, peer } => compile(record, peer),
        Commands::Version => {
            println!("{} v{}", APP_NAME, VERSION);
            Ok(())
        }
    }
}

async fn serve(config_path: PathBuf) -> anyhow::Result<()> {
    info!("Starting {} v{}", APP_NAME, VERSION);
    info!("Loading configuration from {:?}", config_path);
    let config = Config::from_file(&config_path)?;
    config.validate()?;

    let store: Arc<dyn Store> = match &config.server.state_dir {
        Some(dir) => {
            info!("Persisting network records under {:?}", dir);
            Arc::new(JsonFileStore::open(dir)?)
        }
        None => {
            warn!("No state_dir configured; network records are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let mesh = Arc::new(Mesh::open(store, &config)?);
    let seeded = mesh.seed(&config.networks).await?;
    info!("Seeded {} network(s) from configuration", seeded.len());

    let handler = Arc::new(CommandHandler::new(mesh.clone()));
    let control = Arc::new(ControlServer::new(config.server.socket_path.clone(), handler));
    let listener = control.bind()?;
    let control_task = {
        let control = control.clone();
        tokio::spawn(async move {
            if let Err(e) = control.serve(listener).await {
                error!("Control server stopped: {}", e);
            }
        })
    };

    let app = create_http_server(mesh.monitor());
    let addr = &config.server.metrics_addr;
    let http = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics endpoint {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(http, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    control_task.abort();
    control.shutdown().await?;
    Ok(())
}

fn compile(record_path: PathBuf, peer: Option<String>) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(&record_path)
        .with_context(|| format!("Failed to read {:?}", record_path))?;
    let record: NetworkRecord = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse network record {:?}", record_path))?;
    let compiled = policy::compile(&record)?;

    match peer {
        Some(name) => {
            let policy = compiled
                .peers
                .values()
                .find(|p| p.name == name)
                .with_context(|| format!("No compiled configuration for peer '{}'", name))?;
            print!("{}", render_wg_quick(policy, None));
        }
        None => println!("{}", serde_json::to_string_pretty(&compiled)?),
    }
    Ok(())
}

/// Create HTTP server with routes
fn create_http_server(monitor: Arc<Monitor>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(monitor)
}

/// Health check endpoint
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Metrics endpoint (Prometheus format)
async fn metrics(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    let mut output = String::new();

    output.push_str("# HELP harmony_mesh_info Controller information\n");
    output.push_str("# TYPE harmony_mesh_info gauge\n");
    output.push_str(&format!("harmony_mesh_info{{version=\"{}\"}} 1\n\n", VERSION));

    let stats = monitor.get_all_stats();
    if !stats.is_empty() {
        output.push_str("# HELP harmony_mesh_network_peers Peers per network\n");
        output.push_str("# TYPE harmony_mesh_network_peers gauge\n");
        for stat in &stats {
            output.push_str(&format!(
                "harmony_mesh_network_peers{{network=\"{}\"}} {}\n",
                stat.name, stat.total_peers
            ));
        }
        output.push_str("\n# HELP harmony_mesh_network_version Committed version per network\n");
        output.push_str("# TYPE harmony_mesh_network_version gauge\n");
        for stat in &stats {
            output.push_str(&format!(
                "harmony_mesh_network_version{{network=\"{}\"}} {}\n",
                stat.name, stat.version
            ));
        }
        output.push('\n');
    }

    output.push_str(&monitor.metrics().export_prometheus());

    (StatusCode::OK, output)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
