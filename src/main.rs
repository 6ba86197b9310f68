//! WolfSQL - Replicated SQL Service
//!
//! Runs one node of a cluster that replicates SQL writes through a
//! leader-based log onto a local SQLite replica per node.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfsql::config::WolfSqlConfig;
use wolfsql::network::HttpTransport;
use wolfsql::node::Node;
use wolfsql::error::{Error, Result};

/// WolfSQL - Replicated SQL Service
#[derive(Parser)]
#[command(name = "wolfsql")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfsql.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WolfSQL node
    Start {
        /// Connection string of a cluster member to join through
        #[arg(long)]
        join: Option<String>,

        /// Data directory (overrides node.data_dir)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Address to listen on (overrides node.bind_address)
        #[arg(long)]
        listen: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfsql.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "node0")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Check node status
    Status {
        /// Node address to query
        #[arg(short, long, default_value = "localhost:4000")]
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { join, data_dir, listen } => {
            run_start(cli.config, cli.log_level, join, data_dir, listen).await
        }
        Commands::Init { output, node_id } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_init(output, node_id)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_validate(cli.config)
        }
        Commands::Status { address } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_status(address).await
        }
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Start the WolfSQL node
async fn run_start(
    config_path: PathBuf,
    log_level: Option<String>,
    join: Option<String>,
    data_dir: Option<PathBuf>,
    listen: Option<String>,
) -> Result<()> {
    let mut config = WolfSqlConfig::from_file(&config_path)?;
    init_logging(log_level.as_deref().unwrap_or(&config.logging.level));

    if join.is_some() {
        config.cluster.join = join;
    }
    if let Some(data_dir) = data_dir {
        config.node.data_dir = data_dir;
    }
    if let Some(listen) = listen {
        config.node.bind_address = listen;
    }
    config.validate()?;
    tracing::info!("Loaded configuration for node: {}", config.node.id);

    let transport = Arc::new(HttpTransport::new(config.request_timeout())?);
    let node = Arc::new(Node::new(config, transport).await?);
    node.start().await;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = {
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            node.serve(async move {
                let _ = stop_rx.await;
            })
            .await
        })
    };

    if let Err(e) = node.init().await {
        tracing::error!("Failed to join cluster: {}", e);
        let _ = stop_tx.send(());
        node.shutdown().await;
        return Err(e);
    }
    tracing::info!("Node {} is up at {}", node.id(), node.connection_string());

    let served = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Received shutdown signal");
            let _ = stop_tx.send(());
            (&mut server).await
        }
        result = &mut server => {
            tracing::error!("HTTP server stopped unexpectedly");
            result
        }
    };

    node.shutdown().await;
    served.map_err(|e| Error::Internal(format!("HTTP server task failed: {}", e)))??;

    tracing::info!("WolfSQL shutdown complete");
    Ok(())
}

/// Initialize configuration file
fn run_init(output: PathBuf, node_id: String) -> Result<()> {
    let config_content = format!(r#"# WolfSQL Configuration
# Generated configuration file

[node]
id = "{node_id}"
bind_address = "127.0.0.1:4000"
data_dir = "/var/lib/wolfsql/{node_id}"
# advertise_address = "my-public-ip:4000"

[cluster]
# join = "http://node0.example.com:4000"
heartbeat_interval_ms = 50
election_timeout_ms = 1000
replication_timeout_ms = 5000
max_batch_entries = 500

[recorder]
recent_capacity = 16
forward_wait_records = 8
forward_grace_ms = 1000

[api]
request_timeout_ms = 10000

[logging]
level = "info"
"#);

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nStart the first node with: wolfsql start --config {}", output.display());
    println!("Add nodes with: wolfsql start --config <file> --join http://<first-node>");

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfSqlConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Bind Address: {}", config.node.bind_address);
            println!("  Connection String: {}", config.connection_string());
            println!("  Data Directory: {}", config.node.data_dir.display());
            println!(
                "  Join: {}",
                config.cluster.join.as_deref().unwrap_or("(founds a new cluster)")
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Get node status
async fn run_status(address: String) -> Result<()> {
    let url = if address.starts_with("http://") || address.starts_with("https://") {
        format!("{}/status", address.trim_end_matches('/'))
    } else {
        format!("http://{}/status", address)
    };

    match reqwest::get(&url).await {
        Ok(response) => {
            let status: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to get status: {}", e);
            Err(e.into())
        }
    }
}
