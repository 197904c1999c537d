mod api;
mod commands;
mod config;
mod creds;
mod discovery;
mod error;
mod inventory;
mod probe;
mod render;
mod ssh;

use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use crate::config::Config;
use crate::discovery::ControllerDiscovery;
use crate::inventory::{HostQuery, InventoryHandle};
use crate::probe::SshProbe;
use crate::ssh::ConnectParams;

#[derive(Parser)]
#[command(name = "cloud-admin")]
#[command(about = "Inspect the hosts and services behind a cloud controller")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Cloud controller address; overrides the config file, or stands in for it
    #[arg(long, global = true)]
    controller: Option<String>,

    /// Log level name or number (10 = debug ... 50 = critical)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// One line per host: distro, version, arch, zone and service codes
    Summary,

    /// Hosts with memory and CPU usage, their services and instances
    Hosts {
        /// Only hosts running this service type (e.g. node, cluster, CC, user-api)
        #[arg(long)]
        service: Option<String>,
        /// Only hosts in this partition
        #[arg(long)]
        partition: Option<String>,
        /// Only the node controller running this instance
        #[arg(long)]
        instance: Option<String>,
        /// Number of service columns to show
        #[arg(long, default_value_t = 4)]
        columns: usize,
    },

    /// State of every registered service
    Services,

    /// State of every instance and the node it runs on
    Instances {
        /// Only instances in this partition
        #[arg(long)]
        partition: Option<String>,
    },

    /// Serve the inventory over HTTP
    Serve {
        /// Listen address; overrides api.listen
        #[arg(long)]
        listen: Option<String>,
    },
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.controller {
        Some(hostname) if !cli.config.exists() => Config::for_controller(hostname.clone()),
        _ => Config::load(&cli.config)
            .with_context(|| format!("Failed to load config from {}", cli.config.display()))?,
    };
    if let Some(hostname) = &cli.controller {
        config.controller.hostname = hostname.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let level = cli
        .log_level
        .as_deref()
        .or(config.log_level.as_deref())
        .unwrap_or("info");
    let level = config::parse_log_level(level)?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("cloud_admin={}", level)))
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Using controller {}", config.controller.hostname);

    // Resolve credentials and build the discovery collaborator
    let params = ConnectParams::from_config(&config.controller, &config.ssh);
    let controller = params.target(config.controller.hostname.clone());
    let credentials = creds::resolve(&config.credentials, &controller)
        .await
        .context("Failed to resolve credentials")?;

    let discovery = Arc::new(ControllerDiscovery::new(
        controller,
        credentials,
        config.discovery.endpoint_port,
        config.discovery.services_command.clone(),
        config.discovery.nodes_command.clone(),
    ));

    let (hash_tx, hash_rx) = watch::channel(None);
    let inventory = InventoryHandle::spawn(
        discovery,
        params,
        config.controller.hostname.clone(),
        hash_tx,
    );

    let probe = SshProbe;
    let concurrency = config.inventory.probe_concurrency;
    let format = cli.format;

    let result = match cli.command {
        Commands::Summary => commands::summary(&inventory, &probe, concurrency, format).await,
        Commands::Hosts { service, partition, instance, columns } => {
            let query = HostQuery { service, partition, instance };
            commands::hosts(&inventory, &probe, &query, columns, concurrency, format).await
        }
        Commands::Services => commands::services(&inventory, format).await,
        Commands::Instances { partition } => {
            commands::instances(&inventory, partition.as_deref(), format).await
        }
        Commands::Serve { listen } => {
            let listen = listen.unwrap_or_else(|| config.api.listen.clone());
            commands::serve(inventory.clone(), hash_rx, &listen).await
        }
    };

    // Shutdown inventory task
    if let Err(e) = inventory.shutdown().await {
        tracing::debug!("Inventory already stopped: {}", e);
    }

    result
}
