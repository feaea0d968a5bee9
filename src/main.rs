//! WolfCloud - Synchronized Object List Replication
//!
//! Runs a cloud manager or a wrapper node that replicates its lists.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfcloud::cluster;
use wolfcloud::config::{ConfigLoader, FileConfigLoader, NodeRole, WolfCloudConfig};
use wolfcloud::error::Result;
use wolfcloud::network::{
    ConnectionLifecycleMonitor, ConnectionState, ManagerClient, ManagerServer, OutboundQueue,
    PrimaryConnection, SessionHub,
};
use wolfcloud::sync::{InboundSyncHandler, SyncRegistry};

/// WolfCloud - Synchronized Object List Replication
#[derive(Parser)]
#[command(name = "wolfcloud")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfcloud.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to [logging].level
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node in the role set by its configuration
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfcloud.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "node-1")]
        node_id: String,

        /// Node role (manager or client)
        #[arg(long, default_value = "client")]
        role: String,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = cli.log_level.clone().unwrap_or_else(|| {
        WolfCloudConfig::from_file(&cli.config)
            .map(|config| config.logging.level)
            .unwrap_or_else(|_| "info".to_string())
    });
    init_logging(&level);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Init { output, node_id, role } => run_init(output, node_id, role),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
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

/// Start the node
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting WolfCloud node...");

    // Load configuration
    let config = match WolfCloudConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            return Err(e);
        }
    };
    tracing::info!("Loaded configuration for node: {} ({})", config.node.id, config.node.role);

    match config.node.role {
        NodeRole::Manager => run_manager(config).await,
        NodeRole::Client => run_wrapper(config, config_path).await,
    }
}

/// Serve the authoritative lists to wrappers
async fn run_manager(config: WolfCloudConfig) -> Result<()> {
    tracing::info!("Starting as MANAGER");

    let hub = Arc::new(SessionHub::new());
    let registry = Arc::new(SyncRegistry::new(NodeRole::Manager, hub.clone()));
    cluster::register_wrappers_list(&registry)?;

    let inbound = Arc::new(InboundSyncHandler::new(Arc::clone(&registry)));
    let server = Arc::new(ManagerServer::new(
        config.node.id.clone(),
        config.node.bind_address.clone(),
        Arc::clone(&hub),
        inbound,
    ));

    let serving = Arc::clone(&server);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = serving.start().await {
            tracing::error!("Manager server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    // Cleanup
    server.stop();
    hub.disconnect_all();
    let _ = server_handle.await;
    Ok(())
}

/// Connect to the manager and keep local replicas current
async fn run_wrapper(config: WolfCloudConfig, config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting as WRAPPER, manager at {}", config.manager.address);

    let queue = OutboundQueue::new();
    let registry = Arc::new(SyncRegistry::new(NodeRole::Client, Arc::new(queue.clone())));
    cluster::register_wrappers_list(&registry)?;

    let inbound = Arc::new(InboundSyncHandler::new(Arc::clone(&registry)));
    let loader: Arc<dyn ConfigLoader> = Arc::new(FileConfigLoader::new(config_path));
    let primary = Arc::new(PrimaryConnection::new());

    let client = ManagerClient::new(
        config.node.id.clone(),
        queue,
        inbound,
        Arc::clone(&loader),
        Arc::clone(&primary),
    );
    let monitor = Arc::new(
        ConnectionLifecycleMonitor::new(primary, loader, client.clone())
            .with_initial_config(config.connection_config()),
    );
    client.set_handler(monitor.clone());

    // Re-request every list whenever the primary connection comes back
    let mut state = monitor.subscribe();
    let resync_registry = Arc::clone(&registry);
    let resync_handle = tokio::spawn(async move {
        let mut connected_before = false;
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            if current != ConnectionState::Active {
                continue;
            }
            if connected_before {
                let requested = resync_registry.resynchronize();
                tracing::info!("Resynchronizing {} lists", requested);
            }
            connected_before = true;
        }
    });

    // Warn about bootstrap requests the manager never answered
    let stale_after = config.bootstrap_stale_after();
    let stale_registry = Arc::clone(&registry);
    let stale_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(stale_after.max(Duration::from_secs(1)));
        loop {
            interval.tick().await;
            for name in stale_registry.stale_bootstraps(stale_after) {
                tracing::warn!("No bootstrap response for list {} after {:?}", name, stale_after);
            }
        }
    });

    client.start(config.connection_config());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    // Cleanup
    client.stop();
    resync_handle.abort();
    stale_handle.abort();
    Ok(())
}

/// Initialize a new configuration file
fn run_init(output: PathBuf, node_id: String, role: String) -> Result<()> {
    let role = match role.to_ascii_lowercase().as_str() {
        "manager" => NodeRole::Manager,
        "client" | "wrapper" => NodeRole::Client,
        other => {
            return Err(wolfcloud::Error::Config(format!(
                "unknown role '{}', expected manager or client",
                other
            )))
        }
    };

    let config = WolfCloudConfig::sample(&node_id, role);
    let config_content = format!(
        "# WolfCloud Configuration\n# Generated configuration file\n\n{}",
        config.to_toml()?
    );

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to configure the manager address and reconnect policy.");
    println!("Then start with: wolfcloud start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfCloudConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Role: {}", config.node.role);
            if config.is_manager() {
                println!("  Bind Address: {}", config.node.bind_address);
            } else {
                println!("  Manager: {}", config.manager.address);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show node information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = WolfCloudConfig::from_file(&config_path)?;

    println!("WolfCloud Node Information");
    println!("==========================");
    println!();
    println!("Node ID:          {}", config.node.id);
    println!("Role:             {}", config.node.role);
    println!("Bind Address:     {}", config.node.bind_address);
    println!();
    println!("Manager Connection:");
    println!("  Address:        {}", config.manager.address);
    println!("  Timeout:        {} ms", config.manager.connect_timeout_ms);
    println!();
    println!("Reconnect Policy:");
    println!("  Initial Delay:  {} ms", config.reconnect.initial_delay_ms);
    println!("  Max Delay:      {} ms", config.reconnect.max_delay_ms);
    if config.reconnect.max_attempts == 0 {
        println!("  Max Attempts:   unlimited");
    } else {
        println!("  Max Attempts:   {}", config.reconnect.max_attempts);
    }
    println!();
    println!("Bootstrap:");
    println!("  Stale After:    {} s", config.bootstrap.stale_after_secs);

    Ok(())
}
