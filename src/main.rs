//! AdminChain - Permissioned Hash-Chained Ledger
//!
//! Runs a node as the authoritative server or as a read-only follower,
//! and offers local inspection of a node's ledger and snapshot.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adminchain::codec::Param;
use adminchain::config::AdminChainConfig;
use adminchain::crypto::BlockSigner;
use adminchain::error::Result;
use adminchain::node;

/// AdminChain - Permissioned Hash-Chained Ledger
#[derive(Parser)]
#[command(name = "adminchain")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "adminchain.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the authoritative server
    Serve,

    /// Run a read-only follower
    Follow,

    /// Generate a server signing key pair
    Keygen {
        /// Directory to write server.key and server.pub into
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "adminchain.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "node-1")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Print every block of the local chain log
    State,

    /// Append one transaction to the local chain; the node must be stopped
    Exec {
        /// SQL statement
        statement: String,

        /// Positional text parameters
        #[arg(short, long)]
        param: Vec<String>,
    },

    /// Run a read-only query against state rebuilt from the local chain log
    Query {
        /// SQL statement
        statement: String,

        /// Positional text parameters
        #[arg(short, long)]
        param: Vec<String>,

        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = AdminChainConfig::from_file(&cli.config).ok();
    let (level, format) = match &config {
        Some(c) => (c.logging.level.clone(), c.logging.format.clone()),
        None => ("info".to_string(), "pretty".to_string()),
    };
    init_logging(cli.log_level.as_deref().unwrap_or(&level), &format);

    let result = match cli.command {
        Commands::Serve => run_serve(cli.config).await,
        Commands::Follow => run_follow(cli.config).await,
        Commands::Keygen { output } => run_keygen(output),
        Commands::Init { output, node_id } => run_init(output, node_id),
        Commands::Validate => run_validate(cli.config),
        Commands::State => run_state(cli.config),
        Commands::Exec { statement, param } => run_exec(cli.config, statement, param),
        Commands::Query { statement, param, json } => run_query(cli.config, statement, param, json),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

fn load_config(config_path: &Path) -> Result<AdminChainConfig> {
    AdminChainConfig::from_file(config_path).map_err(|e| {
        tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
        e
    })
}

/// Run the authoritative server
async fn run_serve(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    tracing::info!("Starting AdminChain server {}", config.node.id);
    node::run_server(&config, shutdown_signal()).await
}

/// Run a follower
async fn run_follow(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    tracing::info!("Starting AdminChain follower {}", config.node.id);
    node::run_follower(&config, shutdown_signal()).await
}

/// Generate a signing key pair
fn run_keygen(output: PathBuf) -> Result<()> {
    let signer = BlockSigner::generate();
    let key_path = output.join("server.key");
    let pub_path = output.join("server.pub");

    if key_path.exists() {
        return Err(adminchain::Error::Key(format!(
            "{} already exists, refusing to overwrite",
            key_path.display()
        )));
    }

    signer.save(&key_path)?;
    signer.verifier().save(&pub_path)?;

    println!("Signing key:  {}", key_path.display());
    println!("Public key:   {}", pub_path.display());
    println!("\nKeep server.key on the server only. Copy server.pub to every follower.");
    Ok(())
}

/// Write a configuration template
fn run_init(output: PathBuf, node_id: String) -> Result<()> {
    let config_content = format!(r#"# AdminChain Configuration
# Generated configuration file

[node]
id = "{node_id}"
data_dir = "/var/lib/adminchain/{node_id}"

# Present on the authoritative server only
[server]
bind_address = "0.0.0.0:8900"
signing_key = "/etc/adminchain/server.key"
# Executed in order when the server starts with an empty chain
# genesis = [
#     "create table Accounts (address text, level int)",
#     "insert into Accounts (address, level) values ('admin', 1)",
# ]

# Present on followers only
# [sync]
# server_address = "chain-server.example.com:8900"
# server_public_key = "/etc/adminchain/server.pub"
# interval_ms = 5000
# connect_timeout_ms = 5000
# request_timeout_ms = 10000

[storage]
persist_interval_ms = 1000
chain_db_name = "blockchain.db"
state_db_name = "storage.db"

[logging]
level = "info"
format = "pretty"
"#);

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nGenerate a key pair with: adminchain keygen --output /etc/adminchain");
    println!("Then start with: adminchain serve --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match AdminChainConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID:        {}", config.node.id);
            println!("  Data Directory: {}", config.data_dir().display());
            if let Some(server) = &config.server {
                println!("  Role:           server on {}", server.bind_address);
            }
            if let Some(sync) = &config.sync {
                println!("  Role:           follower of {} every {} ms", sync.server_address, sync.interval_ms);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Print the local chain
fn run_state(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    let chain = node::inspect_chain(&config)?;

    println!();
    println!("Chain of node {} ({} blocks)", config.node.id, chain.height());
    println!("{}", "=".repeat(40));
    for block in &chain {
        println!();
        println!("Block:     {}", block.id);
        println!("Prev hash: {}", STANDARD.encode(&block.prev_hash));
        println!("Hash:      {}", STANDARD.encode(block.hash()));
        println!("Data:      {}", block.data);
    }
    println!();
    println!("Chain valid: {}", chain.is_valid());

    Ok(())
}

/// Append a transaction to the local chain
fn run_exec(config_path: PathBuf, statement: String, params: Vec<String>) -> Result<()> {
    let config = load_config(&config_path)?;
    let params: Vec<Param> = params.into_iter().map(Param::from).collect();
    let (rowid, height) = node::execute_offline(&config, &statement, &params)?;

    println!("✓ Block {} appended (rowid {})", height - 1, rowid);
    Ok(())
}

/// Query the local snapshot
fn run_query(config_path: PathBuf, statement: String, params: Vec<String>, json: bool) -> Result<()> {
    let config = load_config(&config_path)?;
    let chain = node::inspect_chain(&config)?;
    let snapshot = node::inspect_snapshot(&chain)?;

    let params: Vec<Param> = params.into_iter().map(Param::from).collect();
    let result = snapshot.query(&statement, &params)?;

    if json {
        let rendered = serde_json::to_string_pretty(&result)
            .map_err(|e| adminchain::Error::Internal(e.to_string()))?;
        println!("{}", rendered);
        return Ok(());
    }

    println!("{}", result.columns.join(" | "));
    println!("{}", "-".repeat(40));
    for row in &result.rows {
        println!("{}", row.join(" | "));
    }
    println!("({} rows)", result.rows.len());

    Ok(())
}
