//! ChainCtl - Command line tool for inspecting AdminChain servers
//!
//! Usage:
//!   chainctl height          - Show the server's chain height
//!   chainctl block <n>       - Show block n as served
//!   chainctl verify          - Download the whole chain and check it

use std::path::PathBuf;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use adminchain::chain::Ledger;
use adminchain::crypto::BlockVerifier;
use adminchain::sync::{BlockProvider, RpcBlockProvider};

/// AdminChain Control Tool
#[derive(Parser)]
#[command(name = "chainctl")]
#[command(about = "Inspect AdminChain servers", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/adminchain/config.toml")]
    config: PathBuf,

    /// Server address to connect to (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Server public key; when given, served signatures are checked
    #[arg(short, long)]
    public_key: Option<PathBuf>,

    /// Request timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the server's chain height
    Height,
    /// Show one block
    Block {
        /// Block index
        index: u64,
    },
    /// Download every block and check ids, links and signatures
    Verify,
}

// ============ Config ============

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    server: Option<ServerSection>,
    #[serde(default)]
    sync: Option<SyncSection>,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    bind_address: String,
}

#[derive(Debug, Deserialize)]
struct SyncSection {
    server_address: String,
}

const DEFAULT_ENDPOINT: &str = "127.0.0.1:8900";

/// Follower configs point at their server; server configs at themselves
fn endpoint_from_config(path: &PathBuf) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let config = toml::from_str::<Config>(&content).ok()?;

    if let Some(sync) = config.sync {
        return Some(sync.server_address);
    }
    let addr = config.server?.bind_address;
    if addr.starts_with("0.0.0.0") {
        Some(format!("127.0.0.1:{}", addr.split(':').nth(1).unwrap_or("8900")))
    } else {
        Some(addr)
    }
}

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let endpoint = cli
        .endpoint
        .clone()
        .or_else(|| endpoint_from_config(&cli.config))
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

    let timeout = Duration::from_millis(cli.timeout_ms);
    let remote = RpcBlockProvider::connect(endpoint, timeout, timeout);

    let result = match &cli.command {
        Commands::Height => show_height(&remote).await,
        Commands::Block { index } => show_block(&remote, *index, cli.public_key.as_ref()).await,
        Commands::Verify => verify_chain(&remote, cli.public_key.as_ref()).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ============ Commands ============

fn load_verifier(path: Option<&PathBuf>) -> Result<Option<BlockVerifier>, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(Some(BlockVerifier::load(path)?)),
        None => Ok(None),
    }
}

async fn show_height(remote: &RpcBlockProvider) -> Result<(), Box<dyn std::error::Error>> {
    let height = remote.height().await?;
    println!("{}: height {}", remote.address(), height);
    Ok(())
}

async fn show_block(
    remote: &RpcBlockProvider,
    index: u64,
    public_key: Option<&PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let verifier = load_verifier(public_key)?;
    let signed = remote.get_block(index).await?;
    let block = &signed.block;

    println!();
    println!("Block:     {}", block.id);
    println!("Prev hash: {}", STANDARD.encode(&block.prev_hash));
    println!("Hash:      {}", STANDARD.encode(block.hash()));
    println!("Signature: {}", STANDARD.encode(&signed.signature));
    println!("Data:      {}", block.data);

    if let Some(verifier) = verifier {
        match verifier.verify(&signed) {
            Ok(()) => println!("\x1b[1;32m✓\x1b[0m Signature valid"),
            Err(e) => {
                println!("\x1b[1;31m✗\x1b[0m {}", e);
                return Err(e.into());
            }
        }
    }
    println!();

    Ok(())
}

async fn verify_chain(
    remote: &RpcBlockProvider,
    public_key: Option<&PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let verifier = load_verifier(public_key)?;
    let height = remote.height().await?;

    let mut ledger = Ledger::new();
    for index in 0..height {
        let signed = remote.get_block(index).await?;
        if let Some(verifier) = &verifier {
            verifier.verify(&signed)?;
        }
        if signed.block.id != index {
            return Err(format!("block at index {} reports id {}", index, signed.block.id).into());
        }
        ledger.insert_block(signed.block);
    }

    if let Some(index) = ledger.first_invalid() {
        println!("\x1b[1;31m✗\x1b[0m Chain breaks at block {} of {}", index, height);
        return Err(format!("chain does not link at block {}", index).into());
    }

    let signatures = if verifier.is_some() { "signatures checked" } else { "signatures not checked" };
    println!("\x1b[1;32m✓\x1b[0m {} blocks link correctly ({})", height, signatures);
    if let Some(last) = ledger.last() {
        println!("  Tip hash: {}", STANDARD.encode(last.hash()));
    }

    Ok(())
}
