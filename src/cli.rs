//! CLI implementation for the challenger agent
//!
//! The `run` verb: option parsing, assembly of the RPC clients and per-feed
//! pipelines, the metrics endpoint, and signal handling.

use crate::challenger::Challenger;
use crate::config::Config;
use crate::feed::RpcFeedProvider;
use crate::keys;
use crate::metrics::{self, Metrics};
use crate::rpc::HttpClient;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};

/// Address the Prometheus endpoint binds to.
const METRICS_ADDR: &str = "0.0.0.0:9090";

/// Challenger agent CLI
#[derive(Parser)]
#[command(name = "challenger")]
#[command(about = "Watchdog agent that challenges invalid optimistic pokes on Scribe feeds")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor feed contracts and challenge invalid optimistic pokes
    Run(RunOptions),
}

#[derive(Debug, Args)]
pub struct RunOptions {
    /// ScribeOptimistic contract address to monitor (repeatable).
    /// Example: 0x891E368fE81cBa2aC6F6cc4b98e684c106e2EF4f
    #[arg(short = 'a', long = "addresses", value_name = "ADDRESS")]
    pub addresses: Vec<String>,

    /// Node HTTP RPC URL, normally starts with https://
    #[arg(long)]
    pub rpc_url: String,

    /// Flashbot node HTTP RPC URL, normally starts with https://
    #[arg(long)]
    pub flashbot_rpc_url: Option<String>,

    /// Push endpoint hint, typically starts with wss://. Accepted as
    /// metadata only; the agent polls either way.
    #[arg(long)]
    pub subscription_url: Option<String>,

    /// Private key in format `0x******` or `******`. If provided, no need
    /// to use --keystore
    #[arg(long)]
    pub secret_key: Option<String>,

    /// Keystore file (NOT FOLDER), path to key .json file. If provided, no
    /// need to use --secret-key
    #[arg(long)]
    pub keystore: Option<PathBuf>,

    /// Key raw password as text
    #[arg(long)]
    pub password: Option<String>,

    /// Path to key password file
    #[arg(long)]
    pub password_file: Option<PathBuf>,

    /// If no chain-id provided the agent will get it from the RPC
    #[arg(long)]
    pub chain_id: Option<u64>,

    /// Block number to start from. 0 derives a lookback window from the
    /// challenge period.
    #[arg(long, default_value_t = 0)]
    pub from_block: u64,

    /// Transaction type, possible values are: `legacy`, `eip1559` or `none`
    #[arg(long, default_value = "none")]
    pub tx_type: String,
}

/// Parse the command line and run the selected command.
pub async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(opts) => run_agent(opts).await,
    }
}

async fn run_agent(opts: RunOptions) -> Result<()> {
    let config = Config::from_run_options(&opts)?;
    let signer = keys::load_signer(&config.key)?;
    info!("Signing challenges from {}", signer.address());

    let shutdown = CancellationToken::new();
    let metrics = Metrics::new();

    let metrics_addr: SocketAddr = METRICS_ADDR.parse().context("Invalid metrics address")?;
    let metrics_server = tokio::spawn(metrics::serve(
        metrics.clone(),
        metrics_addr,
        shutdown.clone(),
    ));

    let public = Arc::new(HttpClient::new(
        config.rpc_url.clone(),
        signer.clone(),
        config.tx_type,
        config.chain_id,
    ));
    let relay = config.flashbot_rpc_url.as_ref().map(|url| {
        Arc::new(HttpClient::new(
            url.clone(),
            signer.clone(),
            config.tx_type,
            config.chain_id,
        ))
    });
    let provider = Arc::new(RpcFeedProvider::new(public, relay));

    if let Some(url) = &config.subscription_url {
        info!("Subscription endpoint {url} noted; events are polled");
    }

    // Ctrl-C fans out to every pipeline through the cancellation token.
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received interrupt, shutting down gracefully...");
                shutdown.cancel();
            }
        }
    });

    // One independent pipeline per feed address.
    let mut pipelines = JoinSet::new();
    for address in &config.addresses {
        let challenger = Challenger::new(
            *address,
            Arc::clone(&provider),
            config.from_block,
            metrics.clone(),
            shutdown.clone(),
        );
        pipelines.spawn(challenger.run());
    }

    while let Some(joined) = pipelines.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("Challenger pipeline failed: {err:#}"),
            Err(err) => error!("Challenger pipeline panicked: {err}"),
        }
    }

    shutdown.cancel();
    if let Ok(Err(err)) = metrics_server.await {
        error!("Metrics server error: {err:#}");
    }

    info!("Challenger stopped");
    Ok(())
}
