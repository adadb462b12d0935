//! Ember daemon — CLI entry point for watching addresses and querying fees.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;

use ember_client::{BroadcastCoordinator, ConnectionReady, ElectrumClient};
use ember_monitor::{
    AddressHandler, ElectrumChainSource, ErrorClass, MonitorError, SubscriptionRegistry,
};
use ember_types::{AddressState, BitcoinAddress, UpdateSource};

pub use config::ClientConfig;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("config error: {0}")]
    Config(String),
}

#[derive(Parser)]
#[command(name = "ember", about = "Ember wallet network daemon")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings are
    /// used as the base; CLI flags and env vars override them.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Network: "bitcoin", "testnet", "signet", or "regtest".
    #[arg(long, env = "EMBER_NETWORK")]
    network: Option<String>,

    /// Skip TLS certificate validation (self-hosted servers only).
    #[arg(long, env = "EMBER_ALLOW_INVALID_CERTS")]
    allow_invalid_certs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Subscribe to an address and log every update until interrupted.
    Watch { address: String },

    /// One-shot balance/history snapshot for an address.
    Balance { address: String },

    /// Current fast/medium/slow fee-rate buckets.
    Fees,
}

/// Watch-mode handler: logs updates and errors.
struct LogHandler;

impl AddressHandler for LogHandler {
    fn on_update(&self, state: &AddressState, source: UpdateSource) {
        tracing::info!(
            confirmed = state.balance.confirmed,
            unconfirmed = state.balance.unconfirmed,
            history = state.history.len(),
            mempool = state.mempool.len(),
            eta = %state.fee_snapshot.eta,
            ?source,
            "address update"
        );
    }

    fn on_error(&self, error: &MonitorError, class: ErrorClass) {
        if class.is_terminal() {
            tracing::warn!(%error, ?class, "address cannot be monitored; balance unknown");
        } else {
            tracing::warn!(%error, ?class, "monitor error");
        }
    }

    fn incoming_only(&self) -> bool {
        false
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_toml_file(
            path.to_str()
                .ok_or_else(|| anyhow::anyhow!("config path is not valid UTF-8"))?,
        )?,
        None => ClientConfig::default(),
    };
    if let Some(network) = cli.network {
        config.network = network;
    }
    if cli.allow_invalid_certs {
        config.allow_invalid_certs = true;
    }

    ember_utils::init_tracing_with_default(&config.log_level);

    let network = config.bitcoin_network()?;
    let candidates = config.candidates();

    let client = ElectrumClient::new(config.allow_invalid_certs);
    if !client.connect(&candidates).await {
        anyhow::bail!("could not connect to any of {} servers", candidates.len());
    }
    if let Some(server) = client.active_server().await {
        tracing::info!(%server, "using server");
    }

    let source = Arc::new(ElectrumChainSource::new(Arc::clone(&client), network));
    let registry = SubscriptionRegistry::new(source);

    match cli.command {
        Command::Watch { address } => {
            let address: BitcoinAddress = address.parse()?;
            let events = client
                .take_notifications()
                .expect("notification receiver is taken exactly once");
            registry.spawn_notification_pump(events);

            registry.watch(address.clone(), Arc::new(LogHandler)).await;
            tracing::info!(%address, "watching; press ctrl-c to stop");

            tokio::signal::ctrl_c().await?;
            registry.unwatch(&address, "shutdown").await;
            registry.shutdown().await;
        }
        Command::Balance { address } => {
            let address: BitcoinAddress = address.parse()?;
            let state = registry.refresh(&address).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Command::Fees => {
            // Re-verify liveness the same way a broadcast would.
            let coordinator =
                BroadcastCoordinator::new(Arc::clone(&client), candidates.clone());
            if !coordinator.wait_until_ready().await {
                anyhow::bail!("connection lost and could not be re-established");
            }
            let tiers = client.fee_tiers().await?;
            println!("{}", serde_json::to_string_pretty(&tiers)?);
        }
    }

    client.close().await;
    Ok(())
}
