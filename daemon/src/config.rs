//! Daemon configuration with TOML file support.

use serde::{Deserialize, Serialize};

use ember_types::{hardcoded_servers, ServerCandidate};

use crate::DaemonError;

/// Configuration for the Ember daemon.
///
/// Can be loaded from a TOML file via [`ClientConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Which network addresses belong to: "bitcoin" or "testnet".
    #[serde(default = "default_network")]
    pub network: String,

    /// Skip TLS certificate validation (self-hosted servers only).
    #[serde(default)]
    pub allow_invalid_certs: bool,

    /// Log level filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Server list override. Empty means the built-in list.
    #[serde(default)]
    pub servers: Vec<ServerCandidate>,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_network() -> String {
    "bitcoin".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, DaemonError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| DaemonError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, DaemonError> {
        toml::from_str(s).map_err(|e| DaemonError::Config(e.to_string()))
    }

    /// The effective candidate list: the configured override, or the
    /// built-in servers when none is configured.
    pub fn candidates(&self) -> Vec<ServerCandidate> {
        if self.servers.is_empty() {
            hardcoded_servers()
        } else {
            self.servers.clone()
        }
    }

    /// Parse the configured network name.
    pub fn bitcoin_network(&self) -> Result<bitcoin::Network, DaemonError> {
        match self.network.to_lowercase().as_str() {
            "bitcoin" | "mainnet" => Ok(bitcoin::Network::Bitcoin),
            "testnet" => Ok(bitcoin::Network::Testnet),
            "signet" => Ok(bitcoin::Network::Signet),
            "regtest" => Ok(bitcoin::Network::Regtest),
            other => Err(DaemonError::Config(format!("unknown network {other:?}"))),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            allow_invalid_certs: false,
            log_level: default_log_level(),
            servers: Vec::new(),
        }
    }
}
