//! Command-line interface definition.

use clap::{Parser, ValueEnum};
use plate_verifier::config::{RegistryKind, ServiceConfig};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Verifies detected license plates against the vehicle registry and streams
/// the results to WebSocket clients.
#[derive(Parser, Debug)]
#[command(name = "plate-verifier")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, short, env = "PLATE_VERIFIER_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Registry backend.
    #[arg(long, value_enum, env = "PLATE_VERIFIER_REGISTRY")]
    pub registry: Option<CliRegistryKind>,

    /// JSON-RPC endpoint of the ledger node.
    #[arg(long, env = "PLATE_VERIFIER_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Registry deployment descriptor (`{address, abi}`).
    #[arg(long, env = "PLATE_VERIFIER_DEPLOYMENT")]
    pub deployment: Option<PathBuf>,

    /// Registry fixtures file for the static backend.
    #[arg(long, env = "PLATE_VERIFIER_STATIC_RECORDS")]
    pub static_records: Option<PathBuf>,

    /// Detector endpoint receiving image uploads.
    #[arg(long, env = "PLATE_VERIFIER_DETECTOR_URL")]
    pub detector_url: Option<String>,

    /// Log level.
    #[arg(long, env = "RUST_LOG")]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "PLATE_VERIFIER_LOG_JSON")]
    pub log_json: bool,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

/// Registry backend CLI enum.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliRegistryKind {
    /// Deployed registry contract over JSON-RPC.
    Evm,
    /// In-memory fixtures.
    Static,
}

impl Cli {
    /// Convert CLI arguments into a `ServiceConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<ServiceConfig> {
        // Start with default config or load from file
        let mut config = if let Some(ref path) = self.config {
            ServiceConfig::from_file(path)?
        } else {
            ServiceConfig::default()
        };

        // Override with CLI arguments
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(kind) = self.registry {
            config.registry.kind = kind.into();
        }
        if let Some(rpc_url) = self.rpc_url {
            config.registry.rpc_url = rpc_url;
        }
        if let Some(deployment) = self.deployment {
            config.registry.deployment_path = deployment;
        }
        if let Some(static_records) = self.static_records {
            config.registry.kind = RegistryKind::Static;
            config.registry.static_records = Some(static_records);
        }
        if let Some(url) = self.detector_url {
            config.detector.url = Some(url);
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }

        Ok(config)
    }
}

impl From<CliRegistryKind> for RegistryKind {
    fn from(kind: CliRegistryKind) -> Self {
        match kind {
            CliRegistryKind::Evm => Self::Evm,
            CliRegistryKind::Static => Self::Static,
        }
    }
}
