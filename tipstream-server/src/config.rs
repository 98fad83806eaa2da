//! Server configuration.
//!
//! Loaded from a TOML file whose string values may reference environment
//! variables as `$VAR` or `${VAR}`. A missing file means "all defaults":
//! the server then starts with no chain adapters.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 50052
//!
//! [engine]
//! payment_ttl_secs = 900
//! poll_interval_secs = 30
//! public_base_url = "https://pay.example.com"
//!
//! [overlay]
//! url = "http://localhost:50053"
//!
//! [[adapters]]
//! kind = "evm"
//! network = "ethereum"
//! rpc_url = "$ETHEREUM_RPC_URL"
//! confirmations = 12
//!
//! [[adapters]]
//! kind = "erc20"
//! network = "polygon"
//! asset = "USDT"
//! rpc_url = "https://polygon-rpc.com"
//!
//! [[adapters]]
//! kind = "solana"
//! asset = "USDC"
//! rpc_url = "https://api.mainnet-beta.solana.com"
//!
//! [[adapters]]
//! kind = "mock"
//! network = "testnet"
//! asset = "TEST"
//! confirm_after_secs = 60
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to the configuration file (default: `config.toml`)
//! - `HOST` - Override bind address
//! - `PORT` - Override port
//! - Anything referenced by `$VAR` in the file

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use serde::Deserialize;
use tipstream::config::EngineConfig;

/// Errors raised while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// File path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`ServerConfig`].
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// Port (default `50052`).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Engine tunables.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Stream overlay to notify about confirmed donations.
    #[serde(default)]
    pub overlay: Option<OverlayConfig>,
    /// Chain adapters to run.
    #[serde(default)]
    pub adapters: Vec<AdapterConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            engine: EngineConfig::default(),
            overlay: None,
            adapters: Vec::new(),
        }
    }
}

/// Overlay push target.
#[derive(Debug, Clone, Deserialize)]
pub struct OverlayConfig {
    /// Base URL; donations are POSTed to `{url}/donations`.
    pub url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_overlay_timeout")]
    pub timeout_secs: u64,
}

/// One chain adapter, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AdapterConfig {
    /// Native coin of an EVM chain.
    Evm(EvmConfig),
    /// ERC-20 token on an EVM chain.
    Erc20(EvmConfig),
    /// SOL or an SPL token.
    Solana(SolanaConfig),
    /// Scripted adapter for local development.
    Mock(MockConfig),
}

impl AdapterConfig {
    /// Network the adapter serves.
    #[must_use]
    pub fn network(&self) -> &str {
        match self {
            Self::Evm(c) | Self::Erc20(c) => &c.network,
            Self::Solana(c) => &c.network,
            Self::Mock(c) => &c.network,
        }
    }
}

/// EVM adapter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EvmConfig {
    /// Known network name, e.g. `ethereum`.
    pub network: String,
    /// Asset symbol; defaults to the network's native coin.
    #[serde(default)]
    pub asset: Option<String>,
    /// Primary HTTP RPC endpoint.
    pub rpc_url: String,
    /// Additional endpoints used as fallbacks.
    #[serde(default)]
    pub fallback_rpc_urls: Vec<String>,
    /// Requests per second per endpoint.
    #[serde(default)]
    pub rate_limit: Option<u32>,
    /// Chain ID, required for networks missing from the known table.
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// Token contract; defaults to the known deployment.
    #[serde(default)]
    pub contract: Option<String>,
    /// Asset decimals; defaults to the known value.
    #[serde(default)]
    pub decimals: Option<u32>,
    /// Confirmation threshold.
    #[serde(default)]
    pub confirmations: Option<u64>,
    /// Blocks scanned per poll at most.
    #[serde(default)]
    pub max_blocks_per_poll: Option<u64>,
    /// How far behind the head a newly watched address is scanned from.
    #[serde(default)]
    pub lookback_blocks: Option<u64>,
}

/// Solana adapter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SolanaConfig {
    /// Network name (default `solana`).
    #[serde(default = "default_solana_network")]
    pub network: String,
    /// Asset symbol (default `SOL`).
    #[serde(default = "default_solana_asset")]
    pub asset: String,
    /// HTTP RPC endpoint.
    pub rpc_url: String,
    /// SPL mint; defaults to the known deployment for `asset`.
    #[serde(default)]
    pub mint: Option<String>,
    /// Asset decimals; defaults to the known value.
    #[serde(default)]
    pub decimals: Option<u32>,
    /// Confirmation threshold.
    #[serde(default)]
    pub confirmations: Option<u64>,
}

/// Mock adapter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MockConfig {
    /// Network name.
    pub network: String,
    /// Asset symbol.
    pub asset: String,
    /// Confirmation threshold (default 1).
    #[serde(default = "default_mock_confirmations")]
    pub confirmations: u64,
    /// Asset decimals; defaults to the known value.
    #[serde(default)]
    pub decimals: Option<u32>,
    /// Report every request as paid this many seconds after creation.
    #[serde(default = "default_confirm_after")]
    pub confirm_after_secs: Option<u64>,
    /// Behave like a memo-capable network.
    #[serde(default)]
    pub memo: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    50052
}

const fn default_overlay_timeout() -> u64 {
    5
}

fn default_solana_network() -> String {
    "solana".to_owned()
}

fn default_solana_asset() -> String {
    "SOL".to_owned()
}

const fn default_mock_confirmations() -> u64 {
    1
}

#[allow(clippy::unnecessary_wraps)]
const fn default_confirm_after() -> Option<u64> {
    Some(60)
}

impl ServerConfig {
    /// Loads from `$CONFIG`, falling back to `config.toml`.
    ///
    /// # Errors
    ///
    /// See [`ServerConfig::load_from`].
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads from `path`, expanding environment variables and applying the
    /// `HOST` / `PORT` overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read or
    /// parsed.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let raw = if Path::new(path).exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?
        } else {
            tracing::warn!(path, "Configuration file not found, using defaults");
            String::new()
        };
        let mut config = Self::parse(&raw)?;

        if let Some(host) = std::env::var("HOST").ok().and_then(|h| h.parse().ok()) {
            config.host = host;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        Ok(config)
    }

    /// Parses TOML text after environment expansion.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for invalid TOML.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(&expand_env_vars(raw, |name| std::env::var(name).ok()))?)
    }
}

/// Replaces `$VAR` and `${VAR}` using `lookup`. Unknown variables are kept
/// verbatim.
fn expand_env_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .unwrap_or(after.len());
            (&after[..end], end)
        };
        let original = &rest[pos..pos + 1 + consumed];
        match (name.is_empty(), lookup(name)) {
            (false, Some(value)) => out.push_str(&value),
            _ if consumed == 0 => out.push('$'),
            _ => out.push_str(original),
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}
