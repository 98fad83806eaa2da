//! Builds chain adapters from configuration.

use std::str::FromStr;
use std::sync::Arc;

use tipstream::chain::{AdapterKey, AdapterRegistry, Capabilities, ChainAdapter, ScriptedAdapter};
use tipstream::networks::NetworkRegistry;
use tipstream_evm::provider::{self, ProviderError};
use tipstream_evm::{Erc20Adapter, EvmNativeAdapter, ScanOptions};
use solana_pubkey::Pubkey;
use tipstream_svm::SolanaAdapter;
use tipstream_svm::rpc::{self as svm_rpc, DEFAULT_TIMEOUT};
use url::Url;

use crate::config::{AdapterConfig, EvmConfig, MockConfig, SolanaConfig};

/// Errors raised while wiring adapters.
#[derive(Debug, thiserror::Error)]
pub enum ChainSetupError {
    /// A URL in the adapter section does not parse.
    #[error("{network}: invalid RPC URL {url:?}: {source}")]
    InvalidUrl {
        /// Network being configured.
        network: String,
        /// Offending value.
        url: String,
        /// Parse error.
        source: url::ParseError,
    },
    /// The network is unknown and no chain ID was given.
    #[error("{0}: unknown EVM network, set chain_id")]
    UnknownChain(String),
    /// No contract or mint is configured or known for the token.
    #[error("{network}: no known contract for {asset}, set it explicitly")]
    UnknownToken {
        /// Network being configured.
        network: String,
        /// Token symbol.
        asset: String,
    },
    /// The token contract or mint is not a valid address on the network.
    #[error("{network}: invalid contract address {address:?}")]
    InvalidContract {
        /// Network being configured.
        network: String,
        /// Offending value.
        address: String,
    },
    /// The RPC endpoint list is unusable.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Two adapters claim the same asset and network.
    #[error("duplicate adapter for {0}")]
    Duplicate(AdapterKey),
}

/// Builds one adapter per config entry.
///
/// # Errors
///
/// Returns [`ChainSetupError`] for the first entry that cannot be built.
pub fn build_adapters(
    configs: &[AdapterConfig],
    networks: &NetworkRegistry,
) -> Result<AdapterRegistry, ChainSetupError> {
    let mut registry = AdapterRegistry::new();
    for config in configs {
        let adapter: Arc<dyn ChainAdapter> = match config {
            AdapterConfig::Evm(c) => Arc::new(evm_native(c, networks)?),
            AdapterConfig::Erc20(c) => Arc::new(erc20(c, networks)?),
            AdapterConfig::Solana(c) => Arc::new(solana(c, networks)?),
            AdapterConfig::Mock(c) => Arc::new(mock(c, networks)),
        };
        let key = adapter.key().clone();
        if registry.get(&key).is_some() {
            return Err(ChainSetupError::Duplicate(key));
        }
        tracing::info!(
            adapter = %key,
            threshold = adapter.confirmation_threshold(),
            policy = ?adapter.capabilities().match_policy(),
            "Registered chain adapter"
        );
        registry.register(adapter);
    }
    Ok(registry)
}

fn parse_url(network: &str, url: &str) -> Result<Url, ChainSetupError> {
    Url::parse(url).map_err(|source| ChainSetupError::InvalidUrl {
        network: network.to_owned(),
        url: url.to_owned(),
        source,
    })
}

fn endpoints(c: &EvmConfig) -> Result<Vec<(Url, Option<u32>)>, ChainSetupError> {
    std::iter::once(&c.rpc_url)
        .chain(&c.fallback_rpc_urls)
        .map(|u| parse_url(&c.network, u).map(|url| (url, c.rate_limit)))
        .collect()
}

fn chain_id(c: &EvmConfig, networks: &NetworkRegistry) -> Result<u64, ChainSetupError> {
    c.chain_id
        .or_else(|| networks.network(&c.network).and_then(|n| n.eip155_chain_id()))
        .ok_or_else(|| ChainSetupError::UnknownChain(c.network.clone()))
}

fn scan_options(c: &EvmConfig) -> ScanOptions {
    let defaults = ScanOptions::default();
    ScanOptions {
        confirmations: c.confirmations.unwrap_or(defaults.confirmations),
        lookback_blocks: c.lookback_blocks.unwrap_or(defaults.lookback_blocks),
        max_blocks_per_poll: c.max_blocks_per_poll.unwrap_or(defaults.max_blocks_per_poll),
    }
}

fn evm_native(c: &EvmConfig, networks: &NetworkRegistry) -> Result<EvmNativeAdapter, ChainSetupError> {
    let chain_id = chain_id(c, networks)?;
    let symbol = c
        .asset
        .clone()
        .or_else(|| networks.network(&c.network).map(|n| n.native_symbol.to_owned()))
        .unwrap_or_else(|| "ETH".to_owned());
    let decimals = c.decimals.unwrap_or_else(|| networks.decimals(&c.network, &symbol));
    let key = AdapterKey::new(&symbol, &c.network);
    let provider = provider::connect(&key.to_string(), &endpoints(c)?)?;
    Ok(EvmNativeAdapter::new(key, chain_id, decimals, provider).with_options(scan_options(c)))
}

fn erc20(c: &EvmConfig, networks: &NetworkRegistry) -> Result<Erc20Adapter, ChainSetupError> {
    let chain_id = chain_id(c, networks)?;
    let symbol = c.asset.clone().unwrap_or_else(|| "USDT".to_owned());
    let known = networks.token(&c.network, &symbol);
    let contract = c
        .contract
        .clone()
        .or_else(|| known.map(|t| t.address.to_owned()))
        .ok_or_else(|| ChainSetupError::UnknownToken {
            network: c.network.clone(),
            asset: symbol.clone(),
        })?;
    let token = tipstream_evm::units::parse_address(&contract).ok_or_else(|| {
        ChainSetupError::InvalidContract {
            network: c.network.clone(),
            address: contract.clone(),
        }
    })?;
    let decimals = c.decimals.unwrap_or_else(|| networks.decimals(&c.network, &symbol));
    let key = AdapterKey::new(&symbol, &c.network);
    let provider = provider::connect(&key.to_string(), &endpoints(c)?)?;
    Ok(Erc20Adapter::new(key, chain_id, token, decimals, provider).with_options(scan_options(c)))
}

fn solana(c: &SolanaConfig, networks: &NetworkRegistry) -> Result<SolanaAdapter, ChainSetupError> {
    let key = AdapterKey::new(&c.asset, &c.network);
    let rpc = svm_rpc::connect(parse_url(&c.network, &c.rpc_url)?.as_str(), DEFAULT_TIMEOUT);
    let decimals = c.decimals.unwrap_or_else(|| networks.decimals(&c.network, &c.asset));
    let native = networks
        .network(&c.network)
        .is_some_and(|n| n.native_symbol.eq_ignore_ascii_case(&c.asset));
    let adapter = if native && c.mint.is_none() {
        SolanaAdapter::native(key, rpc)
    } else {
        let mint = c
            .mint
            .clone()
            .or_else(|| networks.token(&c.network, &c.asset).map(|t| t.address.to_owned()))
            .ok_or_else(|| ChainSetupError::UnknownToken {
                network: c.network.clone(),
                asset: c.asset.clone(),
            })?;
        let mint = Pubkey::from_str(&mint).map_err(|_| ChainSetupError::InvalidContract {
            network: c.network.clone(),
            address: mint.clone(),
        })?;
        SolanaAdapter::token(key, mint, decimals, rpc)
    };
    Ok(match c.confirmations {
        Some(n) => adapter.with_confirmations(n),
        None => adapter,
    })
}

fn mock(c: &MockConfig, networks: &NetworkRegistry) -> ScriptedAdapter {
    let decimals = c.decimals.unwrap_or_else(|| networks.decimals(&c.network, &c.asset));
    let mut adapter = ScriptedAdapter::new(AdapterKey::new(&c.asset, &c.network), c.confirmations)
        .with_decimals(decimals)
        .with_capabilities(Capabilities {
            query_by_address: true,
            query_by_memo: c.memo,
            batch: false,
        });
    if let Some(secs) = c.confirm_after_secs {
        adapter = adapter.simulate_after(secs);
    }
    adapter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use tipstream::chain::MatchPolicy;

    fn known() -> NetworkRegistry {
        NetworkRegistry::new()
            .with(tipstream_evm::EVM_NETWORKS, tipstream_evm::EVM_TOKENS)
            .with(tipstream_svm::SOLANA_NETWORKS, tipstream_svm::SOLANA_TOKENS)
    }

    fn build(toml: &str) -> Result<AdapterRegistry, ChainSetupError> {
        let config = ServerConfig::parse(toml).unwrap();
        build_adapters(&config.adapters, &known())
    }

    #[tokio::test]
    async fn test_builds_every_kind_with_known_defaults() {
        let registry = build(
            r#"
            [[adapters]]
            kind = "evm"
            network = "bsc"
            rpc_url = "https://bsc.example"

            [[adapters]]
            kind = "erc20"
            network = "bsc"
            asset = "USDT"
            rpc_url = "https://bsc.example"

            [[adapters]]
            kind = "solana"
            asset = "USDC"
            rpc_url = "https://sol.example"

            [[adapters]]
            kind = "mock"
            network = "testnet"
            asset = "TEST"
            memo = true
            "#,
        )
        .unwrap();
        assert_eq!(registry.len(), 4);

        let bnb = registry.get(&AdapterKey::new("BNB", "bsc")).unwrap();
        assert_eq!(bnb.decimals(), 18);
        assert_eq!(bnb.capabilities().match_policy(), MatchPolicy::ExactAmount);

        let usdt = registry.get(&AdapterKey::new("USDT", "bsc")).unwrap();
        assert_eq!(usdt.decimals(), 18);

        let usdc = registry.get(&AdapterKey::new("USDC", "solana")).unwrap();
        assert_eq!(usdc.decimals(), 6);
        assert_eq!(usdc.capabilities().match_policy(), MatchPolicy::Tolerant);

        let test = registry.get(&AdapterKey::new("TEST", "testnet")).unwrap();
        assert_eq!(test.confirmation_threshold(), 1);
        assert_eq!(test.capabilities().match_policy(), MatchPolicy::Tolerant);
    }

    #[test]
    fn test_unknown_token_needs_contract() {
        let err = build(
            "[[adapters]]\nkind = \"erc20\"\nnetwork = \"base\"\nasset = \"USDT\"\nrpc_url = \"https://base.example\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ChainSetupError::UnknownToken { .. }));
    }

    #[tokio::test]
    async fn test_unknown_chain_needs_chain_id() {
        let err = build(
            "[[adapters]]\nkind = \"evm\"\nnetwork = \"gnosis\"\nrpc_url = \"https://gnosis.example\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ChainSetupError::UnknownChain(n) if n == "gnosis"));

        let ok = build(
            "[[adapters]]\nkind = \"evm\"\nnetwork = \"gnosis\"\nasset = \"XDAI\"\nchain_id = 100\nrpc_url = \"https://gnosis.example\"\n",
        )
        .unwrap();
        assert!(ok.get(&AdapterKey::new("XDAI", "gnosis")).is_some());
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let err = build(
            r#"
            [[adapters]]
            kind = "mock"
            network = "testnet"
            asset = "TEST"

            [[adapters]]
            kind = "mock"
            network = "TESTNET"
            asset = "test"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ChainSetupError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_bad_mint_is_rejected() {
        let err = build(
            "[[adapters]]\nkind = \"solana\"\nasset = \"USDC\"\nmint = \"0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48\"\nrpc_url = \"https://sol.example\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ChainSetupError::InvalidContract { .. }));
    }

    #[test]
    fn test_bad_url() {
        let err = build(
            "[[adapters]]\nkind = \"evm\"\nnetwork = \"ethereum\"\nrpc_url = \"not a url\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ChainSetupError::InvalidUrl { .. }));
    }
}
