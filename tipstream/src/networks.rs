//! Known networks and token deployments.
//!
//! This module provides the abstract types for looking up a network by its
//! human-readable name (e.g. `"polygon"`) and the well-known tokens deployed
//! on it. Concrete data lives in the chain-specific crates:
//!
//! - `tipstream-evm` provides `EVM_NETWORKS` and `EVM_TOKENS`
//! - `tipstream-svm` provides `SOLANA_NETWORKS` and `SOLANA_TOKENS`
//!
//! Applications assemble a [`NetworkRegistry`] from these slices at startup
//! and use it to fill in contract addresses and decimals the operator did not
//! configure explicitly.

use std::collections::HashMap;

/// A known network definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Human-readable network name (e.g. "ethereum", "solana").
    pub name: &'static str,
    /// Chain family namespace ("eip155" or "solana").
    pub namespace: &'static str,
    /// Chain reference: the EIP-155 chain id, or the Solana cluster name.
    pub reference: &'static str,
    /// Symbol of the native coin.
    pub native_symbol: &'static str,
    /// Decimals of the native coin.
    pub native_decimals: u32,
}

impl NetworkInfo {
    /// Numeric EIP-155 chain id, if this is an EVM network.
    #[must_use]
    pub fn eip155_chain_id(&self) -> Option<u64> {
        if self.namespace == "eip155" {
            self.reference.parse().ok()
        } else {
            None
        }
    }
}

/// A well-known token deployment on a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenInfo {
    /// Network name the token is deployed on.
    pub network: &'static str,
    /// Token symbol (upper-case).
    pub symbol: &'static str,
    /// Contract address or mint.
    pub address: &'static str,
    /// Token decimals on this network.
    pub decimals: u32,
}

/// Fallback decimals for an asset symbol when neither the configuration nor
/// the registry knows better.
#[must_use]
pub fn default_decimals(symbol: &str) -> u32 {
    match symbol.to_ascii_uppercase().as_str() {
        "BTC" => 8,
        "USDT" | "USDC" | "TRX" => 6,
        "SOL" => 9,
        _ => 18,
    }
}

/// Lookup table of networks and their well-known tokens.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: HashMap<&'static str, NetworkInfo>,
    tokens: HashMap<(&'static str, &'static str), TokenInfo>,
}

impl NetworkRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated from network and token slices.
    #[must_use]
    pub fn from_parts(networks: &[NetworkInfo], tokens: &[TokenInfo]) -> Self {
        let mut registry = Self::new();
        registry.register(networks, tokens);
        registry
    }

    /// Registers additional networks and tokens.
    pub fn register(&mut self, networks: &[NetworkInfo], tokens: &[TokenInfo]) {
        for info in networks {
            self.networks.insert(info.name, *info);
        }
        for token in tokens {
            self.tokens.insert((token.network, token.symbol), *token);
        }
    }

    /// Builder-style [`NetworkRegistry::register`].
    #[must_use]
    pub fn with(mut self, networks: &[NetworkInfo], tokens: &[TokenInfo]) -> Self {
        self.register(networks, tokens);
        self
    }

    /// Looks up a network by name (case-insensitive).
    #[must_use]
    pub fn network(&self, name: &str) -> Option<&NetworkInfo> {
        self.networks.get(name.to_ascii_lowercase().as_str())
    }

    /// Looks up a token deployment by network and symbol (case-insensitive).
    #[must_use]
    pub fn token(&self, network: &str, symbol: &str) -> Option<&TokenInfo> {
        let network = network.to_ascii_lowercase();
        let symbol = symbol.to_ascii_uppercase();
        self.tokens
            .iter()
            .find(|((n, s), _)| *n == network && *s == symbol)
            .map(|(_, info)| info)
    }

    /// Decimals for `symbol` on `network`: the native coin, a known token, or
    /// [`default_decimals`].
    #[must_use]
    pub fn decimals(&self, network: &str, symbol: &str) -> u32 {
        let native = self
            .network(network)
            .filter(|info| info.native_symbol.eq_ignore_ascii_case(symbol));
        if let Some(info) = native {
            return info.native_decimals;
        }
        self.token(network, symbol)
            .map_or_else(|| default_decimals(symbol), |t| t.decimals)
    }

    /// Number of registered networks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Returns `true` if no networks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETS: &[NetworkInfo] = &[NetworkInfo {
        name: "polygon",
        namespace: "eip155",
        reference: "137",
        native_symbol: "MATIC",
        native_decimals: 18,
    }];
    const TOKENS: &[TokenInfo] = &[TokenInfo {
        network: "polygon",
        symbol: "USDT",
        address: "0xc2132D05D31c914a87C6611C10748AEb04B58e8F",
        decimals: 6,
    }];

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = NetworkRegistry::from_parts(NETS, TOKENS);
        assert_eq!(registry.network("Polygon").unwrap().eip155_chain_id(), Some(137));
        assert_eq!(
            registry.token("POLYGON", "usdt").unwrap().address,
            "0xc2132D05D31c914a87C6611C10748AEb04B58e8F"
        );
    }

    #[test]
    fn test_decimals_resolution_order() {
        let registry = NetworkRegistry::from_parts(NETS, TOKENS);
        assert_eq!(registry.decimals("polygon", "matic"), 18);
        assert_eq!(registry.decimals("polygon", "USDT"), 6);
        assert_eq!(registry.decimals("polygon", "BTC"), 8);
        assert_eq!(registry.decimals("tron", "TRX"), 6);
    }
}
