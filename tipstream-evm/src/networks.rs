//! Known EVM networks and token deployments.

use tipstream::networks::{NetworkInfo, TokenInfo};

/// Ethereum Mainnet chain ID.
pub const ETHEREUM_MAINNET: u64 = 1;

/// BNB Smart Chain chain ID.
pub const BSC_MAINNET: u64 = 56;

/// Polygon Mainnet chain ID.
pub const POLYGON_MAINNET: u64 = 137;

/// Base Mainnet chain ID.
pub const BASE_MAINNET: u64 = 8453;

/// Well-known EVM networks.
pub const EVM_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        name: "ethereum",
        namespace: "eip155",
        reference: "1",
        native_symbol: "ETH",
        native_decimals: 18,
    },
    NetworkInfo {
        name: "bsc",
        namespace: "eip155",
        reference: "56",
        native_symbol: "BNB",
        native_decimals: 18,
    },
    NetworkInfo {
        name: "polygon",
        namespace: "eip155",
        reference: "137",
        native_symbol: "MATIC",
        native_decimals: 18,
    },
    NetworkInfo {
        name: "base",
        namespace: "eip155",
        reference: "8453",
        native_symbol: "ETH",
        native_decimals: 18,
    },
];

/// Stablecoin deployments on [`EVM_NETWORKS`].
///
/// BSC's pegged tokens use 18 decimals, unlike their 6-decimal originals.
pub const EVM_TOKENS: &[TokenInfo] = &[
    TokenInfo {
        network: "ethereum",
        symbol: "USDT",
        address: "0xdAC17F958D2ee523a2206206994597C13D831ec7",
        decimals: 6,
    },
    TokenInfo {
        network: "ethereum",
        symbol: "USDC",
        address: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
        decimals: 6,
    },
    TokenInfo {
        network: "bsc",
        symbol: "USDT",
        address: "0x55d398326f99059fF775485246999027B3197955",
        decimals: 18,
    },
    TokenInfo {
        network: "bsc",
        symbol: "USDC",
        address: "0x8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d",
        decimals: 18,
    },
    TokenInfo {
        network: "polygon",
        symbol: "USDT",
        address: "0xc2132D05D31c914a87C6611C10748AEb04B58e8F",
        decimals: 6,
    },
    TokenInfo {
        network: "polygon",
        symbol: "USDC",
        address: "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359",
        decimals: 6,
    },
    TokenInfo {
        network: "base",
        symbol: "USDC",
        address: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
        decimals: 6,
    },
];
