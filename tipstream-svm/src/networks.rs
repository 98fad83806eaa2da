//! Well-known Solana networks and SPL token mints.

use tipstream::networks::{NetworkInfo, TokenInfo};

/// Solana networks, identified by the first 32 characters of their genesis
/// hash.
pub const SOLANA_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        name: "solana",
        namespace: "solana",
        reference: "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp",
        native_symbol: "SOL",
        native_decimals: 9,
    },
    NetworkInfo {
        name: "solana-devnet",
        namespace: "solana",
        reference: "EtWTRABZaYq6iMfeYKouRu166VU2xqa1",
        native_symbol: "SOL",
        native_decimals: 9,
    },
];

/// Stablecoin mints on [`SOLANA_NETWORKS`].
pub const SOLANA_TOKENS: &[TokenInfo] = &[
    TokenInfo {
        network: "solana",
        symbol: "USDC",
        address: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
        decimals: 6,
    },
    TokenInfo {
        network: "solana",
        symbol: "USDT",
        address: "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB",
        decimals: 6,
    },
    TokenInfo {
        network: "solana-devnet",
        symbol: "USDC",
        address: "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU",
        decimals: 6,
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use solana_pubkey::Pubkey;
    use std::str::FromStr;

    #[test]
    fn test_mints_parse() {
        for token in SOLANA_TOKENS {
            assert!(Pubkey::from_str(token.address).is_ok(), "{}", token.address);
            assert!(SOLANA_NETWORKS.iter().any(|n| n.name == token.network));
        }
    }
}
