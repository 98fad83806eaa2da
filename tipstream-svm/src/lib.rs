#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Solana chain adapter for the tipstream payment engine.
//!
//! [`SolanaAdapter`] watches native SOL or a single SPL token and matches
//! payments by the memo attached to the transaction, which makes Solana a
//! memo-capable network: several open requests may share one destination
//! address, and amounts are compared with the engine's slippage tolerance.
//!
//! Node access goes through the nonblocking `RpcClient` of `solana-client`;
//! [`rpc`] builds clients and classifies their errors.

pub mod adapter;
pub mod rpc;

mod networks;

pub use adapter::{SolanaAdapter, SolanaAsset};
pub use networks::*;
pub use solana_client::nonblocking::rpc_client::RpcClient;
