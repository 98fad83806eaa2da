#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EIP-155 (EVM) chain adapters for the tipstream payment engine.
//!
//! Two adapters watch EVM chains for donations:
//!
//! - [`EvmNativeAdapter`] scans full blocks for plain value transfers of the
//!   chain's native coin (ETH, BNB, MATIC).
//! - [`Erc20Adapter`] filters `Transfer` event logs of a single token
//!   contract (USDT, USDC).
//!
//! EVM transfers carry no memo, so both adapters advertise address-only
//! capabilities and the engine matches requests by exact amount on an
//! address that only one open request may use at a time.
//!
//! Both adapters keep a block cursor per watched address. An address is
//! first scanned from the block its request was created in (at most
//! [`ScanOptions::lookback_blocks`] behind the head), later polls continue
//! from where the previous one stopped (bounded by
//! [`ScanOptions::max_blocks_per_poll`]). Transfers that landed on watched
//! addresses are remembered, so that confirmations keep growing on later
//! polls without rescanning history.
//!
//! # Modules
//!
//! - [`erc20`] - Token transfer adapter
//! - [`native`] - Native coin adapter
//! - [`provider`] - RPC client construction and error classification
//! - [`units`] - Decimal and base-unit conversion, address parsing

pub mod erc20;
pub mod native;
pub mod provider;
pub mod units;

mod networks;
mod scan;
#[cfg(test)]
mod test_node;

pub use erc20::Erc20Adapter;
pub use native::EvmNativeAdapter;
pub use networks::*;
pub use scan::ScanOptions;
