//! Native coin transfers (ETH, BNB, MATIC).
//!
//! The adapter fetches full blocks and keeps top-level transactions whose
//! recipient is a watched address. Value moved by internal calls of a
//! contract is not visible this way.

use std::collections::HashSet;

use alloy_consensus::Transaction as ConsensusTransaction;
use alloy_network::TransactionResponse;
use alloy_primitives::Address;
use alloy_provider::{Provider, RootProvider};
use tipstream::chain::{
    AdapterKey, BoxFuture, Capabilities, ChainAdapter, ChainError, ObservedTx, PaymentUriParams,
    TxQuery,
};

use crate::provider::classify;
use crate::scan::{ScanOptions, Scanner, Transfer, TransferSource};
use crate::units::{parse_address, to_base_units};

struct BlockSource;

impl TransferSource for BlockSource {
    fn fetch<'a>(
        &'a self,
        provider: &'a RootProvider,
        from: u64,
        to: u64,
        watched: &'a HashSet<Address>,
    ) -> BoxFuture<'a, Result<Vec<Transfer>, ChainError>> {
        Box::pin(async move {
            let mut found = Vec::new();
            for number in from..=to {
                let block = provider
                    .get_block_by_number(number.into())
                    .full()
                    .await
                    .map_err(|e| classify(&e))?
                    .ok_or_else(|| {
                        ChainError::unavailable(format!("block {number} not yet served"))
                    })?;
                let timestamp = block.header.timestamp;
                for tx in block.transactions.txns() {
                    let recipient = ConsensusTransaction::to(tx);
                    let Some(recipient) = recipient.filter(|to| watched.contains(to)) else {
                        continue;
                    };
                    found.push(Transfer {
                        hash: TransactionResponse::tx_hash(tx),
                        to: recipient,
                        value: ConsensusTransaction::value(tx),
                        block: number,
                        timestamp: Some(timestamp),
                    });
                }
            }
            Ok(found)
        })
    }
}

/// Watches an EVM chain for native coin payments.
pub struct EvmNativeAdapter {
    key: AdapterKey,
    chain_id: u64,
    decimals: u32,
    scanner: Scanner<BlockSource>,
}

impl std::fmt::Debug for EvmNativeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmNativeAdapter")
            .field("key", &self.key)
            .field("chain_id", &self.chain_id)
            .field("options", self.scanner.options())
            .finish_non_exhaustive()
    }
}

impl EvmNativeAdapter {
    /// Creates an adapter for the native coin of chain `chain_id`.
    #[must_use]
    pub fn new(key: AdapterKey, chain_id: u64, decimals: u32, provider: RootProvider) -> Self {
        Self {
            key,
            chain_id,
            decimals,
            scanner: Scanner::new(provider, BlockSource, decimals),
        }
    }

    /// Replaces the default [`ScanOptions`].
    #[must_use]
    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.scanner.set_options(options);
        self
    }
}

impl ChainAdapter for EvmNativeAdapter {
    fn key(&self) -> &AdapterKey {
        &self.key
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            query_by_address: true,
            query_by_memo: false,
            batch: true,
        }
    }

    fn confirmation_threshold(&self) -> u64 {
        self.scanner.options().confirmations
    }

    fn decimals(&self) -> u32 {
        self.decimals
    }

    fn validate_address(&self, address: &str) -> bool {
        parse_address(address).is_some()
    }

    fn normalize_address(&self, address: &str) -> String {
        address.trim().to_ascii_lowercase()
    }

    /// EIP-681 URI with the value in wei.
    fn payment_uri(&self, params: PaymentUriParams<'_>) -> String {
        let value = to_base_units(params.amount, self.decimals)
            .map_or_else(|| params.amount.normalize().to_string(), |wei| wei.to_string());
        format!(
            "ethereum:{}@{}?value={value}&nonce={}",
            params.destination_address, self.chain_id, params.nonce
        )
    }

    fn find_matching_transaction<'a>(
        &'a self,
        query: &'a TxQuery,
    ) -> BoxFuture<'a, Result<Option<ObservedTx>, ChainError>> {
        Box::pin(async move {
            let label = self.key.to_string();
            let mut out = self.scanner.scan(&label, std::slice::from_ref(query)).await?;
            Ok(out.pop().flatten())
        })
    }

    fn find_matching_batch<'a>(
        &'a self,
        queries: &'a [TxQuery],
    ) -> BoxFuture<'a, Result<Vec<Option<ObservedTx>>, ChainError>> {
        Box::pin(async move {
            let label = self.key.to_string();
            self.scanner.scan(&label, queries).await
        })
    }
}
