//! ERC-20 token transfers (USDT, USDC).

use std::collections::HashSet;

use alloy_primitives::Address;
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types_eth::Filter;
use alloy_sol_types::{SolEvent, sol};
use tipstream::chain::{
    AdapterKey, BoxFuture, Capabilities, ChainAdapter, ChainError, ObservedTx, PaymentUriParams,
    TxQuery,
};

use crate::provider::classify;
use crate::scan::{self, ScanOptions, Scanner, TransferSource};
use crate::units::{parse_address, to_base_units};

sol! {
    /// ERC-20 `Transfer` event.
    #[allow(missing_docs)]
    #[derive(Debug)]
    event Transfer(address indexed from, address indexed to, uint256 value);
}

struct LogSource {
    token: Address,
}

impl TransferSource for LogSource {
    fn fetch<'a>(
        &'a self,
        provider: &'a RootProvider,
        from: u64,
        to: u64,
        watched: &'a HashSet<Address>,
    ) -> BoxFuture<'a, Result<Vec<scan::Transfer>, ChainError>> {
        Box::pin(async move {
            let recipients: Vec<_> = watched.iter().map(|a| a.into_word()).collect();
            let filter = Filter::new()
                .address(self.token)
                .event_signature(Transfer::SIGNATURE_HASH)
                .topic2(recipients)
                .from_block(from)
                .to_block(to);
            let logs = provider.get_logs(&filter).await.map_err(|e| classify(&e))?;

            let mut found = Vec::with_capacity(logs.len());
            for log in logs.into_iter().filter(|log| !log.removed) {
                let (Some(hash), Some(block)) = (log.transaction_hash, log.block_number) else {
                    continue;
                };
                let timestamp = log.block_timestamp;
                let decoded = match log.log_decode::<Transfer>() {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        tracing::warn!(tx = %hash, error = %e, "Skipping undecodable Transfer log");
                        continue;
                    }
                };
                let event = decoded.inner.data;
                if !watched.contains(&event.to) {
                    continue;
                }
                found.push(scan::Transfer {
                    hash,
                    to: event.to,
                    value: event.value,
                    block,
                    timestamp,
                });
            }
            Ok(found)
        })
    }
}

/// Watches one ERC-20 token contract for payments.
pub struct Erc20Adapter {
    key: AdapterKey,
    chain_id: u64,
    token: Address,
    decimals: u32,
    scanner: Scanner<LogSource>,
}

impl std::fmt::Debug for Erc20Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Erc20Adapter")
            .field("key", &self.key)
            .field("chain_id", &self.chain_id)
            .field("token", &self.token)
            .field("decimals", &self.decimals)
            .finish_non_exhaustive()
    }
}

impl Erc20Adapter {
    /// Creates an adapter for `token` on chain `chain_id`.
    #[must_use]
    pub fn new(
        key: AdapterKey,
        chain_id: u64,
        token: Address,
        decimals: u32,
        provider: RootProvider,
    ) -> Self {
        Self {
            key,
            chain_id,
            token,
            decimals,
            scanner: Scanner::new(provider, LogSource { token }, decimals),
        }
    }

    /// Replaces the default [`ScanOptions`].
    #[must_use]
    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.scanner.set_options(options);
        self
    }

    /// Token contract address.
    #[must_use]
    pub fn token(&self) -> Address {
        self.scanner.source().token
    }
}

impl ChainAdapter for Erc20Adapter {
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

    /// EIP-681 `transfer` call URI with the amount in token base units.
    fn payment_uri(&self, params: PaymentUriParams<'_>) -> String {
        let units = to_base_units(params.amount, self.decimals)
            .map_or_else(|| params.amount.normalize().to_string(), |u| u.to_string());
        format!(
            "ethereum:{}@{}/transfer?address={}&uint256={units}&nonce={}",
            self.token, self.chain_id, params.destination_address, params.nonce
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::connect;
    use crate::test_node::{FakeChain, SENDER, block_time, rpc_result, tx_hash};
    use alloy_primitives::{B256, U256};
    use rust_decimal::Decimal;
    use serde_json::{Value, json};
    use std::str::FromStr;
    use std::sync::Arc;
    use tipstream::chain::AmountRule;
    use tipstream::timestamp::UnixTimestamp;
    use url::Url;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    const USDC: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
    const DEST: &str = "0xab5801a7d398351b8be11c439e05c5b3259aec9b";

    fn word(address: &str) -> String {
        parse_address(address).unwrap().into_word().to_string()
    }

    /// `Transfer` log as most nodes return it, without `blockTimestamp`.
    fn transfer_log(tag: u8, to: &str, units: u64, block: u64) -> Value {
        json!({
            "address": USDC,
            "topics": [Transfer::SIGNATURE_HASH.to_string(), word(SENDER), word(to)],
            "data": B256::from(U256::from(units)).to_string(),
            "blockNumber": format!("{block:#x}"),
            "blockHash": format!("0x{}", "cd".repeat(32)),
            "transactionHash": tx_hash(tag),
            "transactionIndex": "0x0",
            "logIndex": "0x0",
            "removed": false
        })
    }

    async fn mount_logs(server: &MockServer, logs: Value) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getLogs"})))
            .respond_with(rpc_result(logs))
            .expect(1)
            .mount(server)
            .await;
    }

    fn adapter(server: &MockServer) -> Erc20Adapter {
        let provider = connect("ethereum", &[(Url::parse(&server.uri()).unwrap(), None)]).unwrap();
        Erc20Adapter::new(
            AdapterKey::new("USDC", "ethereum"),
            1,
            parse_address(USDC).unwrap(),
            6,
            provider,
        )
        .with_options(ScanOptions {
            confirmations: 2,
            lookback_blocks: 10,
            max_blocks_per_poll: 100,
        })
    }

    fn query(nonce: &str, amount: &str, since: u64) -> TxQuery {
        let amount = Decimal::from_str(amount).unwrap();
        TxQuery {
            nonce: nonce.to_owned(),
            destination_address: DEST.to_owned(),
            expected_amount: amount,
            amount_rule: AmountRule::Exact(amount),
            memo: None,
            since: UnixTimestamp::from_secs(since),
        }
    }

    #[tokio::test]
    async fn test_transfer_uri() {
        let provider = connect("base", &[(Url::parse("http://localhost:8545").unwrap(), None)]).unwrap();
        let token = parse_address("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913").unwrap();
        let adapter = Erc20Adapter::new(AdapterKey::new("USDC", "base"), 8453, token, 6, provider);
        let uri = adapter.payment_uri(PaymentUriParams {
            destination_address: DEST,
            amount: Decimal::from_str("10.00").unwrap(),
            nonce: "xyz",
        });
        assert_eq!(
            uri,
            format!("ethereum:{token}@8453/transfer?address={DEST}&uint256=10000000&nonce=xyz")
        );
        assert_eq!(adapter.token(), token);
    }

    #[tokio::test]
    async fn test_matches_token_transfer_by_exact_amount() {
        let server = MockServer::start().await;
        Arc::new(FakeChain::new(110)).mount(&server).await;
        mount_logs(
            &server,
            json!([
                transfer_log(0x01, DEST, 9_990_000, 105),
                transfer_log(0x02, DEST, 10_000_000, 109),
            ]),
        )
        .await;

        let adapter = adapter(&server);
        let out = adapter
            .find_matching_batch(&[query("n1", "10", 0), query("n2", "9.99", 0), query("n3", "1", 0)])
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
        let exact = out[0].as_ref().unwrap();
        assert_eq!(exact.transaction_hash, tx_hash(0x02));
        assert_eq!(exact.confirmations, 2);
        assert_eq!(exact.amount, Decimal::from_str("10").unwrap());
        assert_eq!(out[1].as_ref().unwrap().confirmations, 6);
        assert!(out[2].is_none());
    }

    #[tokio::test]
    async fn test_log_older_than_request_is_skipped() {
        let server = MockServer::start().await;
        Arc::new(FakeChain::new(110)).mount(&server).await;
        // the node ignores the block range and returns both logs
        mount_logs(
            &server,
            json!([
                transfer_log(0x01, DEST, 10_000_000, 105),
                transfer_log(0x02, DEST, 10_000_000, 109),
            ]),
        )
        .await;

        let out = adapter(&server)
            .find_matching_transaction(&query("n1", "10", block_time(107)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.transaction_hash, tx_hash(0x02));
    }

    #[tokio::test]
    async fn test_rate_limit_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = adapter(&server)
            .find_matching_transaction(&query("n1", "10", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_node_error_is_query_error() {
        let server = MockServer::start().await;
        Arc::new(FakeChain::new(110)).mount(&server).await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getLogs"})))
            .respond_with(|req: &Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap();
                ResponseTemplate::new(200).set_body_json(json!({
                    "jsonrpc": "2.0",
                    "id": body["id"],
                    "error": {"code": -32602, "message": "query returned more than 10000 results"}
                }))
            })
            .mount(&server)
            .await;

        let err = adapter(&server)
            .find_matching_transaction(&query("n1", "10", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Query(_)));
    }
}
