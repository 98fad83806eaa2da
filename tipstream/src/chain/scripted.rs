//! Adapter whose answers are scripted per nonce.
//!
//! Backs the engine tests and the `mock` chain kind used for local
//! development, where no node is available. With
//! [`ScriptedAdapter::simulate_after`] set, any query older than the given
//! number of seconds is answered with a synthetic, fully confirmed transfer.

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::{
    AdapterKey, BoxFuture, Capabilities, ChainAdapter, ChainError, ObservedTx, PaymentUriParams,
    TxQuery,
};
use crate::timestamp::{Clock, SystemClock};

/// Scripted answer for one nonce.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// A transfer with this hash, amount and confirmation count.
    Tx {
        /// Transaction hash to report.
        transaction_hash: String,
        /// Amount received.
        amount: Decimal,
        /// Confirmations to report.
        confirmations: u64,
    },
    /// Fail with [`ChainError::Unavailable`].
    Unavailable(String),
    /// Fail with [`ChainError::Query`].
    QueryError(String),
}

/// Chain adapter driven by scripts instead of a node.
pub struct ScriptedAdapter {
    key: AdapterKey,
    capabilities: Capabilities,
    threshold: u64,
    decimals: u32,
    scripts: DashMap<String, Scripted>,
    outage: RwLock<Option<ChainError>>,
    simulate_after: Option<u64>,
    clock: Arc<dyn Clock>,
    calls: AtomicU64,
}

impl std::fmt::Debug for ScriptedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedAdapter")
            .field("key", &self.key)
            .field("threshold", &self.threshold)
            .field("scripts", &self.scripts.len())
            .finish_non_exhaustive()
    }
}

impl ScriptedAdapter {
    /// Creates an address-only adapter for `key` requiring `threshold`
    /// confirmations.
    #[must_use]
    pub fn new(key: AdapterKey, threshold: u64) -> Self {
        Self {
            key,
            capabilities: Capabilities {
                query_by_address: true,
                query_by_memo: false,
                batch: false,
            },
            threshold,
            decimals: 18,
            scripts: DashMap::new(),
            outage: RwLock::new(None),
            simulate_after: None,
            clock: Arc::new(SystemClock),
            calls: AtomicU64::new(0),
        }
    }

    /// Overrides the advertised capabilities.
    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Overrides the asset decimals (default 18).
    #[must_use]
    pub const fn with_decimals(mut self, decimals: u32) -> Self {
        self.decimals = decimals;
        self
    }

    /// Confirms every query whose request is at least `secs` old.
    #[must_use]
    pub const fn simulate_after(mut self, secs: u64) -> Self {
        self.simulate_after = Some(secs);
        self
    }

    /// Reads time from `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the answer for `nonce`, replacing any previous one.
    pub fn script(&self, nonce: impl Into<String>, answer: Scripted) {
        self.scripts.insert(nonce.into(), answer);
    }

    /// Shorthand for scripting a transfer.
    pub fn script_tx(
        &self,
        nonce: impl Into<String>,
        transaction_hash: impl Into<String>,
        amount: Decimal,
        confirmations: u64,
    ) {
        self.script(
            nonce,
            Scripted::Tx {
                transaction_hash: transaction_hash.into(),
                amount,
                confirmations,
            },
        );
    }

    /// Makes every call fail with `error` until cleared with `None`.
    pub fn set_outage(&self, error: Option<ChainError>) {
        *self.outage.write().unwrap_or_else(PoisonError::into_inner) = error;
    }

    /// Number of round trips served so far.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check_outage(&self) -> Result<(), ChainError> {
        let outage = self.outage.read().unwrap_or_else(PoisonError::into_inner);
        outage.clone().map_or(Ok(()), Err)
    }

    fn answer(&self, query: &TxQuery) -> Result<Option<ObservedTx>, ChainError> {
        let now = self.clock.now();
        let scripted = self.scripts.get(&query.nonce).map(|s| s.value().clone());
        match scripted {
            Some(Scripted::Tx {
                transaction_hash,
                amount,
                confirmations,
            }) => Ok(query.amount_rule.accepts(amount).then_some(ObservedTx {
                transaction_hash,
                amount,
                confirmations,
                observed_at: now,
            })),
            Some(Scripted::Unavailable(msg)) => Err(ChainError::Unavailable(msg)),
            Some(Scripted::QueryError(msg)) => Err(ChainError::Query(msg)),
            None => Ok(self
                .simulate_after
                .filter(|after| query.since.secs_until(now) >= *after)
                .map(|_| ObservedTx {
                    transaction_hash: format!("0xsim{}", query.nonce),
                    amount: query.expected_amount,
                    confirmations: self.threshold,
                    observed_at: now,
                })),
        }
    }
}

impl ChainAdapter for ScriptedAdapter {
    fn key(&self) -> &AdapterKey {
        &self.key
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn confirmation_threshold(&self) -> u64 {
        self.threshold
    }

    fn decimals(&self) -> u32 {
        self.decimals
    }

    fn validate_address(&self, address: &str) -> bool {
        !address.is_empty() && !address.chars().any(char::is_whitespace)
    }

    fn payment_uri(&self, params: PaymentUriParams<'_>) -> String {
        format!(
            "pay://{}?amount={}&currency={}&nonce={}",
            params.destination_address,
            params.amount.normalize(),
            self.key.asset_symbol(),
            params.nonce
        )
    }

    fn find_matching_transaction<'a>(
        &'a self,
        query: &'a TxQuery,
    ) -> BoxFuture<'a, Result<Option<ObservedTx>, ChainError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.check_outage()?;
            self.answer(query)
        })
    }

    fn find_matching_batch<'a>(
        &'a self,
        queries: &'a [TxQuery],
    ) -> BoxFuture<'a, Result<Vec<Option<ObservedTx>>, ChainError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.check_outage()?;
            queries.iter().map(|q| self.answer(q)).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::AmountRule;
    use crate::timestamp::{ManualClock, UnixTimestamp};

    fn query(nonce: &str, amount: Decimal, since: u64) -> TxQuery {
        TxQuery {
            nonce: nonce.to_owned(),
            destination_address: "0xabc".to_owned(),
            expected_amount: amount,
            amount_rule: AmountRule::Exact(amount),
            memo: None,
            since: UnixTimestamp::from_secs(since),
        }
    }

    #[tokio::test]
    async fn test_scripted_tx_respects_amount_rule() {
        let adapter = ScriptedAdapter::new(AdapterKey::new("ETH", "ethereum"), 3);
        adapter.script_tx("n1", "0x01", Decimal::new(5, 1), 3);
        let hit = adapter
            .find_matching_transaction(&query("n1", Decimal::new(5, 1), 0))
            .await
            .unwrap();
        assert_eq!(hit.unwrap().transaction_hash, "0x01");
        let miss = adapter
            .find_matching_transaction(&query("n1", Decimal::ONE, 0))
            .await
            .unwrap();
        assert!(miss.is_none());
        assert_eq!(adapter.calls(), 2);
    }

    #[tokio::test]
    async fn test_outage_fails_every_call() {
        let adapter = ScriptedAdapter::new(AdapterKey::new("ETH", "ethereum"), 1);
        adapter.set_outage(Some(ChainError::unavailable("node down")));
        let err = adapter
            .find_matching_batch(&[query("a", Decimal::ONE, 0), query("b", Decimal::ONE, 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Unavailable(_)));
        adapter.set_outage(None);
        let ok = adapter
            .find_matching_batch(&[query("a", Decimal::ONE, 0)])
            .await
            .unwrap();
        assert_eq!(ok, vec![None]);
    }

    #[tokio::test]
    async fn test_simulation_confirms_old_requests() {
        let clock = ManualClock::new(UnixTimestamp::from_secs(1_000));
        let adapter = ScriptedAdapter::new(AdapterKey::new("USDT", "tron"), 2)
            .simulate_after(60)
            .with_clock(Arc::new(clock.clone()));
        let q = query("n", Decimal::TEN, 1_000);
        assert!(adapter.find_matching_transaction(&q).await.unwrap().is_none());
        clock.advance(60);
        let tx = adapter.find_matching_transaction(&q).await.unwrap().unwrap();
        assert_eq!(tx.confirmations, 2);
        assert_eq!(tx.amount, Decimal::TEN);
    }

    #[test]
    fn test_fallback_payment_uri() {
        let adapter = ScriptedAdapter::new(AdapterKey::new("trx", "tron"), 1);
        let uri = adapter.payment_uri(PaymentUriParams {
            destination_address: "TXyz",
            amount: Decimal::new(1500, 3),
            nonce: "abc",
        });
        assert_eq!(uri, "pay://TXyz?amount=1.5&currency=TRX&nonce=abc");
    }
}
