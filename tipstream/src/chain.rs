//! Chain adapter abstraction.
//!
//! A [`ChainAdapter`] is configured for exactly one (asset, network) pair and
//! answers one question: has a transfer matching this payment request landed
//! on-chain, and how many confirmations does it have? Adapters are read-only;
//! they never sign or submit anything.
//!
//! - [`AdapterKey`] - The (asset, network) pair an adapter serves
//! - [`Capabilities`] - Which lookups an adapter can perform
//! - [`TxQuery`] / [`ObservedTx`] - Query terms and the observation returned
//! - [`AdapterRegistry`] - Lookup table used at creation time and by the poller
//! - [`ScriptedAdapter`] - Adapter whose answers are scripted per nonce

mod scripted;

pub use scripted::*;

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::timestamp::UnixTimestamp;

/// Boxed future returned by [`ChainAdapter`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors a chain adapter can report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    /// Transient failure (node down, timeout, rate limited). Retried by the
    /// poller with backoff.
    #[error("chain unavailable: {0}")]
    Unavailable(String),
    /// The node answered with data the adapter could not interpret. Logged
    /// and counted; the request stays open.
    #[error("chain query error: {0}")]
    Query(String),
}

impl ChainError {
    /// Creates a [`ChainError::Unavailable`].
    pub fn unavailable(msg: impl fmt::Display) -> Self {
        Self::Unavailable(msg.to_string())
    }

    /// Creates a [`ChainError::Query`].
    pub fn query(msg: impl fmt::Display) -> Self {
        Self::Query(msg.to_string())
    }
}

/// The (asset, network) pair an adapter serves.
///
/// Asset symbols are upper-cased and network names lower-cased on
/// construction, so `("eth", "Ethereum")` and `("ETH", "ethereum")` are the
/// same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AdapterKey {
    asset_symbol: String,
    network: String,
}

impl AdapterKey {
    /// Creates a normalized key.
    pub fn new(asset_symbol: impl AsRef<str>, network: impl AsRef<str>) -> Self {
        Self {
            asset_symbol: asset_symbol.as_ref().trim().to_ascii_uppercase(),
            network: network.as_ref().trim().to_ascii_lowercase(),
        }
    }

    /// Upper-cased asset symbol.
    #[must_use]
    pub fn asset_symbol(&self) -> &str {
        &self.asset_symbol
    }

    /// Lower-cased network name.
    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }
}

impl fmt::Display for AdapterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.asset_symbol, self.network)
    }
}

/// Lookups a chain adapter supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    /// Can find transfers by destination address.
    pub query_by_address: bool,
    /// Can find transfers by memo / reference carrying the nonce.
    pub query_by_memo: bool,
    /// Can answer a whole partition of queries in one round trip.
    pub batch: bool,
}

impl Capabilities {
    /// How observed amounts are compared to expected ones.
    ///
    /// Memo-capable networks identify the request by its nonce and tolerate
    /// slippage. Without a memo, the amount and a per-request destination
    /// address are all there is, so the amount must match exactly.
    #[must_use]
    pub const fn match_policy(&self) -> MatchPolicy {
        if self.query_by_memo {
            MatchPolicy::Tolerant
        } else {
            MatchPolicy::ExactAmount
        }
    }
}

/// Amount matching policy for a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// `observed >= expected * (1 - slippage)`.
    Tolerant,
    /// `observed == expected`, destination address exclusive per request.
    ExactAmount,
}

/// Rule an observed amount must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountRule {
    /// Exactly this amount.
    Exact(Decimal),
    /// At least this amount.
    AtLeast(Decimal),
}

impl AmountRule {
    /// Builds the rule for `expected` under `policy`.
    ///
    /// `slippage` is a fraction (`0.005` = 0.5%) and is clamped to `[0, 1]`.
    #[must_use]
    pub fn for_policy(policy: MatchPolicy, expected: Decimal, slippage: Decimal) -> Self {
        match policy {
            MatchPolicy::ExactAmount => Self::Exact(expected),
            MatchPolicy::Tolerant => {
                let slippage = slippage.clamp(Decimal::ZERO, Decimal::ONE);
                Self::AtLeast(expected * (Decimal::ONE - slippage))
            }
        }
    }

    /// Whether `observed` satisfies the rule.
    #[must_use]
    pub fn accepts(&self, observed: Decimal) -> bool {
        match self {
            Self::Exact(expected) => observed.normalize() == expected.normalize(),
            Self::AtLeast(minimum) => observed >= *minimum,
        }
    }
}

/// Terms of one lookup, built by the poller from an open payment request.
#[derive(Debug, Clone)]
pub struct TxQuery {
    /// Nonce of the payment request the query belongs to.
    pub nonce: String,
    /// Address the donor pays to.
    pub destination_address: String,
    /// Amount the donor was asked to pay, in whole asset units.
    pub expected_amount: Decimal,
    /// What counts as a matching amount.
    pub amount_rule: AmountRule,
    /// Memo the transfer must carry, for memo-capable adapters.
    pub memo: Option<String>,
    /// Transfers older than this cannot belong to the request.
    pub since: UnixTimestamp,
}

/// A transfer the adapter believes belongs to a payment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedTx {
    /// Chain-native transaction identifier.
    pub transaction_hash: String,
    /// Amount received, in whole asset units.
    pub amount: Decimal,
    /// Confirmations at observation time (1 = included in the head block).
    pub confirmations: u64,
    /// When the adapter saw it.
    pub observed_at: UnixTimestamp,
}

/// Terms needed to render a wallet payment URI.
#[derive(Debug, Clone, Copy)]
pub struct PaymentUriParams<'a> {
    /// Destination address.
    pub destination_address: &'a str,
    /// Amount in whole asset units.
    pub amount: Decimal,
    /// Request nonce, embedded so the URI resolves back to the request.
    pub nonce: &'a str,
}

/// Read-only view of one (asset, network) pair on a blockchain.
pub trait ChainAdapter: Send + Sync {
    /// The pair this adapter serves.
    fn key(&self) -> &AdapterKey;

    /// Lookups this adapter supports.
    fn capabilities(&self) -> Capabilities;

    /// Confirmations required before a match counts as a confirmed payment.
    fn confirmation_threshold(&self) -> u64;

    /// Decimals of the asset; amounts with more fractional digits cannot be
    /// paid.
    fn decimals(&self) -> u32;

    /// Whether `address` is a well-formed destination on this network.
    fn validate_address(&self, address: &str) -> bool;

    /// Canonical form of `address`, used to compare destinations.
    fn normalize_address(&self, address: &str) -> String {
        address.trim().to_owned()
    }

    /// Renders the wallet payment URI for a request.
    fn payment_uri(&self, params: PaymentUriParams<'_>) -> String;

    /// Looks for a transfer matching `query`.
    fn find_matching_transaction<'a>(
        &'a self,
        query: &'a TxQuery,
    ) -> BoxFuture<'a, Result<Option<ObservedTx>, ChainError>>;

    /// Looks for transfers matching every query in one go.
    ///
    /// Results are index-aligned with `queries`. The default implementation
    /// issues one lookup per query and stops at the first failure; adapters
    /// that advertise [`Capabilities::batch`] override it.
    fn find_matching_batch<'a>(
        &'a self,
        queries: &'a [TxQuery],
    ) -> BoxFuture<'a, Result<Vec<Option<ObservedTx>>, ChainError>> {
        Box::pin(async move {
            let mut out = Vec::with_capacity(queries.len());
            for query in queries {
                out.push(self.find_matching_transaction(query).await?);
            }
            Ok(out)
        })
    }
}

impl fmt::Debug for dyn ChainAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainAdapter")
            .field("key", self.key())
            .field("capabilities", &self.capabilities())
            .field("confirmation_threshold", &self.confirmation_threshold())
            .field("decimals", &self.decimals())
            .finish()
    }
}

/// Registry of configured chain adapters indexed by [`AdapterKey`].
#[derive(Debug, Default, Clone)]
pub struct AdapterRegistry(HashMap<AdapterKey, Arc<dyn ChainAdapter>>);

impl AdapterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Registers an adapter under its own key, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) -> &mut Self {
        self.0.insert(adapter.key().clone(), adapter);
        self
    }

    /// Builder-style [`AdapterRegistry::register`].
    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Looks up the adapter for an asset on a network.
    #[must_use]
    pub fn get(&self, key: &AdapterKey) -> Option<&Arc<dyn ChainAdapter>> {
        self.0.get(key)
    }

    /// Iterates over the registered keys.
    pub fn keys(&self) -> impl Iterator<Item = &AdapterKey> {
        self.0.keys()
    }

    /// Number of registered adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no adapters are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
