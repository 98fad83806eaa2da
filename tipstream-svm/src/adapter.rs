//! Solana adapter for native SOL and SPL tokens.
//!
//! Payments are matched by memo: the wallet URI carries the request nonce as
//! the Solana Pay `memo`, and the adapter looks for a successful transaction
//! to the destination whose memo contains it. The received amount is read
//! from the transaction's balance deltas, so any transaction shape (plain
//! transfer, wallet-routed swap) is accepted as long as the destination's
//! balance grew.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::json;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_client::rpc_request::{RpcRequest, TokenAccountsFilter};
use solana_client::rpc_response::RpcConfirmedTransactionStatusWithSignature;
use solana_commitment_config::CommitmentConfig;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_transaction_status_client_types::option_serializer::OptionSerializer;
use solana_transaction_status_client_types::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, TransactionConfirmationStatus,
    UiMessage, UiTransactionEncoding, UiTransactionTokenBalance,
};
use tipstream::chain::{
    AdapterKey, BoxFuture, Capabilities, ChainAdapter, ChainError, ObservedTx, PaymentUriParams,
    TxQuery,
};
use tipstream::timestamp::UnixTimestamp;

use crate::rpc::classify;

/// Confirmations reported for a rooted (finalized) transaction.
pub const FINALIZED_CONFIRMATIONS: u64 = 32;

/// What the adapter watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolanaAsset {
    /// Lamports.
    Native,
    /// SPL token of this mint.
    Token {
        /// Mint address.
        mint: Pubkey,
    },
}

/// Watches a Solana cluster for memo-tagged payments.
pub struct SolanaAdapter {
    key: AdapterKey,
    asset: SolanaAsset,
    decimals: u32,
    threshold: u64,
    signature_limit: usize,
    rpc: RpcClient,
}

impl std::fmt::Debug for SolanaAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaAdapter")
            .field("key", &self.key)
            .field("asset", &self.asset)
            .field("decimals", &self.decimals)
            .field("threshold", &self.threshold)
            .field("rpc", &self.rpc.url())
            .finish_non_exhaustive()
    }
}

fn pubkey(address: &str) -> Result<Pubkey, ChainError> {
    Pubkey::from_str(address.trim())
        .map_err(|e| ChainError::query(format!("invalid address {address:?}: {e}")))
}

/// Base units `owner` holds of `mint` across the listed token accounts.
fn owned_units(
    balances: &OptionSerializer<Vec<UiTransactionTokenBalance>>,
    mint: &str,
    owner: &str,
) -> u128 {
    let OptionSerializer::Some(balances) = balances else {
        return 0;
    };
    balances
        .iter()
        .filter(|b| b.mint == mint)
        .filter(|b| matches!(&b.owner, OptionSerializer::Some(o) if o == owner))
        .filter_map(|b| b.ui_token_amount.amount.parse::<u128>().ok())
        .sum()
}

impl SolanaAdapter {
    /// Adapter for native SOL.
    #[must_use]
    pub const fn native(key: AdapterKey, rpc: RpcClient) -> Self {
        Self {
            key,
            asset: SolanaAsset::Native,
            decimals: 9,
            threshold: FINALIZED_CONFIRMATIONS,
            signature_limit: 50,
            rpc,
        }
    }

    /// Adapter for the SPL token `mint` with `decimals`.
    #[must_use]
    pub const fn token(key: AdapterKey, mint: Pubkey, decimals: u32, rpc: RpcClient) -> Self {
        Self {
            key,
            asset: SolanaAsset::Token { mint },
            decimals,
            threshold: FINALIZED_CONFIRMATIONS,
            signature_limit: 50,
            rpc,
        }
    }

    /// Confirmations required before a payment counts.
    #[must_use]
    pub const fn with_confirmations(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    /// How many recent signatures per address are inspected.
    #[must_use]
    pub const fn with_signature_limit(mut self, limit: usize) -> Self {
        self.signature_limit = limit;
        self
    }

    /// The watched asset.
    #[must_use]
    pub const fn asset(&self) -> &SolanaAsset {
        &self.asset
    }

    /// Addresses whose signature history may contain a payment to
    /// `destination`.
    async fn watched_accounts(&self, destination: Pubkey) -> Result<Vec<Pubkey>, ChainError> {
        let mut accounts = Vec::new();
        if let SolanaAsset::Token { mint } = &self.asset {
            let keyed = self
                .rpc
                .get_token_accounts_by_owner(&destination, TokenAccountsFilter::Mint(*mint))
                .await
                .map_err(|e| classify(&e))?;
            for account in keyed {
                accounts.push(pubkey(&account.pubkey)?);
            }
        }
        accounts.push(destination);
        Ok(accounts)
    }

    async fn signatures(
        &self,
        address: &Pubkey,
    ) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>, ChainError> {
        let config = GetConfirmedSignaturesForAddress2Config {
            limit: Some(self.signature_limit),
            commitment: Some(CommitmentConfig::confirmed()),
            ..GetConfirmedSignaturesForAddress2Config::default()
        };
        self.rpc
            .get_signatures_for_address_with_config(address, config)
            .await
            .map_err(|e| classify(&e))
    }

    /// Transaction by signature, `None` while the node does not serve it.
    async fn transaction(
        &self,
        signature: &Signature,
    ) -> Result<Option<EncodedConfirmedTransactionWithStatusMeta>, ChainError> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
            ..RpcTransactionConfig::default()
        };
        self.rpc
            .send(RpcRequest::GetTransaction, json!([signature.to_string(), config]))
            .await
            .map_err(|e| classify(&e))
    }

    /// Base units the destination gained in `tx`.
    fn received(
        &self,
        tx: &EncodedConfirmedTransactionWithStatusMeta,
        destination: &str,
    ) -> Option<u128> {
        let meta = tx.transaction.meta.as_ref().filter(|m| m.err.is_none())?;
        match &self.asset {
            SolanaAsset::Native => {
                let EncodedTransaction::Json(ui) = &tx.transaction.transaction else {
                    return None;
                };
                let index = match &ui.message {
                    UiMessage::Parsed(message) => message
                        .account_keys
                        .iter()
                        .position(|k| k.pubkey == destination),
                    UiMessage::Raw(message) => {
                        message.account_keys.iter().position(|k| k == destination)
                    }
                }?;
                let pre = *meta.pre_balances.get(index)?;
                let post = *meta.post_balances.get(index)?;
                post.checked_sub(pre).filter(|d| *d > 0).map(u128::from)
            }
            SolanaAsset::Token { mint } => {
                let mint = mint.to_string();
                let pre = owned_units(&meta.pre_token_balances, &mint, destination);
                let post = owned_units(&meta.post_token_balances, &mint, destination);
                post.checked_sub(pre).filter(|d| *d > 0)
            }
        }
    }

    fn to_amount(&self, units: u128) -> Option<Decimal> {
        let units = i128::try_from(units).ok()?;
        Decimal::try_from_i128_with_scale(units, self.decimals)
            .ok()
            .map(|d| d.normalize())
    }

    async fn confirmations(&self, signature: &Signature) -> Result<u64, ChainError> {
        let statuses = self
            .rpc
            .get_signature_statuses_with_history(std::slice::from_ref(signature))
            .await
            .map_err(|e| classify(&e))?;
        let Some(status) = statuses.value.into_iter().next().flatten() else {
            return Ok(0);
        };
        if status.err.is_some() {
            return Ok(0);
        }
        Ok(match (status.confirmations, &status.confirmation_status) {
            (_, Some(TransactionConfirmationStatus::Finalized)) | (None, _) => {
                FINALIZED_CONFIRMATIONS
            }
            (Some(n), _) => u64::try_from(n)
                .unwrap_or(u64::MAX)
                .min(FINALIZED_CONFIRMATIONS - 1),
        })
    }

    fn is_candidate(
        signature: &RpcConfirmedTransactionStatusWithSignature,
        memo: &str,
        since: UnixTimestamp,
    ) -> bool {
        signature.err.is_none()
            && signature.memo.as_deref().is_some_and(|m| m.contains(memo))
            && signature
                .block_time
                .is_none_or(|t| u64::try_from(t).is_ok_and(|t| t >= since.as_secs()))
    }

    async fn find(&self, query: &TxQuery) -> Result<Option<ObservedTx>, ChainError> {
        let memo = query.memo.as_deref().unwrap_or(&query.nonce);
        let destination = query.destination_address.trim();

        let mut candidates: Vec<RpcConfirmedTransactionStatusWithSignature> = Vec::new();
        for account in self.watched_accounts(pubkey(destination)?).await? {
            for signature in self.signatures(&account).await? {
                if Self::is_candidate(&signature, memo, query.since)
                    && !candidates.iter().any(|c| c.signature == signature.signature)
                {
                    candidates.push(signature);
                }
            }
        }
        // oldest first, so the first qualifying payment wins
        candidates.sort_by_key(|s| s.slot);

        for candidate in candidates {
            let signature = Signature::from_str(&candidate.signature)
                .map_err(|e| ChainError::query(format!("bad signature {}: {e}", candidate.signature)))?;
            let Some(tx) = self.transaction(&signature).await? else {
                continue;
            };
            let Some(amount) = self
                .received(&tx, destination)
                .and_then(|units| self.to_amount(units))
            else {
                continue;
            };
            if !query.amount_rule.accepts(amount) {
                tracing::debug!(
                    adapter = %self.key,
                    nonce = %query.nonce,
                    signature = %candidate.signature,
                    %amount,
                    "Memo matched but amount rejected"
                );
                continue;
            }
            let confirmations = self.confirmations(&signature).await?;
            return Ok(Some(ObservedTx {
                transaction_hash: candidate.signature,
                amount,
                confirmations,
                observed_at: UnixTimestamp::now(),
            }));
        }
        Ok(None)
    }
}

impl ChainAdapter for SolanaAdapter {
    fn key(&self) -> &AdapterKey {
        &self.key
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            query_by_address: true,
            query_by_memo: true,
            batch: false,
        }
    }

    fn confirmation_threshold(&self) -> u64 {
        self.threshold
    }

    fn decimals(&self) -> u32 {
        self.decimals
    }

    fn validate_address(&self, address: &str) -> bool {
        Pubkey::from_str(address.trim()).is_ok()
    }

    /// Solana Pay transfer request.
    fn payment_uri(&self, params: PaymentUriParams<'_>) -> String {
        let amount = params.amount.normalize();
        match &self.asset {
            SolanaAsset::Native => format!(
                "solana:{}?amount={amount}&memo={}",
                params.destination_address, params.nonce
            ),
            SolanaAsset::Token { mint } => format!(
                "solana:{}?amount={amount}&spl-token={mint}&memo={}",
                params.destination_address, params.nonce
            ),
        }
    }

    fn find_matching_transaction<'a>(
        &'a self,
        query: &'a TxQuery,
    ) -> BoxFuture<'a, Result<Option<ObservedTx>, ChainError>> {
        Box::pin(self.find(query))
    }
}
