//! Block cursor and transfer bookkeeping shared by the EVM adapters.

use std::collections::{HashMap, HashSet};

use alloy_primitives::{Address, B256, U256};
use alloy_provider::{Provider, RootProvider};
use tipstream::chain::{BoxFuture, ChainError, ObservedTx, TxQuery};
use tipstream::timestamp::UnixTimestamp;
use tokio::sync::Mutex;

use crate::provider::classify;
use crate::units::{from_base_units, parse_address};

/// How far and how fast an adapter walks the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Confirmations a transfer needs before the engine confirms it.
    pub confirmations: u64,
    /// How far behind the head a scan may reach. An address starts at the
    /// first block mined after its request was created, but never further
    /// back than this.
    pub lookback_blocks: u64,
    /// Upper bound on blocks scanned in one poll.
    pub max_blocks_per_poll: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            confirmations: 12,
            lookback_blocks: 512,
            max_blocks_per_poll: 100,
        }
    }
}

/// A transfer into a watched address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Transfer {
    pub hash: B256,
    pub to: Address,
    pub value: U256,
    pub block: u64,
    pub timestamp: Option<u64>,
}

/// Produces the transfers in a block range that land on watched addresses.
pub(crate) trait TransferSource: Send + Sync {
    fn fetch<'a>(
        &'a self,
        provider: &'a RootProvider,
        from: u64,
        to: u64,
        watched: &'a HashSet<Address>,
    ) -> BoxFuture<'a, Result<Vec<Transfer>, ChainError>>;
}

/// Scan position of one watched address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    /// Creation time of the earliest request polling the address.
    since: UnixTimestamp,
    /// Next block to scan for it.
    next: u64,
}

#[derive(Debug, Default)]
struct ScanState {
    cursors: HashMap<Address, Cursor>,
    /// Block number to block timestamp, for blocks inside the lookback window.
    block_times: HashMap<u64, u64>,
    seen: HashMap<Address, Vec<Transfer>>,
    /// Transfer hash to the nonce it was matched to.
    claimed: HashMap<B256, String>,
}

impl ScanState {
    fn record(&mut self, transfers: Vec<Transfer>) {
        for transfer in transfers {
            let list = self.seen.entry(transfer.to).or_default();
            if !list.iter().any(|t| t.hash == transfer.hash) {
                list.push(transfer);
            }
        }
    }

    /// Matches every query against remembered transfers.
    ///
    /// A transfer is matched to at most one nonce. Claims held by nonces no
    /// longer being polled are dropped together with their transfer.
    fn settle(
        &mut self,
        queries: &[TxQuery],
        watched: &HashSet<Address>,
        head: u64,
        decimals: u32,
        now: UnixTimestamp,
    ) -> Vec<Option<ObservedTx>> {
        let polled: HashSet<&str> = queries.iter().map(|q| q.nonce.as_str()).collect();
        let released: HashSet<B256> = self
            .claimed
            .iter()
            .filter(|(_, nonce)| !polled.contains(nonce.as_str()))
            .map(|(hash, _)| *hash)
            .collect();
        self.claimed.retain(|hash, _| !released.contains(hash));
        for list in self.seen.values_mut() {
            list.retain(|t| !released.contains(&t.hash));
        }
        self.seen
            .retain(|address, list| watched.contains(address) && !list.is_empty());

        queries
            .iter()
            .map(|query| {
                let destination = parse_address(&query.destination_address)?;
                let transfers = self.seen.get(&destination)?;
                let own = transfers
                    .iter()
                    .find(|t| self.claimed.get(&t.hash).is_some_and(|n| *n == query.nonce));
                let transfer = own
                    .or_else(|| {
                        transfers.iter().find(|t| {
                            !self.claimed.contains_key(&t.hash)
                                && t.timestamp.is_some_and(|ts| ts >= query.since.as_secs())
                                && from_base_units(t.value, decimals)
                                    .is_some_and(|amount| query.amount_rule.accepts(amount))
                        })
                    })?
                    .clone();
                let amount = from_base_units(transfer.value, decimals)?;
                self.claimed.insert(transfer.hash, query.nonce.clone());
                Some(ObservedTx {
                    transaction_hash: transfer.hash.to_string(),
                    amount,
                    confirmations: head.saturating_sub(transfer.block) + 1,
                    observed_at: now,
                })
            })
            .collect()
    }
}

/// Cursor-driven scanner over a [`TransferSource`].
pub(crate) struct Scanner<S> {
    provider: RootProvider,
    source: S,
    options: ScanOptions,
    decimals: u32,
    state: Mutex<ScanState>,
}

impl<S: TransferSource> Scanner<S> {
    pub(crate) fn new(provider: RootProvider, source: S, decimals: u32) -> Self {
        Self {
            provider,
            source,
            options: ScanOptions::default(),
            decimals,
            state: Mutex::new(ScanState::default()),
        }
    }

    pub(crate) const fn set_options(&mut self, options: ScanOptions) {
        self.options = options;
    }

    pub(crate) const fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub(crate) const fn source(&self) -> &S {
        &self.source
    }

    /// Timestamp of block `number`, fetched once per block.
    async fn block_time(
        &self,
        times: &mut HashMap<u64, u64>,
        number: u64,
    ) -> Result<u64, ChainError> {
        if let Some(timestamp) = times.get(&number) {
            return Ok(*timestamp);
        }
        let block = self
            .provider
            .get_block_by_number(number.into())
            .await
            .map_err(|e| classify(&e))?
            .ok_or_else(|| ChainError::unavailable(format!("block {number} not yet served")))?;
        times.insert(number, block.header.timestamp);
        Ok(block.header.timestamp)
    }

    /// First block in `low..=high` mined at or after `since`, or `high + 1`
    /// if the whole range is older.
    async fn first_block_since(
        &self,
        times: &mut HashMap<u64, u64>,
        since: UnixTimestamp,
        low: u64,
        high: u64,
    ) -> Result<u64, ChainError> {
        let since = since.as_secs();
        if self.block_time(times, high).await? < since {
            return Ok(high + 1);
        }
        let (mut low, mut high) = (low, high);
        while low < high {
            let mid = low + (high - low) / 2;
            if self.block_time(times, mid).await? >= since {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        Ok(low)
    }

    /// Scans new blocks and matches all queries, one result per query.
    ///
    /// Every watched address keeps its own cursor. An address seen for the
    /// first time starts at the block where its request was created, so a
    /// payment sent before polling began is still found.
    pub(crate) async fn scan(
        &self,
        label: &str,
        queries: &[TxQuery],
    ) -> Result<Vec<Option<ObservedTx>>, ChainError> {
        let mut watched: HashMap<Address, UnixTimestamp> = HashMap::new();
        for query in queries {
            if let Some(address) = parse_address(&query.destination_address) {
                watched
                    .entry(address)
                    .and_modify(|since| *since = (*since).min(query.since))
                    .or_insert(query.since);
            }
        }
        if watched.is_empty() {
            return Ok(vec![None; queries.len()]);
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let head = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| classify(&e))?;
        let window_start = head.saturating_sub(self.options.lookback_blocks.max(1) - 1);

        // a cursor belongs to the requests that created it
        state
            .cursors
            .retain(|address, cursor| watched.get(address) == Some(&cursor.since));
        for (address, since) in &watched {
            if state.cursors.contains_key(address) {
                continue;
            }
            let next = self
                .first_block_since(&mut state.block_times, *since, window_start, head)
                .await?;
            tracing::debug!(adapter = label, %address, next, head, "Watching address");
            state.cursors.insert(*address, Cursor { since: *since, next });
        }
        for (address, cursor) in &mut state.cursors {
            if cursor.next < window_start {
                tracing::warn!(
                    adapter = label,
                    %address,
                    skipped = window_start - cursor.next,
                    "Scan cursor fell behind the lookback window"
                );
                cursor.next = window_start;
            }
        }

        let from = state
            .cursors
            .values()
            .map(|c| c.next)
            .min()
            .unwrap_or(head + 1);
        if from <= head {
            let to = head.min(from.saturating_add(self.options.max_blocks_per_poll.max(1) - 1));
            let due: HashSet<Address> = state
                .cursors
                .iter()
                .filter(|(_, c)| c.next <= to)
                .map(|(address, _)| *address)
                .collect();
            let mut transfers = self.source.fetch(&self.provider, from, to, &due).await?;
            transfers.retain(|t| state.cursors.get(&t.to).is_some_and(|c| t.block >= c.next));
            for transfer in &mut transfers {
                match transfer.timestamp {
                    Some(timestamp) => {
                        state.block_times.insert(transfer.block, timestamp);
                    }
                    None => {
                        let timestamp = self.block_time(&mut state.block_times, transfer.block).await?;
                        transfer.timestamp = Some(timestamp);
                    }
                }
            }
            tracing::debug!(
                adapter = label,
                from,
                to,
                head,
                addresses = due.len(),
                found = transfers.len(),
                "Scanned blocks"
            );
            state.record(transfers);
            for cursor in state.cursors.values_mut() {
                if cursor.next <= to {
                    cursor.next = to + 1;
                }
            }
        }
        state.block_times.retain(|number, _| *number >= window_start);

        let addresses: HashSet<Address> = watched.into_keys().collect();
        Ok(state.settle(queries, &addresses, head, self.decimals, UnixTimestamp::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use tipstream::chain::AmountRule;

    const DEST: &str = "0xab5801a7d398351b8be11c439e05c5b3259aec9b";

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

    fn transfer(byte: u8, wei: u128, block: u64, timestamp: u64) -> Transfer {
        Transfer {
            hash: B256::repeat_byte(byte),
            to: parse_address(DEST).unwrap(),
            value: U256::from(wei),
            block,
            timestamp: Some(timestamp),
        }
    }

    fn watched() -> HashSet<Address> {
        HashSet::from([parse_address(DEST).unwrap()])
    }

    const HALF_ETH: u128 = 500_000_000_000_000_000;

    #[test]
    fn test_match_counts_confirmations_from_head() {
        let mut state = ScanState::default();
        state.record(vec![transfer(1, HALF_ETH, 100, 1_000)]);
        let out = state.settle(&[query("n1", "0.5", 900)], &watched(), 102, 18, UnixTimestamp::from_secs(1));
        let tx = out[0].as_ref().unwrap();
        assert_eq!(tx.confirmations, 3);
        assert_eq!(tx.transaction_hash, B256::repeat_byte(1).to_string());
    }

    #[test]
    fn test_amount_and_time_filters() {
        let mut state = ScanState::default();
        state.record(vec![
            transfer(1, HALF_ETH - 1, 100, 1_000),
            transfer(2, HALF_ETH, 100, 800),
        ]);
        let out = state.settle(&[query("n1", "0.5", 900)], &watched(), 100, 18, UnixTimestamp::from_secs(1));
        assert!(out[0].is_none());
    }

    #[test]
    fn test_undated_transfer_is_never_matched() {
        let mut state = ScanState::default();
        let mut undated = transfer(1, HALF_ETH, 100, 1_000);
        undated.timestamp = None;
        state.record(vec![undated]);
        let out = state.settle(&[query("n1", "0.5", 900)], &watched(), 100, 18, UnixTimestamp::from_secs(1));
        assert!(out[0].is_none());
    }

    #[test]
    fn test_transfer_is_claimed_once() {
        let mut state = ScanState::default();
        state.record(vec![transfer(1, HALF_ETH, 100, 1_000)]);
        let queries = [query("n1", "0.5", 900), query("n2", "0.5", 900)];
        let out = state.settle(&queries, &watched(), 100, 18, UnixTimestamp::from_secs(1));
        assert!(out[0].is_some());
        assert!(out[1].is_none());

        // n1 keeps its transfer on the next poll, with more confirmations
        let out = state.settle(&queries, &watched(), 105, 18, UnixTimestamp::from_secs(2));
        assert_eq!(out[0].as_ref().unwrap().confirmations, 6);
        assert!(out[1].is_none());
    }

    #[test]
    fn test_released_claims_are_forgotten() {
        let mut state = ScanState::default();
        state.record(vec![transfer(1, HALF_ETH, 100, 1_000)]);
        state.settle(&[query("n1", "0.5", 900)], &watched(), 100, 18, UnixTimestamp::from_secs(1));

        // n1 finished; a later request for the same amount must not inherit its transfer
        let out = state.settle(&[query("n2", "0.5", 900)], &watched(), 101, 18, UnixTimestamp::from_secs(2));
        assert!(out[0].is_none());
        assert!(state.claimed.is_empty());
        assert!(state.seen.is_empty());
    }

    #[test]
    fn test_duplicate_transfers_are_recorded_once() {
        let mut state = ScanState::default();
        state.record(vec![transfer(1, HALF_ETH, 100, 1_000)]);
        state.record(vec![transfer(1, HALF_ETH, 100, 1_000)]);
        assert_eq!(state.seen.values().map(Vec::len).sum::<usize>(), 1);
    }
}
