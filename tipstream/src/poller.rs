//! Confirmation poller.
//!
//! Each cycle ([`Poller::tick`]):
//!
//! 1. cancels every unconfirmed request past its expiry;
//! 2. partitions the open requests by (asset, network);
//! 3. queries each partition's adapter, concurrently across partitions and
//!    bounded by the adapter timeout (one call per partition when the adapter
//!    can batch, one per request otherwise);
//! 4. confirms requests whose observation reaches the adapter's confirmation
//!    threshold and records the rest.
//!
//! A partition whose adapter is unavailable is skipped on later cycles until
//! its backoff delay has passed. Failures never escape a cycle.

use dashmap::DashMap;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chain::{AdapterKey, AmountRule, ChainAdapter, ChainError, ObservedTx, TxQuery};
use crate::config::EngineConfig;
use crate::machine::TransitionCause;
use crate::registry::Registry;
use crate::request::PaymentRequest;
use crate::status::DonationStatus;
use crate::timestamp::UnixTimestamp;

/// Capped exponential backoff with ±25% jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `base` and capped at `max`.
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay after `failures` consecutive failures (0 = no delay).
    ///
    /// `base * 2^(failures - 1)`, capped at `max`, then jittered by ±25%.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(failures - 1);
        let capped = self.base.saturating_mul(multiplier).min(self.max);

        let capped_ms = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX);
        let jitter_range = capped_ms / 4;
        if jitter_range == 0 {
            return capped;
        }
        let jitter = rand::random::<u64>() % (jitter_range * 2);
        Duration::from_millis(capped_ms.saturating_sub(jitter_range).saturating_add(jitter))
    }
}

#[derive(Debug, Clone, Copy)]
struct BackoffState {
    failures: u32,
    retry_at: UnixTimestamp,
}

/// Cumulative poller counters.
#[derive(Debug, Default)]
pub struct PollerStats {
    cycles: AtomicU64,
    confirmations: AtomicU64,
    expirations: AtomicU64,
    below_threshold: AtomicU64,
    chain_unavailable: AtomicU64,
    chain_query_errors: AtomicU64,
    skipped_partitions: AtomicU64,
}

/// Point-in-time copy of [`PollerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollerStatsSnapshot {
    /// Completed cycles.
    pub cycles: u64,
    /// Requests moved to `PAYMENT_CONFIRMED`.
    pub confirmations: u64,
    /// Requests cancelled by expiry.
    pub expirations: u64,
    /// Matches seen with fewer confirmations than required.
    pub below_threshold: u64,
    /// Adapter calls that failed transiently or timed out.
    pub chain_unavailable: u64,
    /// Adapter calls that returned uninterpretable data.
    pub chain_query_errors: u64,
    /// Partitions skipped while backing off.
    pub skipped_partitions: u64,
}

impl PollerStats {
    /// Reads all counters.
    #[must_use]
    pub fn snapshot(&self) -> PollerStatsSnapshot {
        PollerStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            confirmations: self.confirmations.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            below_threshold: self.below_threshold.load(Ordering::Relaxed),
            chain_unavailable: self.chain_unavailable.load(Ordering::Relaxed),
            chain_query_errors: self.chain_query_errors.load(Ordering::Relaxed),
            skipped_partitions: self.skipped_partitions.load(Ordering::Relaxed),
        }
    }

    fn add(&self, report: &TickReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.confirmations
            .fetch_add(report.confirmed, Ordering::Relaxed);
        self.expirations.fetch_add(report.expired, Ordering::Relaxed);
        self.below_threshold
            .fetch_add(report.below_threshold, Ordering::Relaxed);
        self.chain_unavailable
            .fetch_add(report.chain_unavailable, Ordering::Relaxed);
        self.chain_query_errors
            .fetch_add(report.chain_query_errors, Ordering::Relaxed);
        self.skipped_partitions
            .fetch_add(report.skipped_partitions, Ordering::Relaxed);
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Requests cancelled by expiry.
    pub expired: u64,
    /// Requests confirmed.
    pub confirmed: u64,
    /// Matches below the confirmation threshold.
    pub below_threshold: u64,
    /// Transient adapter failures, timeouts included.
    pub chain_unavailable: u64,
    /// Malformed adapter answers.
    pub chain_query_errors: u64,
    /// Partitions not queried because their adapter is backing off.
    pub skipped_partitions: u64,
    /// Partitions queried.
    pub polled_partitions: u64,
}

impl TickReport {
    fn merge(&mut self, other: Self) {
        self.confirmed += other.confirmed;
        self.below_threshold += other.below_threshold;
        self.chain_unavailable += other.chain_unavailable;
        self.chain_query_errors += other.chain_query_errors;
        self.polled_partitions += other.polled_partitions;
    }
}

/// Background loop that expires and confirms payment requests.
pub struct Poller {
    registry: Arc<Registry>,
    interval: Duration,
    timeout: Duration,
    backoff: Backoff,
    slippage: Decimal,
    backoff_states: DashMap<AdapterKey, BackoffState>,
    stats: PollerStats,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Poller {
    /// Creates a poller over `registry` using the registry's configuration.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        let config: &EngineConfig = registry.config();
        let interval = config.poll_interval();
        let timeout = config.adapter_timeout();
        let backoff = Backoff::new(
            Duration::from_secs(config.backoff_base_secs),
            Duration::from_secs(config.backoff_max_secs),
        );
        let slippage = config.slippage_tolerance;
        Self {
            registry,
            interval,
            timeout,
            backoff,
            slippage,
            backoff_states: DashMap::new(),
            stats: PollerStats::default(),
        }
    }

    /// Cumulative counters.
    #[must_use]
    pub const fn stats(&self) -> &PollerStats {
        &self.stats
    }

    /// Runs one cycle.
    pub async fn tick(&self) -> TickReport {
        let now = self.registry.clock().now();
        let mut report = TickReport {
            expired: self.sweep_expired(now),
            ..TickReport::default()
        };

        let mut partitions: HashMap<AdapterKey, Vec<PaymentRequest>> = HashMap::new();
        for request in self.registry.list_open() {
            partitions
                .entry(request.adapter_key())
                .or_default()
                .push(request);
        }

        let mut polls = Vec::with_capacity(partitions.len());
        for (key, requests) in partitions {
            let Some(adapter) = self.registry.adapters().get(&key).cloned() else {
                tracing::warn!(asset = %key, open = requests.len(), "No adapter for open requests");
                continue;
            };
            if self.is_backing_off(&key, now) {
                report.skipped_partitions += 1;
                tracing::debug!(asset = %key, "Adapter backing off, partition skipped");
                continue;
            }
            polls.push(self.poll_partition(key, adapter, requests));
        }

        for partition in join_all(polls).await {
            report.merge(partition);
        }
        self.stats.add(&report);
        report
    }

    fn sweep_expired(&self, now: UnixTimestamp) -> u64 {
        let mut expired = 0;
        for request in self.registry.list_expired(now) {
            match self.registry.apply_transition(
                &request.nonce,
                DonationStatus::Cancelled,
                None,
                TransitionCause::Expiry,
            ) {
                Ok(outcome) if outcome.applied => {
                    expired += 1;
                    tracing::info!(
                        nonce = %request.nonce,
                        donation_id = %request.donation_id,
                        expires_at = %request.expires_at,
                        "Payment request expired"
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(nonce = %request.nonce, error = %err, "Expiry lost a race");
                }
            }
        }
        expired
    }

    fn is_backing_off(&self, key: &AdapterKey, now: UnixTimestamp) -> bool {
        self.backoff_states
            .get(key)
            .is_some_and(|state| state.retry_at > now)
    }

    fn build_query(&self, adapter: &dyn ChainAdapter, request: &PaymentRequest) -> TxQuery {
        let capabilities = adapter.capabilities();
        TxQuery {
            nonce: request.nonce.clone(),
            destination_address: request.destination_address.clone(),
            expected_amount: request.amount,
            amount_rule: AmountRule::for_policy(
                capabilities.match_policy(),
                request.amount,
                self.slippage,
            ),
            memo: capabilities
                .query_by_memo
                .then(|| request.nonce.clone()),
            since: request.created_at,
        }
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, ChainError>>,
    ) -> Result<T, ChainError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .unwrap_or_else(|_| {
                Err(ChainError::unavailable(format!(
                    "no answer within {:?}",
                    self.timeout
                )))
            })
    }

    async fn poll_partition(
        &self,
        key: AdapterKey,
        adapter: Arc<dyn ChainAdapter>,
        requests: Vec<PaymentRequest>,
    ) -> TickReport {
        let mut report = TickReport {
            polled_partitions: 1,
            ..TickReport::default()
        };
        let queries: Vec<TxQuery> = requests
            .iter()
            .map(|r| self.build_query(adapter.as_ref(), r))
            .collect();

        let results: Vec<Result<Option<ObservedTx>, ChainError>> =
            if adapter.capabilities().batch {
                match self
                    .with_timeout(adapter.find_matching_batch(&queries))
                    .await
                {
                    Ok(found) if found.len() == queries.len() => found.into_iter().map(Ok).collect(),
                    Ok(found) => {
                        let err = ChainError::query(format!(
                            "batch answered {} of {} queries",
                            found.len(),
                            queries.len()
                        ));
                        vec![Err(err)]
                    }
                    Err(err) => vec![Err(err)],
                }
            } else {
                join_all(
                    queries
                        .iter()
                        .map(|q| self.with_timeout(adapter.find_matching_transaction(q))),
                )
                .await
            };

        let mut unavailable = None;
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(Some(tx)) => {
                    if let Some(request) = requests.get(i) {
                        self.handle_observation(adapter.as_ref(), request, &tx, &mut report);
                    }
                }
                Ok(None) => {}
                Err(ChainError::Unavailable(msg)) => {
                    report.chain_unavailable += 1;
                    unavailable.get_or_insert(msg);
                }
                Err(err @ ChainError::Query(_)) => {
                    report.chain_query_errors += 1;
                    tracing::warn!(asset = %key, error = %err, "Chain query failed");
                }
            }
        }

        match unavailable {
            Some(msg) => self.record_failure(&key, &msg),
            None => {
                if self.backoff_states.remove(&key).is_some() {
                    tracing::info!(asset = %key, "Adapter recovered");
                }
            }
        }
        report
    }

    fn handle_observation(
        &self,
        adapter: &dyn ChainAdapter,
        request: &PaymentRequest,
        tx: &ObservedTx,
        report: &mut TickReport,
    ) {
        let threshold = adapter.confirmation_threshold();
        if let Err(err) = self.registry.record_observation(&request.nonce, tx.clone()) {
            tracing::debug!(nonce = %request.nonce, error = %err, "Observation dropped");
            return;
        }
        if tx.confirmations < threshold {
            report.below_threshold += 1;
            tracing::debug!(
                nonce = %request.nonce,
                transaction_hash = %tx.transaction_hash,
                confirmations = tx.confirmations,
                threshold,
                "Payment seen, waiting for confirmations"
            );
            return;
        }
        match self.registry.apply_transition(
            &request.nonce,
            DonationStatus::PaymentConfirmed,
            Some(&tx.transaction_hash),
            TransitionCause::ChainConfirmation,
        ) {
            Ok(outcome) if outcome.applied => {
                report.confirmed += 1;
                tracing::info!(
                    nonce = %request.nonce,
                    donation_id = %request.donation_id,
                    transaction_hash = %tx.transaction_hash,
                    amount = %tx.amount,
                    confirmations = tx.confirmations,
                    "Payment confirmed"
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(nonce = %request.nonce, error = %err, "Confirmation lost a race");
            }
        }
    }

    fn record_failure(&self, key: &AdapterKey, msg: &str) {
        let now = self.registry.clock().now();
        let mut state = self.backoff_states.entry(key.clone()).or_insert(BackoffState {
            failures: 0,
            retry_at: now,
        });
        state.failures = state.failures.saturating_add(1);
        let delay = self.backoff.delay(state.failures);
        let delay_secs = delay.as_secs() + u64::from(delay.subsec_nanos() > 0);
        state.retry_at = now + delay_secs;
        tracing::warn!(
            asset = %key,
            failures = state.failures,
            retry_in_secs = delay_secs,
            error = %msg,
            "Chain adapter unavailable, backing off"
        );
    }

    /// Runs cycles every poll interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(interval = ?self.interval, "Confirmation poller started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let report = self.tick().await;
            tracing::debug!(?report, "Poll cycle finished");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::info!("Confirmation poller stopped");
    }

    /// Spawns [`Poller::run`] on the current runtime.
    #[must_use]
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> PollerHandle {
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        PollerHandle { cancel, task }
    }
}

/// Handle to a spawned poller.
#[derive(Debug)]
pub struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stops the poller and waits for the running cycle to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "Poller task failed");
        }
    }
}
