//! Payment request registry.
//!
//! The registry is the single source of truth for payment requests. Records
//! live in a sharded [`DashMap`] keyed by nonce; every status mutation happens
//! while holding that nonce's shard write guard, so reading the current status,
//! deciding, and writing the next status is atomic per nonce. Chain adapters
//! are never called under a guard.
//!
//! Applied transitions are broadcast to [`Registry::subscribe`]rs.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::chain::{AdapterKey, AdapterRegistry, MatchPolicy, ObservedTx, PaymentUriParams};
use crate::config::EngineConfig;
use crate::error::PaymentError;
use crate::machine::{self, Decision, TransitionCause};
use crate::nonce;
use crate::request::{PaymentRequest, PaymentTerms};
use crate::status::DonationStatus;
use crate::timestamp::{Clock, UnixTimestamp};

const EVENT_CAPACITY: usize = 256;

/// A transition the registry applied.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionEvent {
    /// Status before the transition.
    pub from: DonationStatus,
    /// Status after the transition.
    pub to: DonationStatus,
    /// What triggered it.
    pub cause: TransitionCause,
    /// Snapshot of the record after the transition.
    pub request: PaymentRequest,
}

/// Result of [`Registry::apply_transition`].
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// Snapshot of the record after the call.
    pub request: PaymentRequest,
    /// `false` when the call was an idempotent no-op.
    pub applied: bool,
}

/// Request counts for the service summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// All requests ever created.
    pub total: usize,
    /// Requests waiting for payment and not expired.
    pub open: usize,
    /// Requests per status name.
    pub by_status: BTreeMap<&'static str, usize>,
}

/// Store of payment requests keyed by nonce.
pub struct Registry {
    requests: DashMap<String, PaymentRequest>,
    by_url: DashMap<String, String>,
    exclusive: DashMap<(AdapterKey, String), String>,
    adapters: Arc<AdapterRegistry>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    events: broadcast::Sender<TransitionEvent>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("requests", &self.requests.len())
            .field("adapters", &self.adapters.len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Creates an empty registry validating terms against `adapters`.
    #[must_use]
    pub fn new(config: EngineConfig, adapters: Arc<AdapterRegistry>, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            requests: DashMap::new(),
            by_url: DashMap::new(),
            exclusive: DashMap::new(),
            adapters,
            clock,
            config,
            events,
        }
    }

    /// Adapters the registry validates against.
    #[must_use]
    pub fn adapters(&self) -> &Arc<AdapterRegistry> {
        &self.adapters
    }

    /// Engine configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The registry clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Validates `terms` and stores a new request in `CREATED`.
    ///
    /// # Errors
    ///
    /// [`PaymentError::InvalidTerms`] when the amount is not positive or has
    /// more fractional digits than the asset, the (asset, network) pair has no
    /// adapter, the destination address is malformed, the donation id is
    /// empty, or an exact-amount network already has an unfinished request
    /// for the same destination.
    pub fn create(&self, terms: PaymentTerms) -> Result<PaymentRequest, PaymentError> {
        let key = AdapterKey::new(&terms.asset_symbol, &terms.network);
        let adapter = self
            .adapters
            .get(&key)
            .ok_or_else(|| PaymentError::invalid_terms(format!("unsupported asset {key}")))?
            .clone();

        if terms.donation_id.trim().is_empty() {
            return Err(PaymentError::invalid_terms("donation_id is empty"));
        }
        if terms.amount <= Decimal::ZERO {
            return Err(PaymentError::invalid_terms(format!(
                "amount must be positive, got {}",
                terms.amount
            )));
        }
        if terms.amount.normalize().scale() > adapter.decimals() {
            return Err(PaymentError::invalid_terms(format!(
                "amount {} exceeds {} decimals of {key}",
                terms.amount,
                adapter.decimals()
            )));
        }
        let destination = terms.destination_address.trim();
        if !adapter.validate_address(destination) {
            return Err(PaymentError::invalid_terms(format!(
                "malformed {} address {destination}",
                key.network()
            )));
        }

        let policy = adapter.capabilities().match_policy();
        let build = |nonce: &str| {
            let now = self.clock.now();
            let amount = terms.amount.normalize();
            PaymentRequest {
                nonce: nonce.to_owned(),
                donation_id: terms.donation_id.trim().to_owned(),
                destination_address: destination.to_owned(),
                asset_symbol: key.asset_symbol().to_owned(),
                network: key.network().to_owned(),
                amount,
                payment_url: adapter.payment_uri(PaymentUriParams {
                    destination_address: destination,
                    amount,
                    nonce,
                }),
                qr_code_url: self.config.qr_code_url(nonce),
                donor_name: terms.donor_name.clone(),
                message: terms.message.clone(),
                status: DonationStatus::Created,
                created_at: now,
                expires_at: now + self.config.payment_ttl_secs,
                updated_at: now,
                transaction_hash: None,
                revision: 0,
                observation: None,
            }
        };

        let request = if policy == MatchPolicy::ExactAmount {
            let claim = (key.clone(), adapter.normalize_address(destination));
            match self.exclusive.entry(claim) {
                Entry::Occupied(mut held) => {
                    if self.is_unfinished(held.get()) {
                        return Err(PaymentError::invalid_terms(format!(
                            "address {destination} already awaits a {key} payment"
                        )));
                    }
                    let request = self.insert_fresh(build);
                    held.insert(request.nonce.clone());
                    request
                }
                Entry::Vacant(slot) => {
                    let request = self.insert_fresh(build);
                    slot.insert(request.nonce.clone());
                    request
                }
            }
        } else {
            self.insert_fresh(build)
        };

        self.by_url
            .insert(request.payment_url.clone(), request.nonce.clone());
        tracing::info!(
            nonce = %request.nonce,
            donation_id = %request.donation_id,
            asset = %key,
            amount = %request.amount,
            expires_at = %request.expires_at,
            "Payment request created"
        );
        Ok(request)
    }

    /// Inserts the record built for a fresh nonce, retrying on collision.
    fn insert_fresh(&self, build: impl Fn(&str) -> PaymentRequest) -> PaymentRequest {
        loop {
            let nonce = nonce::generate();
            if let Entry::Vacant(slot) = self.requests.entry(nonce.clone()) {
                let request = build(&nonce);
                slot.insert(request.clone());
                return request;
            }
            tracing::warn!(%nonce, "Nonce collision, regenerating");
        }
    }

    fn is_unfinished(&self, nonce: &str) -> bool {
        self.requests
            .get(nonce)
            .is_some_and(|r| !r.status.is_terminal())
    }

    /// Looks up a request by nonce.
    ///
    /// # Errors
    ///
    /// [`PaymentError::NotFound`] for unknown nonces.
    pub fn get(&self, nonce: &str) -> Result<PaymentRequest, PaymentError> {
        self.requests
            .get(nonce)
            .map(|r| r.value().clone())
            .ok_or_else(|| PaymentError::not_found(nonce))
    }

    /// Looks up a request by the exact payment URL it was created with.
    ///
    /// # Errors
    ///
    /// [`PaymentError::NotFound`] when no request has this URL.
    pub fn get_by_payment_url(&self, url: &str) -> Result<PaymentRequest, PaymentError> {
        let nonce = self
            .by_url
            .get(url)
            .map(|n| n.value().clone())
            .ok_or_else(|| PaymentError::not_found(url))?;
        self.get(&nonce)
    }

    /// Requests waiting for payment and not yet expired.
    #[must_use]
    pub fn list_open(&self) -> Vec<PaymentRequest> {
        let now = self.clock.now();
        self.requests
            .iter()
            .filter(|r| r.is_open(now))
            .map(|r| r.value().clone())
            .collect()
    }

    /// Unconfirmed requests whose expiry is at or before `now`.
    #[must_use]
    pub fn list_expired(&self, now: UnixTimestamp) -> Vec<PaymentRequest> {
        self.requests
            .iter()
            .filter(|r| r.is_due_for_expiry(now))
            .map(|r| r.value().clone())
            .collect()
    }

    /// Snapshot of every request, newest first.
    #[must_use]
    pub fn list_all(&self) -> Vec<PaymentRequest> {
        let mut all: Vec<PaymentRequest> = self.requests.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.nonce.cmp(&b.nonce)));
        all
    }

    /// Request counts.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let now = self.clock.now();
        let mut stats = RegistryStats::default();
        for request in &self.requests {
            stats.total += 1;
            if request.is_open(now) {
                stats.open += 1;
            }
            *stats.by_status.entry(request.status.as_str()).or_default() += 1;
        }
        stats
    }

    /// Stores the latest chain observation for a non-terminal request.
    ///
    /// # Errors
    ///
    /// [`PaymentError::NotFound`] for unknown nonces.
    pub fn record_observation(&self, nonce: &str, tx: ObservedTx) -> Result<(), PaymentError> {
        let mut request = self
            .requests
            .get_mut(nonce)
            .ok_or_else(|| PaymentError::not_found(nonce))?;
        if !request.status.is_terminal() {
            request.observation = Some(tx);
        }
        Ok(())
    }

    /// Validates and applies a status transition under the nonce's guard.
    ///
    /// `transaction_hash` is only read for `PAYMENT_CONFIRMED`. Terminal
    /// requests and same-status requests come back unchanged with
    /// `applied == false`.
    ///
    /// # Errors
    ///
    /// [`PaymentError::NotFound`] for unknown nonces and
    /// [`PaymentError::InvalidTransition`] for edges outside the graph.
    pub fn apply_transition(
        &self,
        nonce: &str,
        target: DonationStatus,
        transaction_hash: Option<&str>,
        cause: TransitionCause,
    ) -> Result<TransitionOutcome, PaymentError> {
        let mut guard = self
            .requests
            .get_mut(nonce)
            .ok_or_else(|| PaymentError::not_found(nonce))?;
        let from = guard.status;
        if machine::decide(from, target, transaction_hash)? == Decision::NoOp {
            tracing::debug!(%nonce, status = %from, requested = %target, %cause, "Transition is a no-op");
            return Ok(TransitionOutcome {
                request: guard.value().clone(),
                applied: false,
            });
        }

        let request = guard.value_mut();
        if target == DonationStatus::PaymentConfirmed {
            request.transaction_hash = transaction_hash.map(|h| h.trim().to_owned());
        }
        request.status = target;
        request.updated_at = self.clock.now();
        request.revision += 1;
        let snapshot = request.clone();
        drop(guard);

        if target.is_terminal() {
            self.release_address(&snapshot);
        }
        tracing::info!(
            %nonce,
            from = %from,
            to = %target,
            %cause,
            transaction_hash = snapshot.transaction_hash.as_deref().unwrap_or(""),
            "Donation status changed"
        );
        let _ = self.events.send(TransitionEvent {
            from,
            to: target,
            cause,
            request: snapshot.clone(),
        });
        Ok(TransitionOutcome {
            request: snapshot,
            applied: true,
        })
    }

    fn release_address(&self, request: &PaymentRequest) {
        let Some(adapter) = self.adapters.get(&request.adapter_key()) else {
            return;
        };
        let claim = (
            request.adapter_key(),
            adapter.normalize_address(&request.destination_address),
        );
        self.exclusive.remove_if(&claim, |_, holder| *holder == request.nonce);
    }

    /// Subscribes to applied transitions.
    ///
    /// Slow subscribers lag and lose the oldest events rather than blocking
    /// writers.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.events.subscribe()
    }

    /// Number of stored requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Returns `true` if no requests are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
