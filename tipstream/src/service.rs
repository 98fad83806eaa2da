//! Service facade: the four operations callers use.
//!
//! | Operation | Method |
//! |---|---|
//! | `CreatePaymentLink` | [`PaymentService::create_payment_link`] |
//! | `CheckTransactionStatus` | [`PaymentService::check_transaction_status`] |
//! | `GetPaymentQRCode` | [`PaymentService::get_payment_qr_code`] |
//! | `UpdateDonationStatus` | [`PaymentService::update_donation_status`] |
//!
//! Status checks read the registry only; the chain is consulted by the poller
//! alone.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::PaymentError;
use crate::machine::TransitionCause;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::qr::{PngQrEncoder, QrEncoder};
use crate::registry::{Registry, RegistryStats, TransitionEvent};
use crate::request::{PaymentRequest, PaymentTerms};
use crate::status::DonationStatus;
use crate::timestamp::UnixTimestamp;

/// Answer to `CreatePaymentLink`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePaymentLinkResponse {
    /// Wallet URI for the donor.
    pub payment_url: String,
    /// Public QR image URL.
    pub qr_code_url: String,
    /// Handle of the new request.
    pub nonce: String,
    /// Always `CREATED`.
    pub status: DonationStatus,
    /// Expiry as Unix seconds.
    pub expires_at: UnixTimestamp,
}

/// `CheckTransactionStatus` input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTransactionStatusRequest {
    /// Payment URL, QR URL or bare nonce.
    pub payment_url: String,
}

/// Answer to `CheckTransactionStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTransactionStatusResponse {
    /// `PAYMENT_CONFIRMED` or later, and not cancelled.
    pub confirmed: bool,
    /// Hash of the confirming transaction.
    pub transaction_hash: Option<String>,
    /// Current status.
    pub status: DonationStatus,
    /// Why the request can no longer be paid, if it cannot.
    pub error_message: Option<String>,
}

/// `GetPaymentQRCode` input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPaymentQrCodeRequest {
    /// Payment URL, QR URL or bare nonce.
    pub payment_url: String,
}

/// Answer to `GetPaymentQRCode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentQrCode {
    /// PNG bytes encoding the payment URL.
    pub qr_code_image: Arc<[u8]>,
    /// Public URL serving the same image.
    pub qr_code_url: String,
}

/// `UpdateDonationStatus` input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDonationStatusRequest {
    /// Request handle.
    pub nonce: String,
    /// Requested status.
    pub status: DonationStatus,
    /// Required when confirming.
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

/// Answer to `UpdateDonationStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDonationStatusResponse {
    /// The request now has (or already had) a settled status.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Status after the call.
    pub status: DonationStatus,
}

/// Summary served at the service root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSummary {
    /// Service name.
    pub service: &'static str,
    /// Requests waiting for payment.
    pub active_payments: usize,
    /// Requests created since start.
    pub total_payments: usize,
    /// Requests per status.
    pub by_status: BTreeMap<&'static str, usize>,
}

impl From<RegistryStats> for ServiceSummary {
    fn from(stats: RegistryStats) -> Self {
        Self {
            service: "tipstream payment service",
            active_payments: stats.open,
            total_payments: stats.total,
            by_status: stats.by_status,
        }
    }
}

/// Facade over the registry and QR cache.
#[derive(Clone)]
pub struct PaymentService {
    registry: Arc<Registry>,
    encoder: Arc<dyn QrEncoder>,
    qr_cache: Arc<DashMap<String, Arc<[u8]>>>,
}

impl std::fmt::Debug for PaymentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentService")
            .field("registry", &self.registry)
            .field("cached_qr_codes", &self.qr_cache.len())
            .finish_non_exhaustive()
    }
}

impl PaymentService {
    /// Creates a facade over `registry` with the default PNG encoder.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_encoder(registry, Arc::new(PngQrEncoder::default()))
    }

    /// Creates a facade using a specific QR encoder.
    #[must_use]
    pub fn with_encoder(registry: Arc<Registry>, encoder: Arc<dyn QrEncoder>) -> Self {
        Self {
            registry,
            encoder,
            qr_cache: Arc::new(DashMap::new()),
        }
    }

    /// The underlying registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Mints a payment request and starts rendering its QR image in the
    /// background.
    ///
    /// # Errors
    ///
    /// [`PaymentError::InvalidTerms`] when the registry rejects the terms.
    pub fn create_payment_link(
        &self,
        terms: PaymentTerms,
    ) -> Result<CreatePaymentLinkResponse, PaymentError> {
        let request = self.registry.create(terms)?;
        self.pregenerate_qr(&request);
        Ok(CreatePaymentLinkResponse {
            payment_url: request.payment_url,
            qr_code_url: request.qr_code_url,
            nonce: request.nonce,
            status: request.status,
            expires_at: request.expires_at,
        })
    }

    /// Reports the cached status of a request, activating it on first check.
    ///
    /// # Errors
    ///
    /// [`PaymentError::NotFound`] when `payment_url` resolves to nothing.
    pub fn check_transaction_status(
        &self,
        payment_url: &str,
    ) -> Result<CheckTransactionStatusResponse, PaymentError> {
        let mut request = self.resolve(payment_url)?;
        if request.status == DonationStatus::Created {
            request = self
                .registry
                .apply_transition(
                    &request.nonce,
                    DonationStatus::PendingPayment,
                    None,
                    TransitionCause::Activation,
                )?
                .request;
        }
        let confirmed = request.status.is_confirmed();
        let error_message = (request.status == DonationStatus::Cancelled).then(|| {
            if request.updated_at >= request.expires_at {
                "payment request expired".to_owned()
            } else {
                "payment request cancelled".to_owned()
            }
        });
        Ok(CheckTransactionStatusResponse {
            confirmed,
            transaction_hash: request.transaction_hash,
            status: request.status,
            error_message,
        })
    }

    /// Returns the QR image of a request's payment URL.
    ///
    /// # Errors
    ///
    /// [`PaymentError::NotFound`] for unknown requests and
    /// [`PaymentError::Internal`] when encoding fails.
    pub async fn get_payment_qr_code(
        &self,
        payment_url: &str,
    ) -> Result<PaymentQrCode, PaymentError> {
        let request = self.resolve(payment_url)?;
        let image = self.qr_png(&request).await?;
        Ok(PaymentQrCode {
            qr_code_image: image,
            qr_code_url: request.qr_code_url,
        })
    }

    /// Returns the QR image for a nonce.
    ///
    /// # Errors
    ///
    /// Same as [`PaymentService::get_payment_qr_code`].
    pub async fn qr_code_by_nonce(&self, nonce: &str) -> Result<Arc<[u8]>, PaymentError> {
        let request = self.registry.get(nonce)?;
        self.qr_png(&request).await
    }

    /// Applies an externally requested transition.
    ///
    /// Requests already in the requested status, and requests already
    /// terminal, succeed without change.
    ///
    /// # Errors
    ///
    /// [`PaymentError::NotFound`] and [`PaymentError::InvalidTransition`].
    pub fn update_donation_status(
        &self,
        update: UpdateDonationStatusRequest,
    ) -> Result<UpdateDonationStatusResponse, PaymentError> {
        let outcome = self.registry.apply_transition(
            &update.nonce,
            update.status,
            update.transaction_hash.as_deref(),
            TransitionCause::External,
        )?;
        let status = outcome.request.status;
        if status.is_terminal() {
            self.evict_qr(&update.nonce);
        }
        let message = if outcome.applied {
            format!("donation status updated to {status}")
        } else if status.is_terminal() {
            format!("donation already {status}, nothing to do")
        } else {
            format!("donation already {status}")
        };
        Ok(UpdateDonationStatusResponse {
            success: true,
            message,
            status,
        })
    }

    /// Root summary.
    #[must_use]
    pub fn summary(&self) -> ServiceSummary {
        self.registry.stats().into()
    }

    /// Every request, newest first.
    #[must_use]
    pub fn payments(&self) -> Vec<PaymentRequest> {
        self.registry.list_all()
    }

    /// Resolves a payment URL, QR URL or bare nonce to its request.
    ///
    /// # Errors
    ///
    /// [`PaymentError::NotFound`] when no candidate matches.
    pub fn resolve(&self, payment_url: &str) -> Result<PaymentRequest, PaymentError> {
        let payment_url = payment_url.trim();
        if let Ok(request) = self.registry.get_by_payment_url(payment_url) {
            return Ok(request);
        }
        nonce_candidates(payment_url)
            .into_iter()
            .find_map(|nonce| self.registry.get(&nonce).ok())
            .ok_or_else(|| PaymentError::not_found(payment_url))
    }

    /// Drops the cached QR image of `nonce`.
    pub fn evict_qr(&self, nonce: &str) -> bool {
        self.qr_cache.remove(nonce).is_some()
    }

    /// Evicts QR images of requests that turn terminal, until `cancel`
    /// fires or the registry goes away.
    pub async fn run_qr_eviction(
        self,
        mut events: broadcast::Receiver<TransitionEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) if event.to.is_terminal() => {
                    if self.evict_qr(&event.request.nonce) {
                        tracing::debug!(nonce = %event.request.nonce, status = %event.to, "Evicted QR image");
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "QR eviction lagged, sweeping terminal requests");
                    self.qr_cache.retain(|nonce, _| {
                        self.registry
                            .get(nonce)
                            .is_ok_and(|request| !request.status.is_terminal())
                    });
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("QR eviction stopped");
    }

    /// Spawns [`PaymentService::run_qr_eviction`] on a clone of this facade.
    #[must_use]
    pub fn spawn_qr_eviction(&self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.clone().run_qr_eviction(self.registry.subscribe(), cancel))
    }

    async fn qr_png(&self, request: &PaymentRequest) -> Result<Arc<[u8]>, PaymentError> {
        if let Some(hit) = self.qr_cache.get(&request.nonce) {
            return Ok(Arc::clone(hit.value()));
        }
        let encoder = Arc::clone(&self.encoder);
        let url = request.payment_url.clone();
        let png = tokio::task::spawn_blocking(move || encoder.encode(&url))
            .await
            .map_err(|err| PaymentError::Internal(err.to_string()))??;
        if request.status.is_terminal() {
            return Ok(png.into());
        }
        let stored = self
            .qr_cache
            .entry(request.nonce.clone())
            .or_insert_with(|| png.into());
        Ok(Arc::clone(stored.value()))
    }

    fn pregenerate_qr(&self, request: &PaymentRequest) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let encoder = Arc::clone(&self.encoder);
        let cache = Arc::clone(&self.qr_cache);
        let registry = Arc::clone(&self.registry);
        let nonce = request.nonce.clone();
        let url = request.payment_url.clone();
        runtime.spawn_blocking(move || match encoder.encode(&url) {
            Ok(png) => {
                if registry.get(&nonce).is_ok_and(|r| !r.status.is_terminal()) {
                    cache.entry(nonce).or_insert_with(|| png.into());
                }
            }
            Err(err) => tracing::warn!(%nonce, error = %err, "QR pre-generation failed"),
        });
    }
}

/// Nonce candidates embedded in a URL, most specific first: the `nonce` or
/// `memo` query parameter, then the last path segment, then the string
/// itself.
fn nonce_candidates(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    if let Ok(url) = url::Url::parse(raw) {
        for (key, value) in url.query_pairs() {
            if (key == "nonce" || key == "memo") && !value.is_empty() {
                out.push(value.into_owned());
            }
        }
        if let Some(segment) = url
            .path()
            .rsplit('/')
            .find(|segment| !segment.is_empty())
        {
            out.push(segment.to_owned());
        }
    }
    out.push(raw.to_owned());
    out
}
