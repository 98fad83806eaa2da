//! Pushes confirmed donations to the stream overlay.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tipstream::DonationStatus;
use tipstream::registry::TransitionEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Body POSTed to `{overlay}/donations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlayDonation {
    /// Caller's donation reference.
    pub donation_id: String,
    /// Payment request nonce.
    pub nonce: String,
    /// Always `"confirmed"`.
    pub status: &'static str,
    /// Confirming transaction.
    pub transaction_hash: Option<String>,
    /// Donor display name.
    pub donor_name: String,
    /// Requested amount.
    pub amount: Decimal,
    /// Asset symbol.
    pub asset_symbol: String,
    /// Donor message.
    pub message: String,
}

impl OverlayDonation {
    /// Payload for a transition into `PAYMENT_CONFIRMED`, `None` for any
    /// other event.
    #[must_use]
    pub fn from_event(event: &TransitionEvent) -> Option<Self> {
        if event.to != DonationStatus::PaymentConfirmed {
            return None;
        }
        let request = &event.request;
        Some(Self {
            donation_id: request.donation_id.clone(),
            nonce: request.nonce.clone(),
            status: "confirmed",
            transaction_hash: request.transaction_hash.clone(),
            donor_name: request.donor_name.clone(),
            amount: request.amount,
            asset_symbol: request.asset_symbol.clone(),
            message: request.message.clone(),
        })
    }
}

/// Forwards confirmations from the registry to the overlay service.
#[derive(Debug, Clone)]
pub struct OverlayNotifier {
    http: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl OverlayNotifier {
    /// Notifier posting to `{base}/donations`.
    ///
    /// # Errors
    ///
    /// Returns [`url::ParseError`] if `base` is not a valid URL.
    pub fn new(http: reqwest::Client, base: &str, timeout: Duration) -> Result<Self, url::ParseError> {
        let endpoint = Url::parse(&format!("{}/donations", base.trim_end_matches('/')))?;
        Ok(Self {
            http,
            endpoint,
            timeout,
        })
    }

    /// Sends one donation. Failures are logged and swallowed.
    pub async fn notify(&self, donation: &OverlayDonation) -> bool {
        let result = self
            .http
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .json(donation)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        match result {
            Ok(_) => {
                tracing::info!(
                    nonce = %donation.nonce,
                    donation_id = %donation.donation_id,
                    "Overlay notified"
                );
                true
            }
            Err(err) => {
                tracing::warn!(
                    nonce = %donation.nonce,
                    endpoint = %self.endpoint,
                    error = %err,
                    "Overlay notification failed"
                );
                false
            }
        }
    }

    /// Forwards events from `events` until `cancel` fires or the registry
    /// goes away.
    pub async fn run(self, mut events: broadcast::Receiver<TransitionEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => {
                    if let Some(donation) = OverlayDonation::from_event(&event) {
                        self.notify(&donation).await;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Overlay notifier lagged behind registry events");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("Overlay notifier stopped");
    }

    /// Spawns [`OverlayNotifier::run`].
    #[must_use]
    pub fn spawn(
        self,
        events: broadcast::Receiver<TransitionEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(events, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;
    use std::sync::Arc;
    use tipstream::chain::{AdapterKey, AdapterRegistry, ScriptedAdapter};
    use tipstream::config::EngineConfig;
    use tipstream::machine::TransitionCause;
    use tipstream::registry::Registry;
    use tipstream::request::PaymentTerms;
    use tipstream::timestamp::SystemClock;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry() -> Arc<Registry> {
        let adapters = AdapterRegistry::new().with(Arc::new(ScriptedAdapter::new(
            AdapterKey::new("ETH", "ethereum"),
            1,
        )));
        Arc::new(Registry::new(
            EngineConfig::default(),
            Arc::new(adapters),
            Arc::new(SystemClock),
        ))
    }

    fn terms() -> PaymentTerms {
        PaymentTerms {
            destination_address: "0xAB5801a7D398351b8bE11C439e05C5B3259aeC9B".to_owned(),
            amount: Decimal::from_str("0.5").unwrap(),
            asset_symbol: "ETH".to_owned(),
            network: "ethereum".to_owned(),
            donation_id: "d1".to_owned(),
            donor_name: "alice".to_owned(),
            message: "gg".to_owned(),
        }
    }

    #[tokio::test]
    async fn test_confirmation_is_pushed_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/donations"))
            .and(body_partial_json(json!({
                "donation_id": "d1",
                "status": "confirmed",
                "transaction_hash": "0xabc",
                "donor_name": "alice",
                "amount": "0.5",
                "asset_symbol": "ETH",
                "message": "gg"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let registry = registry();
        let cancel = CancellationToken::new();
        let notifier =
            OverlayNotifier::new(reqwest::Client::new(), &format!("{}/", server.uri()), Duration::from_secs(2))
                .unwrap();
        let task = notifier.spawn(registry.subscribe(), cancel.clone());

        let request = registry.create(terms()).unwrap();
        for (status, hash) in [
            (DonationStatus::PendingPayment, None),
            (DonationStatus::PaymentConfirmed, Some("0xabc")),
            (DonationStatus::ShowingInOverlay, None),
        ] {
            registry
                .apply_transition(&request.nonce, status, hash, TransitionCause::External)
                .unwrap();
        }

        // give the notifier time to drain the channel before stopping it
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        task.await.unwrap();
        server.verify().await;
    }

    #[tokio::test]
    async fn test_overlay_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let notifier =
            OverlayNotifier::new(reqwest::Client::new(), &server.uri(), Duration::from_secs(2)).unwrap();
        let donation = OverlayDonation {
            donation_id: "d1".into(),
            nonce: "n".into(),
            status: "confirmed",
            transaction_hash: None,
            donor_name: String::new(),
            amount: Decimal::ONE,
            asset_symbol: "ETH".into(),
            message: String::new(),
        };
        assert!(!notifier.notify(&donation).await);
    }

    #[test]
    fn test_only_confirmations_produce_payloads() {
        let registry = registry();
        let mut events = registry.subscribe();
        let request = registry.create(terms()).unwrap();
        registry
            .apply_transition(&request.nonce, DonationStatus::Cancelled, None, TransitionCause::External)
            .unwrap();
        let event = events.try_recv().unwrap();
        assert!(OverlayDonation::from_event(&event).is_none());
    }
}
