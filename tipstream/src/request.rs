//! Payment request records.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::chain::{AdapterKey, ObservedTx};
use crate::status::DonationStatus;
use crate::timestamp::UnixTimestamp;

/// Terms submitted when a donation asks for a payment link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTerms {
    /// Address the donor pays to.
    #[serde(alias = "streamer_wallet_address")]
    pub destination_address: String,
    /// Amount in whole asset units.
    pub amount: Decimal,
    /// Asset symbol, e.g. `ETH` or `USDT`.
    pub asset_symbol: String,
    /// Network name, e.g. `ethereum`.
    pub network: String,
    /// Reference to the donation record owned by the caller.
    pub donation_id: String,
    /// Display name of the donor.
    #[serde(default)]
    pub donor_name: String,
    /// Message shown alongside the donation.
    #[serde(default)]
    pub message: String,
}

/// A payment request tracked by the registry.
///
/// Everything except the status fields and `observation` is fixed at
/// creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRequest {
    /// Opaque unique handle.
    pub nonce: String,
    /// Reference to the caller's donation record.
    pub donation_id: String,
    /// Address the donor pays to.
    pub destination_address: String,
    /// Upper-cased asset symbol.
    pub asset_symbol: String,
    /// Lower-cased network name.
    pub network: String,
    /// Expected amount in whole asset units.
    pub amount: Decimal,
    /// Wallet URI the donor scans or opens.
    pub payment_url: String,
    /// Public URL of the QR image for `payment_url`.
    pub qr_code_url: String,
    /// Display name of the donor.
    pub donor_name: String,
    /// Donor message.
    pub message: String,
    /// Current lifecycle status.
    pub status: DonationStatus,
    /// Creation time.
    pub created_at: UnixTimestamp,
    /// Unconfirmed requests are cancelled once this passes.
    pub expires_at: UnixTimestamp,
    /// Time of the last applied transition.
    pub updated_at: UnixTimestamp,
    /// Hash of the confirming transaction; set once, on confirmation.
    pub transaction_hash: Option<String>,
    /// Number of transitions applied.
    pub revision: u64,
    /// Latest chain observation, including ones below the confirmation
    /// threshold.
    pub observation: Option<ObservedTx>,
}

impl PaymentRequest {
    /// Adapter key of this request.
    #[must_use]
    pub fn adapter_key(&self) -> AdapterKey {
        AdapterKey::new(&self.asset_symbol, &self.network)
    }

    /// Whether the request is past its expiry at `now`. The expiry second
    /// itself still belongs to the payment window.
    #[must_use]
    pub fn is_expired(&self, now: UnixTimestamp) -> bool {
        self.expires_at < now
    }

    /// Waiting for payment and not yet expired.
    #[must_use]
    pub fn is_open(&self, now: UnixTimestamp) -> bool {
        self.status == DonationStatus::PendingPayment && !self.is_expired(now)
    }

    /// Unconfirmed and past expiry; due for cancellation.
    #[must_use]
    pub fn is_due_for_expiry(&self, now: UnixTimestamp) -> bool {
        matches!(
            self.status,
            DonationStatus::Created | DonationStatus::PendingPayment
        ) && self.is_expired(now)
    }
}
