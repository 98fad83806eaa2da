//! Donation status enumeration.
//!
//! The six statuses are wire-encoded as small integers. The numeric order is
//! part of the contract with existing callers and must never be reshuffled:
//!
//! | Value | Status |
//! |---|---|
//! | 0 | `CREATED` |
//! | 1 | `PENDING_PAYMENT` |
//! | 2 | `PAYMENT_CONFIRMED` |
//! | 3 | `SHOWING_IN_OVERLAY` |
//! | 4 | `COMPLETED` |
//! | 5 | `CANCELLED` |

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a donation payment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DonationStatus {
    /// Request minted, payment link not yet dispatched to the donor.
    Created = 0,
    /// Link dispatched, waiting for the on-chain transfer.
    PendingPayment = 1,
    /// Matching transaction observed with enough confirmations.
    PaymentConfirmed = 2,
    /// The overlay renderer claimed the donation for display.
    ShowingInOverlay = 3,
    /// The overlay finished displaying the donation.
    Completed = 4,
    /// Expired or cancelled by an operator.
    Cancelled = 5,
}

impl DonationStatus {
    /// All statuses in wire order.
    pub const ALL: [Self; 6] = [
        Self::Created,
        Self::PendingPayment,
        Self::PaymentConfirmed,
        Self::ShowingInOverlay,
        Self::Completed,
        Self::Cancelled,
    ];

    /// Wire value of this status.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a wire value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Created),
            1 => Some(Self::PendingPayment),
            2 => Some(Self::PaymentConfirmed),
            3 => Some(Self::ShowingInOverlay),
            4 => Some(Self::Completed),
            5 => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// `COMPLETED` and `CANCELLED` accept no further mutation.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether a payment has been observed on-chain for a request in this
    /// status. Cancelled requests never count as confirmed.
    #[must_use]
    pub const fn is_confirmed(self) -> bool {
        matches!(
            self,
            Self::PaymentConfirmed | Self::ShowingInOverlay | Self::Completed
        )
    }

    /// Snake-case name used in logs and by the messaging front end.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::PendingPayment => "pending_payment",
            Self::PaymentConfirmed => "payment_confirmed",
            Self::ShowingInOverlay => "showing_in_overlay",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a status name or wire value is not recognised.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown donation status {0}")]
pub struct UnknownStatusError(String);

impl FromStr for DonationStatus {
    type Err = UnknownStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if let Ok(value) = normalized.parse::<u8>() {
            return Self::from_u8(value).ok_or_else(|| UnknownStatusError(s.to_owned()));
        }
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| UnknownStatusError(s.to_owned()))
    }
}

impl Serialize for DonationStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for DonationStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StatusVisitor;

        impl de::Visitor<'_> for StatusVisitor {
            type Value = DonationStatus;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a donation status integer (0-5) or name")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                u8::try_from(v)
                    .ok()
                    .and_then(DonationStatus::from_u8)
                    .ok_or_else(|| E::custom(format!("unknown donation status {v}")))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map_err(|_| E::custom(format!("unknown donation status {v}")))
                    .and_then(|v| self.visit_u64(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(StatusVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_order_is_stable() {
        let values: Vec<u8> = DonationStatus::ALL.iter().map(|s| s.as_u8()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4, 5]);
        assert!(DonationStatus::Created < DonationStatus::PendingPayment);
        assert!(DonationStatus::Completed < DonationStatus::Cancelled);
    }

    #[test]
    fn test_serializes_as_integer() {
        let json = serde_json::to_string(&DonationStatus::PaymentConfirmed).unwrap();
        assert_eq!(json, "2");
        let status: DonationStatus = serde_json::from_str("4").unwrap();
        assert_eq!(status, DonationStatus::Completed);
    }

    #[test]
    fn test_deserializes_from_name() {
        let status: DonationStatus = serde_json::from_str("\"showing_in_overlay\"").unwrap();
        assert_eq!(status, DonationStatus::ShowingInOverlay);
        let status: DonationStatus = "CANCELLED".parse().unwrap();
        assert_eq!(status, DonationStatus::Cancelled);
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(serde_json::from_str::<DonationStatus>("6").is_err());
        assert!(serde_json::from_str::<DonationStatus>("-1").is_err());
        assert!("refunded".parse::<DonationStatus>().is_err());
    }

    #[test]
    fn test_cancelled_is_not_confirmed() {
        assert!(!DonationStatus::Cancelled.is_confirmed());
        assert!(DonationStatus::Completed.is_confirmed());
        assert!(DonationStatus::Cancelled.is_terminal());
        assert!(!DonationStatus::ShowingInOverlay.is_terminal());
    }
}
