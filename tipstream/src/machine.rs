//! Donation status state machine.
//!
//! ```text
//! CREATED ──> PENDING_PAYMENT ──> PAYMENT_CONFIRMED ──> SHOWING_IN_OVERLAY ──> COMPLETED
//!    │              │                    │
//!    └──────────────┴────────────────────┴──> CANCELLED
//! ```
//!
//! The machine is pure: [`decide`] looks at the current and requested status
//! and says whether the registry should write, skip, or refuse. The registry
//! calls it while holding the per-nonce write guard.

use std::fmt;

use crate::error::PaymentError;
use crate::status::DonationStatus;

/// What the registry should do with a requested transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Write the new status.
    Apply,
    /// Leave the record untouched and report its current state.
    NoOp,
}

/// Who asked for a transition. Carried into logs and transition events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// First status check, or an explicit activation call.
    Activation,
    /// The poller observed a confirmed on-chain payment.
    ChainConfirmation,
    /// The poller found the request past its expiry.
    Expiry,
    /// An `UpdateDonationStatus` call.
    External,
}

impl fmt::Display for TransitionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Activation => "activation",
            Self::ChainConfirmation => "chain_confirmation",
            Self::Expiry => "expiry",
            Self::External => "external",
        };
        f.write_str(s)
    }
}

/// Whether `from -> to` is an edge of the transition graph.
#[must_use]
pub const fn is_edge(from: DonationStatus, to: DonationStatus) -> bool {
    use DonationStatus::{
        Cancelled, Completed, Created, PaymentConfirmed, PendingPayment, ShowingInOverlay,
    };
    matches!(
        (from, to),
        (Created, PendingPayment)
            | (PendingPayment, PaymentConfirmed)
            | (PaymentConfirmed, ShowingInOverlay)
            | (ShowingInOverlay, Completed)
            | (Created | PendingPayment | PaymentConfirmed, Cancelled)
    )
}

/// Validates a requested transition.
///
/// - A terminal request answers every request with [`Decision::NoOp`].
/// - Asking for the status the request already has is a [`Decision::NoOp`].
/// - `PAYMENT_CONFIRMED` needs a non-empty transaction hash.
///
/// # Errors
///
/// Returns [`PaymentError::InvalidTransition`] carrying both statuses when the
/// edge is not in the graph or a confirmation lacks its hash.
pub fn decide(
    current: DonationStatus,
    requested: DonationStatus,
    transaction_hash: Option<&str>,
) -> Result<Decision, PaymentError> {
    if current.is_terminal() || current == requested {
        return Ok(Decision::NoOp);
    }
    if !is_edge(current, requested) {
        return Err(PaymentError::InvalidTransition {
            current,
            requested,
            reason: "not in transition table",
        });
    }
    if requested == DonationStatus::PaymentConfirmed
        && transaction_hash.is_none_or(|h| h.trim().is_empty())
    {
        return Err(PaymentError::InvalidTransition {
            current,
            requested,
            reason: "transaction hash required",
        });
    }
    Ok(Decision::Apply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use DonationStatus::*;

    #[test]
    fn test_forward_edges_apply() {
        assert_eq!(decide(Created, PendingPayment, None).unwrap(), Decision::Apply);
        assert_eq!(
            decide(PendingPayment, PaymentConfirmed, Some("0xabc")).unwrap(),
            Decision::Apply
        );
        assert_eq!(
            decide(PaymentConfirmed, ShowingInOverlay, None).unwrap(),
            Decision::Apply
        );
        assert_eq!(decide(ShowingInOverlay, Completed, None).unwrap(), Decision::Apply);
    }

    #[test]
    fn test_cancel_edges() {
        for from in [Created, PendingPayment, PaymentConfirmed] {
            assert_eq!(decide(from, Cancelled, None).unwrap(), Decision::Apply);
        }
        let err = decide(ShowingInOverlay, Cancelled, None).unwrap_err();
        assert!(matches!(
            err,
            PaymentError::InvalidTransition {
                current: ShowingInOverlay,
                requested: Cancelled,
                ..
            }
        ));
    }

    #[test]
    fn test_terminal_is_noop_for_any_target() {
        for target in DonationStatus::ALL {
            assert_eq!(decide(Completed, target, None).unwrap(), Decision::NoOp);
            assert_eq!(decide(Cancelled, target, Some("0x1")).unwrap(), Decision::NoOp);
        }
    }

    #[test]
    fn test_same_status_is_noop() {
        assert_eq!(
            decide(PendingPayment, PendingPayment, None).unwrap(),
            Decision::NoOp
        );
    }

    #[test]
    fn test_regression_and_skips_rejected() {
        assert!(decide(PaymentConfirmed, PendingPayment, None).is_err());
        assert!(decide(ShowingInOverlay, PaymentConfirmed, Some("0x1")).is_err());
        assert!(decide(Created, PaymentConfirmed, Some("0x1")).is_err());
        assert!(decide(PendingPayment, Completed, None).is_err());
        assert!(decide(Created, ShowingInOverlay, None).is_err());
    }

    #[test]
    fn test_confirmation_requires_hash() {
        let err = decide(PendingPayment, PaymentConfirmed, None).unwrap_err();
        assert!(err.to_string().contains("transaction hash required"));
        assert!(decide(PendingPayment, PaymentConfirmed, Some("  ")).is_err());
    }

    #[test]
    fn test_every_edge_moves_forward() {
        for from in DonationStatus::ALL {
            for to in DonationStatus::ALL {
                if is_edge(from, to) {
                    assert!(to > from, "{from} -> {to} regresses");
                }
            }
        }
    }
}
