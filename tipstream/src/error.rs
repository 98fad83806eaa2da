//! Error types for the payment engine.
//!
//! Facade-level errors are returned to callers as structured values so they
//! can tell "retry later" ([`PaymentError::ChainUnavailable`]) apart from
//! "this request is gone" ([`PaymentError::NotFound`]). Poller-level failures
//! never reach callers; see [`crate::chain::ChainError`].

use crate::chain::ChainError;
use crate::qr::QrError;
use crate::status::DonationStatus;

/// Machine-readable classification of a [`PaymentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad create input, not retried.
    InvalidTerms,
    /// Unknown nonce or payment URL.
    NotFound,
    /// Illegal state change.
    InvalidTransition,
    /// Transient chain failure.
    ChainUnavailable,
    /// Chain returned malformed or unexpected data.
    ChainQueryError,
    /// Failure inside the engine itself.
    Internal,
}

/// Base error type for payment engine operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentError {
    /// The payment terms were rejected at creation time.
    #[error("invalid payment terms: {0}")]
    InvalidTerms(String),

    /// No payment request exists for the given handle.
    #[error("payment request not found: {0}")]
    NotFound(String),

    /// The requested status change is not in the transition table.
    #[error("invalid transition from {current} to {requested}: {reason}")]
    InvalidTransition {
        /// Status the request is in.
        current: DonationStatus,
        /// Status the caller asked for.
        requested: DonationStatus,
        /// Why the transition was refused.
        reason: &'static str,
    },

    /// Transient chain adapter failure.
    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),

    /// The chain adapter returned data it could not interpret.
    #[error("chain query error: {0}")]
    ChainQueryError(String),

    /// The engine failed to produce a derived artifact.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    /// Creates an [`PaymentError::InvalidTerms`] error.
    #[must_use]
    pub fn invalid_terms(reason: impl Into<String>) -> Self {
        Self::InvalidTerms(reason.into())
    }

    /// Creates a [`PaymentError::NotFound`] error.
    #[must_use]
    pub fn not_found(handle: impl Into<String>) -> Self {
        Self::NotFound(handle.into())
    }

    /// Returns the machine-readable kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTerms(_) => ErrorKind::InvalidTerms,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::ChainUnavailable(_) => ErrorKind::ChainUnavailable,
            Self::ChainQueryError(_) => ErrorKind::ChainQueryError,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the same call later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ChainUnavailable(_))
    }
}

impl From<QrError> for PaymentError {
    fn from(err: QrError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<ChainError> for PaymentError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Unavailable(msg) => Self::ChainUnavailable(msg),
            ChainError::Query(msg) => Self::ChainQueryError(msg),
        }
    }
}
