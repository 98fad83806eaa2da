//! HTTP error responses.

use axum::extract::rejection::JsonRejection;
use http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tipstream::PaymentError;
use tipstream::error::ErrorKind;

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The engine rejected the call.
    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// The request body is not valid JSON for the route.
    #[error("invalid request body: {0}")]
    InvalidBody(#[from] JsonRejection),
}

impl ServerError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Payment(err) => match err.kind() {
                ErrorKind::InvalidTerms => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::InvalidTransition => StatusCode::CONFLICT,
                ErrorKind::ChainUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::ChainQueryError => StatusCode::BAD_GATEWAY,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::InvalidBody(rejection) => rejection.status(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Payment(PaymentError::InvalidTransition {
                current, requested, ..
            }) => json!({
                "error": ErrorKind::InvalidTransition,
                "message": self.to_string(),
                "current_status": current,
                "requested_status": requested,
            }),
            Self::Payment(err) => json!({
                "error": err.kind(),
                "message": self.to_string(),
            }),
            Self::InvalidBody(_) => json!({
                "error": "invalid_body",
                "message": self.to_string(),
            }),
        };
        if status.is_server_error() {
            tracing::warn!(%status, error = %self, "Request failed");
        }
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tipstream::DonationStatus;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (PaymentError::invalid_terms("x"), StatusCode::BAD_REQUEST),
            (PaymentError::not_found("x"), StatusCode::NOT_FOUND),
            (
                PaymentError::InvalidTransition {
                    current: DonationStatus::Completed,
                    requested: DonationStatus::Created,
                    reason: "regression",
                },
                StatusCode::CONFLICT,
            ),
            (PaymentError::ChainUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (PaymentError::ChainQueryError("x".into()), StatusCode::BAD_GATEWAY),
            (PaymentError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status(), status);
        }
    }
}
