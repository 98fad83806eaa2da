//! RPC provider construction and error classification.

use std::num::NonZeroUsize;

use alloy_provider::{ProviderBuilder, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport::{RpcError, TransportError};
use alloy_transport_http::Http;
use tipstream::chain::ChainError;
use tower::ServiceBuilder;
use url::Url;

/// JSON-RPC error codes that mean "try again later" rather than "bad request".
const RETRYABLE_CODES: &[i64] = &[429, -32005, -32097];

/// Errors raised while building a provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// None of the configured endpoints use HTTP(S).
    #[error("no HTTP(S) RPC endpoint configured for {0}")]
    NoEndpoints(String),
}

/// Builds an RPC client from HTTP endpoints with optional per-endpoint
/// request-per-second limits.
///
/// Non-HTTP(S) URLs are skipped. Remaining endpoints are combined behind a
/// fallback transport that ranks them by health.
///
/// # Errors
///
/// Returns [`ProviderError::NoEndpoints`] if no HTTP(S) endpoint remains.
pub fn rpc_client(label: &str, endpoints: &[(Url, Option<u32>)]) -> Result<RpcClient, ProviderError> {
    let transports = endpoints
        .iter()
        .filter(|(url, _)| matches!(url.scheme(), "http" | "https"))
        .map(|(url, rate_limit)| {
            tracing::info!(network = label, rpc_url = %url, rate_limit = ?rate_limit, "Using HTTP transport");
            ServiceBuilder::new()
                .layer(ThrottleLayer::new(rate_limit.unwrap_or(u32::MAX)))
                .service(Http::new(url.clone()))
        })
        .collect::<Vec<_>>();
    let count =
        NonZeroUsize::new(transports.len()).ok_or_else(|| ProviderError::NoEndpoints(label.to_owned()))?;
    let fallback = ServiceBuilder::new()
        .layer(FallbackLayer::default().with_active_transport_count(count))
        .service(transports);
    Ok(RpcClient::new(fallback, false))
}

/// Builds a read-only provider over [`rpc_client`].
///
/// # Errors
///
/// Returns [`ProviderError::NoEndpoints`] if no HTTP(S) endpoint remains.
pub fn connect(label: &str, endpoints: &[(Url, Option<u32>)]) -> Result<RootProvider, ProviderError> {
    let client = rpc_client(label, endpoints)?;
    Ok(ProviderBuilder::default().connect_client(client))
}

/// Maps an RPC failure onto the engine's error classes.
///
/// Transport failures and rate limiting are [`ChainError::Unavailable`] so
/// the poller backs off. Anything the node answered with is a query error.
#[must_use]
pub fn classify(err: &TransportError) -> ChainError {
    match err {
        RpcError::Transport(kind) => ChainError::unavailable(kind),
        RpcError::ErrorResp(payload) if RETRYABLE_CODES.contains(&payload.code) => {
            ChainError::unavailable(payload)
        }
        other => ChainError::query(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_transport::TransportErrorKind;

    #[test]
    fn test_rejects_non_http_endpoints() {
        let ws = Url::parse("wss://node.example").unwrap();
        let err = rpc_client("ethereum", &[(ws, None)]).unwrap_err();
        assert!(matches!(err, ProviderError::NoEndpoints(n) if n == "ethereum"));
    }

    #[test]
    fn test_classify_transport_as_unavailable() {
        let err: TransportError = TransportErrorKind::backend_gone();
        assert!(matches!(classify(&err), ChainError::Unavailable(_)));
    }

    #[test]
    fn test_classify_node_errors() {
        let limited: TransportError = RpcError::ErrorResp(
            serde_json::from_str(r#"{"code":-32005,"message":"limit exceeded"}"#).unwrap(),
        );
        assert!(matches!(classify(&limited), ChainError::Unavailable(_)));

        let bad: TransportError = RpcError::ErrorResp(
            serde_json::from_str(r#"{"code":-32602,"message":"invalid params"}"#).unwrap(),
        );
        assert!(matches!(classify(&bad), ChainError::Query(_)));
    }
}
