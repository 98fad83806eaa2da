//! Solana RPC access.
//!
//! Node calls go through the nonblocking [`RpcClient`] of `solana-client`.
//! This module builds clients and sorts their errors into the engine's
//! transient and permanent classes.

use std::time::Duration;

use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::RpcError;
use solana_commitment_config::CommitmentConfig;
use tipstream::chain::ChainError;

/// Node error codes that signal overload or a lagging node.
const RETRYABLE_CODES: &[i64] = &[429, -32005, -32004, -32014, -32016];

/// Per-request timeout used by [`connect`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for `url` reading at `confirmed` commitment.
#[must_use]
pub fn connect(url: &str, timeout: Duration) -> RpcClient {
    RpcClient::new_with_timeout_and_commitment(
        url.to_owned(),
        timeout,
        CommitmentConfig::confirmed(),
    )
}

/// Maps a client error to [`ChainError`].
///
/// Transport failures, 429 and 5xx answers, and node-health error codes are
/// [`ChainError::Unavailable`]; everything else is a query error.
#[must_use]
pub fn classify(err: &ClientError) -> ChainError {
    let retryable = match err.kind() {
        ClientErrorKind::Io(_) => true,
        ClientErrorKind::Reqwest(e) => e.status().is_none_or(|status| {
            status.is_server_error() || status.as_u16() == 429
        }),
        ClientErrorKind::RpcError(RpcError::RpcResponseError { code, .. }) => {
            RETRYABLE_CODES.contains(code)
        }
        ClientErrorKind::RpcError(RpcError::RpcRequestError(_)) => true,
        _ => false,
    };
    if retryable {
        ChainError::unavailable(err)
    } else {
        ChainError::query(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use solana_pubkey::Pubkey;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn node_error(code: i64) -> impl Fn(&Request) -> ResponseTemplate {
        move |req: &Request| {
            let body: Value = serde_json::from_slice(&req.body).unwrap();
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": body["id"],
                "error": {"code": code, "message": "node says no"}
            }))
        }
    }

    async fn balance_error(server: &MockServer) -> ChainError {
        let client = connect(&server.uri(), Duration::from_secs(5));
        let err = client.get_balance(&Pubkey::new_from_array([7; 32])).await.unwrap_err();
        classify(&err)
    }

    #[tokio::test]
    async fn test_invalid_params_is_query_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(node_error(-32602))
            .mount(&server)
            .await;
        assert!(matches!(balance_error(&server).await, ChainError::Query(_)));
    }

    #[tokio::test]
    async fn test_unhealthy_node_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(node_error(-32005))
            .mount(&server)
            .await;
        assert!(matches!(balance_error(&server).await, ChainError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_server_errors_are_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        assert!(matches!(balance_error(&server).await, ChainError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_unavailable() {
        let client = connect("http://127.0.0.1:9", Duration::from_secs(2));
        let err = client.get_balance(&Pubkey::new_from_array([7; 32])).await.unwrap_err();
        assert!(matches!(classify(&err), ChainError::Unavailable(_)));
    }
}
