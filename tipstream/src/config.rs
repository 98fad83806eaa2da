//! Engine configuration.
//!
//! Every field has a default, so an empty `[engine]` table (or none at all)
//! yields a working configuration:
//!
//! ```toml
//! [engine]
//! payment_ttl_secs = 900
//! poll_interval_secs = 30
//! adapter_timeout_secs = 10
//! backoff_base_secs = 5
//! backoff_max_secs = 300
//! slippage_tolerance = "0.005"
//! public_base_url = "http://localhost:50052"
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of the payment engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lifetime of a payment request before it is cancelled as expired.
    pub payment_ttl_secs: u64,
    /// Delay between two poller cycles.
    pub poll_interval_secs: u64,
    /// Upper bound on a single chain adapter call.
    pub adapter_timeout_secs: u64,
    /// First backoff delay after an adapter failure.
    pub backoff_base_secs: u64,
    /// Backoff cap.
    pub backoff_max_secs: u64,
    /// Fraction an observed amount may fall short by on memo-capable
    /// networks.
    pub slippage_tolerance: Decimal,
    /// Base of the public QR image URL handed to donors.
    pub public_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            payment_ttl_secs: 15 * 60,
            poll_interval_secs: 30,
            adapter_timeout_secs: 10,
            backoff_base_secs: 5,
            backoff_max_secs: 300,
            slippage_tolerance: Decimal::new(5, 3),
            public_base_url: "http://localhost:50052".to_owned(),
        }
    }
}

impl EngineConfig {
    /// [`EngineConfig::poll_interval_secs`] as a [`Duration`], at least one
    /// second.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// [`EngineConfig::adapter_timeout_secs`] as a [`Duration`].
    #[must_use]
    pub const fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    /// QR image URL for a nonce.
    #[must_use]
    pub fn qr_code_url(&self, nonce: &str) -> String {
        format!("{}/qr/{nonce}", self.public_base_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_table() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.payment_ttl_secs, 900);
        assert_eq!(config.slippage_tolerance.to_string(), "0.005");
    }

    #[test]
    fn test_partial_override() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"poll_interval_secs": 5, "slippage_tolerance": "0.01"}"#)
                .unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.slippage_tolerance, Decimal::new(1, 2));
        assert_eq!(config.backoff_max_secs, 300);
    }

    #[test]
    fn test_qr_code_url_trims_slash() {
        let config = EngineConfig {
            public_base_url: "http://payment-service:50052/".to_owned(),
            ..EngineConfig::default()
        };
        assert_eq!(
            config.qr_code_url("abc"),
            "http://payment-service:50052/qr/abc"
        );
    }
}
