//! Payment request nonces.
//!
//! A nonce is 128 bits from the thread-local CSPRNG, base58-encoded so it can
//! travel in URLs, memos and QR codes without escaping. Uniqueness across the
//! registry is still checked at insertion time.

/// Number of random bytes in a nonce.
pub const NONCE_BYTES: usize = 16;

/// Generates a fresh random nonce.
#[must_use]
pub fn generate() -> String {
    let bytes: [u8; NONCE_BYTES] = rand::random();
    bs58::encode(bytes).into_string()
}

/// Whether `s` could be a nonce produced by [`generate`].
#[must_use]
pub fn is_well_formed(s: &str) -> bool {
    bs58::decode(s)
        .into_vec()
        .is_ok_and(|bytes| bytes.len() == NONCE_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ten_thousand_nonces_are_distinct() {
        let nonces: HashSet<String> = (0..10_000).map(|_| generate()).collect();
        assert_eq!(nonces.len(), 10_000);
    }

    #[test]
    fn test_generated_nonce_is_url_safe() {
        let nonce = generate();
        assert!(is_well_formed(&nonce));
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_rejects_foreign_strings() {
        assert!(!is_well_formed("0OIl"));
        assert!(!is_well_formed("abc"));
        assert!(!is_well_formed(""));
    }
}
