//! Access-token inspection.
//!
//! Only the `exp` claim is read; signatures are the server's business.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Returns the `exp` claim (seconds since epoch) of a JWT, if decodable.
pub fn expires_at(token: &str) -> Option<u64> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let json: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    json.get("exp").and_then(serde_json::Value::as_u64)
}

/// True if the token expires within `skew` from now.
///
/// A token without a readable `exp` counts as expired.
pub fn expires_within(token: &str, skew: Duration) -> bool {
    expires_within_at(token, skew, now_secs())
}

fn expires_within_at(token: &str, skew: Duration, now: u64) -> bool {
    match expires_at(token) {
        Some(exp) => exp.saturating_sub(now) <= skew.as_secs(),
        None => true,
    }
}

/// True if the token is already past its expiry.
pub fn is_expired(token: &str) -> bool {
    expires_within(token, Duration::ZERO)
}

/// Returns a masked version of a token for display (first 12 chars + ...).
pub fn mask_token(token: &str) -> String {
    if token.len() <= 16 || !token.is_char_boundary(12) {
        return "***".to_string();
    }
    format!("{}...", &token[..12])
}

#[cfg(test)]
pub(crate) fn encode_for_test(exp: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"1","exp":{exp}}}"#));
    format!("{header}.{payload}.signature")
}

/// Token expiring `secs` seconds from now.
#[cfg(test)]
pub(crate) fn token_expiring_in(secs: u64) -> String {
    encode_for_test(now_secs() + secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_at_reads_claim() {
        assert_eq!(expires_at(&encode_for_test(1_700_000_000)), Some(1_700_000_000));
    }

    #[test]
    fn test_undecodable_token_is_expired() {
        assert_eq!(expires_at("opaque-token"), None);
        assert_eq!(expires_at("a.!!!.c"), None);
        assert!(is_expired("opaque-token"));
    }

    #[test]
    fn test_expires_within_skew() {
        let token = encode_for_test(1_000);
        let skew = Duration::from_secs(60);

        assert!(!expires_within_at(&token, skew, 900));
        assert!(expires_within_at(&token, skew, 940));
        assert!(expires_within_at(&token, skew, 2_000));
    }

    #[test]
    fn test_fresh_token_not_expired() {
        assert!(!is_expired(&token_expiring_in(3600)));
    }

    /// Test: Token masking.
    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("eyJhbGciOiJIUzI1NiJ9.payload"), "eyJhbGciOiJI...");
        assert_eq!(mask_token("short"), "***");
    }
}
