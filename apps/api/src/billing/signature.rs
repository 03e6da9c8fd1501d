//! Webhook signature verification.
//!
//! The billing provider signs each delivery with
//! `Stripe-Signature: t=<unix>,v1=<hex hmac>` where the MAC is
//! HMAC-SHA256 over `"{t}.{raw_body}"`. Verification happens before any
//! parsing; a failure is a transport-level rejection and never recorded as
//! a webhook event.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted clock skew between the signed timestamp and now.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub v1: String,
}

/// Parses a `t=...,v1=...` signature header. Unknown key-value pairs are
/// ignored; missing `t` or `v1` is an error.
pub fn parse_signature_header(header: &str) -> Result<SignatureHeader, String> {
    let mut timestamp = None;
    let mut v1 = None;

    for part in header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(value)) => {
                timestamp = value.parse::<i64>().ok();
            }
            (Some("v1"), Some(value)) => {
                v1 = Some(value.to_string());
            }
            _ => {}
        }
    }

    match (timestamp, v1) {
        (Some(timestamp), Some(v1)) => Ok(SignatureHeader { timestamp, v1 }),
        (None, _) => Err("missing or malformed timestamp".to_string()),
        (_, None) => Err("missing v1 signature".to_string()),
    }
}

/// Verifies a signed payload against the shared secret.
///
/// `now_unix` is injected by the caller so the tolerance window is testable.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now_unix: i64,
) -> Result<(), String> {
    let parsed = parse_signature_header(header)?;

    if (now_unix - parsed.timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(format!(
            "timestamp outside tolerance: signed at {}, now {}",
            parsed.timestamp, now_unix
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| "invalid signing secret".to_string())?;
    mac.update(parsed.timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let sig_bytes = hex::decode(&parsed.v1).map_err(|_| "signature is not hex".to_string())?;

    mac.verify_slice(&sig_bytes)
        .map_err(|_| "signature mismatch".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let sig = hex::encode(mac.finalize().into_bytes());
        format!("t={timestamp},v1={sig}")
    }

    #[test]
    fn test_parse_header_roundtrip() {
        let parsed = parse_signature_header("t=1700000000,v1=deadbeef").unwrap();
        assert_eq!(parsed.timestamp, 1_700_000_000);
        assert_eq!(parsed.v1, "deadbeef");
    }

    #[test]
    fn test_parse_header_ignores_unknown_pairs() {
        let parsed = parse_signature_header("t=5,v0=ignored,v1=abc").unwrap();
        assert_eq!(parsed.timestamp, 5);
        assert_eq!(parsed.v1, "abc");
    }

    #[test]
    fn test_parse_header_missing_timestamp() {
        assert!(parse_signature_header("v1=abc").is_err());
    }

    #[test]
    fn test_parse_header_missing_signature() {
        assert!(parse_signature_header("t=5").is_err());
    }

    #[test]
    fn test_verify_valid_signature() {
        let payload = br#"{"id":"evt_1"}"#;
        let secret = "whsec_test";
        let now = 1_700_000_000;
        let header = sign(payload, secret, now);

        assert!(verify_signature(payload, &header, secret, now).is_ok());
    }

    #[test]
    fn test_verify_wrong_secret_fails() {
        let payload = b"payload";
        let now = 1_700_000_000;
        let header = sign(payload, "whsec_right", now);

        assert!(verify_signature(payload, &header, "whsec_wrong", now).is_err());
    }

    #[test]
    fn test_verify_tampered_payload_fails() {
        let secret = "whsec_test";
        let now = 1_700_000_000;
        let header = sign(b"original", secret, now);

        assert!(verify_signature(b"tampered", &header, secret, now).is_err());
    }

    #[test]
    fn test_verify_stale_timestamp_fails() {
        let payload = b"payload";
        let secret = "whsec_test";
        let signed_at = 1_700_000_000;
        let header = sign(payload, secret, signed_at);

        let too_late = signed_at + SIGNATURE_TOLERANCE_SECS + 1;
        assert!(verify_signature(payload, &header, secret, too_late).is_err());
        let in_time = signed_at + SIGNATURE_TOLERANCE_SECS - 1;
        assert!(verify_signature(payload, &header, secret, in_time).is_ok());
    }

    #[test]
    fn test_verify_non_hex_signature_fails() {
        let now = 1_700_000_000;
        assert!(verify_signature(b"x", &format!("t={now},v1=zzzz"), "s", now).is_err());
    }
}
