use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Generate a timestamped HMAC-SHA256 signature.
///
/// Format: hex(HMAC-SHA256("<timestamp>.<raw body>", secret))
///
/// The body is signed as raw bytes; callers must pass exactly what was
/// received on the wire.
pub fn generate_signature(
    secret: &str,
    timestamp: i64,
    body: &[u8],
) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a timestamped HMAC-SHA256 signature using constant-time comparison.
pub fn verify_signature(
    secret: &str,
    timestamp: i64,
    body: &[u8],
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected_signature = generate_signature(secret, timestamp, body)?;
    Ok(constant_time_eq(expected_signature.as_bytes(), signature.as_bytes()))
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &[u8] = br#"{"type":"payment_intent.succeeded"}"#;

    #[test]
    fn test_signature_generation_and_verification() {
        let timestamp = 1_700_000_000;

        let signature = generate_signature(SECRET, timestamp, BODY).unwrap();
        assert_eq!(signature.len(), 64);

        assert!(verify_signature(SECRET, timestamp, BODY, &signature).unwrap());
    }

    #[test]
    fn test_invalid_signature() {
        let timestamp = 1_700_000_000;

        let signature = generate_signature(SECRET, timestamp, BODY).unwrap();
        let flipped = if signature.starts_with('a') { "b" } else { "a" };
        let invalid_signature = format!("{}{}", flipped, &signature[1..]);

        assert!(!verify_signature(SECRET, timestamp, BODY, &invalid_signature).unwrap());
        assert!(!verify_signature(SECRET, timestamp, BODY, "short").unwrap());
    }

    #[test]
    fn test_tampered_body_or_timestamp() {
        let timestamp = 1_700_000_000;
        let signature = generate_signature(SECRET, timestamp, BODY).unwrap();

        let modified_body = br#"{"type":"payment_intent.succeeded","x":1}"#;
        assert!(!verify_signature(SECRET, timestamp, modified_body, &signature).unwrap());
        assert!(!verify_signature(SECRET, timestamp + 1, BODY, &signature).unwrap());
    }
}
