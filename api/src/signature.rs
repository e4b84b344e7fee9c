//! Webhook signature and token verification.
//!
//! Forge A signs the raw body with HMAC-SHA256 (`X-Hub-Signature-256:
//! sha256=<hex>`); forge B sends a shared token header. Both comparisons
//! re-hash each side with SHA-256 and compare the digests in constant time,
//! so neither length nor content leaks through timing.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Constant-time equality over re-hashed inputs.
pub fn timing_safe_eq(a: &[u8], b: &[u8]) -> bool {
    let da = Sha256::digest(a);
    let db = Sha256::digest(b);
    da.ct_eq(&db).into()
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    let out = mac.finalize().into_bytes();
    let mut hex = String::with_capacity(out.len() * 2);
    for b in out {
        hex.push_str(&format!("{b:02x}"));
    }
    hex
}

/// Verifies a forge-A signature header against the raw body.
pub fn verify_github_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(received) = header else {
        return false;
    };
    let received = received.strip_prefix("sha256=").unwrap_or(received);
    let expected = sign_body(secret, body);
    timing_safe_eq(expected.as_bytes(), received.as_bytes())
}

/// Verifies a forge-B token header against the configured secret.
pub fn verify_gitlab_token(secret: &str, header: Option<&str>) -> bool {
    let Some(received) = header else {
        return false;
    };
    timing_safe_eq(secret.as_bytes(), received.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "shared-secret";

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"action":"opened"}"#;
        let header = format!("sha256={}", sign_body(SECRET, body));
        assert!(verify_github_signature(SECRET, body, Some(&header)));
    }

    #[test]
    fn one_byte_of_tamper_rejects() {
        let body = br#"{"action":"opened"}"#;
        let header = format!("sha256={}", sign_body(SECRET, body));

        let mut tampered_sig = header.clone().into_bytes();
        let last = tampered_sig.len() - 1;
        tampered_sig[last] = if tampered_sig[last] == b'0' { b'1' } else { b'0' };
        let tampered_sig = String::from_utf8(tampered_sig).unwrap();
        assert!(!verify_github_signature(SECRET, body, Some(&tampered_sig)));

        let tampered_body = br#"{"action":"opened!"}"#;
        assert!(!verify_github_signature(SECRET, tampered_body, Some(&header)));
    }

    #[test]
    fn missing_header_rejects() {
        assert!(!verify_github_signature(SECRET, b"x", None));
        assert!(!verify_gitlab_token(SECRET, None));
    }

    #[test]
    fn token_comparison_handles_length_mismatch() {
        assert!(verify_gitlab_token("secret-token", Some("secret-token")));
        assert!(!verify_gitlab_token("secret-token", Some("wrong-token")));
        assert!(!verify_gitlab_token("secret-token", Some("secret-token-longer")));
        assert!(!verify_gitlab_token("secret-token", Some("")));
    }
}
