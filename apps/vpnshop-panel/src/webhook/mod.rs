//! Inbound provider webhooks: signature checks, duplicate suppression and
//! payload normalization. The HTTP glue lives in `handlers::webhooks`.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

pub mod cryptopay;
pub mod dedup;
pub mod tribute;

type HmacSha256 = Hmac<Sha256>;

/// Constant-time check of `hex(hmac_sha256(body, secret))`.
pub fn verify_signature(secret: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Dedup key of a raw body.
pub fn body_digest(body: &[u8]) -> [u8; 32] {
    Sha256::digest(body).into()
}

/// Hex form of `body_digest`, stored with the purchase a delivery creates.
pub fn delivery_key(body: &[u8]) -> String {
    hex::encode(body_digest(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_signature() {
        let body = br#"{"name":"new_subscription"}"#;
        let sig = sign(b"secret", body);
        assert!(verify_signature(b"secret", body, &sig));
        assert!(verify_signature(b"secret", body, &sig.to_uppercase()));
    }

    #[test]
    fn rejects_altered_body_and_garbage() {
        let sig = sign(b"secret", b"{\"amount\":100}");
        assert!(!verify_signature(b"secret", b"{\"amount\":900}", &sig));
        assert!(!verify_signature(b"other", b"{\"amount\":100}", &sig));
        assert!(!verify_signature(b"secret", b"{\"amount\":100}", "not-hex"));
        assert!(!verify_signature(b"secret", b"{\"amount\":100}", ""));
    }

    #[test]
    fn digest_depends_on_every_byte() {
        assert_eq!(body_digest(b"a"), body_digest(b"a"));
        assert_ne!(body_digest(b"a"), body_digest(b"a "));
        assert_eq!(delivery_key(b"a").len(), 64);
    }
}
