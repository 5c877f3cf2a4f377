//! SHA-256 hashing and keyed HMAC-SHA-256.

use hmac::{Hmac, Mac};
use meridian_types::Sha256Digest;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of `bytes`, branded as a [`Sha256Digest`].
pub fn sha256(bytes: &[u8]) -> Sha256Digest {
    let digest = Sha256::digest(bytes);
    Sha256Digest::from_hex(hex_encode(&digest))
}

/// Compute an HMAC-SHA-256 tag over `bytes` keyed by `key`.
pub fn hmac_sign(key: &[u8], bytes: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(bytes);
    mac.finalize().into_bytes().to_vec()
}

/// Verify an HMAC-SHA-256 tag in constant time with respect to the tag
/// bytes. Returns `false` on any mismatch, including length mismatch.
pub fn hmac_verify(key: &[u8], bytes: &[u8], tag: &[u8]) -> bool {
    let expected = hmac_sign(key, bytes);
    constant_time_eq(&expected, tag)
}

/// Constant-time byte comparison, exposed directly for callers that already
/// hold both tags (e.g. re-signing comparisons in tests).
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_is_deterministic() {
        assert_eq!(sha256(b"hello"), sha256(b"hello"));
        assert_ne!(sha256(b"hello"), sha256(b"world"));
    }

    #[test]
    fn sha256_matches_known_vector() {
        // SHA-256("") = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        let digest = sha256(b"");
        assert_eq!(
            digest.hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hmac_sign_then_verify_round_trips() {
        let key = b"secret-key-material";
        let tag = hmac_sign(key, b"payload");
        assert!(hmac_verify(key, b"payload", &tag));
        assert!(!hmac_verify(key, b"tampered", &tag));
        assert!(!hmac_verify(b"wrong-key", b"payload", &tag));
    }

    #[test]
    fn constant_time_eq_rejects_length_mismatch() {
        assert!(!constant_time_eq(b"short", b"longer-string"));
    }

    #[test]
    fn re_signing_identical_bytes_yields_identical_tags() {
        let key = b"k";
        let a = hmac_sign(key, b"same-payload");
        let b = hmac_sign(key, b"same-payload");
        assert_eq!(a, b);
    }
}
