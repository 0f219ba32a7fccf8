use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `payload` when a key is configured, plain SHA-256 otherwise.
pub fn content_digest(payload: &[u8], key: Option<&[u8]>) -> String {
    match key {
        Some(key) => {
            let mut mac = match HmacSha256::new_from_slice(key) {
                Ok(mac) => mac,
                // HMAC accepts keys of any length.
                Err(_) => return hex::encode(Sha256::digest(payload)),
            };
            mac.update(payload);
            hex::encode(mac.finalize().into_bytes())
        }
        None => hex::encode(Sha256::digest(payload)),
    }
}

pub fn digest_matches(payload: &[u8], key: Option<&[u8]>, expected: &str) -> bool {
    content_digest(payload, key).eq_ignore_ascii_case(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_and_unkeyed_digests_differ() {
        let plain = content_digest(b"record", None);
        let keyed = content_digest(b"record", Some(b"k"));
        assert_eq!(plain.len(), 64);
        assert_ne!(plain, keyed);
        assert!(digest_matches(b"record", Some(b"k"), &keyed));
        assert!(!digest_matches(b"record!", Some(b"k"), &keyed));
    }
}
