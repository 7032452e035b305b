//! Callback authenticity checks shared by the provider adapters.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Lowercase hex MD5 of `input`.
pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Lowercase hex HMAC-SHA256 of `message` keyed with `secret`.
pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Compares two hex digests in constant time, ignoring ASCII case.
pub fn digest_matches(expected: &str, provided: &str) -> bool {
    let provided = provided.trim().to_ascii_lowercase();
    !expected.is_empty() && expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Checks an `Authorization: Basic ...` header against the expected credentials.
pub fn basic_auth_matches(header: Option<&str>, user: &str, password: &str) -> bool {
    let Some(encoded) = header.and_then(|h| h.trim().strip_prefix("Basic ")) else {
        return false;
    };
    let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let expected = format!("{user}:{password}");
    expected.as_bytes().ct_eq(&decoded).into()
}

/// Builds the `Authorization` header value for Basic credentials.
pub fn basic_auth_header(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hex_known_vector() {
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_hmac_matches_ignoring_case() {
        let digest = hmac_sha256_hex("secret", "payload");
        assert_eq!(digest.len(), 64);
        assert!(digest_matches(&digest, &digest.to_uppercase()));
        assert!(!digest_matches(&digest, &hmac_sha256_hex("other", "payload")));
        assert!(!digest_matches(&digest, ""));
    }

    #[test]
    fn test_basic_auth() {
        let header = basic_auth_header("Paycom", "key-1");
        assert!(basic_auth_matches(Some(&header), "Paycom", "key-1"));
        assert!(!basic_auth_matches(Some(&header), "Paycom", "key-2"));
        assert!(!basic_auth_matches(Some("Bearer abc"), "Paycom", "key-1"));
        assert!(!basic_auth_matches(Some("Basic %%%"), "Paycom", "key-1"));
        assert!(!basic_auth_matches(None, "Paycom", "key-1"));
    }
}
