//! Opaque secrets: refresh, verification, and reset tokens.
//!
//! Clients receive the base64 plaintext; stores only ever see the SHA-256
//! digest returned by [`digest`].

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Random bytes in a refresh token before encoding.
pub const REFRESH_TOKEN_BYTES: usize = 64;

/// Random bytes in email verification and password reset tokens.
pub const SINGLE_USE_TOKEN_BYTES: usize = 32;

/// Generate a refresh token: 64 random bytes, standard base64.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// Generate a URL-safe single-use token for links sent by email.
pub fn generate_url_token() -> String {
    let mut bytes = [0u8; SINGLE_USE_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex digest of a token, used as its storage and lookup key.
pub fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_token_decodes_to_64_bytes() {
        let token = generate_refresh_token();
        let raw = STANDARD.decode(&token).unwrap();
        assert_eq!(raw.len(), REFRESH_TOKEN_BYTES);
    }

    #[test]
    fn url_token_is_url_safe() {
        let token = generate_url_token();
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "token contains non-URL-safe chars: {token}"
        );
        assert_eq!(URL_SAFE_NO_PAD.decode(&token).unwrap().len(), 32);
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(generate_refresh_token(), generate_refresh_token());
        assert_ne!(generate_url_token(), generate_url_token());
    }

    #[test]
    fn digest_is_stable_hex() {
        let a = digest("abc");
        assert_eq!(
            a,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest("abc"), a);
        assert_ne!(digest("abd"), a);
    }
}
