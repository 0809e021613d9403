//! PKCE (RFC 7636) values for the provider sign-in redirect.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

fn random_url_safe<const N: usize>() -> String {
    let bytes: [u8; N] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// 48 random bytes, base64url: 64 characters.
#[must_use]
pub fn generate_code_verifier() -> String {
    random_url_safe::<48>()
}

/// S256 challenge: `BASE64URL(SHA256(verifier))`.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// OAuth `state`, 16 random bytes.
#[must_use]
pub fn generate_state() -> String {
    random_url_safe::<16>()
}
