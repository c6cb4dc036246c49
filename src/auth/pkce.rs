//! PKCE S256 challenge generation
//!
//! Implements the Proof Key for Code Exchange extension (RFC 7636) with the
//! `S256` method used by the vendor identity provider.
//!
//! 1. A high-entropy random `code_verifier` is generated per login attempt.
//! 2. Its SHA-256 digest, base64url-encoded, is sent to the authorization
//!    endpoint as `code_challenge`.
//! 3. The verifier itself is only ever sent to the token endpoint, proving
//!    possession when the authorization code is exchanged.

use base64::Engine as _;
use sha2::{Digest, Sha256};

/// The only challenge method supported by this crate.
pub const METHOD_S256: &str = "S256";

/// A PKCE S256 challenge pair.
///
/// The verifier must be kept for exactly one login attempt and dropped once
/// the token exchange completes.
///
/// # Examples
///
/// ```
/// use airlink::auth::pkce::{self, PkceChallenge};
///
/// let pkce: PkceChallenge = pkce::generate();
/// assert_eq!(pkce.method, "S256");
/// assert_eq!(pkce.verifier.len(), 43);
/// assert_eq!(pkce.challenge, pkce::challenge_for(&pkce.verifier));
/// ```
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// 32 random bytes, base64url without padding (43 characters)
    pub verifier: String,

    /// base64url (no padding) SHA-256 digest of the verifier's UTF-8 bytes
    pub challenge: String,

    /// Always [`METHOD_S256`]
    pub method: String,
}

/// Generates a fresh PKCE S256 challenge pair.
pub fn generate() -> PkceChallenge {
    use rand::RngCore as _;

    let mut random_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut random_bytes);

    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes);
    let challenge = challenge_for(&verifier);

    PkceChallenge {
        verifier,
        challenge,
        method: METHOD_S256.to_string(),
    }
}

/// Derives the S256 challenge for a verifier:
/// `BASE64URL(SHA256(ASCII(code_verifier)))`.
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
}
