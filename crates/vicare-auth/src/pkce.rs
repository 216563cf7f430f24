//! PKCE (Proof Key for Code Exchange) implementation per RFC 7636
//!
//! Generates the code verifier and S256 challenge used during the OAuth
//! authorization flow. The verifier stays in memory for the duration of one
//! attempt and is sent during token exchange; the challenge is included in the
//! authorization URL so the provider can tie the exchange to this client.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// Verifier and its derived challenge for one authorization attempt.
#[derive(Debug)]
pub struct PkcePair {
    pub verifier: Secret<String>,
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh verifier and compute its challenge.
    pub fn generate() -> Self {
        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        Self {
            verifier: Secret::new(verifier),
            challenge,
        }
    }
}

/// Generate a cryptographically random PKCE code verifier.
///
/// 32 random bytes (256 bits) encoded as URL-safe base64 without padding,
/// which yields 43 characters, the minimum length RFC 7636 allows.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Build the authorization URL the user has to open.
///
/// Query values are form-encoded, so the redirect URI and the space-separated
/// scope arrive at the provider intact.
pub fn build_authorization_url(
    config: &AuthConfig,
    redirect_uri: &str,
    challenge: &str,
) -> Result<String> {
    let url = reqwest::Url::parse_with_params(
        &config.authorize_endpoint,
        &[
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("scope", config.scope.as_str()),
            ("response_type", "code"),
            ("code_challenge_method", "S256"),
            ("code_challenge", challenge),
        ],
    )
    .map_err(|e| Error::InvalidEndpoint(format!("{}: {e}", config.authorize_endpoint)))?;
    Ok(url.into())
}
