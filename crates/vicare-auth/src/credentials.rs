//! In-memory credential state
//!
//! Holds the current access and refresh token for the session. Written only
//! by successful token endpoint responses (initial exchange and refresh) and
//! read by every authorized call. Tokens are wrapped in `Secret` so a stray
//! `Debug` never prints them.

use std::time::Duration;

use common::Secret;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::token::TokenResponse;

#[derive(Debug, Default)]
struct Tokens {
    access: Option<Secret<String>>,
    refresh: Option<Secret<String>>,
    expires_at: Option<Instant>,
}

/// Current access/refresh tokens shared by the orchestrator, the refresher and
/// the authorized request path.
#[derive(Debug, Default)]
pub struct CredentialState {
    tokens: RwLock<Tokens>,
}

impl CredentialState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn access_token(&self) -> Option<String> {
        let tokens = self.tokens.read().await;
        tokens.access.as_ref().map(|t| t.expose().clone())
    }

    /// Replace the access token. The previous expiry no longer applies.
    pub async fn set_access_token(&self, token: impl Into<String>) {
        let mut tokens = self.tokens.write().await;
        tokens.access = Some(Secret::new(token.into()));
        tokens.expires_at = None;
    }

    pub async fn refresh_token(&self) -> Option<String> {
        let tokens = self.tokens.read().await;
        tokens.refresh.as_ref().map(|t| t.expose().clone())
    }

    pub async fn set_refresh_token(&self, token: impl Into<String>) {
        self.tokens.write().await.refresh = Some(Secret::new(token.into()));
    }

    /// Whether the current access token is exactly `token`.
    pub async fn access_token_is(&self, token: &str) -> bool {
        let tokens = self.tokens.read().await;
        tokens.access.as_ref().is_some_and(|t| t.matches(token))
    }

    /// When the current access token expires, if the provider said so.
    pub async fn expires_at(&self) -> Option<Instant> {
        self.tokens.read().await.expires_at
    }

    pub async fn is_authenticated(&self) -> bool {
        self.tokens.read().await.access.is_some()
    }

    /// Store the result of an authorization code exchange (both tokens).
    pub async fn store_authorization(&self, response: &TokenResponse) {
        let mut tokens = self.tokens.write().await;
        tokens.access = Some(Secret::new(response.access_token.clone()));
        if let Some(refresh) = &response.refresh_token {
            tokens.refresh = Some(Secret::new(refresh.clone()));
        }
        tokens.expires_at = expiry(response);
    }

    /// Store the result of a refresh. The refresh token is kept as is.
    pub async fn store_refreshed(&self, response: &TokenResponse) {
        let mut tokens = self.tokens.write().await;
        tokens.access = Some(Secret::new(response.access_token.clone()));
        tokens.expires_at = expiry(response);
    }
}

/// An `expires_in` too large to represent counts as no known expiry.
fn expiry(response: &TokenResponse) -> Option<Instant> {
    response
        .expires_in
        .and_then(|secs| Instant::now().checked_add(Duration::from_secs(secs)))
}
