//! OAuth token exchange and refresh
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (completes the browser flow)
//! 2. Token refresh (renews an expired access token)
//!
//! Both POST form bodies to the token endpoint through a plain HTTP client.
//! They never go through the authorized request path: a refresh that could
//! itself trigger a refresh would recurse.

use std::fmt;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// Response from the token endpoint for both exchange and refresh.
///
/// Refresh responses do not carry a new `refresh_token`, so it is optional.
/// `expires_in` is a delta in seconds from the response time.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Which call a token endpoint response belongs to; picks the error variant.
#[derive(Debug, Clone, Copy)]
enum Grant {
    AuthorizationCode,
    RefreshToken,
}

impl Grant {
    fn failure(self, status: StatusCode, body: String) -> Error {
        let status = status.as_u16();
        match self {
            Grant::AuthorizationCode => Error::AuthorizationExchangeFailed { status, body },
            Grant::RefreshToken => Error::TokenRefreshFailed { status, body },
        }
    }
}

/// Unauthenticated client for the identity provider's token endpoint.
#[derive(Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    endpoint: String,
    client_id: String,
}

impl TokenClient {
    pub fn new(http: reqwest::Client, config: &AuthConfig) -> Self {
        Self {
            http,
            endpoint: config.token_endpoint.clone(),
            client_id: config.client_id.clone(),
        }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// `redirect_uri` must be the exact value sent in the authorization URL,
    /// and `verifier` the secret behind the challenge sent there.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        debug!("exchanging authorization code for access token");
        self.post(
            Grant::AuthorizationCode,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
                ("code_verifier", verifier),
                ("code", code),
            ],
        )
        .await
    }

    /// Obtain a new access token with a refresh token.
    pub async fn refresh_token(&self, refresh: &str) -> Result<TokenResponse> {
        debug!("refreshing access token");
        self.post(
            Grant::RefreshToken,
            &[
                ("client_id", self.client_id.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh),
            ],
        )
        .await
    }

    async fn post(&self, grant: Grant, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| Error::Http(format!("token endpoint request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("reading token endpoint response: {e}")))?;

        if !status.is_success() {
            return Err(grant.failure(status, body));
        }

        // A 2xx without the expected fields is as unusable as an error status.
        serde_json::from_str::<TokenResponse>(&body).map_err(|_| grant.failure(status, body))
    }
}
