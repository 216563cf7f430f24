//! Authorized request wrapper
//!
//! Sends arbitrary API calls with the session's current Bearer token. When the
//! API answers that the token has expired, the token is refreshed and the same
//! call is sent again, at most `MAX_ATTEMPTS` times in total. Refreshes go
//! through the shared [`Refresher`], so concurrent calls hitting the same
//! expiry cause a single token endpoint call.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response};
use tracing::{debug, info, instrument, warn};
use vicare_auth::{CredentialState, Refresher};

use crate::error::{Error, Result};
use crate::expiry::is_expired_token;

/// Number of times a call is sent before giving up on a token that keeps
/// expiring.
pub const MAX_ATTEMPTS: u32 = 3;

/// Caller-supplied parts of a request. Kept around so the call can be resent
/// unchanged after a refresh.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// HTTP client that authorizes every call with the session's access token.
#[derive(Clone)]
pub struct AuthorizedClient {
    http: reqwest::Client,
    refresher: Arc<Refresher>,
}

impl AuthorizedClient {
    pub fn new(http: reqwest::Client, refresher: Arc<Refresher>) -> Self {
        Self { http, refresher }
    }

    pub fn credentials(&self) -> &Arc<CredentialState> {
        self.refresher.credentials()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.credentials().access_token().await
    }

    pub async fn set_access_token(&self, token: impl Into<String>) {
        self.credentials().set_access_token(token).await;
    }

    pub async fn set_refresh_token(&self, token: impl Into<String>) {
        self.credentials().set_refresh_token(token).await;
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        self.authorized_request(Method::GET, url, &RequestOptions::default(), 0)
            .await
    }

    /// Send an authorized request, refreshing the token on expiry.
    ///
    /// `attempt` is the number of sends already spent on this call; pass `0`.
    /// Successful (2xx) responses are returned with their body unread. Error
    /// responses other than an expired token become `Error::Api` right away.
    #[instrument(skip(self, options))]
    pub async fn authorized_request(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
        attempt: u32,
    ) -> Result<Response> {
        let mut attempt = attempt;
        let mut refreshes = 0;
        loop {
            if attempt >= MAX_ATTEMPTS {
                metrics::counter!("vicare_authorized_requests_total", "outcome" => "retry_exhausted")
                    .increment(1);
                warn!(attempts = attempt, refreshes, "giving up, access token keeps expiring");
                return Err(Error::RetryExhausted {
                    attempts: attempt,
                    refreshes,
                });
            }

            let token = self
                .credentials()
                .access_token()
                .await
                .ok_or(Error::MissingAccessToken)?;

            let response = self.send(&method, url, options, &token).await?;
            let status = response.status();
            if status.is_success() {
                metrics::counter!("vicare_authorized_requests_total", "outcome" => "success")
                    .increment(1);
                return Ok(response);
            }

            let body = response
                .text()
                .await
                .map_err(|e| Error::Http(format!("reading error response: {e}")))?;
            if !is_expired_token(&body) {
                metrics::counter!("vicare_authorized_requests_total", "outcome" => "api_error")
                    .increment(1);
                debug!(status = status.as_u16(), "API returned an error");
                return Err(Error::Api {
                    status: status.as_u16(),
                    body,
                });
            }

            info!(attempt, "access token expired, refreshing");
            self.refresher.refresh_stale(&token).await?;
            refreshes += 1;
            attempt += 1;
        }
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        options: &RequestOptions,
        token: &str,
    ) -> Result<Response> {
        let mut request = self
            .http
            .request(method.clone(), url)
            .headers(merge_headers(&options.headers, token)?);
        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }
        request
            .send()
            .await
            .map_err(|e| Error::Http(format!("request to {url} failed: {e}")))
    }
}

/// Caller headers win over defaults; `Authorization` is always ours.
fn merge_headers(caller: &HeaderMap, token: &str) -> Result<HeaderMap> {
    let mut headers = caller.clone();
    if !headers.contains_key(ACCEPT) {
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    }
    let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| Error::InvalidToken(e.to_string()))?;
    bearer.set_sensitive(true);
    headers.insert(AUTHORIZATION, bearer);
    Ok(headers)
}
