//! Error types for the authorization flow

use std::time::Duration;

/// Errors from authorization, token exchange and the callback listener.
///
/// `Clone` because a single in-flight refresh hands its outcome to every
/// caller waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("no redirect target: {0}")]
    MissingRedirectTarget(String),

    #[error("no refresh token available")]
    MissingRefreshToken,

    #[error("authorization code exchange failed ({status}): {body}")]
    AuthorizationExchangeFailed { status: u16, body: String },

    #[error("token refresh failed ({status}): {body}")]
    TokenRefreshFailed { status: u16, body: String },

    #[error("malformed callback request: {0}")]
    MalformedRequest(String),

    #[error("no authorization code received within {}s", .0.as_secs())]
    AuthorizationTimedOut(Duration),

    #[error("authorization cancelled")]
    Cancelled,

    #[error("callback listener failed: {0}")]
    Listener(String),

    #[error("storage read failed: {0}")]
    StorageRead(String),

    #[error("storage write failed: {0}")]
    StorageWrite(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
