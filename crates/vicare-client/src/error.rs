//! Error types for authorized API calls

/// Errors from authorized API calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("no access token available, authorize first")]
    MissingAccessToken,

    #[error("access token cannot be sent as a header: {0}")]
    InvalidToken(String),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// `attempts` counts sends including those of earlier calls in the chain;
    /// `refreshes` only the ones this call performed.
    #[error("gave up after {attempts} attempts, {refreshes} token refreshes in this call")]
    RetryExhausted { attempts: u32, refreshes: u32 },

    #[error(transparent)]
    Auth(#[from] vicare_auth::Error),
}

/// Result alias for authorized calls.
pub type Result<T> = std::result::Result<T, Error>;
