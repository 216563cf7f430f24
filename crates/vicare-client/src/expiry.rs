//! Expired token detection for Viessmann API error bodies
//!
//! The API reports an expired access token as a JSON error object whose
//! `errorType` (current API) or `error` (older responses) is `EXPIRED TOKEN`.
//! Any other error is the caller's business and is never retried.

use serde_json::Value;

/// Marker value of an expired access token error.
pub const EXPIRED_TOKEN: &str = "EXPIRED TOKEN";

const MARKER_FIELDS: &[&str] = &["errorType", "error"];

/// Whether an error response body reports an expired access token.
pub fn is_expired_token(body: &str) -> bool {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    MARKER_FIELDS
        .iter()
        .any(|field| value.get(field).and_then(Value::as_str) == Some(EXPIRED_TOKEN))
}
