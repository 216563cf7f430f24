//! Authorized calls against the Viessmann API
//!
//! Wraps a `reqwest::Client` so every call carries the session's Bearer token,
//! and an expired token is refreshed and the call resent transparently.
//! `spawn_refresh_task` renews tokens ahead of expiry in the background.

pub mod error;
pub mod expiry;
pub mod refresh;
pub mod request;

pub use error::{Error, Result};
pub use expiry::{EXPIRED_TOKEN, is_expired_token};
pub use refresh::spawn_refresh_task;
pub use request::{AuthorizedClient, MAX_ATTEMPTS, RequestOptions};
