//! Viessmann OAuth authentication library
//!
//! Authorization Code + PKCE against the Viessmann identity provider, token
//! refresh, and the settings file that keeps the refresh token across runs.
//!
//! Credential flow:
//! 1. `Authenticator::restore_session()` refreshes a stored refresh token, if any
//! 2. Otherwise `Authenticator::start_auth()` binds the callback listener,
//!    presents the authorization URL built from a fresh `PkcePair`
//! 3. The browser redirect delivers the code to `CallbackListener`
//! 4. `TokenClient::exchange_code()` trades code + verifier for tokens
//! 5. Tokens land in `CredentialState`; the refresh token is saved via `SettingsStore`
//! 6. Later expiries go through `Refresher::refresh()`, one provider call at a time

pub mod authorize;
pub mod callback;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod pkce;
pub mod refresh;
pub mod storage;
pub mod token;

#[cfg(test)]
pub(crate) mod test_support;

pub use authorize::{AuthState, AuthorizationPrompt, Authenticator, LogPrompt, detect_local_address};
pub use callback::CallbackListener;
pub use config::AuthConfig;
pub use constants::*;
pub use credentials::CredentialState;
pub use error::{Error, Result};
pub use pkce::{PkcePair, build_authorization_url, compute_challenge, generate_verifier};
pub use refresh::Refresher;
pub use storage::{PersistedRecord, SettingsStore};
pub use token::{TokenClient, TokenResponse};
