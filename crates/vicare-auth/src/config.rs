//! Flow configuration

use std::time::Duration;

use crate::constants::{
    AUTHORIZE_ENDPOINT, CALLBACK_PORT, DEFAULT_CALLBACK_TIMEOUT, DEFAULT_SCOPE, TOKEN_ENDPOINT,
};

/// Parameters of the authorization flow.
///
/// Endpoints are overridable so tests can point the flow at a local stub.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub authorize_endpoint: String,
    pub token_endpoint: String,
    pub scope: String,
    /// Port for the callback listener. `0` binds an ephemeral port (tests only,
    /// the provider rejects redirect URIs that were not registered).
    pub callback_port: u16,
    pub callback_timeout: Duration,
}

impl AuthConfig {
    /// Production endpoints and defaults for the given client ID.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            authorize_endpoint: AUTHORIZE_ENDPOINT.to_owned(),
            token_endpoint: TOKEN_ENDPOINT.to_owned(),
            scope: DEFAULT_SCOPE.to_owned(),
            callback_port: CALLBACK_PORT,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }
}
