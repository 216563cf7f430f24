//! Single-flight access token refresh
//!
//! Several authorized calls can detect an expired token at the same moment.
//! Only the first one talks to the token endpoint; the others await the same
//! in-flight future and receive its outcome, success or failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::credentials::CredentialState;
use crate::error::{Error, Result};
use crate::token::{TokenClient, TokenResponse};

type RefreshFlight = Shared<BoxFuture<'static, Result<TokenResponse>>>;

/// The refresh in progress, tagged so it can clear only itself.
type FlightSlot = Arc<Mutex<Option<(u64, RefreshFlight)>>>;

/// Coordinates refreshes of the shared [`CredentialState`].
pub struct Refresher {
    tokens: TokenClient,
    credentials: Arc<CredentialState>,
    in_flight: FlightSlot,
    next_flight: AtomicU64,
}

impl Refresher {
    pub fn new(tokens: TokenClient, credentials: Arc<CredentialState>) -> Self {
        Self {
            tokens,
            credentials,
            in_flight: Arc::new(Mutex::new(None)),
            next_flight: AtomicU64::new(0),
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialState> {
        &self.credentials
    }

    pub fn token_client(&self) -> &TokenClient {
        &self.tokens
    }

    /// Refresh the access token, joining a refresh already in progress.
    ///
    /// Fails with `MissingRefreshToken` before any network call when no
    /// refresh token is known. A flight empties the slot itself when it
    /// finishes, so callers dropped while waiting never leave a stale outcome
    /// behind.
    pub async fn refresh(&self) -> Result<TokenResponse> {
        let flight = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                Some((_, flight)) => {
                    debug!("joining in-flight token refresh");
                    flight.clone()
                }
                None => {
                    let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                    let flight = run_flight(
                        id,
                        self.tokens.clone(),
                        self.credentials.clone(),
                        self.in_flight.clone(),
                    )
                    .boxed()
                    .shared();
                    *slot = Some((id, flight.clone()));
                    flight
                }
            }
        };

        flight.await
    }

    /// Refresh unless the access token already moved past `stale`.
    ///
    /// Callers pass the token their request was rejected with. If another
    /// caller has refreshed in the meantime there is nothing left to do.
    pub async fn refresh_stale(&self, stale: &str) -> Result<()> {
        if !self.credentials.access_token_is(stale).await {
            debug!("access token already renewed by a concurrent caller");
            return Ok(());
        }
        self.refresh().await.map(|_| ())
    }
}

async fn run_flight(
    id: u64,
    tokens: TokenClient,
    credentials: Arc<CredentialState>,
    slot: FlightSlot,
) -> Result<TokenResponse> {
    let outcome = refresh_once(tokens, credentials).await;
    let mut slot = slot.lock().await;
    if slot.as_ref().is_some_and(|(current, _)| *current == id) {
        *slot = None;
    }
    outcome
}

async fn refresh_once(
    tokens: TokenClient,
    credentials: Arc<CredentialState>,
) -> Result<TokenResponse> {
    let refresh = credentials
        .refresh_token()
        .await
        .ok_or(Error::MissingRefreshToken)?;

    match tokens.refresh_token(&refresh).await {
        Ok(response) => {
            credentials.store_refreshed(&response).await;
            metrics::counter!("vicare_token_refresh_total", "outcome" => "success").increment(1);
            info!(expires_in = response.expires_in, "refreshed authorization");
            Ok(response)
        }
        Err(e) => {
            metrics::counter!("vicare_token_refresh_total", "outcome" => "failure").increment(1);
            error!(error = %e, "refreshing authorization failed");
            Err(e)
        }
    }
}
