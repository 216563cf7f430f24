//! Proactive background token refresh
//!
//! Renews the access token shortly before the provider's `expires_in` runs
//! out, so most authorized calls never see an expired token. The
//! request-time retry in [`crate::request`] still covers whatever this misses.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use vicare_auth::Refresher;

/// Spawn a background task that refreshes the access token before it expires.
///
/// Checks every `interval` and refreshes once the token expires within
/// `threshold`. Failures are logged and retried on the next tick.
pub fn spawn_refresh_task(
    refresher: Arc<Refresher>,
    interval: Duration,
    threshold: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; the session was just established
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&refresher, threshold).await;
        }
    })
}

/// Run one check. Returns true if a refresh succeeded.
async fn refresh_cycle(refresher: &Refresher, threshold: Duration) -> bool {
    let credentials = refresher.credentials();
    if !credentials.is_authenticated().await {
        debug!("no session yet, skipping refresh check");
        return false;
    }

    // Without a known expiry, only request-time refresh applies
    let Some(expires_at) = credentials.expires_at().await else {
        return false;
    };
    // A threshold past the end of time covers every expiry
    if let Some(horizon) = Instant::now().checked_add(threshold)
        && expires_at > horizon
    {
        return false;
    }

    debug!("access token expiring within threshold, refreshing");
    match refresher.refresh().await {
        Ok(_) => {
            info!("background token refresh succeeded");
            true
        }
        Err(e) => {
            warn!(error = %e, "background refresh failed, will retry next cycle");
            false
        }
    }
}
