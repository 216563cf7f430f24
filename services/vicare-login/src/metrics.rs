//! Prometheus metrics exposition
//!
//! The library crates emit these through the `metrics` facade:
//!
//! - `vicare_auth_attempts_total` (counter): label `outcome`
//! - `vicare_token_refresh_total` (counter): label `outcome`
//! - `vicare_authorized_requests_total` (counter): label `outcome`
//!
//! This module adds the service's own gauges and installs the recorder.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Record whether the process currently holds an access token.
pub fn set_authenticated(authenticated: bool) {
    metrics::gauge!("vicare_session_authenticated").set(if authenticated { 1.0 } else { 0.0 });
}
