//! One-shot local listener for the OAuth redirect
//!
//! The provider redirects the user's browser to `http://{host}:{port}/?code=...`.
//! This listener serves exactly that route until the first request carrying a
//! code arrives, then shuts itself down. Requests without a code get a 400 and
//! the listener keeps waiting so the user can retry.
//!
//! Every exit path (code received, malformed request, timeout, cancellation)
//! stops the server and waits for it before returning, so the port is free
//! once `wait_for_code` resolves.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const SUCCESS_BODY: &str = "Authorization successful. You can close this window.";
pub const MISSING_CODE_BODY: &str = "Authorization code not found.";
const MALFORMED_BODY: &str = "Malformed authorization request.";
const ALREADY_COMPLETED_BODY: &str = "Authorization already completed.";
const ATTEMPT_OVER_BODY: &str = "This authorization attempt has ended. Please start again.";

/// Upper bound for in-flight responses to finish after the wait is over.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Hands the first outcome to the waiting caller; `None` once used.
type Completion = Arc<Mutex<Option<oneshot::Sender<Result<String>>>>>;

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
}

/// A bound, not yet serving, callback endpoint.
pub struct CallbackListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl CallbackListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Listener(format!("binding {addr}: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::Listener(format!("reading bound address: {e}")))?;
        debug!(%addr, "callback listener bound");
        Ok(Self { listener, addr })
    }

    /// The address actually bound (differs from the requested one for port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until an authorization code arrives, `timeout` elapses or
    /// `shutdown` resolves, whichever comes first.
    pub async fn wait_for_code<F>(self, timeout: Duration, shutdown: F) -> Result<String>
    where
        F: Future<Output = ()>,
    {
        let (code_tx, code_rx) = oneshot::channel();
        let completion: Completion = Arc::new(Mutex::new(Some(code_tx)));
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let addr = self.addr;
        let app = callback_router(completion);
        let server = tokio::spawn(async move {
            axum::serve(self.listener, app)
                .with_graceful_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await
        });
        debug!(%addr, "waiting for authorization redirect");

        let outcome = tokio::select! {
            received = code_rx => received.unwrap_or_else(|_| {
                Err(Error::Listener("callback handler went away".into()))
            }),
            () = tokio::time::sleep(timeout) => {
                warn!(timeout_secs = timeout.as_secs(), "no authorization redirect received in time");
                Err(Error::AuthorizationTimedOut(timeout))
            }
            () = shutdown => {
                debug!("authorization wait cancelled");
                Err(Error::Cancelled)
            }
        };

        let _ = stop_tx.send(());
        close(server, addr).await;
        outcome
    }
}

fn callback_router(completion: Completion) -> Router {
    Router::new()
        .route("/", get(handle_redirect))
        .with_state(completion)
}

async fn handle_redirect(
    State(completion): State<Completion>,
    query: std::result::Result<Query<CallbackQuery>, QueryRejection>,
) -> (StatusCode, &'static str) {
    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => {
            let detail = rejection.body_text();
            warn!(error = %detail, "malformed callback request, aborting");
            if let Some(tx) = completion.lock().await.take() {
                let _ = tx.send(Err(Error::MalformedRequest(detail)));
            }
            return (StatusCode::BAD_REQUEST, MALFORMED_BODY);
        }
    };

    let Some(code) = params.code.filter(|code| !code.is_empty()) else {
        debug!("callback request without authorization code");
        return (StatusCode::BAD_REQUEST, MISSING_CODE_BODY);
    };

    match completion.lock().await.take() {
        Some(tx) => match tx.send(Ok(code)) {
            Ok(()) => {
                debug!("received authorization code");
                (StatusCode::OK, SUCCESS_BODY)
            }
            // Timed out or cancelled just before this request landed
            Err(_) => {
                warn!("authorization code arrived after the wait ended, discarding");
                (StatusCode::GONE, ATTEMPT_OVER_BODY)
            }
        },
        None => (StatusCode::CONFLICT, ALREADY_COMPLETED_BODY),
    }
}

/// Wait for the server task to drain, aborting it after the grace period.
async fn close(mut server: JoinHandle<std::io::Result<()>>, addr: SocketAddr) {
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(Ok(Ok(()))) => debug!(%addr, "callback listener closed"),
        Ok(Ok(Err(e))) => warn!(%addr, error = %e, "callback listener exited with error"),
        Ok(Err(e)) => warn!(%addr, error = %e, "callback listener task failed"),
        Err(_) => {
            warn!(%addr, "callback listener did not drain in time, aborting");
            server.abort();
            let _ = server.await;
        }
    }
}
