//! Authorization orchestrator
//!
//! Drives one browser-based authorization attempt end to end:
//!
//! 1. Resolve the bind address and bind the callback listener
//! 2. Generate a PKCE pair and present the authorization URL
//! 3. Wait for the redirect carrying the authorization code
//! 4. Exchange the code for tokens
//! 5. Store both tokens in memory and persist the refresh token
//!
//! State moves `Idle -> AwaitingRedirect -> Exchanging -> Authenticated`, or to
//! `Failed` from any step. The listener is closed before the exchange starts.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::callback::CallbackListener;
use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::pkce::{PkcePair, build_authorization_url};
use crate::refresh::Refresher;
use crate::storage::{PersistedRecord, SettingsStore};
use crate::token::TokenResponse;

/// Where the authorization URL goes. How it reaches a human is up to the host.
pub trait AuthorizationPrompt: Send + Sync {
    fn present(&self, url: &str);
}

/// Logs the authorization URL at info level.
pub struct LogPrompt;

impl AuthorizationPrompt for LogPrompt {
    fn present(&self, url: &str) {
        info!(url, "open this link to authorize access");
    }
}

/// Progress of the current authorization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    AwaitingRedirect,
    Exchanging,
    Authenticated,
    Failed,
}

impl AuthState {
    pub fn label(&self) -> &'static str {
        match self {
            AuthState::Idle => "idle",
            AuthState::AwaitingRedirect => "awaiting_redirect",
            AuthState::Exchanging => "exchanging",
            AuthState::Authenticated => "authenticated",
            AuthState::Failed => "failed",
        }
    }
}

pub struct Authenticator {
    config: AuthConfig,
    refresher: Arc<Refresher>,
    store: Arc<SettingsStore>,
    prompt: Arc<dyn AuthorizationPrompt>,
    state: watch::Sender<AuthState>,
}

impl Authenticator {
    pub fn new(
        config: AuthConfig,
        refresher: Arc<Refresher>,
        store: Arc<SettingsStore>,
        prompt: Arc<dyn AuthorizationPrompt>,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::Idle);
        Self {
            config,
            refresher,
            store,
            prompt,
            state,
        }
    }

    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn refresher(&self) -> &Arc<Refresher> {
        &self.refresher
    }

    /// Run a full authorization attempt.
    ///
    /// `host` is the address the browser can reach this machine on; `None`
    /// auto-detects the primary local address.
    pub async fn start_auth(&self, host: Option<IpAddr>) -> Result<TokenResponse> {
        self.start_auth_until(host, std::future::pending()).await
    }

    /// Like [`start_auth`](Self::start_auth), giving up with `Cancelled` once
    /// `shutdown` resolves while waiting for the redirect.
    pub async fn start_auth_until<F>(&self, host: Option<IpAddr>, shutdown: F) -> Result<TokenResponse>
    where
        F: Future<Output = ()>,
    {
        info!("starting authorization");
        let result = self.attempt(host, shutdown).await;
        match &result {
            Ok(_) => {
                self.transition(AuthState::Authenticated);
                metrics::counter!("vicare_auth_attempts_total", "outcome" => "success").increment(1);
                info!("authorization successful, received access token");
            }
            Err(e) => {
                self.transition(AuthState::Failed);
                metrics::counter!("vicare_auth_attempts_total", "outcome" => "failure").increment(1);
                error!(error = %e, "authorization failed");
            }
        }
        result
    }

    async fn attempt<F>(&self, host: Option<IpAddr>, shutdown: F) -> Result<TokenResponse>
    where
        F: Future<Output = ()>,
    {
        let host = match host {
            Some(host) => host,
            None => detect_local_address().await?,
        };

        let listener = CallbackListener::bind(SocketAddr::new(host, self.config.callback_port)).await?;
        let redirect_uri = format!("http://{}", listener.local_addr());
        debug!(redirect_uri, "using redirect URI");

        // A fresh pair per attempt; a verifier is never sent twice.
        let pkce = PkcePair::generate();
        let url = build_authorization_url(&self.config, &redirect_uri, &pkce.challenge)?;

        self.transition(AuthState::AwaitingRedirect);
        self.prompt.present(&url);
        let code = listener
            .wait_for_code(self.config.callback_timeout, shutdown)
            .await?;

        self.transition(AuthState::Exchanging);
        let authorization = self
            .refresher
            .token_client()
            .exchange_code(&code, pkce.verifier.expose(), &redirect_uri)
            .await?;

        self.refresher
            .credentials()
            .store_authorization(&authorization)
            .await;
        self.persist(authorization.refresh_token.as_deref()).await;
        Ok(authorization)
    }

    /// Seed the session from a stored refresh token.
    ///
    /// Returns `Ok(false)` when nothing is stored. A stored token the provider
    /// rejects surfaces as `TokenRefreshFailed`.
    pub async fn restore_session(&self) -> Result<bool> {
        let Some(refresh) = self.store.refresh_token().await else {
            debug!("no stored refresh token");
            return Ok(false);
        };
        self.refresher.credentials().set_refresh_token(refresh).await;
        self.refresher.refresh().await?;
        self.transition(AuthState::Authenticated);
        info!("restored session from stored refresh token");
        Ok(true)
    }

    /// Restore the stored session, falling back to the browser flow when there
    /// is none or the provider rejects it.
    pub async fn authenticate<F>(&self, host: Option<IpAddr>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        match self.restore_session().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e @ Error::TokenRefreshFailed { .. }) => {
                warn!(error = %e, "stored refresh token rejected, starting new authorization");
            }
            Err(e) => return Err(e),
        }
        self.start_auth_until(host, shutdown).await.map(|_| ())
    }

    async fn persist(&self, refresh_token: Option<&str>) {
        let Some(refresh_token) = refresh_token else {
            warn!("token response carried no refresh token, nothing to persist");
            return;
        };
        let record = PersistedRecord {
            refresh_token: Some(refresh_token.to_owned()),
        };
        if let Err(e) = self.store.save(&record).await {
            warn!(error = %e, path = %self.store.path().display(), "failed to persist refresh token, continuing");
        }
    }

    fn transition(&self, next: AuthState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = previous.label(), to = next.label(), "authorization state");
        }
    }
}

/// Primary local address: the source address the OS would route outbound
/// traffic from. Connecting a UDP socket sends nothing.
pub async fn detect_local_address() -> Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| Error::MissingRedirectTarget(format!("opening probe socket: {e}")))?;
    socket
        .connect((Ipv4Addr::new(192, 0, 2, 1), 9))
        .await
        .map_err(|e| Error::MissingRedirectTarget(format!("no route to detect local address: {e}")))?;
    let ip = socket
        .local_addr()
        .map_err(|e| Error::MissingRedirectTarget(format!("reading local address: {e}")))?
        .ip();
    if ip.is_unspecified() {
        return Err(Error::MissingRedirectTarget(
            "could not determine a local address".into(),
        ));
    }
    Ok(ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialState;
    use crate::test_support::{Recorded, stub_token_endpoint};
    use crate::token::TokenClient;
    use axum::http::StatusCode;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Forwards presented URLs to the test body.
    struct ChannelPrompt(mpsc::UnboundedSender<String>);

    impl AuthorizationPrompt for ChannelPrompt {
        fn present(&self, url: &str) {
            let _ = self.0.send(url.to_owned());
        }
    }

    struct Harness {
        auth: Authenticator,
        urls: mpsc::UnboundedReceiver<String>,
        recorded: Recorded,
        store_path: std::path::PathBuf,
        _dir: tempfile::TempDir,
    }

    async fn harness<F>(respond: F) -> Harness
    where
        F: Fn(&HashMap<String, String>) -> (StatusCode, String) + Clone + Send + Sync + 'static,
    {
        harness_with_settings(respond, None).await
    }

    /// Like `harness`, with the settings file pre-populated by `settings`.
    async fn harness_with_settings<F>(respond: F, settings: Option<&str>) -> Harness
    where
        F: Fn(&HashMap<String, String>) -> (StatusCode, String) + Clone + Send + Sync + 'static,
    {
        let (endpoint, recorded) = stub_token_endpoint(respond).await;
        let mut config = AuthConfig::new("client-xyz");
        config.token_endpoint = endpoint;
        config.callback_port = 0;
        config.callback_timeout = Duration::from_secs(10);

        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("settings.json");
        if let Some(settings) = settings {
            tokio::fs::write(&store_path, settings).await.unwrap();
        }
        let store = Arc::new(SettingsStore::load(store_path.clone()).await);
        let refresher = Arc::new(Refresher::new(
            TokenClient::new(reqwest::Client::new(), &config),
            Arc::new(CredentialState::new()),
        ));
        let (tx, urls) = mpsc::unbounded_channel();
        let auth = Authenticator::new(config, refresher, store, Arc::new(ChannelPrompt(tx)));
        Harness {
            auth,
            urls,
            recorded,
            store_path,
            _dir: dir,
        }
    }

    fn query_params(url: &str) -> HashMap<String, String> {
        reqwest::Url::parse(url)
            .unwrap()
            .query_pairs()
            .into_owned()
            .collect()
    }

    fn issue_tokens(_: &HashMap<String, String>) -> (StatusCode, String) {
        (
            StatusCode::OK,
            r#"{"access_token":"at_1","refresh_token":"rt_1","expires_in":3600}"#.into(),
        )
    }

    /// Play the browser: wait for the URL, then follow the redirect with `code`.
    async fn complete_in_browser(urls: &mut mpsc::UnboundedReceiver<String>, code: &str) -> String {
        let url = urls.recv().await.unwrap();
        let redirect_uri = query_params(&url)["redirect_uri"].clone();
        let response = reqwest::get(format!("{redirect_uri}/?code={code}"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        url
    }

    #[tokio::test]
    async fn fresh_run_authorizes_and_persists_refresh_token() {
        let Harness {
            auth,
            mut urls,
            recorded,
            store_path,
            _dir,
        } = harness(issue_tokens).await;
        let localhost: IpAddr = "127.0.0.1".parse().unwrap();

        let (result, url) = tokio::join!(
            auth.start_auth(Some(localhost)),
            complete_in_browser(&mut urls, "code-abc"),
        );
        let authorization = result.unwrap();
        assert_eq!(authorization.access_token, "at_1");
        assert_eq!(auth.state(), AuthState::Authenticated);

        let credentials = auth.refresher().credentials();
        assert_eq!(credentials.access_token().await.as_deref(), Some("at_1"));
        assert_eq!(credentials.refresh_token().await.as_deref(), Some("rt_1"));

        // The exchange used the code, the redirect URI and the verifier behind the challenge.
        let params = query_params(&url);
        let form = recorded.get(0);
        assert_eq!(form["code"], "code-abc");
        assert_eq!(form["redirect_uri"], params["redirect_uri"]);
        assert_eq!(
            crate::pkce::compute_challenge(&form["code_verifier"]),
            params["code_challenge"]
        );

        let reloaded = SettingsStore::load(store_path).await;
        assert_eq!(reloaded.refresh_token().await.as_deref(), Some("rt_1"));
    }

    #[tokio::test]
    async fn each_attempt_uses_a_new_verifier() {
        let Harness {
            auth, mut urls, ..
        } = harness(issue_tokens).await;
        let localhost: IpAddr = "127.0.0.1".parse().unwrap();

        let (first, first_url) = tokio::join!(
            auth.start_auth(Some(localhost)),
            complete_in_browser(&mut urls, "c1"),
        );
        first.unwrap();
        let (second, second_url) = tokio::join!(
            auth.start_auth(Some(localhost)),
            complete_in_browser(&mut urls, "c2"),
        );
        second.unwrap();

        assert_ne!(
            query_params(&first_url)["code_challenge"],
            query_params(&second_url)["code_challenge"]
        );
    }

    #[tokio::test]
    async fn exchange_failure_marks_failed_and_keeps_state_empty() {
        let Harness {
            auth,
            mut urls,
            store_path,
            _dir,
            ..
        } = harness(|_| {
            (
                StatusCode::BAD_REQUEST,
                r#"{"error":"invalid_grant"}"#.into(),
            )
        })
        .await;
        let localhost: IpAddr = "127.0.0.1".parse().unwrap();

        let (result, _) = tokio::join!(
            auth.start_auth(Some(localhost)),
            complete_in_browser(&mut urls, "bad-code"),
        );
        let err = result.unwrap_err();
        assert!(
            matches!(err, Error::AuthorizationExchangeFailed { status: 400, ref body } if body.contains("invalid_grant")),
            "got: {err:?}"
        );
        assert_eq!(auth.state(), AuthState::Failed);
        assert!(!auth.refresher().credentials().is_authenticated().await);
        assert!(SettingsStore::load(store_path).await.refresh_token().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_fails_attempt_and_frees_port() {
        let Harness { auth, mut urls, .. } = harness(issue_tokens).await;
        let localhost: IpAddr = "127.0.0.1".parse().unwrap();
        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel::<()>();

        let canceller = async {
            let url = urls.recv().await.unwrap();
            cancel_tx.send(()).unwrap();
            url
        };
        let (result, url) = tokio::join!(
            auth.start_auth_until(Some(localhost), async {
                let _ = cancel_rx.await;
            }),
            canceller,
        );
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(auth.state(), AuthState::Failed);

        let redirect: reqwest::Url = query_params(&url)["redirect_uri"].parse().unwrap();
        let port = redirect.port().unwrap();
        assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
    }

    #[tokio::test]
    async fn storage_failure_does_not_fail_authorization() {
        let (endpoint, _) = stub_token_endpoint(issue_tokens).await;
        let mut config = AuthConfig::new("client-xyz");
        config.token_endpoint = endpoint;
        config.callback_port = 0;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SettingsStore::load(dir.path().join("gone").join("settings.json")).await);
        let refresher = Arc::new(Refresher::new(
            TokenClient::new(reqwest::Client::new(), &config),
            Arc::new(CredentialState::new()),
        ));
        let (tx, mut urls) = mpsc::unbounded_channel();
        let auth = Authenticator::new(config, refresher, store, Arc::new(ChannelPrompt(tx)));

        let (result, _) = tokio::join!(
            auth.start_auth(Some("127.0.0.1".parse().unwrap())),
            complete_in_browser(&mut urls, "code"),
        );
        assert!(result.is_ok());
        assert_eq!(auth.state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn restore_session_refreshes_stored_token() {
        let Harness {
            auth,
            recorded,
            _dir,
            ..
        } = harness_with_settings(
            |form| {
                assert_eq!(form["grant_type"], "refresh_token");
                (StatusCode::OK, r#"{"access_token":"at_restored"}"#.into())
            },
            Some(r#"{"refreshToken":"rt_stored"}"#),
        )
        .await;

        assert!(auth.restore_session().await.unwrap());
        assert_eq!(auth.state(), AuthState::Authenticated);
        assert_eq!(recorded.get(0)["refresh_token"], "rt_stored");
        assert_eq!(
            auth.refresher().credentials().access_token().await.as_deref(),
            Some("at_restored")
        );
    }

    #[tokio::test]
    async fn restore_session_without_stored_token_is_noop() {
        let Harness { auth, recorded, .. } = harness(issue_tokens).await;
        assert!(!auth.restore_session().await.unwrap());
        assert_eq!(auth.state(), AuthState::Idle);
        assert_eq!(recorded.len(), 0);
    }

    #[tokio::test]
    async fn authenticate_falls_back_to_browser_when_refresh_rejected() {
        let grants = Arc::new(Mutex::new(Vec::new()));
        let seen = grants.clone();
        let Harness {
            auth,
            mut urls,
            store_path,
            _dir,
            ..
        } = harness_with_settings(
            move |form| {
                seen.lock().unwrap().push(form["grant_type"].clone());
                if form["grant_type"] == "refresh_token" {
                    (StatusCode::UNAUTHORIZED, r#"{"error":"invalid_grant"}"#.into())
                } else {
                    issue_tokens(form)
                }
            },
            Some(r#"{"refreshToken":"rt_revoked"}"#),
        )
        .await;

        let (result, _) = tokio::join!(
            auth.authenticate(Some("127.0.0.1".parse().unwrap()), std::future::pending()),
            complete_in_browser(&mut urls, "code"),
        );
        result.unwrap();
        assert_eq!(
            *grants.lock().unwrap(),
            vec!["refresh_token".to_string(), "authorization_code".to_string()]
        );
        assert_eq!(auth.state(), AuthState::Authenticated);

        let reloaded = SettingsStore::load(store_path).await;
        assert_eq!(reloaded.refresh_token().await.as_deref(), Some("rt_1"));
    }

    #[tokio::test]
    async fn detect_local_address_is_usable_or_missing_target() {
        match detect_local_address().await {
            Ok(ip) => assert!(!ip.is_unspecified()),
            Err(e) => assert!(matches!(e, Error::MissingRedirectTarget(_)), "got: {e:?}"),
        }
    }

    #[test]
    fn state_labels() {
        assert_eq!(AuthState::Idle.label(), "idle");
        assert_eq!(AuthState::AwaitingRedirect.label(), "awaiting_redirect");
        assert_eq!(AuthState::Exchanging.label(), "exchanging");
        assert_eq!(AuthState::Authenticated.label(), "authenticated");
        assert_eq!(AuthState::Failed.label(), "failed");
    }
}
