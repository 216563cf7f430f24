//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client id may come from `VICARE_CLIENT_ID` instead of the TOML so
//! that deployments can keep it out of checked-in files.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use vicare_auth::AuthConfig;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub auth: AuthSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub service: ServiceSection,
}

/// Identity provider settings
#[derive(Debug, Deserialize)]
pub struct AuthSection {
    #[serde(default)]
    pub client_id: String,
    /// Address the browser should be redirected to. Detected when absent.
    #[serde(default)]
    pub host: Option<IpAddr>,
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_secs: u64,
}

/// Where the refresh token is kept between runs
#[derive(Debug, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// Runtime settings after the session is established
#[derive(Debug, Deserialize)]
pub struct ServiceSection {
    /// Serves /health and /metrics when set.
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: u64,
    /// API URL fetched once with the new session to confirm it works.
    #[serde(default)]
    pub probe_url: Option<String>,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            listen_addr: None,
            refresh_interval_secs: default_refresh_interval(),
            refresh_threshold_secs: default_refresh_threshold(),
            probe_url: None,
        }
    }
}

/// Upper bound for every duration setting: 30 days.
const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

fn default_callback_timeout() -> u64 {
    vicare_auth::DEFAULT_CALLBACK_TIMEOUT.as_secs()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("vicare-settings.json")
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_refresh_threshold() -> u64 {
    300
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(client_id) = std::env::var("VICARE_CLIENT_ID") {
            config.auth.client_id = client_id;
        }
        config.auth.client_id = config.auth.client_id.trim().to_owned();

        if config.auth.client_id.is_empty() {
            return Err(common::Error::Config(
                "client_id must be set in [auth] or via VICARE_CLIENT_ID".into(),
            ));
        }

        if config.auth.callback_timeout_secs == 0 {
            return Err(common::Error::Config(
                "callback_timeout_secs must be greater than 0".into(),
            ));
        }

        if config.service.refresh_interval_secs == 0 {
            return Err(common::Error::Config(
                "refresh_interval_secs must be greater than 0".into(),
            ));
        }

        for (name, secs) in [
            ("callback_timeout_secs", config.auth.callback_timeout_secs),
            ("refresh_interval_secs", config.service.refresh_interval_secs),
            ("refresh_threshold_secs", config.service.refresh_threshold_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(common::Error::Config(format!(
                    "{name} must be at most {MAX_DURATION_SECS}, got: {secs}"
                )));
            }
        }

        if let Some(url) = &config.service.probe_url
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "probe_url must start with http:// or https://, got: {url}"
            )));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("vicare-login.toml")
    }

    pub fn auth_config(&self) -> AuthConfig {
        let mut auth = AuthConfig::new(self.auth.client_id.clone());
        auth.callback_timeout = Duration::from_secs(self.auth.callback_timeout_secs);
        auth
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.service.refresh_interval_secs)
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.service.refresh_threshold_secs)
    }
}
