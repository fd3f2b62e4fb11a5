//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Tokens never live in the TOML; the session is obtained through the admin
//! API and kept in the token store.

use serde::Deserialize;
use session_auth::{DEFAULT_REFRESH_PATH, DEFAULT_SIGN_IN_PATH};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// HTTP proxy settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Session and refresh settings
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Where the session is persisted. In-memory only when unset.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_sign_in_path")]
    pub sign_in_path: String,
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
    /// Admin API listener; the admin API is disabled when unset
    #[serde(default)]
    pub admin_listen_addr: Option<SocketAddr>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credentials_path: None,
            refresh_path: default_refresh_path(),
            sign_in_path: default_sign_in_path(),
            refresh_timeout_secs: default_refresh_timeout(),
            admin_listen_addr: None,
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_refresh_path() -> String {
    DEFAULT_REFRESH_PATH.to_string()
}

fn default_sign_in_path() -> String {
    DEFAULT_SIGN_IN_PATH.to_string()
}

fn default_refresh_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// `SESSION_CREDENTIALS_PATH` overrides `session.credentials_path`.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.proxy.upstream_url.starts_with("http://")
            && !config.proxy.upstream_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "upstream_url must start with http:// or https://, got: {}",
                config.proxy.upstream_url
            )));
        }

        if config.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.proxy.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.session.refresh_timeout_secs == 0 {
            return Err(common::Error::Config(
                "refresh_timeout_secs must be greater than 0".into(),
            ));
        }

        for (name, value) in [
            ("refresh_path", &config.session.refresh_path),
            ("sign_in_path", &config.session.sign_in_path),
        ] {
            if !value.starts_with('/') {
                return Err(common::Error::Config(format!(
                    "{name} must start with '/', got: {value}"
                )));
            }
        }

        if let Ok(p) = std::env::var("SESSION_CREDENTIALS_PATH") {
            config.session.credentials_path = Some(PathBuf::from(p));
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
        PathBuf::from("session-gateway.toml")
    }

    /// Absolute URL of the backend's refresh endpoint.
    pub fn refresh_url(&self) -> String {
        self.upstream_endpoint(&self.session.refresh_path)
    }

    /// Absolute URL of the backend's sign-in endpoint.
    pub fn sign_in_url(&self) -> String {
        self.upstream_endpoint(&self.session.sign_in_path)
    }

    fn upstream_endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.proxy.upstream_url.trim_end_matches('/'))
    }
}
