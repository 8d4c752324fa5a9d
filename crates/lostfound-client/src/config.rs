//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `LOSTFOUND_BASE_URL` overrides `client.base_url` so the same file can be
//! pointed at staging and production backends.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::coordinator::DEFAULT_RENEWAL_PATH;

/// Env var overriding `client.base_url`.
pub const BASE_URL_ENV: &str = "LOSTFOUND_BASE_URL";

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub client: ClientSection,
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

/// Backend connection and session renewal settings
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSection {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_renewal_path")]
    pub renewal_path: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Dedicated bound on the renewal call. Unset: only the transport timeout applies.
    #[serde(default)]
    pub renewal_timeout_secs: Option<u64>,
    #[serde(default)]
    pub redirect_on_forbidden: bool,
}

/// Default header sent with every request
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

fn default_timeout() -> u64 {
    10
}

fn default_renewal_path() -> String {
    DEFAULT_RENEWAL_PATH.to_string()
}

fn default_login_path() -> String {
    "/login".to_string()
}

impl ClientConfig {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: ClientConfig = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            let url = url.trim().to_owned();
            if !url.is_empty() {
                config.client.base_url = url;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the client relies on.
    pub fn validate(&self) -> common::Result<()> {
        let client = &self.client;
        if !client.base_url.starts_with("http://") && !client.base_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                client.base_url
            )));
        }

        if client.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if client.renewal_timeout_secs == Some(0) {
            return Err(common::Error::Config(
                "renewal_timeout_secs must be greater than 0 when set".into(),
            ));
        }

        if !client.renewal_path.starts_with('/') {
            return Err(common::Error::Config(format!(
                "renewal_path must start with '/', got: {}",
                client.renewal_path
            )));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("lostfound-client.toml")
    }
}
