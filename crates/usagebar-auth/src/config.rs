//! Configuration for the OAuth login flow.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `USAGEBAR_*` environment variables. The result is validated once at load
//! time so the flow never starts with an unusable configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};

/// Client ID registered for the desktop app (a public client).
pub const DEFAULT_CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";

/// Default authorization endpoint.
pub const DEFAULT_AUTH_URL: &str = "https://claude.ai/oauth/authorize";

/// Default token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";

/// Default loopback port for the redirect listener.
pub const DEFAULT_REDIRECT_PORT: u16 = 19284;

/// Default path served by the redirect listener.
pub const DEFAULT_REDIRECT_PATH: &str = "/callback";

/// How long a login attempt waits for the browser redirect (5 minutes).
pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 300;

/// Connect timeout for token endpoint requests.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Overall timeout for token endpoint requests.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Scopes requested by default.
pub const DEFAULT_SCOPES: &[&str] = &["user:inference", "user:profile"];

/// Secure storage service name for the persisted credential.
pub const DEFAULT_STORAGE_SERVICE: &str = "usagebar";

/// Secure storage key for the persisted credential.
pub const DEFAULT_STORAGE_KEY: &str = "oauth-credential";

/// Configuration of the public (secretless) OAuth client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// The OAuth client ID.
    pub client_id: String,

    /// The authorization endpoint URL.
    pub auth_url: String,

    /// The token endpoint URL.
    pub token_url: String,

    /// The scopes to request.
    pub scopes: Vec<String>,

    /// Fixed loopback port of the redirect listener.
    pub redirect_port: u16,

    /// Path of the redirect endpoint.
    pub redirect_path: String,

    /// Seconds to wait for the browser redirect.
    pub callback_timeout_secs: u64,

    /// Seconds allowed to connect to the token endpoint.
    pub connect_timeout_secs: u64,

    /// Seconds allowed for a whole token endpoint request.
    pub request_timeout_secs: u64,

    /// Secure storage service identifier.
    pub storage_service: String,

    /// Secure storage key.
    pub storage_key: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            redirect_port: DEFAULT_REDIRECT_PORT,
            redirect_path: DEFAULT_REDIRECT_PATH.to_string(),
            callback_timeout_secs: DEFAULT_CALLBACK_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            storage_service: DEFAULT_STORAGE_SERVICE.to_string(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

impl AuthConfig {
    /// Load configuration from defaults, an optional TOML file, and the
    /// process environment, then validate it.
    ///
    /// A `path` that does not exist is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if the file cannot be read or
    /// parsed, or if the merged configuration fails [`validate`](Self::validate).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// [`load`](Self::load) with an explicit environment lookup.
    pub fn load_with(path: Option<&Path>, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let content =
                    std::fs::read_to_string(path).map_err(|e| AuthError::InvalidConfig {
                        reason: format!("failed to read {}: {e}", path.display()),
                    })?;
                tracing::debug!(path = %path.display(), "loaded auth config file");
                Self::from_toml(&content)?
            }
            _ => Self::default(),
        };

        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing fields take their defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AuthError::InvalidConfig {
            reason: format!("failed to parse config: {e}"),
        })
    }

    /// Apply `USAGEBAR_*` overrides resolved through `lookup`.
    ///
    /// Unparseable numeric overrides are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("USAGEBAR_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = lookup("USAGEBAR_AUTH_URL") {
            self.auth_url = v;
        }
        if let Some(v) = lookup("USAGEBAR_TOKEN_URL") {
            self.token_url = v;
        }
        if let Some(v) = lookup("USAGEBAR_SCOPES") {
            self.scopes = v.split_whitespace().map(String::from).collect();
        }
        if let Some(v) = lookup("USAGEBAR_REDIRECT_PORT") {
            match v.parse() {
                Ok(port) => self.redirect_port = port,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid USAGEBAR_REDIRECT_PORT"),
            }
        }
        if let Some(v) = lookup("USAGEBAR_CALLBACK_TIMEOUT_SECS") {
            match v.parse() {
                Ok(secs) => self.callback_timeout_secs = secs,
                Err(_) => {
                    tracing::warn!(value = %v, "ignoring invalid USAGEBAR_CALLBACK_TIMEOUT_SECS")
                }
            }
        }
    }

    /// Check that the configuration can drive a login.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(invalid("missing client_id"));
        }
        for (name, value) in [("auth_url", &self.auth_url), ("token_url", &self.token_url)] {
            let url = Url::parse(value).map_err(|e| invalid(&format!("{name}: {e}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(invalid(&format!("{name} must be an http(s) URL")));
            }
        }
        if !self.redirect_path.starts_with('/') {
            return Err(invalid("redirect_path must start with '/'"));
        }
        if self.callback_timeout_secs == 0 {
            return Err(invalid("callback_timeout_secs must be positive"));
        }
        if self.storage_service.is_empty() || self.storage_key.is_empty() {
            return Err(invalid("storage_service and storage_key must be set"));
        }
        Ok(())
    }

    /// The redirect URI registered with the authorization server.
    pub fn redirect_uri(&self) -> String {
        format!(
            "http://localhost:{}{}",
            self.redirect_port, self.redirect_path
        )
    }

    /// The redirect wait deadline.
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }
}

fn invalid(reason: &str) -> AuthError {
    AuthError::InvalidConfig {
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
