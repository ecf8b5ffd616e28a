//! Authorization URL construction and token endpoint grants.
//!
//! This module implements the client side of the OAuth 2.0 authorization
//! code flow (RFC 6749) for a public client with PKCE (RFC 7636):
//!
//! 1. [`authorization_url`] builds the URL the browser is sent to.
//! 2. [`TokenExchanger::exchange`] trades the returned code + verifier for a
//!    [`Credential`].
//! 3. [`TokenExchanger::refresh`] mints a new credential from a refresh
//!    token.
//!
//! No client secret is ever sent. Neither grant is retried here; the
//! caller decides what a failure means.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::config::AuthConfig;
use crate::credential::{Clock, Credential};
use crate::error::{AuthError, Result};

// ---------------------------------------------------------------------------
// Authorization URL
// ---------------------------------------------------------------------------

/// Build the authorization endpoint URL for one attempt.
///
/// Every value is form-urlencoded into the query; existing query pairs on
/// `auth_url` are preserved.
///
/// # Errors
///
/// Returns [`AuthError::UrlParse`] if `auth_url` is not a valid URL.
pub fn authorization_url(config: &AuthConfig, code_challenge: &str, state: &str) -> Result<Url> {
    let mut url = Url::parse(&config.auth_url)?;

    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.redirect_uri())
        .append_pair("response_type", "code")
        .append_pair("scope", &config.scopes.join(" "))
        .append_pair("state", state)
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", "S256");

    Ok(url)
}

// ---------------------------------------------------------------------------
// Token exchange
// ---------------------------------------------------------------------------

/// Performs the token endpoint grants.
///
/// The production implementation is [`OAuthClient`]; tests substitute
/// fakes to count calls or script failures.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// `grant_type=authorization_code`: trade a code and its PKCE verifier
    /// for a credential.
    async fn exchange(&self, code: &str, code_verifier: &str) -> Result<Credential>;

    /// `grant_type=refresh_token`: mint a new credential.
    ///
    /// The returned credential's `refresh_token` is `None` when the server
    /// did not rotate it.
    async fn refresh(&self, refresh_token: &str) -> Result<Credential>;
}

/// Raw token response from the authorization server.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
    #[allow(dead_code)]
    token_type: Option<String>,
}

/// Raw error response from the authorization server.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// `reqwest`-backed [`TokenExchanger`] for a public client.
pub struct OAuthClient {
    client_id: String,
    token_url: String,
    redirect_uri: String,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl OAuthClient {
    /// Create a client for the token endpoint in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Network`] if the HTTP client cannot be built.
    pub fn new(config: &AuthConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client_id: config.client_id.clone(),
            token_url: config.token_url.clone(),
            redirect_uri: config.redirect_uri(),
            http,
            clock,
        })
    }

    async fn post_form(&self, params: &[(&str, &str)]) -> Result<Credential> {
        let response = self.http.post(&self.token_url).form(params).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::OK {
            let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => err.error_description.unwrap_or(err.error),
                Err(_) => body,
            };
            return Err(AuthError::Protocol {
                status: status.as_u16(),
                reason,
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::MalformedResponse {
                reason: e.to_string(),
            })?;

        Ok(Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: self
                .clock
                .now_ms()
                .saturating_add(token.expires_in.saturating_mul(1000)),
        })
    }
}

#[async_trait]
impl TokenExchanger for OAuthClient {
    async fn exchange(&self, code: &str, code_verifier: &str) -> Result<Credential> {
        tracing::debug!(token_url = %self.token_url, "exchanging authorization code");

        self.post_form(&[
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
        tracing::debug!(token_url = %self.token_url, "refreshing access token");

        self.post_form(&[
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
