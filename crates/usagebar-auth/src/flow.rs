//! One browser-based authorization attempt, end to end.
//!
//! [`FlowCoordinator::run`] generates PKCE material, binds the redirect
//! listener, opens the authorization URL in the browser, waits for the
//! redirect (bounded by the configured timeout), and exchanges the code.
//! The listener is stopped on every exit path before `run` returns.
//!
//! Only one attempt may be in flight per coordinator; a concurrent call
//! fails fast with [`AuthError::InProgress`] instead of racing for the port.

use std::sync::Arc;

use tokio::sync::Mutex;
use url::Url;

use crate::callback::{AuthorizationResult, RedirectListener};
use crate::config::AuthConfig;
use crate::credential::Credential;
use crate::error::{AuthError, Result};
use crate::oauth::{TokenExchanger, authorization_url};
use crate::pkce::PkceMaterial;

// ---------------------------------------------------------------------------
// Browser seam
// ---------------------------------------------------------------------------

/// Opens the authorization URL for the user.
pub trait BrowserLauncher: Send + Sync {
    /// Open `url` in a browser.
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// The system default browser, via the `open` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        open::that(url)
    }
}

// ---------------------------------------------------------------------------
// FlowCoordinator
// ---------------------------------------------------------------------------

/// Runs authorization attempts, one at a time.
pub struct FlowCoordinator {
    config: AuthConfig,
    exchanger: Arc<dyn TokenExchanger>,
    browser: Arc<dyn BrowserLauncher>,
    in_flight: Mutex<()>,
}

impl FlowCoordinator {
    /// Create a coordinator over the given collaborators.
    pub fn new(
        config: AuthConfig,
        exchanger: Arc<dyn TokenExchanger>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            config,
            exchanger,
            browser,
            in_flight: Mutex::new(()),
        }
    }

    /// Run one attempt and return the issued credential.
    ///
    /// The credential is not persisted here; the caller owns storage.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InProgress`] if another attempt is running.
    /// - [`AuthError::Bind`] if the redirect port is taken.
    /// - [`AuthError::Timeout`] if no redirect arrives in time.
    /// - [`AuthError::Denied`], [`AuthError::StateMismatch`] or
    ///   [`AuthError::MissingCode`] for a rejected redirect; no exchange is
    ///   attempted.
    /// - Any error from [`TokenExchanger::exchange`].
    pub async fn run(&self) -> Result<Credential> {
        let Ok(_attempt) = self.in_flight.try_lock() else {
            tracing::warn!("authentication already in progress");
            return Err(AuthError::InProgress);
        };

        tracing::info!(
            port = self.config.redirect_port,
            "starting OAuth authorization code flow"
        );

        let pkce = PkceMaterial::generate()?;
        let url = authorization_url(&self.config, &pkce.code_challenge, &pkce.state)?;

        let mut listener = RedirectListener::start(
            self.config.redirect_port,
            &self.config.redirect_path,
            pkce.state.clone(),
        )
        .await?;

        let redirect = self.await_redirect(&mut listener, &url).await;
        listener.stop().await;

        let code = redirect?.into_code()?;

        tracing::debug!("state verified, exchanging authorization code");
        let credential = self.exchanger.exchange(&code, &pkce.code_verifier).await?;

        tracing::info!(expires_at = credential.expires_at, "authorization code exchanged");
        Ok(credential)
    }

    async fn await_redirect(
        &self,
        listener: &mut RedirectListener,
        url: &Url,
    ) -> Result<AuthorizationResult> {
        match self.browser.open(url.as_str()) {
            Ok(()) => tracing::info!("opened browser for authorization"),
            Err(e) => tracing::warn!(
                error = %e,
                url = %url,
                "could not open a browser, open this URL to continue"
            ),
        }

        let timeout = self.config.callback_timeout();
        match tokio::time::timeout(timeout, listener.wait()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.callback_timeout_secs,
                    "timed out waiting for the authorization redirect"
                );
                Err(AuthError::Timeout {
                    timeout_secs: self.config.callback_timeout_secs,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
