//! OAuth login and token lifecycle for usagebar.
//!
//! This crate signs a desktop client in with the OAuth 2.0 authorization
//! code flow and PKCE (RFC 7636), as a public client with no secret, and
//! keeps the resulting credential usable:
//!
//! - **PKCE + state** generation from the system CSPRNG
//! - **Authorization URL** construction
//! - **Redirect listener** on a fixed loopback port, single use
//! - **Token exchange and refresh** against the token endpoint
//! - **Token store** with lazy loading, refresh-on-read, and logout
//!
//! The credential is persisted through the
//! [`SecretStore`](usagebar_vault::SecretStore) capability from
//! `usagebar-vault`.
//!
//! # Architecture
//!
//! ```text
//! TokenStore                 (consumer interface, owns the credential)
//! ├── FlowCoordinator        (one attempt at a time, bounded wait)
//! │   ├── PkceMaterial       (verifier, challenge, state)
//! │   ├── authorization_url  (query construction)
//! │   ├── BrowserLauncher    (system browser)
//! │   └── RedirectListener   (127.0.0.1:<port>/callback)
//! ├── TokenExchanger         (authorization_code / refresh_token grants)
//! ├── Clock                  (expiry decisions)
//! └── SecretStore            (persisted credential)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use usagebar_auth::{AuthConfig, TokenStore};
//!
//! # async fn example() -> usagebar_auth::Result<()> {
//! let config = AuthConfig::load(Some(Path::new("usagebar.toml")))?;
//! let storage = usagebar_vault::platform_secret_store(Path::new("data"));
//! let store = TokenStore::from_config(config, storage)?;
//!
//! if !store.is_authenticated().await {
//!     store.login().await?;
//! }
//! if let Some(token) = store.get_access_token().await {
//!     println!("bearer {} chars", token.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod config;
pub mod credential;
pub mod error;
pub mod flow;
pub mod oauth;
pub mod pkce;
pub mod store;

pub use callback::{AuthorizationResult, RedirectListener};
pub use config::AuthConfig;
pub use credential::{Clock, Credential, EXPIRY_BUFFER_MS, ManualClock, SystemClock};
pub use error::{AuthError, ErrorKind, Result};
pub use flow::{BrowserLauncher, FlowCoordinator, SystemBrowser};
pub use oauth::{OAuthClient, TokenExchanger, authorization_url};
pub use pkce::PkceMaterial;
pub use store::TokenStore;
