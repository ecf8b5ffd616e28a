//! Secure secret storage for usagebar.
//!
//! The auth crate persists its OAuth credential through the
//! [`SecretStore`] capability defined here: get, set, and clear an opaque
//! secret addressed by `(service, key)`. Persistent backends encrypt at rest.
//!
//! # Modules
//!
//! - [`store`]: the [`SecretStore`] trait and the in-memory backend.
//! - [`file`]: AES-256-GCM encrypted files under a data directory.
//! - [`keychain`]: macOS Keychain Services and platform selection.
//! - [`crypto`]: sealed-blob AES-256-GCM keys derived with PBKDF2.
//! - [`error`]: Unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use usagebar_vault::{SecretStore, platform_secret_store};
//!
//! # fn example() -> usagebar_vault::Result<()> {
//! let store = platform_secret_store(std::path::Path::new("data"));
//! store.set("usagebar", "oauth-credential", "{\"accessToken\":\"...\"}")?;
//! let secret = store.get("usagebar", "oauth-credential")?;
//! assert!(secret.is_some());
//! store.clear("usagebar", "oauth-credential")?;
//! # Ok(())
//! # }
//! ```

pub mod crypto;
pub mod error;
pub mod file;
pub mod keychain;
pub mod store;

pub use error::{Result, VaultError};
pub use file::FileSecretStore;
#[cfg(target_os = "macos")]
pub use keychain::MacOSKeychain;
pub use keychain::platform_secret_store;
pub use store::{MemorySecretStore, SecretStore};
