//! OS keychain integration and backend selection.
//!
//! - **macOS**: Keychain Services via `security-framework`
//! - **Everywhere else**: [`FileSecretStore`](crate::file::FileSecretStore)

use std::path::Path;
use std::sync::Arc;

use crate::store::SecretStore;

// ---------------------------------------------------------------------------
// macOS Keychain Services
// ---------------------------------------------------------------------------

/// The Security framework error code for "item not found"
/// (`errSecItemNotFound = -25300`).
#[cfg(target_os = "macos")]
const MACOS_ERR_SEC_ITEM_NOT_FOUND: i32 = -25300;

/// macOS Keychain Services backend.
///
/// Each `(service, key)` pair is a generic password item in the user's login
/// keychain, with `service` as the service name and `key` as the account.
#[cfg(target_os = "macos")]
#[derive(Debug, Default)]
pub struct MacOSKeychain;

#[cfg(target_os = "macos")]
impl MacOSKeychain {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "macos")]
impl SecretStore for MacOSKeychain {
    fn get(&self, service: &str, key: &str) -> crate::Result<Option<String>> {
        use security_framework::passwords::get_generic_password;

        match get_generic_password(service, key) {
            Ok(data) => {
                tracing::debug!(service, "read secret from macOS keychain");
                String::from_utf8(data.to_vec())
                    .map(Some)
                    .map_err(|_| crate::VaultError::NotUtf8)
            }
            Err(e) if e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND => Ok(None),
            Err(e) => Err(crate::VaultError::KeychainUnavailable {
                reason: format!("macOS keychain read failed: {e}"),
            }),
        }
    }

    fn set(&self, service: &str, key: &str, secret: &str) -> crate::Result<()> {
        use security_framework::passwords::set_generic_password;

        set_generic_password(service, key, secret.as_bytes()).map_err(|e| {
            crate::VaultError::KeychainUnavailable {
                reason: format!("macOS keychain write failed: {e}"),
            }
        })?;

        tracing::debug!(service, "stored secret in macOS keychain");
        Ok(())
    }

    fn clear(&self, service: &str, key: &str) -> crate::Result<()> {
        use security_framework::passwords::delete_generic_password;

        match delete_generic_password(service, key) {
            Ok(()) => {
                tracing::debug!(service, "cleared secret from macOS keychain");
                Ok(())
            }
            Err(e) if e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND => Ok(()),
            Err(e) => Err(crate::VaultError::KeychainUnavailable {
                reason: format!("macOS keychain delete failed: {e}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Returns the best available secret store for the current platform.
///
/// `data_dir` is only used by the file-based fallback.
pub fn platform_secret_store(data_dir: &Path) -> Arc<dyn SecretStore> {
    let _ = &data_dir;

    #[cfg(target_os = "macos")]
    {
        tracing::info!("using macOS Keychain Services for credential storage");
        Arc::new(MacOSKeychain::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        use crate::file::FileSecretStore;

        let path = FileSecretStore::default_path(data_dir);
        tracing::info!(path = %path.display(), "using encrypted files for credential storage");
        Arc::new(FileSecretStore::new(path))
    }
}
