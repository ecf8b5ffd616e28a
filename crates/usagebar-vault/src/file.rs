//! Encrypted-file secret storage.
//!
//! The cross-platform fallback when no OS keychain is available. Each
//! `(service, key)` pair maps to one file under the store directory,
//! encrypted with AES-256-GCM under a key derived from machine-specific data
//! (hostname, username) and an application salt.
//!
//! # Security Notes
//!
//! - The device-derived key can be reconstructed by anyone with access to the
//!   same machine account. A real OS keychain is preferable where present.
//! - Files are written with mode 0600 on Unix.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::crypto::SecretKey;
use crate::error::{Result, VaultError};
use crate::store::{SecretStore, validate_name};

/// Application salt mixed into the device-derived key. Changing this
/// invalidates every previously stored secret.
const APP_SALT: &[u8; 32] = b"usagebar-vault-secret-file-v1\x00\x00\x00";

/// PBKDF2 iterations for the device-derived key. The input is not a user
/// password, so this only needs to make offline guessing of the machine
/// identifiers non-trivial.
const DEVICE_KEY_ITERATIONS: u32 = 100_000;

/// Extension of the encrypted secret files.
const SECRET_EXT: &str = "secret";

/// Distinguishes temp files of concurrent writers within one process.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Secret store that keeps one encrypted file per entry.
///
/// The file layout (binary):
/// ```text
/// [12 bytes: AES-256-GCM nonce]
/// [remaining: AES-256-GCM ciphertext + 16-byte tag]
/// ```
pub struct FileSecretStore {
    root: PathBuf,
    device_key: OnceLock<SecretKey>,
}

impl FileSecretStore {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            device_key: OnceLock::new(),
        }
    }

    /// Default store location: `<data_dir>/secrets`.
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join("secrets")
    }

    /// The directory this store writes into.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, service: &str, key: &str) -> Result<PathBuf> {
        validate_name(service)?;
        validate_name(key)?;
        Ok(self.root.join(service).join(format!("{key}.{SECRET_EXT}")))
    }

    fn device_key(&self) -> Result<&SecretKey> {
        if let Some(key) = self.device_key.get() {
            return Ok(key);
        }

        let hostname = Self::get_hostname();
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown-user".into());
        let material = [hostname.as_bytes(), b"\0".as_slice(), username.as_bytes()].concat();

        let iterations = NonZeroU32::new(DEVICE_KEY_ITERATIONS).unwrap_or(NonZeroU32::MIN);
        let key = SecretKey::derive(&material, APP_SALT, iterations)?;
        Ok(self.device_key.get_or_init(|| key))
    }

    /// Get the system hostname, falling back to "unknown-host".
    fn get_hostname() -> String {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/etc/hostname")
                .map(|s| s.trim().to_string())
                .or_else(|_| std::env::var("HOSTNAME"))
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown-host".into())
        }

        #[cfg(not(unix))]
        {
            std::env::var("COMPUTERNAME")
                .or_else(|_| std::env::var("HOSTNAME"))
                .unwrap_or_else(|_| "unknown-host".into())
        }
    }

    /// Write `data` to `path` through a sibling temp file and a rename so a
    /// concurrent reader sees either the old or the new contents.
    fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| VaultError::Internal(format!("no parent for {}", path.display())))?;
        std::fs::create_dir_all(parent)?;

        let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{SECRET_EXT}.{}.{seq}.tmp", std::process::id()));
        std::fs::write(&tmp, data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, service: &str, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(service, key)?;

        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let plaintext = self.device_key()?.open(&data)?;
        let secret = String::from_utf8(plaintext).map_err(|_| VaultError::NotUtf8)?;

        tracing::debug!(service, key, "read secret from file store");
        Ok(Some(secret))
    }

    fn set(&self, service: &str, key: &str, secret: &str) -> Result<()> {
        let path = self.entry_path(service, key)?;
        let data = self.device_key()?.seal(secret.as_bytes())?;

        Self::write_atomic(&path, &data)?;

        tracing::debug!(service, key, "stored secret in file store");
        Ok(())
    }

    fn clear(&self, service: &str, key: &str) -> Result<()> {
        let path = self.entry_path(service, key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(service, key, "cleared secret from file store");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
