//! The secret storage capability and its in-memory backend.
//!
//! A [`SecretStore`] holds opaque string secrets addressed by a
//! `(service, key)` pair. Backends are expected to encrypt at rest; the
//! caller treats the secret as a blob and owns its format.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, VaultError};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over platform-specific secure secret storage.
///
/// Implementations must be `Send + Sync` so a single store can be shared
/// across async tasks. Each call is expected to be short and blocking.
pub trait SecretStore: Send + Sync {
    /// Read the secret stored under `(service, key)`.
    ///
    /// Returns `Ok(None)` when nothing is stored.
    fn get(&self, service: &str, key: &str) -> Result<Option<String>>;

    /// Store (or overwrite) the secret under `(service, key)`.
    ///
    /// A failed write must leave the previous value intact.
    fn set(&self, service: &str, key: &str, secret: &str) -> Result<()>;

    /// Remove the secret under `(service, key)`.
    ///
    /// Clearing an entry that does not exist is not an error.
    fn clear(&self, service: &str, key: &str) -> Result<()>;
}

/// Reject names that cannot be used as a single path component or keychain
/// identifier.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(VaultError::InvalidName {
            name: name.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Process-local secret store backed by a `HashMap`.
///
/// Nothing survives a restart. Useful for tests and for sessions that must
/// not touch disk. Reads and writes can be switched to fail so callers can
/// exercise their storage-error paths.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<(String, String), String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemorySecretStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `get` fail (or succeed again).
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `set` and `clear` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), String>>> {
        self.entries
            .lock()
            .map_err(|e| VaultError::Internal(format!("memory store lock poisoned: {e}")))
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, service: &str, key: &str) -> Result<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(VaultError::KeychainUnavailable {
                reason: "reads disabled".into(),
            });
        }
        let entries = self.lock()?;
        Ok(entries
            .get(&(service.to_string(), key.to_string()))
            .cloned())
    }

    fn set(&self, service: &str, key: &str, secret: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(VaultError::KeychainUnavailable {
                reason: "writes disabled".into(),
            });
        }
        let mut entries = self.lock()?;
        entries.insert((service.to_string(), key.to_string()), secret.to_string());
        Ok(())
    }

    fn clear(&self, service: &str, key: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(VaultError::KeychainUnavailable {
                reason: "writes disabled".into(),
            });
        }
        let mut entries = self.lock()?;
        entries.remove(&(service.to_string(), key.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
