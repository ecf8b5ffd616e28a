//! Vault error types.
//!
//! Every secret storage backend surfaces failures through [`VaultError`].
//! Callers in the auth crate treat any of these as "no credential
//! available", so the variants mainly exist to make logs useful.

/// Unified error type for usagebar secret storage.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Crypto errors ------------------------------------------------------
    /// Encryption failed (e.g. invalid key length, ring internal error).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Decryption failed (e.g. wrong key, corrupted ciphertext, bad nonce).
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    // -- Backend errors -----------------------------------------------------
    /// The keychain backend is unavailable or rejected the operation.
    #[error("keychain unavailable: {reason}")]
    KeychainUnavailable { reason: String },

    /// A service or key name cannot be used as a storage identifier.
    #[error("invalid secret name: {name:?}")]
    InvalidName { name: String },

    /// The stored secret is not valid UTF-8.
    #[error("stored secret is not valid utf-8")]
    NotUtf8,

    // -- Underlying errors --------------------------------------------------
    /// I/O error from the filesystem.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for unexpected internal errors (lock poisoning, CSPRNG).
    #[error("internal vault error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;
