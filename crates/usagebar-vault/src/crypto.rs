//! Sealed-blob encryption for secrets at rest.
//!
//! A [`SecretKey`] is an AES-256-GCM key derived with PBKDF2-HMAC-SHA256.
//! [`SecretKey::seal`] produces a self-contained blob,
//!
//! ```text
//! [12 bytes: random nonce][ciphertext][16 bytes: tag]
//! ```
//!
//! and [`SecretKey::open`] authenticates and decrypts it. A fresh nonce is
//! drawn from the system CSPRNG for every seal.

use std::num::NonZeroU32;

use ring::aead::{self, AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Result, VaultError};

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// Smallest possible sealed blob: a nonce and the tag of an empty message.
pub const MIN_SEALED_LEN: usize = NONCE_LEN + aead::MAX_TAG_LEN;

/// An AES-256-GCM key for sealing secrets.
pub struct SecretKey {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl SecretKey {
    /// Use raw key bytes directly.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EncryptionFailed`] unless `bytes` is exactly
    /// [`KEY_LEN`] long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let unbound = UnboundKey::new(&AES_256_GCM, bytes).map_err(|_| {
            VaultError::EncryptionFailed {
                reason: format!("key must be {KEY_LEN} bytes, got {}", bytes.len()),
            }
        })?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Stretch `material` with PBKDF2-HMAC-SHA256 into a key.
    ///
    /// # Errors
    ///
    /// Propagates [`from_bytes`](Self::from_bytes) failures.
    pub fn derive(material: &[u8], salt: &[u8], iterations: NonZeroU32) -> Result<Self> {
        let mut bytes = [0u8; KEY_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            salt,
            material,
            &mut bytes,
        );
        Self::from_bytes(&bytes)
    }

    /// Encrypt `plaintext` into a sealed blob.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EncryptionFailed`] if no nonce can be drawn or
    /// `ring` rejects the input.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| VaultError::EncryptionFailed {
                reason: "system random source failed".into(),
            })?;

        let mut body = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut body)
            .map_err(|_| VaultError::EncryptionFailed {
                reason: "aes-gcm seal failed".into(),
            })?;

        let mut blob = Vec::with_capacity(NONCE_LEN + body.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&body);
        Ok(blob)
    }

    /// Authenticate and decrypt a blob produced by [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::DecryptionFailed`] for a truncated blob, a
    /// different key, or tampered bytes.
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < MIN_SEALED_LEN {
            return Err(VaultError::DecryptionFailed {
                reason: format!("sealed blob too short ({} bytes)", blob.len()),
            });
        }

        let (nonce, body) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce).map_err(|_| {
            VaultError::DecryptionFailed {
                reason: "bad nonce".into(),
            }
        })?;

        let mut body = body.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut body)
            .map_err(|_| VaultError::DecryptionFailed {
                reason: "authentication failed: wrong key or corrupted data".into(),
            })?;
        Ok(plaintext.to_vec())
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}
