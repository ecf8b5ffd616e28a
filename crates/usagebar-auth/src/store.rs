//! The credential owner and the consumer-facing interface.
//!
//! [`TokenStore`] holds the single authoritative [`Credential`]: an
//! in-memory copy lazily loaded from the [`SecretStore`], written back on
//! every change. Readers get a valid access token or `None`; expired
//! credentials are refreshed on read, and a failed refresh clears the
//! session.
//!
//! Every read and write goes through one async mutex, so a refresh is
//! observed by other readers as a single atomic replacement and at most
//! one refresh request is ever in flight.

use std::sync::Arc;

use tokio::sync::Mutex;
use usagebar_vault::SecretStore;

use crate::config::AuthConfig;
use crate::credential::{Clock, Credential, SystemClock};
use crate::error::{AuthError, Result};
use crate::flow::{BrowserLauncher, FlowCoordinator, SystemBrowser};
use crate::oauth::{OAuthClient, TokenExchanger};

/// `None` until storage has been read; then the loaded credential, if any.
type Slot = Option<Option<Credential>>;

/// Owns the OAuth credential for this process.
pub struct TokenStore {
    service: String,
    key: String,
    storage: Arc<dyn SecretStore>,
    exchanger: Arc<dyn TokenExchanger>,
    clock: Arc<dyn Clock>,
    flow: FlowCoordinator,
    slot: Mutex<Slot>,
}

impl TokenStore {
    /// Wire a store from explicit collaborators.
    pub fn new(
        config: AuthConfig,
        storage: Arc<dyn SecretStore>,
        exchanger: Arc<dyn TokenExchanger>,
        browser: Arc<dyn BrowserLauncher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            service: config.storage_service.clone(),
            key: config.storage_key.clone(),
            storage,
            exchanger: exchanger.clone(),
            clock,
            flow: FlowCoordinator::new(config, exchanger, browser),
            slot: Mutex::new(None),
        }
    }

    /// Wire a store with the production token client, system browser and
    /// wall clock.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if `config` does not validate,
    /// or [`AuthError::Network`] if the HTTP client cannot be built.
    pub fn from_config(config: AuthConfig, storage: Arc<dyn SecretStore>) -> Result<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let exchanger = Arc::new(OAuthClient::new(&config, clock.clone())?);
        Ok(Self::new(
            config,
            storage,
            exchanger,
            Arc::new(SystemBrowser),
            clock,
        ))
    }

    // -- Consumer interface ------------------------------------------------

    /// Whether a credential exists and is outside the expiry buffer.
    ///
    /// Never refreshes.
    pub async fn is_authenticated(&self) -> bool {
        let mut slot = self.slot.lock().await;
        self.load(&mut slot)
            .is_some_and(|c| !c.is_expired_at(self.clock.now_ms()))
    }

    /// A valid access token, refreshing an expired credential first.
    ///
    /// Returns `None` when logged out, or when the refresh fails (the
    /// credential is then cleared and a new login is required).
    pub async fn get_access_token(&self) -> Option<String> {
        let mut slot = self.slot.lock().await;
        let current = self.load(&mut slot)?;

        if !current.is_expired_at(self.clock.now_ms()) {
            return Some(current.access_token);
        }

        let Some(refresh_token) = current.refresh_token.as_deref() else {
            tracing::warn!("credential expired and has no refresh token, clearing it");
            self.clear_locked(&mut slot);
            return None;
        };

        tracing::debug!(expires_at = current.expires_at, "access token expired, refreshing");
        match self.exchanger.refresh(refresh_token).await {
            Ok(fresh) => {
                let fresh = fresh.inherit_refresh_token(Some(&current));
                let access_token = fresh.access_token.clone();
                match self.write_locked(&mut slot, fresh) {
                    Ok(()) => {
                        tracing::info!("access token refreshed");
                        Some(access_token)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "could not persist refreshed credential");
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    kind = ?e.kind(),
                    error = %e,
                    "token refresh failed, clearing credential"
                );
                self.clear_locked(&mut slot);
                None
            }
        }
    }

    /// Run a browser login; `true` once a new credential is stored.
    pub async fn authenticate(&self) -> bool {
        match self.login().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(kind = ?e.kind(), error = %e, "authentication failed");
                false
            }
        }
    }

    /// [`authenticate`](Self::authenticate), keeping the failure reason.
    ///
    /// # Errors
    ///
    /// Any error from [`FlowCoordinator::run`], or a storage error if the
    /// new credential cannot be persisted (the previous state is then left
    /// untouched).
    pub async fn login(&self) -> Result<()> {
        let credential = self.flow.run().await?;

        let mut slot = self.slot.lock().await;
        let previous = self.load(&mut slot);
        let credential = credential.inherit_refresh_token(previous.as_ref());
        self.write_locked(&mut slot, credential)?;

        tracing::info!("login completed");
        Ok(())
    }

    /// Forget the credential in memory and in storage. Idempotent.
    ///
    /// A storage failure is logged, not returned; the credential it could
    /// not remove is then read back on the next access.
    pub async fn logout(&self) {
        let mut slot = self.slot.lock().await;
        self.clear_locked(&mut slot);
        tracing::info!("logged out");
    }

    /// Expiry (Unix ms) of the stored credential, expired or not.
    pub async fn expires_at(&self) -> Option<i64> {
        let mut slot = self.slot.lock().await;
        self.load(&mut slot).map(|c| c.expires_at)
    }

    // -- Internals ----------------------------------------------------------

    /// The cached credential, reading storage on first use.
    ///
    /// A failed read is reported as "no credential" and retried next time.
    fn load(&self, slot: &mut Slot) -> Option<Credential> {
        if let Some(cached) = slot {
            return cached.clone();
        }
        match self.read_storage() {
            Ok(credential) => {
                tracing::debug!(found = credential.is_some(), "loaded credential from storage");
                *slot = Some(credential.clone());
                credential
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not read stored credential");
                None
            }
        }
    }

    fn read_storage(&self) -> Result<Option<Credential>> {
        match self.storage.get(&self.service, &self.key)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Persist `credential`, then publish it in memory.
    fn write_locked(&self, slot: &mut Slot, credential: Credential) -> Result<()> {
        let json = serde_json::to_string(&credential)?;
        self.storage
            .set(&self.service, &self.key, &json)
            .map_err(AuthError::Storage)?;
        *slot = Some(Some(credential));
        Ok(())
    }

    /// Clear storage, then memory. If storage refuses, the slot goes back
    /// to unloaded so the next read sees what storage still holds.
    fn clear_locked(&self, slot: &mut Slot) {
        match self.storage.clear(&self.service, &self.key) {
            Ok(()) => *slot = Some(None),
            Err(e) => {
                tracing::warn!(error = %e, "could not clear stored credential");
                *slot = None;
            }
        }
    }

    /// Store a credential directly, bypassing the browser flow.
    #[cfg(test)]
    pub(crate) async fn replace(&self, credential: Credential) -> Result<()> {
        let mut slot = self.slot.lock().await;
        self.write_locked(&mut slot, credential)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use usagebar_vault::MemorySecretStore;

    use super::*;
    use crate::credential::ManualClock;

    const NOW: i64 = 1_700_000_000_000;

    /// Replays scripted refresh results and counts calls.
    #[derive(Default)]
    struct ScriptedExchanger {
        refreshes: std::sync::Mutex<VecDeque<Result<Credential>>>,
        refresh_calls: AtomicUsize,
        seen_refresh_tokens: std::sync::Mutex<Vec<String>>,
    }

    impl ScriptedExchanger {
        fn push_refresh(&self, result: Result<Credential>) {
            self.refreshes.lock().unwrap().push_back(result);
        }
        fn calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenExchanger for ScriptedExchanger {
        async fn exchange(&self, _code: &str, _code_verifier: &str) -> Result<Credential> {
            Err(AuthError::MissingCode)
        }

        async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_refresh_tokens
                .lock()
                .unwrap()
                .push(refresh_token.to_string());
            self.refreshes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(AuthError::Protocol {
                    status: 400,
                    reason: "unscripted".into(),
                }))
        }
    }

    struct Fixture {
        store: TokenStore,
        storage: Arc<MemorySecretStore>,
        exchanger: Arc<ScriptedExchanger>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(MemorySecretStore::new());
        let exchanger = Arc::new(ScriptedExchanger::default());
        let clock = Arc::new(ManualClock::new(NOW));
        let config = AuthConfig {
            client_id: "client".into(),
            ..AuthConfig::default()
        };
        let store = TokenStore::new(
            config,
            storage.clone(),
            exchanger.clone(),
            Arc::new(SystemBrowser),
            clock.clone(),
        );
        Fixture {
            store,
            storage,
            exchanger,
            clock,
        }
    }

    fn credential(access: &str, refresh: Option<&str>, expires_at: i64) -> Credential {
        Credential {
            access_token: access.into(),
            refresh_token: refresh.map(String::from),
            expires_at,
        }
    }

    fn stored(fx: &Fixture) -> Option<Credential> {
        fx.storage
            .get("usagebar", "oauth-credential")
            .unwrap()
            .map(|json| serde_json::from_str(&json).unwrap())
    }

    #[tokio::test]
    async fn empty_store_is_unauthenticated() {
        let fx = fixture();
        assert!(!fx.store.is_authenticated().await);
        assert_eq!(fx.store.get_access_token().await, None);
        assert_eq!(fx.store.expires_at().await, None);
        assert_eq!(fx.exchanger.calls(), 0);
    }

    #[tokio::test]
    async fn expiry_buffer_applies() {
        let fx = fixture();
        fx.store
            .replace(credential("at", Some("rt"), NOW + 30_000))
            .await
            .unwrap();
        assert!(!fx.store.is_authenticated().await);

        fx.store
            .replace(credential("at", Some("rt"), NOW + 3_600_000))
            .await
            .unwrap();
        assert!(fx.store.is_authenticated().await);
    }

    #[tokio::test]
    async fn valid_token_is_served_from_memory() {
        let fx = fixture();
        fx.store
            .replace(credential("at", Some("rt"), NOW + 3_600_000))
            .await
            .unwrap();

        // Reads after the first never touch storage.
        fx.storage.set_fail_reads(true);
        assert_eq!(fx.store.get_access_token().await.as_deref(), Some("at"));
        assert_eq!(fx.store.get_access_token().await.as_deref(), Some("at"));
        assert_eq!(fx.exchanger.calls(), 0);
    }

    #[tokio::test]
    async fn lazily_loads_persisted_credential() {
        let fx = fixture();
        let json = serde_json::to_string(&credential("disk", Some("rt"), NOW + 3_600_000)).unwrap();
        fx.storage.set("usagebar", "oauth-credential", &json).unwrap();

        assert_eq!(fx.store.get_access_token().await.as_deref(), Some("disk"));
        assert_eq!(fx.store.expires_at().await, Some(NOW + 3_600_000));
    }

    #[tokio::test]
    async fn expired_credential_refreshes_once() {
        let fx = fixture();
        fx.store
            .replace(credential("old", Some("rt1"), NOW + 30_000))
            .await
            .unwrap();
        fx.exchanger
            .push_refresh(Ok(credential("new", Some("rt2"), NOW + 3_600_000)));

        assert_eq!(fx.store.get_access_token().await.as_deref(), Some("new"));
        assert_eq!(fx.exchanger.calls(), 1);
        assert_eq!(fx.store.expires_at().await, Some(NOW + 3_600_000));
        assert_eq!(
            stored(&fx).unwrap(),
            credential("new", Some("rt2"), NOW + 3_600_000)
        );

        // Cached now; no second refresh.
        assert_eq!(fx.store.get_access_token().await.as_deref(), Some("new"));
        assert_eq!(fx.exchanger.calls(), 1);
    }

    #[tokio::test]
    async fn refresh_without_new_refresh_token_keeps_old_one() {
        let fx = fixture();
        fx.store
            .replace(credential("old", Some("rt1"), NOW - 1))
            .await
            .unwrap();
        fx.exchanger
            .push_refresh(Ok(credential("new", None, NOW + 3_600_000)));

        assert_eq!(fx.store.get_access_token().await.as_deref(), Some("new"));
        assert_eq!(stored(&fx).unwrap().refresh_token.as_deref(), Some("rt1"));
    }

    #[tokio::test]
    async fn failed_refresh_clears_everything() {
        let fx = fixture();
        fx.store
            .replace(credential("old", Some("rt1"), NOW - 1))
            .await
            .unwrap();
        fx.exchanger.push_refresh(Err(AuthError::Protocol {
            status: 400,
            reason: "invalid_grant".into(),
        }));

        assert_eq!(fx.store.get_access_token().await, None);
        assert_eq!(fx.exchanger.calls(), 1);
        assert!(!fx.store.is_authenticated().await);
        assert!(stored(&fx).is_none());

        // Demoted for good: no further refresh attempts.
        assert_eq!(fx.store.get_access_token().await, None);
        assert_eq!(fx.exchanger.calls(), 1);
    }

    #[tokio::test]
    async fn expired_without_refresh_token_is_cleared() {
        let fx = fixture();
        fx.store
            .replace(credential("old", None, NOW - 1))
            .await
            .unwrap();

        assert_eq!(fx.store.get_access_token().await, None);
        assert_eq!(fx.exchanger.calls(), 0);
        assert!(stored(&fx).is_none());
    }

    #[tokio::test]
    async fn concurrent_readers_share_one_refresh() {
        let fx = Arc::new(fixture());
        fx.store
            .replace(credential("old", Some("rt"), NOW - 1))
            .await
            .unwrap();
        fx.exchanger
            .push_refresh(Ok(credential("new", Some("rt2"), NOW + 3_600_000)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let fx = fx.clone();
            handles.push(tokio::spawn(async move { fx.store.get_access_token().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().as_deref(), Some("new"));
        }
        assert_eq!(fx.exchanger.calls(), 1);
    }

    #[tokio::test]
    async fn logout_clears_memory_and_storage() {
        let fx = fixture();
        fx.store
            .replace(credential("at", Some("rt"), NOW + 3_600_000))
            .await
            .unwrap();

        fx.store.logout().await;
        assert!(stored(&fx).is_none());
        assert_eq!(fx.store.get_access_token().await, None);
        assert_eq!(fx.exchanger.calls(), 0);

        // Idempotent.
        fx.store.logout().await;
        assert!(!fx.store.is_authenticated().await);
    }

    #[tokio::test]
    async fn failed_logout_does_not_diverge_from_storage() {
        let fx = fixture();
        fx.store
            .replace(credential("at", Some("rt"), NOW + 3_600_000))
            .await
            .unwrap();

        fx.storage.set_fail_writes(true);
        fx.store.logout().await;

        // Storage still holds the credential, so memory must agree with it.
        assert!(stored(&fx).is_some());
        assert!(fx.store.is_authenticated().await);
        assert_eq!(fx.store.get_access_token().await.as_deref(), Some("at"));

        fx.storage.set_fail_writes(false);
        fx.store.logout().await;
        assert!(stored(&fx).is_none());
        assert!(!fx.store.is_authenticated().await);
    }

    #[tokio::test]
    async fn storage_read_failure_means_no_credential_and_is_retried() {
        let fx = fixture();
        let json = serde_json::to_string(&credential("disk", Some("rt"), NOW + 3_600_000)).unwrap();
        fx.storage.set("usagebar", "oauth-credential", &json).unwrap();

        fx.storage.set_fail_reads(true);
        assert_eq!(fx.store.get_access_token().await, None);

        fx.storage.set_fail_reads(false);
        assert_eq!(fx.store.get_access_token().await.as_deref(), Some("disk"));
    }

    #[tokio::test]
    async fn corrupt_stored_credential_reads_as_missing() {
        let fx = fixture();
        fx.storage
            .set("usagebar", "oauth-credential", "{not json")
            .unwrap();
        assert!(!fx.store.is_authenticated().await);
        assert_eq!(fx.store.get_access_token().await, None);
    }

    #[tokio::test]
    async fn write_failure_leaves_memory_untouched() {
        let fx = fixture();
        fx.store
            .replace(credential("at", Some("rt"), NOW + 3_600_000))
            .await
            .unwrap();

        fx.storage.set_fail_writes(true);
        let err = fx
            .store
            .replace(credential("other", Some("rt"), NOW + 7_200_000))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Storage);
        assert_eq!(fx.store.get_access_token().await.as_deref(), Some("at"));
        assert_eq!(fx.store.expires_at().await, Some(NOW + 3_600_000));
    }

    #[tokio::test]
    async fn clock_drives_expiry() {
        let fx = fixture();
        fx.store
            .replace(credential("at", Some("rt"), NOW + 3_600_000))
            .await
            .unwrap();
        assert!(fx.store.is_authenticated().await);

        fx.clock.advance(3_600_000 - 60_000);
        assert!(!fx.store.is_authenticated().await);
        assert_eq!(fx.exchanger.calls(), 0);
    }

    #[tokio::test]
    async fn refresh_uses_the_stored_refresh_token() {
        let fx = fixture();
        fx.store
            .replace(credential("old", Some("rt-secret"), NOW - 1))
            .await
            .unwrap();
        fx.exchanger
            .push_refresh(Ok(credential("new", None, NOW + 3_600_000)));

        fx.store.get_access_token().await;
        assert_eq!(
            fx.exchanger.seen_refresh_tokens.lock().unwrap().as_slice(),
            ["rt-secret".to_string()]
        );
    }

    #[test]
    fn from_config_rejects_invalid_config() {
        let storage = Arc::new(MemorySecretStore::new());
        let config = AuthConfig {
            client_id: String::new(),
            ..AuthConfig::default()
        };
        let err = TokenStore::from_config(config, storage)
            .err()
            .unwrap();
        assert!(matches!(err, AuthError::InvalidConfig { .. }));
    }
}
