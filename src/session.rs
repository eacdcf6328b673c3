use std::future::Future;

use tokio::sync::Mutex;

use crate::api::AuthApi;
use crate::claims;
use crate::error::{fallback, ApiError, Outcome};
use crate::store::CredentialStore;
use crate::types::{AuthTokens, RegisterRequest, UserProfile};

/// Safety margin subtracted from the expiry claim, covering clock skew and
/// in-flight request latency.
pub const GRACE_PERIOD_SECS: i64 = 30;

/// Whether `token` is expired (or about to expire within the grace period).
///
/// A token with no decodable payload or no `exp` claim is reported
/// not-expired: absence of an expiry is not evidence of expiry, and a call
/// the server rejects anyway goes through the normal 401 renewal path. This
/// check never verifies the signature — it is a UX optimization to avoid
/// doomed calls, not a security boundary.
#[must_use]
pub fn is_expired(token: &str) -> bool {
    match claims::expires_at(token) {
        None => false,
        Some(exp) => exp <= now_epoch() + GRACE_PERIOD_SECS,
    }
}

fn now_epoch() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Client-side session lifecycle manager.
///
/// Owns the credential store and the API surface, keeps the stored access
/// token usable, and wraps arbitrary authenticated operations with a
/// one-shot renew-and-retry on 401.
pub struct SessionManager<A, S> {
    api: A,
    store: S,
    // Serializes renewals so concurrent 401s trigger one network call.
    renewal_gate: Mutex<()>,
}

impl<A: AuthApi, S: CredentialStore> SessionManager<A, S> {
    #[must_use]
    pub fn new(api: A, store: S) -> Self {
        Self {
            api,
            store,
            renewal_gate: Mutex::new(()),
        }
    }

    /// The underlying API surface.
    #[must_use]
    pub fn api(&self) -> &A {
        &self.api
    }

    /// The injected credential store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// True iff an access token is present and not expired.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.store.access_token().is_some_and(|token| !is_expired(&token))
    }

    /// Log in and store the returned session triple.
    ///
    /// # Errors
    ///
    /// Returns the normalized [`ApiError`]; the store is untouched on
    /// failure.
    pub async fn login(&self, email: &str, password: &str) -> Outcome<UserProfile> {
        let tokens = self.api.login(email, password).await?;
        self.save(&tokens);
        Ok(tokens.user)
    }

    /// Register a new account and store the returned session triple.
    ///
    /// # Errors
    ///
    /// Returns the normalized [`ApiError`]; field-level validation failures
    /// carry the server's details collection.
    pub async fn register(&self, request: &RegisterRequest) -> Outcome<UserProfile> {
        let tokens = self.api.register(request).await?;
        self.save(&tokens);
        Ok(tokens.user)
    }

    /// Exchange the stored refresh token for a fresh session triple.
    ///
    /// # Errors
    ///
    /// Fails immediately with the session-expired message when no refresh
    /// token is held; otherwise propagates the renewal call's failure. The
    /// store is only mutated on success.
    pub async fn refresh_session(&self) -> Outcome<()> {
        let Some(refresh_token) = self.store.refresh_token() else {
            return Err(ApiError::new(fallback::SESSION_EXPIRED));
        };
        let tokens = self.api.refresh(&refresh_token).await?;
        self.save(&tokens);
        tracing::debug!("session renewed");
        Ok(())
    }

    /// Make sure the stored session is usable.
    ///
    /// No token means invalid; a fresh token means valid; an expired token
    /// gets one renewal attempt. Renewal failure tears the session down
    /// (full logout) and reports invalid.
    pub async fn ensure_valid_session(&self) -> bool {
        let Some(token) = self.store.access_token() else {
            return false;
        };
        if !is_expired(&token) {
            return true;
        }
        match self.renew_if_stale(Some(&token)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "session renewal failed, tearing down");
                self.logout().await;
                false
            }
        }
    }

    /// Revoke the refresh token server-side and clear the local store.
    ///
    /// Revocation is best-effort: its failure is logged and swallowed, and
    /// local clearing always happens.
    pub async fn logout(&self) {
        if let Some(refresh_token) = self.store.refresh_token() {
            if let Err(e) = self.api.revoke(&refresh_token).await {
                tracing::warn!(error = %e, "token revocation failed, clearing locally anyway");
            }
        }
        self.store.clear();
    }

    /// Run `operation` with the current access token, renewing the session
    /// once on an unauthorized failure.
    ///
    /// On a 401 with a refresh token present, the session is renewed and
    /// `operation` re-invoked exactly once with the re-read token; that
    /// second outcome is final. If renewal itself fails, the session is
    /// torn down and the renewal error propagates. Any other failure, or a
    /// 401 without a refresh token, propagates unchanged. At most one
    /// renewal and one retry happen per call, even under repeated 401s.
    pub async fn with_fresh_token<T, F, Fut>(&self, mut operation: F) -> Outcome<T>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Outcome<T>>,
    {
        let first_token = self.store.access_token();
        let err = match operation(first_token.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_unauthorized() || self.store.refresh_token().is_none() {
            return Err(err);
        }

        if let Err(renewal_err) = self.renew_if_stale(first_token.as_deref()).await {
            self.logout().await;
            return Err(renewal_err);
        }
        operation(self.store.access_token()).await
    }

    /// Fetch the current user's profile through the executor and replace
    /// the cached copy.
    ///
    /// # Errors
    ///
    /// Returns the normalized [`ApiError`] from the call or from a failed
    /// renewal.
    pub async fn current_user(&self) -> Outcome<UserProfile> {
        let api = &self.api;
        let user = self
            .with_fresh_token(|token| async move {
                api.current_user(token.as_deref().unwrap_or_default()).await
            })
            .await?;
        self.replace_profile(&user);
        Ok(user)
    }

    /// Update the profile through the executor and replace the cached copy
    /// with the server's version.
    ///
    /// # Errors
    ///
    /// Returns the normalized [`ApiError`] from the call or from a failed
    /// renewal.
    pub async fn update_profile(&self, updates: &UserProfile) -> Outcome<UserProfile> {
        let api = &self.api;
        let user = self
            .with_fresh_token(|token| async move {
                api.update_profile(token.as_deref().unwrap_or_default(), updates)
                    .await
            })
            .await?;
        self.replace_profile(&user);
        Ok(user)
    }

    /// Renew the session unless another task already did while we waited
    /// for the gate. `stale` is the token the caller last observed: if the
    /// stored token differs, the renewal already happened and the caller
    /// can just re-read.
    async fn renew_if_stale(&self, stale: Option<&str>) -> Outcome<()> {
        let _gate = self.renewal_gate.lock().await;
        if let (Some(current), Some(stale)) = (self.store.access_token(), stale) {
            if current != stale {
                return Ok(());
            }
        }
        self.refresh_session().await
    }

    fn save(&self, tokens: &AuthTokens) {
        self.store
            .save(&tokens.access_token, &tokens.refresh_token, &tokens.user);
    }

    /// Full-session replacement with the current tokens and a new profile.
    fn replace_profile(&self, user: &UserProfile) {
        if let (Some(access), Some(refresh)) =
            (self.store.access_token(), self.store.refresh_token())
        {
            self.store.save(&access, &refresh, user);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::claims::encode_token;
    use crate::store::MemoryStore;

    fn token_expiring_in(secs: i64) -> String {
        encode_token(&json!({ "exp": now_epoch() + secs }))
    }

    /// Scriptable API stub: counts calls and renews with a fixed triple.
    struct StubApi {
        refresh_ok: bool,
        refresh_delay: Duration,
        refresh_calls: AtomicUsize,
        revoke_calls: AtomicUsize,
    }

    impl StubApi {
        fn renewing() -> Self {
            Self {
                refresh_ok: true,
                refresh_delay: Duration::ZERO,
                refresh_calls: AtomicUsize::new(0),
                revoke_calls: AtomicUsize::new(0),
            }
        }

        fn failing_renewal() -> Self {
            Self {
                refresh_ok: false,
                ..Self::renewing()
            }
        }

        fn slow_renewing(delay: Duration) -> Self {
            Self {
                refresh_delay: delay,
                ..Self::renewing()
            }
        }
    }

    impl AuthApi for StubApi {
        async fn login(&self, _email: &str, _password: &str) -> Outcome<AuthTokens> {
            unreachable!("login not exercised")
        }

        async fn register(&self, _request: &RegisterRequest) -> Outcome<AuthTokens> {
            unreachable!("register not exercised")
        }

        async fn refresh(&self, _refresh_token: &str) -> Outcome<AuthTokens> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if !self.refresh_delay.is_zero() {
                tokio::time::sleep(self.refresh_delay).await;
            }
            if self.refresh_ok {
                Ok(AuthTokens {
                    access_token: "renewed-access".into(),
                    refresh_token: "renewed-refresh".into(),
                    user: UserProfile::new().with_email("a@b.sh"),
                })
            } else {
                Err(ApiError::new(fallback::SESSION_EXPIRED).with_status(401))
            }
        }

        async fn revoke(&self, _refresh_token: &str) -> Outcome<()> {
            self.revoke_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn current_user(&self, _access_token: &str) -> Outcome<UserProfile> {
            Ok(UserProfile::new().with_email("fresh@b.sh"))
        }

        async fn update_profile(
            &self,
            _access_token: &str,
            updates: &UserProfile,
        ) -> Outcome<UserProfile> {
            Ok(updates.clone())
        }
    }

    fn logged_in_manager(api: StubApi) -> SessionManager<StubApi, MemoryStore> {
        let store = MemoryStore::new();
        store.save("stale-access", "refresh-1", &UserProfile::new());
        SessionManager::new(api, store)
    }

    // ── expiry ─────────────────────────────────────────────────────

    #[test]
    fn token_well_before_expiry_is_fresh() {
        assert!(!is_expired(&token_expiring_in(120)));
    }

    #[test]
    fn token_inside_the_grace_window_is_expired() {
        assert!(is_expired(&token_expiring_in(10)));
        assert!(is_expired(&token_expiring_in(-10)));
    }

    #[test]
    fn token_without_exp_claim_fails_open() {
        let token = encode_token(&json!({ "sub": "user-1" }));
        assert!(!is_expired(&token));
    }

    #[test]
    fn undecodable_token_fails_open() {
        assert!(!is_expired("garbage"));
        assert!(!is_expired(""));
    }

    #[test]
    fn logged_in_requires_a_fresh_token() {
        let store = MemoryStore::new();
        let manager = SessionManager::new(StubApi::renewing(), store);
        assert!(!manager.is_logged_in());

        manager
            .store()
            .save(&token_expiring_in(120), "r", &UserProfile::new());
        assert!(manager.is_logged_in());

        manager
            .store()
            .save(&token_expiring_in(-10), "r", &UserProfile::new());
        assert!(!manager.is_logged_in());
    }

    // ── executor ───────────────────────────────────────────────────

    #[tokio::test]
    async fn retry_runs_with_the_renewed_token() {
        let manager = logged_in_manager(StubApi::renewing());

        let calls = AtomicUsize::new(0);
        let seen = StdMutex::new(Vec::new());
        let result = manager
            .with_fresh_token(|token| {
                calls.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().push(token.clone());
                async move {
                    if token.as_deref() == Some("renewed-access") {
                        Ok(42)
                    } else {
                        Err(ApiError::new("denied").with_status(401))
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].as_deref(), Some("stale-access"));
        assert_eq!(seen[1].as_deref(), Some("renewed-access"));
        assert_eq!(
            manager.store().refresh_token().as_deref(),
            Some("renewed-refresh")
        );
    }

    #[tokio::test]
    async fn persistent_401_is_retried_exactly_once() {
        let manager = logged_in_manager(StubApi::renewing());

        let calls = AtomicUsize::new(0);
        let result: Outcome<()> = manager
            .with_fresh_token(|_token| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::new("denied").with_status(401)) }
            })
            .await;

        assert_eq!(result.unwrap_err().message, "denied");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.api().refresh_calls.load(Ordering::SeqCst), 1);
        // The second failure propagates as-is; the renewed session stays.
        assert!(manager.store().access_token().is_some());
    }

    #[tokio::test]
    async fn failed_renewal_tears_down_and_raises_the_renewal_error() {
        let manager = logged_in_manager(StubApi::failing_renewal());

        let calls = AtomicUsize::new(0);
        let result: Outcome<()> = manager
            .with_fresh_token(|_token| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::new("denied").with_status(401)) }
            })
            .await;

        assert_eq!(result.unwrap_err().message, fallback::SESSION_EXPIRED);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(manager.store().access_token().is_none());
        assert!(manager.store().refresh_token().is_none());
    }

    #[tokio::test]
    async fn non_unauthorized_failure_propagates_untouched() {
        let manager = logged_in_manager(StubApi::renewing());

        let calls = AtomicUsize::new(0);
        let result: Outcome<()> = manager
            .with_fresh_token(|_token| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::new("server down").with_status(503)) }
            })
            .await;

        assert_eq!(result.unwrap_err().status, Some(503));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.api().refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.store().access_token().as_deref(), Some("stale-access"));
    }

    #[tokio::test]
    async fn unauthorized_without_refresh_token_propagates() {
        let store = MemoryStore::new();
        let manager = SessionManager::new(StubApi::renewing(), store);

        let calls = AtomicUsize::new(0);
        let result: Outcome<()> = manager
            .with_fresh_token(|_token| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::new("denied").with_status(401)) }
            })
            .await;

        assert_eq!(result.unwrap_err().message, "denied");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.api().refresh_calls.load(Ordering::SeqCst), 0);
    }

    // ── session guard ──────────────────────────────────────────────

    #[tokio::test]
    async fn ensure_valid_session_without_token_is_invalid() {
        let manager = SessionManager::new(StubApi::renewing(), MemoryStore::new());
        assert!(!manager.ensure_valid_session().await);
    }

    #[tokio::test]
    async fn ensure_valid_session_with_fresh_token_skips_renewal() {
        let store = MemoryStore::new();
        store.save(&token_expiring_in(120), "r", &UserProfile::new());
        let manager = SessionManager::new(StubApi::renewing(), store);

        assert!(manager.ensure_valid_session().await);
        assert_eq!(manager.api().refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ensure_valid_session_renews_an_expired_token() {
        let store = MemoryStore::new();
        store.save(&token_expiring_in(-10), "r", &UserProfile::new());
        let manager = SessionManager::new(StubApi::renewing(), store);

        assert!(manager.ensure_valid_session().await);
        assert_eq!(manager.api().refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            manager.store().access_token().as_deref(),
            Some("renewed-access")
        );
    }

    #[tokio::test]
    async fn ensure_valid_session_tears_down_on_renewal_failure() {
        let store = MemoryStore::new();
        store.save(&token_expiring_in(-10), "r", &UserProfile::new());
        let manager = SessionManager::new(StubApi::failing_renewal(), store);

        assert!(!manager.ensure_valid_session().await);
        assert!(manager.store().access_token().is_none());
        assert!(manager.store().refresh_token().is_none());
    }

    #[tokio::test]
    async fn clear_then_logged_in_is_false() {
        let manager = logged_in_manager(StubApi::renewing());
        manager.store().clear();
        assert!(!manager.is_logged_in());
    }

    // ── logout ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn logout_revokes_then_clears() {
        let manager = logged_in_manager(StubApi::renewing());
        manager.logout().await;

        assert_eq!(manager.api().revoke_calls.load(Ordering::SeqCst), 1);
        assert!(manager.store().access_token().is_none());
    }

    #[tokio::test]
    async fn logout_without_refresh_token_skips_revocation() {
        let manager = SessionManager::new(StubApi::renewing(), MemoryStore::new());
        manager.logout().await;
        assert_eq!(manager.api().revoke_calls.load(Ordering::SeqCst), 0);
    }

    // ── single-flight ──────────────────────────────────────────────

    #[tokio::test]
    async fn concurrent_renewals_coalesce_into_one_call() {
        let store = MemoryStore::new();
        store.save(&token_expiring_in(-10), "r", &UserProfile::new());
        let manager = Arc::new(SessionManager::new(
            StubApi::slow_renewing(Duration::from_millis(50)),
            store,
        ));

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.ensure_valid_session().await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }

        assert_eq!(manager.api().refresh_calls.load(Ordering::SeqCst), 1);
    }

    // ── profile convenience ────────────────────────────────────────

    #[tokio::test]
    async fn current_user_replaces_the_cached_profile() {
        let manager = logged_in_manager(StubApi::renewing());

        let user = manager.current_user().await.unwrap();
        assert_eq!(user.email.as_deref(), Some("fresh@b.sh"));
        assert_eq!(
            manager.store().profile().unwrap().email.as_deref(),
            Some("fresh@b.sh")
        );
        // Tokens are untouched by a profile refresh.
        assert_eq!(manager.store().access_token().as_deref(), Some("stale-access"));
    }

    #[tokio::test]
    async fn update_profile_stores_the_server_version() {
        let manager = logged_in_manager(StubApi::renewing());

        let updates = UserProfile::new().with_name("Anika", "Rahman");
        let user = manager.update_profile(&updates).await.unwrap();
        assert_eq!(user.first_name.as_deref(), Some("Anika"));
        assert_eq!(
            manager.store().profile().unwrap().first_name.as_deref(),
            Some("Anika")
        );
    }
}
