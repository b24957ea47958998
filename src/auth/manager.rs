//! Session lifecycle management.
//!
//! `SessionManager` owns the authentication state machine: login and resume
//! establish a session, a renewal timer refreshes it shortly before expiry,
//! an inactivity timer evicts it when the user goes quiet, and logout /
//! failed renewal / eviction all funnel through one teardown path that
//! clears storage and notifies watchers.
//!
//! Two rules keep the async edges safe. Every timer firing and every
//! in-flight renewal completion is guarded by a session generation, so a
//! stale result can never resurrect a session that was torn down after the
//! work started. And renewal is coalesced: concurrent triggers (the
//! proactive timer racing a gateway-driven refresh) serialize on one lock
//! and the losers observe that the work already happened.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::client::{verify_token_liveness, AuthClient, Credentials};
use crate::auth::session::{Session, User};
use crate::config::SessionPolicy;
use crate::error::AuthError;
use crate::store::SessionStore;

/// Minimum interval between persisted activity-timestamp writes. Activity
/// events arrive at pointer-movement rates; the timer is re-armed on every
/// one, the storage write only this often.
const ACTIVITY_FLUSH_SECS: i64 = 60;

/// Observable lifecycle states, broadcast to dependents on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Active,
    Renewing,
    Expired,
}

struct ManagerState {
    phase: SessionState,
    /// Bumped on every activation and teardown. Timer firings and renewal
    /// completions compare against the generation they started under.
    generation: u64,
    /// Count of completed renewals, for coalescing concurrent triggers.
    renewals: u64,
    /// When the activity timestamp was last flushed to storage.
    last_activity_flush: chrono::DateTime<chrono::Utc>,
    renewal_timer: Option<JoinHandle<()>>,
    inactivity_timer: Option<JoinHandle<()>>,
}

struct ManagerInner {
    store: Arc<dyn SessionStore>,
    client: Arc<dyn AuthClient>,
    policy: SessionPolicy,
    state: Mutex<ManagerState>,
    /// Serializes renewal attempts; at most one network refresh in flight.
    refresh_lock: tokio::sync::Mutex<()>,
    state_tx: watch::Sender<SessionState>,
}

impl ManagerInner {
    fn generation(&self) -> u64 {
        self.state.lock().expect("session state lock poisoned").generation
    }

    fn set_phase(&self, phase: SessionState) {
        self.state.lock().expect("session state lock poisoned").phase = phase;
        self.state_tx.send_replace(phase);
    }

    /// Session as currently persisted. Storage trouble reads as "no session";
    /// the store has already logged and cleaned up anything corrupt.
    fn current_session(&self) -> Option<Session> {
        self.store.load().ok().flatten()
    }

    /// The single teardown path: invalidate timers and pending async work,
    /// clear storage, notify dependents.
    fn teardown(&self, terminal: SessionState) {
        let (renewal, inactivity) = {
            let mut state = self.state.lock().expect("session state lock poisoned");
            state.generation += 1;
            state.phase = terminal;
            (state.renewal_timer.take(), state.inactivity_timer.take())
        };
        if let Some(timer) = renewal {
            timer.abort();
        }
        if let Some(timer) = inactivity {
            timer.abort();
        }
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "Failed to clear session storage during teardown");
        }
        self.state_tx.send_replace(terminal);
    }
}

/// Handle to the session lifecycle. Clone is cheap; all clones share one
/// state machine and one storage scope.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        client: Arc<dyn AuthClient>,
        policy: SessionPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            inner: Arc::new(ManagerInner {
                store,
                client,
                policy,
                state: Mutex::new(ManagerState {
                    phase: SessionState::Unauthenticated,
                    generation: 0,
                    renewals: 0,
                    last_activity_flush: chrono::Utc::now(),
                    renewal_timer: None,
                    inactivity_timer: None,
                }),
                refresh_lock: tokio::sync::Mutex::new(()),
                state_tx,
            }),
        }
    }

    /// Watch lifecycle transitions. UI consumers typically redirect to the
    /// login surface when they observe `Expired` or `Unauthenticated`.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.lock().expect("session state lock poisoned").phase
    }

    /// Exchange credentials for a session and move to `Active`.
    pub async fn login(&self, credentials: Credentials) -> Result<User, AuthError> {
        if credentials.identifier.is_empty() || credentials.secret.is_empty() {
            return Err(AuthError::AuthenticationFailed(
                "username and password are required".to_string(),
            ));
        }

        self.inner.set_phase(SessionState::Authenticating);
        let exchange = match self.inner.client.exchange_credentials(&credentials).await {
            Ok(exchange) => exchange,
            Err(err) => {
                debug!(error = %err, "Login exchange failed");
                self.inner.set_phase(SessionState::Unauthenticated);
                return Err(err);
            }
        };

        let session = Session::new(
            exchange.user.clone(),
            exchange.access_token,
            exchange.refresh_token,
            self.inner.policy.ttl(),
        );
        if let Err(err) = self.inner.store.save(&session) {
            self.inner.set_phase(SessionState::Unauthenticated);
            return Err(err);
        }

        self.activate();
        info!(user = %exchange.user.username, "Session established");
        Ok(exchange.user)
    }

    /// Try to pick up a persisted session at process start.
    ///
    /// A session whose window has closed is cleared. A session whose window
    /// is open but whose access token fails the local liveness check gets
    /// one silent refresh before giving up.
    pub async fn resume(&self) -> Result<bool, AuthError> {
        let Some(session) = self.inner.store.load()? else {
            return Ok(false);
        };
        if session.is_expired() {
            debug!("Persisted session expired; starting from a clean slate");
            self.inner.store.clear()?;
            return Ok(false);
        }

        self.activate();
        if verify_token_liveness(&session.access_token) {
            debug!("Resumed persisted session");
            return Ok(true);
        }

        // Window still open but the token claim is stale or undecodable;
        // a refresh settles it either way.
        match self.refresh().await {
            Ok(()) => Ok(true),
            Err(err) => {
                debug!(error = %err, "Could not refresh resumed session");
                Ok(false)
            }
        }
    }

    /// End the session locally, always. The remote revocation runs in the
    /// background; its failure is logged, not retried, and never blocks.
    pub fn logout(&self) {
        let token = self.inner.current_session().map(|s| s.access_token);
        self.inner.teardown(SessionState::Unauthenticated);

        if let Some(token) = token {
            let client = Arc::clone(&self.inner.client);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(err) = client.revoke_session(&token).await {
                        debug!(error = %err, "Remote logout call failed");
                    }
                });
            }
        }
        info!("Logged out");
    }

    /// Tear the session down as expired. Used when the server has
    /// definitively rejected it (the gateway's persistent-401 path).
    pub fn invalidate(&self) {
        self.inner.teardown(SessionState::Expired);
    }

    /// Clear timers without touching storage, for process shutdown.
    /// The persisted session stays eligible for `resume` next start.
    pub fn shutdown(&self) {
        let (renewal, inactivity) = {
            let mut state = self.inner.state.lock().expect("session state lock poisoned");
            (state.renewal_timer.take(), state.inactivity_timer.take())
        };
        if let Some(timer) = renewal {
            timer.abort();
        }
        if let Some(timer) = inactivity {
            timer.abort();
        }
    }

    /// Renew the session's access token now.
    ///
    /// Concurrent callers coalesce into one network exchange. Any failure is
    /// permanent for this session: state moves to `Expired`, storage is
    /// cleared, and `SessionExpired` is returned.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let (phase, generation, renewals) = {
            let state = self.inner.state.lock().expect("session state lock poisoned");
            (state.phase, state.generation, state.renewals)
        };
        if !matches!(phase, SessionState::Active | SessionState::Renewing) {
            // A rejected token can belong to a persisted session that was
            // never activated here; it must not linger in storage.
            if phase != SessionState::Authenticating && self.inner.current_session().is_some() {
                self.inner.teardown(SessionState::Expired);
            }
            return Err(AuthError::SessionExpired);
        }

        let _guard = self.inner.refresh_lock.lock().await;

        // Re-check under the lock: the session may have been torn down, or
        // another trigger may have already done the renewal we queued for.
        {
            let state = self.inner.state.lock().expect("session state lock poisoned");
            if state.generation != generation {
                return Err(AuthError::SessionExpired);
            }
            if state.renewals != renewals {
                debug!("Renewal already completed by a concurrent trigger");
                return Ok(());
            }
        }

        let Some(mut session) = self.inner.store.load()? else {
            self.inner.teardown(SessionState::Unauthenticated);
            return Err(AuthError::SessionExpired);
        };
        let Some(refresh_token) = session.refresh_token.clone() else {
            debug!("Session has no refresh token; renewal impossible");
            self.inner.teardown(SessionState::Expired);
            return Err(AuthError::SessionExpired);
        };

        self.inner.set_phase(SessionState::Renewing);
        let result = self.inner.client.exchange_refresh_token(&refresh_token).await;

        if self.inner.generation() != generation {
            // Torn down while the exchange was in flight; the result must
            // not resurrect cleared state.
            debug!("Discarding stale renewal result");
            return Err(AuthError::SessionExpired);
        }

        match result {
            Ok(tokens) => {
                session.renew(tokens.access_token, tokens.refresh_token, self.inner.policy.ttl());
                if let Err(err) = self.inner.store.save(&session) {
                    warn!(error = %err, "Failed to persist renewed session");
                    self.inner.teardown(SessionState::Expired);
                    return Err(err);
                }
                {
                    let mut state = self.inner.state.lock().expect("session state lock poisoned");
                    state.renewals += 1;
                }
                self.inner.set_phase(SessionState::Active);
                self.schedule_renewal(generation);
                debug!("Session renewed");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "Token refresh failed; ending session");
                self.inner.teardown(SessionState::Expired);
                Err(AuthError::SessionExpired)
            }
        }
    }

    /// Note a user interaction: push the inactivity deadline out by a full
    /// window. The persisted activity timestamp is flushed at most once per
    /// `ACTIVITY_FLUSH_SECS`; activity events can arrive per keystroke and
    /// must not cost a storage write each.
    pub fn record_activity(&self) {
        let (generation, flush) = {
            let mut state = self.inner.state.lock().expect("session state lock poisoned");
            if !matches!(state.phase, SessionState::Active | SessionState::Renewing) {
                return;
            }
            let now = chrono::Utc::now();
            let due = now - state.last_activity_flush
                >= chrono::Duration::seconds(ACTIVITY_FLUSH_SECS);
            if due {
                state.last_activity_flush = now;
            }
            (state.generation, due)
        };
        if flush {
            if let Ok(Some(mut session)) = self.inner.store.load() {
                session.touch();
                if let Err(err) = self.inner.store.save(&session) {
                    warn!(error = %err, "Failed to persist activity timestamp");
                }
            }
        }
        self.arm_inactivity(generation);
    }

    /// Authorization header value for the current session, or nothing if no
    /// valid token is stored. Pure read; never triggers a refresh.
    pub fn authorization_header(&self) -> Option<String> {
        self.bearer_token().map(|token| format!("Bearer {token}"))
    }

    /// The raw access token, withheld once `expires_at` has passed.
    pub fn bearer_token(&self) -> Option<String> {
        self.inner
            .current_session()
            .filter(|s| !s.is_expired())
            .map(|s| s.access_token)
    }

    /// True iff a session is stored and its expiry is still in the future.
    pub fn is_valid(&self) -> bool {
        self.inner
            .current_session()
            .map(|s| !s.is_expired())
            .unwrap_or(false)
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner
            .current_session()
            .filter(|s| !s.is_expired())
            .map(|s| s.user)
    }

    /// False when unauthenticated; otherwise the principal's check,
    /// including the super-role bypass.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.current_user()
            .map(|u| u.has_permission(permission))
            .unwrap_or(false)
    }

    /// Move to `Active` under a fresh generation and start both timers.
    fn activate(&self) {
        let generation = {
            let mut state = self.inner.state.lock().expect("session state lock poisoned");
            state.generation += 1;
            state.phase = SessionState::Active;
            // Login and resume have just persisted a fresh timestamp
            state.last_activity_flush = chrono::Utc::now();
            let old_renewal = state.renewal_timer.take();
            let old_inactivity = state.inactivity_timer.take();
            if let Some(timer) = old_renewal {
                timer.abort();
            }
            if let Some(timer) = old_inactivity {
                timer.abort();
            }
            state.generation
        };
        self.inner.state_tx.send_replace(SessionState::Active);
        self.schedule_renewal(generation);
        self.arm_inactivity(generation);
    }

    /// One-shot renewal timer at `expires_at - renewal_lead`. A session
    /// already inside the lead window renews immediately rather than never.
    fn schedule_renewal(&self, generation: u64) {
        let Some(session) = self.inner.current_session() else {
            return;
        };
        let until_renewal = session.time_until_expiry() - self.inner.policy.lead();
        let delay = until_renewal.to_std().unwrap_or(std::time::Duration::ZERO);

        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.generation() != generation {
                return;
            }
            let manager = SessionManager { inner };
            if let Err(err) = manager.refresh().await {
                debug!(error = %err, "Scheduled renewal ended the session");
            }
        });
        self.install_timer(generation, handle, TimerSlot::Renewal);
    }

    /// One-shot inactivity timer, re-armed on every observed interaction.
    fn arm_inactivity(&self, generation: u64) {
        let window = self.inner.policy.inactivity_limit;
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.generation() != generation {
                return;
            }
            info!("Session evicted after inactivity");
            inner.teardown(SessionState::Expired);
        });
        self.install_timer(generation, handle, TimerSlot::Inactivity);
    }

    fn install_timer(&self, generation: u64, handle: JoinHandle<()>, slot: TimerSlot) {
        let mut state = self.inner.state.lock().expect("session state lock poisoned");
        if state.generation != generation {
            // Torn down between spawn and install; the guard in the task
            // would catch it anyway, but don't keep the handle around.
            handle.abort();
            return;
        }
        let slot = match slot {
            TimerSlot::Renewal => &mut state.renewal_timer,
            TimerSlot::Inactivity => &mut state.inactivity_timer,
        };
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }
}

enum TimerSlot {
    Renewal,
    Inactivity,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testutil::{jwt_with_exp, login_ok, test_user, MockAuthClient};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn policy(ttl: u64, lead: u64, inactivity: u64) -> SessionPolicy {
        SessionPolicy {
            session_ttl: Duration::from_secs(ttl),
            renewal_lead: Duration::from_secs(lead),
            inactivity_limit: Duration::from_secs(inactivity),
        }
    }

    fn manager(
        client: Arc<MockAuthClient>,
        policy: SessionPolicy,
    ) -> (SessionManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(store.clone(), client, policy);
        (manager, store)
    }

    fn credentials() -> Credentials {
        Credentials {
            identifier: "alice".to_string(),
            secret: "correct".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_establishes_active_session() {
        let client = Arc::new(MockAuthClient::new());
        client.push_login(login_ok("A1", Some("R1"), test_user("user")));
        let (manager, store) = self::manager(client, policy(3600, 60, 1800));

        let user = manager.login(credentials()).await.unwrap();
        assert_eq!(user.id, 1);
        assert_eq!(manager.state(), SessionState::Active);
        assert!(manager.is_valid());
        assert_eq!(manager.authorization_header().as_deref(), Some("Bearer A1"));
        assert_eq!(store.load().unwrap().unwrap().user.id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_failure_returns_to_unauthenticated() {
        let client = Arc::new(MockAuthClient::new());
        client.push_login(Err(AuthError::AuthenticationFailed(
            "invalid credentials".to_string(),
        )));
        let (manager, store) = self::manager(client, policy(3600, 60, 1800));

        let err = manager.login(credentials()).await.unwrap_err();
        assert!(matches!(err, AuthError::AuthenticationFailed(_)));
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(!manager.is_valid());
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_rejects_empty_credentials() {
        let client = Arc::new(MockAuthClient::new());
        let (manager, _) = self::manager(client, policy(3600, 60, 1800));

        let err = manager
            .login(Credentials {
                identifier: "alice".to_string(),
                secret: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AuthenticationFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_valid_persisted_session() {
        let client = Arc::new(MockAuthClient::new());
        let (manager, store) = self::manager(client.clone(), policy(3600, 60, 1800));
        let session = Session::new(
            test_user("user"),
            jwt_with_exp(3600),
            Some("R1".to_string()),
            ChronoDuration::hours(1),
        );
        store.save(&session).unwrap();

        assert!(manager.resume().await.unwrap());
        assert_eq!(manager.state(), SessionState::Active);
        // Token was live; no network refresh was needed
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_expired_session_clears_storage() {
        let client = Arc::new(MockAuthClient::new());
        let (manager, store) = self::manager(client, policy(3600, 60, 1800));
        let mut session = Session::new(
            test_user("user"),
            jwt_with_exp(3600),
            Some("R1".to_string()),
            ChronoDuration::hours(1),
        );
        session.expires_at = Utc::now() - ChronoDuration::minutes(5);
        store.save(&session).unwrap();

        assert!(!manager.resume().await.unwrap());
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_with_stale_token_refreshes_once() {
        let client = Arc::new(MockAuthClient::new());
        client.push_refresh(Ok(crate::api::client::RefreshExchange {
            access_token: jwt_with_exp(3600),
            refresh_token: None,
        }));
        let (manager, store) = self::manager(client.clone(), policy(3600, 60, 1800));
        // Window still open, but the token's own claim is long past
        let session = Session::new(
            test_user("user"),
            jwt_with_exp(-600),
            Some("R1".to_string()),
            ChronoDuration::hours(1),
        );
        store.save(&session).unwrap();

        assert!(manager.resume().await.unwrap());
        assert_eq!(manager.state(), SessionState::Active);
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_moves_to_expired_and_clears() {
        let client = Arc::new(MockAuthClient::new());
        client.push_login(login_ok("A1", Some("R1"), test_user("user")));
        client.push_refresh(Err(AuthError::AuthenticationFailed(
            "refresh rejected".to_string(),
        )));
        let (manager, store) = self::manager(client, policy(3600, 60, 1800));
        manager.login(credentials()).await.unwrap();

        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired));
        assert_eq!(manager.state(), SessionState::Expired);
        assert!(!manager.is_valid());
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_before_activation_clears_persisted_session() {
        let client = Arc::new(MockAuthClient::new());
        let (manager, store) = self::manager(client.clone(), policy(3600, 60, 1800));
        // Persisted by an earlier process; this manager never resumed it
        let session = Session::new(
            test_user("user"),
            jwt_with_exp(3600),
            Some("R1".to_string()),
            ChronoDuration::hours(1),
        );
        store.save(&session).unwrap();

        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired));
        // The rejected session must not linger for the next bearer read
        assert!(store.load().unwrap().is_none());
        assert_eq!(manager.state(), SessionState::Expired);
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_updates_token_and_extends_expiry() {
        let client = Arc::new(MockAuthClient::new());
        client.push_login(login_ok("A1", Some("R1"), test_user("user")));
        client.push_refresh(Ok(crate::api::client::RefreshExchange {
            access_token: "A2".to_string(),
            refresh_token: Some("R2".to_string()),
        }));
        let (manager, store) = self::manager(client, policy(3600, 60, 1800));
        manager.login(credentials()).await.unwrap();

        // Shrink the window so the extension is observable
        let mut session = store.load().unwrap().unwrap();
        session.expires_at = Utc::now() + ChronoDuration::seconds(90);
        store.save(&session).unwrap();
        let old_expiry = session.expires_at;

        manager.refresh().await.unwrap();

        let renewed = store.load().unwrap().unwrap();
        assert_eq!(renewed.access_token, "A2");
        assert_eq!(renewed.refresh_token.as_deref(), Some("R2"));
        assert!(renewed.expires_at > old_expiry);
        assert_eq!(manager.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refresh_triggers_coalesce() {
        let client = Arc::new(MockAuthClient::new());
        client.push_login(login_ok("A1", Some("R1"), test_user("user")));
        client.push_refresh(Ok(crate::api::client::RefreshExchange {
            access_token: "A2".to_string(),
            refresh_token: None,
        }));
        let (manager, _) = self::manager(client.clone(), policy(3600, 60, 1800));
        manager.login(credentials()).await.unwrap();

        let (first, second) = tokio::join!(manager.refresh(), manager.refresh());
        first.unwrap();
        second.unwrap();
        // Exactly one network exchange despite two triggers
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_timer_fires_immediately_inside_lead_window() {
        let client = Arc::new(MockAuthClient::new());
        client.push_refresh(Ok(crate::api::client::RefreshExchange {
            access_token: jwt_with_exp(3600),
            refresh_token: None,
        }));
        let (manager, store) = self::manager(client.clone(), policy(3600, 60, 1800));
        // Expiry 50 seconds out with a 60-second lead: already past the
        // renewal threshold
        let mut session = Session::new(
            test_user("user"),
            jwt_with_exp(50),
            Some("R1".to_string()),
            ChronoDuration::hours(1),
        );
        session.expires_at = Utc::now() + ChronoDuration::seconds(50);
        store.save(&session).unwrap();

        manager.resume().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 1);
        let renewed = store.load().unwrap().unwrap();
        assert!(renewed.time_until_expiry() > ChronoDuration::minutes(55));
        assert_eq!(manager.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_evicts_exactly_once() {
        let client = Arc::new(MockAuthClient::new());
        client.push_login(login_ok("A1", Some("R1"), test_user("user")));
        let (manager, store) = self::manager(client, policy(3600, 60, 5));
        manager.login(credentials()).await.unwrap();

        let mut watcher = manager.subscribe();
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(manager.state(), SessionState::Expired);
        assert!(!manager.is_valid());
        assert!(store.load().unwrap().is_none());
        assert_eq!(*watcher.borrow_and_update(), SessionState::Expired);

        // A second elapsed window must not produce a second teardown
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(manager.state(), SessionState::Expired);
        assert!(!watcher.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_defers_inactivity_eviction() {
        let client = Arc::new(MockAuthClient::new());
        client.push_login(login_ok("A1", Some("R1"), test_user("user")));
        let (manager, _) = self::manager(client, policy(3600, 60, 5));
        manager.login(credentials()).await.unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(3)).await;
            manager.record_activity();
        }
        // 9 seconds of wall time, but never 5 without activity
        assert_eq!(manager.state(), SessionState::Active);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(manager.state(), SessionState::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_writes_are_throttled() {
        let client = Arc::new(MockAuthClient::new());
        client.push_login(login_ok("A1", Some("R1"), test_user("user")));
        let (manager, store) = self::manager(client, policy(3600, 60, 5));
        manager.login(credentials()).await.unwrap();

        // Sentinel timestamp to detect any storage write
        let mut session = store.load().unwrap().unwrap();
        let sentinel = Utc::now() - ChronoDuration::minutes(10);
        session.last_activity = sentinel;
        store.save(&session).unwrap();

        // A burst of events right after login: the timer is re-armed each
        // time, the timestamp is not rewritten each time
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(2)).await;
            manager.record_activity();
        }
        assert_eq!(manager.state(), SessionState::Active);
        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.last_activity.timestamp_millis(), sentinel.timestamp_millis());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(manager.state(), SessionState::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_discards_in_flight_renewal() {
        let client = Arc::new(MockAuthClient::new());
        client.push_login(login_ok("A1", Some("R1"), test_user("user")));
        client.push_refresh(Ok(crate::api::client::RefreshExchange {
            access_token: "A2".to_string(),
            refresh_token: None,
        }));
        let gate = Arc::new(Semaphore::new(0));
        client.set_refresh_gate(gate.clone());
        let (manager, store) = self::manager(client, policy(3600, 60, 1800));
        manager.login(credentials()).await.unwrap();

        let in_flight = tokio::spawn({
            let manager = manager.clone();
            async move { manager.refresh().await }
        });
        // Let the renewal reach the network exchange
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(manager.state(), SessionState::Renewing);

        manager.logout();
        assert_eq!(manager.state(), SessionState::Unauthenticated);

        // The exchange completes after teardown; its result must be dropped
        gate.add_permits(1);
        let result = in_flight.await.unwrap();
        assert!(matches!(result, Err(AuthError::SessionExpired)));
        assert!(store.load().unwrap().is_none());
        assert_eq!(manager.state(), SessionState::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_clears_locally_and_revokes_in_background() {
        let client = Arc::new(MockAuthClient::new());
        client.push_login(login_ok("A1", Some("R1"), test_user("user")));
        let (manager, store) = self::manager(client.clone(), policy(3600, 60, 1800));
        manager.login(credentials()).await.unwrap();

        manager.logout();
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(!manager.is_valid());
        assert!(store.load().unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.revoke_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permissions_through_manager() {
        let client = Arc::new(MockAuthClient::new());
        client.push_login(login_ok("A1", None, test_user("admin")));
        let (manager, _) = self::manager(client, policy(3600, 60, 1800));

        assert!(!manager.has_permission("tasks.read"));
        manager.login(credentials()).await.unwrap();
        assert!(manager.has_permission("tasks.read"));
        assert!(manager.has_permission("users.manage"));

        manager.logout();
        assert!(!manager.has_permission("tasks.read"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_authorization_header_empty_for_expired_session() {
        let client = Arc::new(MockAuthClient::new());
        let (manager, store) = self::manager(client, policy(3600, 60, 1800));
        let mut session = Session::new(
            test_user("user"),
            "A1".to_string(),
            None,
            ChronoDuration::hours(1),
        );
        session.expires_at = Utc::now() - ChronoDuration::seconds(1);
        store.save(&session).unwrap();

        assert!(manager.authorization_header().is_none());
        assert!(!manager.is_valid());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_clears_timers_but_keeps_session() {
        let client = Arc::new(MockAuthClient::new());
        client.push_login(login_ok("A1", Some("R1"), test_user("user")));
        let (manager, store) = self::manager(client.clone(), policy(3600, 60, 5));
        manager.login(credentials()).await.unwrap();

        manager.shutdown();
        // Well past the inactivity window: with the timers gone, nothing
        // fires against the persisted session
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(store.load().unwrap().is_some());
        assert!(manager.is_valid());
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_without_refresh_token_ends_at_lead_boundary() {
        let client = Arc::new(MockAuthClient::new());
        let (manager, store) = self::manager(client.clone(), policy(3600, 60, 1800));
        let mut session = Session::new(
            test_user("user"),
            jwt_with_exp(30),
            None,
            ChronoDuration::hours(1),
        );
        session.expires_at = Utc::now() + ChronoDuration::seconds(30);
        store.save(&session).unwrap();

        manager.resume().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Renewal was impossible; the session ended instead of lingering
        assert_eq!(manager.state(), SessionState::Expired);
        assert!(store.load().unwrap().is_none());
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
    }
}
