//! Auth context: the session as seen by the rest of the app.
//!
//! `AuthContext` owns the `SessionStore`, talks to the backend for login and
//! profile refresh, and publishes every change as an [`AuthSnapshot`] on a
//! watch channel. Pages subscribe to that channel instead of reading storage.
//!
//! The context starts in [`ResolutionPhase::Pending`] and only leaves it when
//! [`AuthContext::resolve`] runs, which the host calls after its first client
//! render. Login and logout never go back to `Pending`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::backend::AuthBackend;
use super::role::{has_role, RoleSet};
use super::session::{Profile, Session, SessionData};
use super::store::SessionStore;
use crate::api::ApiError;

/// Whether the session has been read since startup, and what it said.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionPhase {
    Pending,
    ResolvedAuthenticated,
    ResolvedUnauthenticated,
}

impl ResolutionPhase {
    fn for_session(session: &Session) -> Self {
        if session.is_authenticated() {
            ResolutionPhase::ResolvedAuthenticated
        } else {
            ResolutionPhase::ResolvedUnauthenticated
        }
    }
}

/// What subscribers see after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub phase: ResolutionPhase,
    pub session: Session,
}

impl AuthSnapshot {
    pub fn is_loading(&self) -> bool {
        self.phase == ResolutionPhase::Pending
    }

    pub fn user(&self) -> Option<&Profile> {
        self.session.profile()
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Errors shown to the login form. Everything else is absorbed into state.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Email and password required")]
    MissingCredentials,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Unable to connect to server: {0}")]
    NetworkFailure(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Session expired, please log in again")]
    SessionExpired,

    /// A logout or newer login landed while this request was in flight.
    #[error("Request superseded by a newer session change")]
    Superseded,
}

impl From<ApiError> for AuthError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::InvalidCredentials | ApiError::Unauthorized | ApiError::AccessDenied(_) => {
                AuthError::InvalidCredentials
            }
            ApiError::NetworkError(e) => AuthError::NetworkFailure(e.to_string()),
            ApiError::RateLimited => AuthError::ServerError("rate limited".to_string()),
            ApiError::ServerError(msg) | ApiError::NotFound(msg) | ApiError::InvalidResponse(msg) => {
                AuthError::ServerError(msg)
            }
        }
    }
}

pub struct AuthContext {
    store: Mutex<SessionStore>,
    backend: Arc<dyn AuthBackend>,
    state: watch::Sender<AuthSnapshot>,
}

impl AuthContext {
    /// New context in the `Pending` phase. Storage is not read until
    /// [`resolve`](Self::resolve).
    pub fn new(store: SessionStore, backend: Arc<dyn AuthBackend>) -> Self {
        let (state, _) = watch::channel(AuthSnapshot {
            phase: ResolutionPhase::Pending,
            session: Session::Unauthenticated,
        });
        Self {
            store: Mutex::new(store),
            backend,
            state,
        }
    }

    /// Hydrate from storage and leave `Pending`. Later calls are no-ops.
    pub fn resolve(&self) -> AuthSnapshot {
        let mut store = self.store.lock();
        if self.phase() != ResolutionPhase::Pending {
            return self.snapshot();
        }
        let session = store.hydrate();
        info!(authenticated = session.is_authenticated(), "Auth state resolved");
        self.publish(session);
        self.snapshot()
    }

    /// Authenticate against the backend and persist the new session.
    ///
    /// Failures leave the current session untouched and are not retried.
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let email = credentials.email.trim();
        if email.is_empty() || credentials.password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let ticket = self.store.lock().generation();
        info!(email = %email, "Login attempt");

        let response = match self.backend.authenticate(email, &credentials.password).await {
            Ok(response) => response,
            Err(e) => {
                warn!(email = %email, error = %e, "Login failed");
                return Err(e.into());
            }
        };

        let data = SessionData::new(response.token, response.user);
        if !data.is_well_formed() {
            warn!(email = %email, "Login response missing token or user id");
            return Err(AuthError::ServerError("incomplete login response".to_string()));
        }

        let mut store = self.store.lock();
        if !store.save_if_current(ticket, data) {
            return Err(AuthError::Superseded);
        }
        let session = store.current().clone();
        if let Some(profile) = session.profile() {
            info!(user_id = %profile.user_id, role = %profile.role, "Login successful");
        }
        self.publish(session.clone());
        Ok(session)
    }

    /// Forget the session. Navigation to the login page is up to the caller.
    pub fn logout(&self) {
        let mut store = self.store.lock();
        store.clear();
        info!("Logged out");
        self.publish(Session::Unauthenticated);
    }

    /// Re-fetch the profile for the current token.
    ///
    /// Returns `Ok(None)` when logged out. A 401 ends the session.
    pub async fn refresh(&self) -> Result<Option<Profile>, AuthError> {
        let (ticket, token) = {
            let store = self.store.lock();
            match store.current().token() {
                Some(token) => (store.generation(), token.to_string()),
                None => return Ok(None),
            }
        };

        match self.backend.fetch_current_user(&token).await {
            Ok(profile) => {
                let mut store = self.store.lock();
                if !store.save_if_current(ticket, SessionData::new(token, profile.clone())) {
                    return Err(AuthError::Superseded);
                }
                debug!(user_id = %profile.user_id, role = %profile.role, "Profile refreshed");
                self.publish(store.current().clone());
                Ok(Some(profile))
            }
            Err(e) if e.is_unauthorized() => {
                let mut store = self.store.lock();
                if store.generation() != ticket {
                    return Err(AuthError::Superseded);
                }
                warn!("Backend rejected session token, logging out");
                store.clear();
                self.publish(Session::Unauthenticated);
                Err(AuthError::SessionExpired)
            }
            Err(e) => {
                warn!(error = %e, "Profile refresh failed, keeping cached profile");
                Err(e.into())
            }
        }
    }

    /// Refresh only if the cached profile is older than the stale window.
    pub async fn refresh_if_stale(&self) -> Result<Option<Profile>, AuthError> {
        let stale = match self.store.lock().current().data() {
            Some(data) => data.needs_refresh(),
            None => return Ok(None),
        };
        if stale {
            self.refresh().await
        } else {
            Ok(self.current_user())
        }
    }

    /// Called when a backend request made with `token` comes back 401.
    ///
    /// Ends the session only if `token` is still the current one, so a late
    /// 401 from before a re-login cannot log the new user out. Returns
    /// whether the session was ended.
    pub fn handle_unauthorized(&self, token: &str) -> bool {
        let mut store = self.store.lock();
        if store.current().token() != Some(token) {
            debug!("Ignoring 401 for a token that is no longer current");
            return false;
        }
        warn!("Unauthorized response, ending session");
        store.clear();
        self.publish(Session::Unauthenticated);
        true
    }

    pub fn current_user(&self) -> Option<Profile> {
        self.state.borrow().session.profile().cloned()
    }

    pub fn token(&self) -> Option<String> {
        self.state.borrow().session.token().map(str::to_string)
    }

    /// True only until the first `resolve()`.
    pub fn is_loading(&self) -> bool {
        self.phase() == ResolutionPhase::Pending
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().session.is_authenticated()
    }

    pub fn is_admin(&self) -> bool {
        self.state.borrow().session.profile().is_some_and(Profile::is_admin)
    }

    pub fn is_manager(&self) -> bool {
        self.state.borrow().session.profile().is_some_and(Profile::is_manager)
    }

    /// Whether the current user holds one of `roles`. False when logged out.
    pub fn check_permission(&self, roles: &RoleSet) -> bool {
        self.state
            .borrow()
            .session
            .profile()
            .is_some_and(|profile| has_role(profile, roles))
    }

    pub fn phase(&self) -> ResolutionPhase {
        self.state.borrow().phase
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.borrow().clone()
    }

    /// Receiver that wakes on every phase or session change.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.state.subscribe()
    }

    /// Whether the session survives a restart.
    pub fn is_persistent(&self) -> bool {
        self.store.lock().is_persistent()
    }

    // Callers hold the store lock so snapshots go out in mutation order.
    fn publish(&self, session: Session) {
        let phase = ResolutionPhase::for_session(&session);
        self.state.send_replace(AuthSnapshot { phase, session });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tokio::sync::oneshot;

    use super::*;
    use crate::auth::backend::LoginResponse;
    use crate::auth::role::Role;
    use crate::auth::session::SESSION_KEY;
    use crate::auth::storage::{MemoryStorage, SessionStorage};

    fn profile(role: Role) -> Profile {
        Profile {
            user_id: "u-1".to_string(),
            full_name: "Lan Vo".to_string(),
            email: "a@x.com".to_string(),
            role,
            avatar_url: None,
        }
    }

    fn login_response(token: &str, role: Role) -> LoginResponse {
        LoginResponse {
            token: token.to_string(),
            user: profile(role),
        }
    }

    /// Backend that replays queued responses, optionally pausing the first
    /// login until the test releases it.
    #[derive(Default)]
    struct ScriptedBackend {
        logins: Mutex<VecDeque<Result<LoginResponse, ApiError>>>,
        users: Mutex<VecDeque<Result<Profile, ApiError>>>,
        gate: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
    }

    impl ScriptedBackend {
        fn with_login(self, response: Result<LoginResponse, ApiError>) -> Self {
            self.logins.lock().push_back(response);
            self
        }

        fn with_user(self, response: Result<Profile, ApiError>) -> Self {
            self.users.lock().push_back(response);
            self
        }

        fn gated(self, started: oneshot::Sender<()>, release: oneshot::Receiver<()>) -> Self {
            *self.gate.lock() = Some((started, release));
            self
        }
    }

    #[async_trait]
    impl AuthBackend for ScriptedBackend {
        async fn authenticate(&self, _email: &str, _password: &str) -> Result<LoginResponse, ApiError> {
            let gate = self.gate.lock().take();
            if let Some((started, release)) = gate {
                let _ = started.send(());
                let _ = release.await;
            }
            self.logins
                .lock()
                .pop_front()
                .unwrap_or(Err(ApiError::InvalidCredentials))
        }

        async fn fetch_current_user(&self, _token: &str) -> Result<Profile, ApiError> {
            self.users.lock().pop_front().unwrap_or(Err(ApiError::Unauthorized))
        }
    }

    fn context_with(storage: Arc<MemoryStorage>, backend: ScriptedBackend) -> AuthContext {
        AuthContext::new(SessionStore::new(Box::new(storage)), Arc::new(backend))
    }

    fn creds() -> Credentials {
        Credentials::new("a@x.com", "p")
    }

    #[test]
    fn test_starts_pending_until_resolved() {
        let ctx = context_with(Arc::new(MemoryStorage::new()), ScriptedBackend::default());
        assert!(ctx.is_loading());
        assert_eq!(ctx.phase(), ResolutionPhase::Pending);

        let snapshot = ctx.resolve();
        assert_eq!(snapshot.phase, ResolutionPhase::ResolvedUnauthenticated);
        assert!(!ctx.is_loading());
    }

    #[test]
    fn test_resolve_restores_persisted_session() {
        let storage = Arc::new(MemoryStorage::new());
        let data = SessionData::new("t1".to_string(), profile(Role::Admin));
        storage
            .write(SESSION_KEY, &serde_json::to_string(&data).unwrap())
            .unwrap();

        let ctx = context_with(storage, ScriptedBackend::default());
        assert_eq!(ctx.resolve().phase, ResolutionPhase::ResolvedAuthenticated);
        assert!(ctx.is_admin());
        assert!(ctx.is_manager());
        assert_eq!(ctx.token().as_deref(), Some("t1"));
    }

    #[test]
    fn test_resolve_runs_once() {
        let storage = Arc::new(MemoryStorage::new());
        let ctx = context_with(storage.clone(), ScriptedBackend::default());
        ctx.resolve();

        // A record appearing later is not picked up by a second resolve
        let data = SessionData::new("t1".to_string(), profile(Role::User));
        storage
            .write(SESSION_KEY, &serde_json::to_string(&data).unwrap())
            .unwrap();
        assert_eq!(ctx.resolve().phase, ResolutionPhase::ResolvedUnauthenticated);
    }

    #[test]
    fn test_subscribers_see_pending_then_resolved() {
        let ctx = context_with(Arc::new(MemoryStorage::new()), ScriptedBackend::default());
        let mut rx = ctx.subscribe();
        assert_eq!(rx.borrow_and_update().phase, ResolutionPhase::Pending);

        ctx.resolve();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().phase, ResolutionPhase::ResolvedUnauthenticated);
    }

    #[tokio::test]
    async fn test_login_persists_session() {
        let storage = Arc::new(MemoryStorage::new());
        let backend = ScriptedBackend::default().with_login(Ok(login_response("t1", Role::User)));
        let ctx = context_with(storage.clone(), backend);
        ctx.resolve();

        let session = ctx.login(&creds()).await.unwrap();
        assert_eq!(session.token(), Some("t1"));
        assert_eq!(ctx.phase(), ResolutionPhase::ResolvedAuthenticated);
        assert!(!ctx.is_loading());
        assert!(ctx.check_permission(&[Role::User, Role::Admin].into_iter().collect()));
        assert!(!ctx.check_permission(&RoleSet::only(Role::Admin)));
        assert!(storage.read(SESSION_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_login_rejects_blank_credentials_without_network() {
        // No scripted login: reaching the backend would be InvalidCredentials
        let ctx = context_with(Arc::new(MemoryStorage::new()), ScriptedBackend::default());
        let err = ctx.login(&Credentials::new("  ", "p")).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingCredentials));
        let err = ctx.login(&Credentials::new("a@x.com", "")).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingCredentials));
    }

    #[tokio::test]
    async fn test_failed_login_leaves_session_unchanged() {
        let backend = ScriptedBackend::default()
            .with_login(Ok(login_response("t1", Role::Manager)))
            .with_login(Err(ApiError::InvalidCredentials))
            .with_login(Err(ApiError::ServerError("boom".to_string())));
        let ctx = context_with(Arc::new(MemoryStorage::new()), backend);
        ctx.resolve();
        ctx.login(&creds()).await.unwrap();

        let err = ctx.login(&creds()).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        let err = ctx.login(&creds()).await.unwrap_err();
        assert!(matches!(err, AuthError::ServerError(_)));

        assert_eq!(ctx.token().as_deref(), Some("t1"));
        assert_eq!(ctx.phase(), ResolutionPhase::ResolvedAuthenticated);
    }

    #[tokio::test]
    async fn test_failed_login_from_logged_out() {
        let backend = ScriptedBackend::default().with_login(Err(ApiError::InvalidCredentials));
        let ctx = context_with(Arc::new(MemoryStorage::new()), backend);
        ctx.resolve();

        assert!(ctx.login(&creds()).await.is_err());
        assert_eq!(ctx.phase(), ResolutionPhase::ResolvedUnauthenticated);
        assert!(ctx.current_user().is_none());
    }

    #[tokio::test]
    async fn test_incomplete_login_response_is_server_error() {
        let backend = ScriptedBackend::default().with_login(Ok(login_response("", Role::User)));
        let ctx = context_with(Arc::new(MemoryStorage::new()), backend);
        ctx.resolve();

        let err = ctx.login(&creds()).await.unwrap_err();
        assert!(matches!(err, AuthError::ServerError(_)));
        assert!(!ctx.is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_clears_and_stays_resolved() {
        let storage = Arc::new(MemoryStorage::new());
        let backend = ScriptedBackend::default().with_login(Ok(login_response("t1", Role::User)));
        let ctx = context_with(storage.clone(), backend);
        ctx.resolve();
        ctx.login(&creds()).await.unwrap();

        ctx.logout();
        assert_eq!(ctx.phase(), ResolutionPhase::ResolvedUnauthenticated);
        assert!(!ctx.is_loading());
        assert!(ctx.current_user().is_none());
        assert_eq!(storage.read(SESSION_KEY).unwrap(), None);

        // Logging out twice is harmless
        ctx.logout();
        assert_eq!(ctx.phase(), ResolutionPhase::ResolvedUnauthenticated);
    }

    #[tokio::test]
    async fn test_logout_during_login_discards_stale_response() {
        let storage = Arc::new(MemoryStorage::new());
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let backend = ScriptedBackend::default()
            .with_login(Ok(login_response("t1", Role::User)))
            .gated(started_tx, release_rx);
        let ctx = context_with(storage.clone(), backend);
        ctx.resolve();

        let credentials = creds();
        let interrupt = async {
            started_rx.await.unwrap();
            ctx.logout();
            release_tx.send(()).unwrap();
        };
        let (result, ()) = tokio::join!(ctx.login(&credentials), interrupt);

        assert!(matches!(result, Err(AuthError::Superseded)));
        assert_eq!(ctx.snapshot().session, Session::Unauthenticated);
        assert_eq!(ctx.phase(), ResolutionPhase::ResolvedUnauthenticated);
        assert_eq!(storage.read(SESSION_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_works_in_memory_when_storage_unavailable() {
        let backend = ScriptedBackend::default().with_login(Ok(login_response("t1", Role::User)));
        let ctx = context_with(Arc::new(MemoryStorage::unavailable()), backend);
        ctx.resolve();
        assert!(!ctx.is_persistent());

        ctx.login(&creds()).await.unwrap();
        assert!(ctx.is_authenticated());
    }

    #[tokio::test]
    async fn test_refresh_updates_role() {
        let storage = Arc::new(MemoryStorage::new());
        let backend = ScriptedBackend::default()
            .with_login(Ok(login_response("t1", Role::User)))
            .with_user(Ok(profile(Role::Manager)));
        let ctx = context_with(storage.clone(), backend);
        ctx.resolve();
        ctx.login(&creds()).await.unwrap();

        let refreshed = ctx.refresh().await.unwrap().unwrap();
        assert_eq!(refreshed.role, Role::Manager);
        assert!(ctx.is_manager());
        assert_eq!(ctx.token().as_deref(), Some("t1"));

        let persisted: SessionData =
            serde_json::from_str(&storage.read(SESSION_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(persisted.profile.role, Role::Manager);
    }

    #[tokio::test]
    async fn test_refresh_unauthorized_ends_session() {
        let backend = ScriptedBackend::default()
            .with_login(Ok(login_response("t1", Role::Admin)))
            .with_user(Err(ApiError::Unauthorized));
        let ctx = context_with(Arc::new(MemoryStorage::new()), backend);
        ctx.resolve();
        ctx.login(&creds()).await.unwrap();

        let err = ctx.refresh().await.unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired));
        assert_eq!(ctx.phase(), ResolutionPhase::ResolvedUnauthenticated);
    }

    #[tokio::test]
    async fn test_refresh_network_failure_keeps_session() {
        let backend = ScriptedBackend::default()
            .with_login(Ok(login_response("t1", Role::Admin)))
            .with_user(Err(ApiError::ServerError("down".to_string())));
        let ctx = context_with(Arc::new(MemoryStorage::new()), backend);
        ctx.resolve();
        ctx.login(&creds()).await.unwrap();

        assert!(ctx.refresh().await.is_err());
        assert!(ctx.is_admin());
    }

    #[tokio::test]
    async fn test_refresh_when_logged_out_is_noop() {
        let ctx = context_with(Arc::new(MemoryStorage::new()), ScriptedBackend::default());
        ctx.resolve();
        assert_eq!(ctx.refresh().await.unwrap(), None);
        assert_eq!(ctx.refresh_if_stale().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_if_stale_skips_fresh_profile() {
        // No scripted user: an actual fetch would come back Unauthorized
        let backend = ScriptedBackend::default().with_login(Ok(login_response("t1", Role::User)));
        let ctx = context_with(Arc::new(MemoryStorage::new()), backend);
        ctx.resolve();
        ctx.login(&creds()).await.unwrap();

        let profile = ctx.refresh_if_stale().await.unwrap().unwrap();
        assert_eq!(profile.role, Role::User);
        assert!(ctx.is_authenticated());
    }

    #[tokio::test]
    async fn test_handle_unauthorized_logs_out() {
        let backend = ScriptedBackend::default().with_login(Ok(login_response("t1", Role::User)));
        let ctx = context_with(Arc::new(MemoryStorage::new()), backend);
        ctx.resolve();
        ctx.login(&creds()).await.unwrap();

        assert!(ctx.handle_unauthorized("t1"));
        assert!(!ctx.is_authenticated());
        assert_eq!(ctx.phase(), ResolutionPhase::ResolvedUnauthenticated);
    }

    #[tokio::test]
    async fn test_late_unauthorized_for_old_token_keeps_new_session() {
        let storage = Arc::new(MemoryStorage::new());
        let backend = ScriptedBackend::default()
            .with_login(Ok(login_response("t1", Role::User)))
            .with_login(Ok(login_response("t2", Role::Admin)));
        let ctx = context_with(storage.clone(), backend);
        ctx.resolve();
        ctx.login(&creds()).await.unwrap();
        ctx.logout();
        ctx.login(&creds()).await.unwrap();

        assert!(!ctx.handle_unauthorized("t1"));
        assert_eq!(ctx.token().as_deref(), Some("t2"));
        assert!(storage.read(SESSION_KEY).unwrap().is_some());

        // Logged out: nothing to end
        ctx.logout();
        assert!(!ctx.handle_unauthorized("t2"));
    }

    #[test]
    fn test_auth_error_from_api_error() {
        assert!(matches!(AuthError::from(ApiError::InvalidCredentials), AuthError::InvalidCredentials));
        assert!(matches!(AuthError::from(ApiError::RateLimited), AuthError::ServerError(_)));
        assert!(matches!(
            AuthError::from(ApiError::InvalidResponse("x".to_string())),
            AuthError::ServerError(_)
        ));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let text = format!("{:?}", Credentials::new("a@x.com", "hunter2"));
        assert!(text.contains("a@x.com"));
        assert!(!text.contains("hunter2"));
    }
}
