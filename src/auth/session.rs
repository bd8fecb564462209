//! Session lifecycle.
//!
//! `SessionManager` owns the current authentication state and is the only
//! writer of the [`User`]. Explicit sign-up/sign-in/sign-out calls and the
//! credential backend's asynchronous session-change notifications both land
//! here; overlap between the two is resolved by last-write-wins on the
//! published state, not by queuing, since the backend serializes its own
//! notifications.
//!
//! A `User` is never exposed half-formed: it is committed only once the
//! credential backend has vouched for id and email and the profile
//! directory has supplied the chosen username. If hydration fails, the
//! prior state is kept.

use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::identifier::{is_email, Resolver, ResolveError};
use crate::models::User;
use crate::stores::{
    CredentialError, CredentialStore, DirectoryError, IdentifierLookup, ProfileDirectory, Session,
};

/// Observable authentication state.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated(User),
    SigningOut,
}

impl SessionState {
    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }
}

struct Inner {
    credentials: Arc<dyn CredentialStore>,
    profiles: Arc<dyn ProfileDirectory>,
    resolver: Resolver,
    state_tx: watch::Sender<SessionState>,
}

impl Inner {
    /// Builds the full `User` for a session by fetching the username.
    async fn hydrate(&self, session: &Session) -> Result<User, DirectoryError> {
        match self.profiles.username_by_id(&session.user_id).await? {
            Some(name) => Ok(User::new(
                session.user_id.clone(),
                name,
                session.email.clone(),
            )),
            None => Err(DirectoryError::Unavailable(
                "no profile record for account".to_string(),
            )),
        }
    }

    /// Applies a session-change notification. Idempotent; safe to run
    /// alongside an in-flight explicit call (last write wins).
    async fn apply_session(&self, session: Option<Session>) {
        match session {
            None => {
                if self.state_tx.borrow().is_authenticated() {
                    tracing::info!("session ended, clearing user");
                }
                self.state_tx.send_replace(SessionState::Unauthenticated);
            }
            Some(session) if session.is_expired() => {
                tracing::debug!("notified session already expired, clearing user");
                self.state_tx.send_replace(SessionState::Unauthenticated);
            }
            Some(session) => match self.hydrate(&session).await {
                Ok(user) => {
                    tracing::debug!(user = %user.name, "session rehydrated");
                    self.state_tx.send_replace(SessionState::Authenticated(user));
                }
                Err(e) => {
                    // Keep the prior user (or none) rather than exposing a
                    // session without a resolved name.
                    tracing::warn!("rehydration failed: {}", e);
                }
            },
        }
    }
}

/// Owns authentication state and the current user.
pub struct SessionManager {
    inner: Arc<Inner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        profiles: Arc<dyn ProfileDirectory>,
        lookup: Arc<dyn IdentifierLookup>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                credentials,
                profiles,
                resolver: Resolver::new(lookup),
                state_tx: watch::channel(SessionState::Unauthenticated).0,
            }),
            listener: Mutex::new(None),
        }
    }

    /// Watch the authentication state; the ledger reads its user from here.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.state_tx.borrow().user().cloned()
    }

    /// Spawns the listener that reacts to the credential backend's
    /// session-change stream, including the value delivered at subscribe
    /// time. Re-spawning replaces the previous listener.
    pub fn spawn_listener(&self) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut rx = inner.credentials.subscribe();
            let current = rx.borrow_and_update().clone();
            inner.apply_session(current).await;
            while rx.changed().await.is_ok() {
                let session = rx.borrow_and_update().clone();
                inner.apply_session(session).await;
            }
        });

        let mut listener = self.listener.lock().unwrap();
        if let Some(old) = listener.replace(handle) {
            old.abort();
        }
    }

    /// One-shot rehydration from the backend's current session, for
    /// process start in short-lived consumers.
    pub async fn rehydrate(&self) {
        let session = self.inner.credentials.subscribe().borrow().clone();
        self.inner.apply_session(session).await;
    }

    /// Stops the session-change listener.
    pub fn shutdown(&self) {
        if let Some(handle) = self.listener.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Creates a credential, then the profile record, then commits the user.
    ///
    /// If the profile write fails after the credential was created, the
    /// call fails and the credential is left orphaned in the backend; there
    /// is deliberately no compensating delete (see DESIGN.md).
    pub async fn sign_up(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, SignUpError> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() || email.is_empty() || password.trim().is_empty() {
            return Err(SignUpError::BlankFields);
        }
        if is_email(username) {
            return Err(SignUpError::UsernameIsEmail);
        }
        if !is_email(email) {
            return Err(SignUpError::InvalidEmail);
        }

        let inner = &self.inner;
        inner.state_tx.send_replace(SessionState::Authenticating);

        let session = match inner.credentials.sign_up(email, password).await {
            Ok(session) => session,
            Err(e) => {
                inner.state_tx.send_replace(SessionState::Unauthenticated);
                return Err(SignUpError::CredentialRejected(e));
            }
        };

        if let Err(e) = inner.profiles.insert(&session.user_id, username).await {
            tracing::warn!(
                account = %session.user_id,
                "profile write failed after credential creation, credential left orphaned: {}",
                e
            );
            inner.state_tx.send_replace(SessionState::Unauthenticated);
            return Err(SignUpError::ProfileWriteFailed(e));
        }

        let user = User::new(session.user_id, username, session.email);
        inner
            .state_tx
            .send_replace(SessionState::Authenticated(user.clone()));
        tracing::info!(user = %user.name, "account created");
        Ok(user)
    }

    /// Resolves the identifier, checks the password, hydrates the profile.
    ///
    /// Resolution failures surface as-is; a rejected password surfaces as a
    /// generic [`SignInError::InvalidCredentials`] that does not reveal
    /// whether the email exists. The two branches therefore leak different
    /// amounts, which mirrors what the lookup boundary already exposes for
    /// usernames.
    pub async fn sign_in(&self, identifier: &str, password: &str) -> Result<User, SignInError> {
        if identifier.trim().is_empty() || password.trim().is_empty() {
            return Err(SignInError::BlankFields);
        }

        let inner = &self.inner;
        inner.state_tx.send_replace(SessionState::Authenticating);

        let email = match inner.resolver.resolve(identifier).await {
            Ok(email) => email,
            Err(e) => {
                inner.state_tx.send_replace(SessionState::Unauthenticated);
                return Err(SignInError::Resolution(e));
            }
        };

        let session = match inner.credentials.sign_in_with_password(&email, password).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("password sign-in rejected: {}", e);
                inner.state_tx.send_replace(SessionState::Unauthenticated);
                return Err(SignInError::InvalidCredentials);
            }
        };

        match inner.hydrate(&session).await {
            Ok(user) => {
                inner
                    .state_tx
                    .send_replace(SessionState::Authenticated(user.clone()));
                tracing::info!(user = %user.name, "signed in");
                Ok(user)
            }
            Err(e) => {
                tracing::warn!("profile hydration failed after sign-in: {}", e);
                inner.state_tx.send_replace(SessionState::Unauthenticated);
                Err(SignInError::ProfileUnavailable)
            }
        }
    }

    /// Revokes the session and clears the user.
    ///
    /// Local state is cleared even when revocation fails; the error is
    /// reported so the caller knows the token may outlive the process.
    pub async fn sign_out(&self) -> Result<(), CredentialError> {
        let inner = &self.inner;
        inner.state_tx.send_replace(SessionState::SigningOut);

        let result = inner.credentials.sign_out().await;
        inner.state_tx.send_replace(SessionState::Unauthenticated);

        if let Err(e) = &result {
            tracing::warn!("sign-out revocation failed: {}", e);
        }
        result
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// User-facing sign-up failures.
#[derive(Debug)]
pub enum SignUpError {
    BlankFields,
    UsernameIsEmail,
    InvalidEmail,
    CredentialRejected(CredentialError),
    ProfileWriteFailed(DirectoryError),
}

impl fmt::Display for SignUpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignUpError::BlankFields => write!(f, "fields cannot be blank"),
            SignUpError::UsernameIsEmail => {
                write!(f, "username cannot be in the form of an email address")
            }
            SignUpError::InvalidEmail => write!(f, "enter a valid email address"),
            SignUpError::CredentialRejected(CredentialError::EmailInUse) => {
                write!(f, "an account with that email already exists")
            }
            SignUpError::CredentialRejected(_) => {
                write!(f, "could not create the account, try again later")
            }
            SignUpError::ProfileWriteFailed(DirectoryError::UsernameTaken) => {
                write!(f, "that username is already taken")
            }
            SignUpError::ProfileWriteFailed(_) => {
                write!(f, "could not save your profile, try again later")
            }
        }
    }
}

impl std::error::Error for SignUpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SignUpError::CredentialRejected(e) => Some(e),
            SignUpError::ProfileWriteFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// User-facing sign-in failures.
#[derive(Debug)]
pub enum SignInError {
    BlankFields,
    Resolution(ResolveError),
    InvalidCredentials,
    ProfileUnavailable,
}

impl fmt::Display for SignInError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignInError::BlankFields => write!(f, "fields cannot be blank"),
            SignInError::Resolution(e) => write!(f, "{}", e),
            SignInError::InvalidCredentials => {
                write!(f, "invalid username/email or password")
            }
            SignInError::ProfileUnavailable => {
                write!(f, "could not load your profile, try again later")
            }
        }
    }
}

impl std::error::Error for SignInError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SignInError::Resolution(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::{
        MemoryCredentialStore, MemoryIdentifierLookup, MemoryMealStore, MemoryProfileDirectory,
    };
    use crate::stores::MealStore;
    use chrono::{Duration, NaiveDate, Utc};

    struct Fixture {
        credentials: Arc<MemoryCredentialStore>,
        profiles: Arc<MemoryProfileDirectory>,
        lookup: Arc<MemoryIdentifierLookup>,
        manager: SessionManager,
    }

    fn fixture() -> Fixture {
        let credentials = Arc::new(MemoryCredentialStore::new());
        let profiles = Arc::new(MemoryProfileDirectory::new());
        let lookup = Arc::new(MemoryIdentifierLookup::new());
        let manager = SessionManager::new(
            credentials.clone(),
            profiles.clone(),
            lookup.clone(),
        );
        Fixture {
            credentials,
            profiles,
            lookup,
            manager,
        }
    }

    /// Registers alice both as a credential and a profile record.
    async fn seed_alice(fx: &Fixture) -> String {
        let id = fx.credentials.seed_account("alice@example.com", "hunter22");
        fx.profiles.insert(&id, "alice").await.unwrap();
        fx.lookup.map("alice", "alice@example.com");
        id
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_sign_up_commits_full_user() {
        let fx = fixture();
        let user = fx
            .manager
            .sign_up("alice", "alice@example.com", "hunter22")
            .await
            .unwrap();

        assert!(!user.id.is_empty());
        assert_eq!(user.name, "alice");
        assert_eq!(user.email, "alice@example.com");
        assert!(fx.manager.state().is_authenticated());

        // A brand-new account starts with an empty ledger.
        let meals = MemoryMealStore::new();
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert!(meals.query(&user.id, today).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sign_up_blank_fields_is_local() {
        let fx = fixture();
        let err = fx.manager.sign_up("", "a@example.com", "pw").await.unwrap_err();
        assert!(matches!(err, SignUpError::BlankFields));
        assert!(!fx.credentials.has_account("a@example.com"));
        assert_eq!(fx.profiles.calls(), 0);
    }

    #[tokio::test]
    async fn test_sign_up_rejects_email_shaped_username() {
        let fx = fixture();
        let err = fx
            .manager
            .sign_up("alice@example.com", "alice@example.com", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, SignUpError::UsernameIsEmail));
        assert!(!fx.credentials.has_account("alice@example.com"));
    }

    #[tokio::test]
    async fn test_sign_up_profile_failure_leaves_orphaned_credential() {
        let fx = fixture();
        fx.profiles.fail_next();

        let err = fx
            .manager
            .sign_up("alice", "alice@example.com", "hunter22")
            .await
            .unwrap_err();
        assert!(matches!(err, SignUpError::ProfileWriteFailed(_)));

        // The credential exists, but no user was committed.
        assert!(fx.credentials.has_account("alice@example.com"));
        assert!(fx.manager.current_user().is_none());
    }

    #[tokio::test]
    async fn test_sign_in_with_username() {
        let fx = fixture();
        seed_alice(&fx).await;

        let user = fx.manager.sign_in("alice", "hunter22").await.unwrap();
        assert_eq!(user.name, "alice");
        assert_eq!(user.email, "alice@example.com");
        assert!(fx.manager.state().is_authenticated());
        assert_eq!(fx.lookup.calls(), 1);
    }

    #[tokio::test]
    async fn test_sign_in_wrong_password_is_generic() {
        let fx = fixture();
        seed_alice(&fx).await;

        let err = fx.manager.sign_in("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, SignInError::InvalidCredentials));
        assert_eq!(fx.manager.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_sign_in_unknown_username_reports_not_found() {
        let fx = fixture();
        let err = fx.manager.sign_in("nobody", "pw").await.unwrap_err();
        assert!(matches!(
            err,
            SignInError::Resolution(ResolveError::IdentityNotFound)
        ));
        assert_eq!(fx.manager.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_sign_in_blank_fields_makes_no_calls() {
        let fx = fixture();
        let err = fx.manager.sign_in("alice", "  ").await.unwrap_err();
        assert!(matches!(err, SignInError::BlankFields));
        assert_eq!(fx.lookup.calls(), 0);
        assert_eq!(fx.profiles.calls(), 0);
    }

    #[tokio::test]
    async fn test_sign_in_hydration_failure_exposes_no_user() {
        let fx = fixture();
        seed_alice(&fx).await;
        fx.profiles.fail_next();

        let err = fx
            .manager
            .sign_in("alice@example.com", "hunter22")
            .await
            .unwrap_err();
        assert!(matches!(err, SignInError::ProfileUnavailable));
        assert!(fx.manager.current_user().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_clears_user() {
        let fx = fixture();
        seed_alice(&fx).await;
        fx.manager.sign_in("alice", "hunter22").await.unwrap();

        fx.manager.sign_out().await.unwrap();
        assert_eq!(fx.manager.state(), SessionState::Unauthenticated);
        assert!(fx.manager.current_user().is_none());
    }

    #[tokio::test]
    async fn test_listener_rehydrates_pushed_session() {
        let fx = fixture();
        let id = seed_alice(&fx).await;
        fx.manager.spawn_listener();

        fx.credentials.push_session(Some(Session {
            access_token: "tok".to_string(),
            user_id: id,
            email: "alice@example.com".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        }));
        settle().await;

        let user = fx.manager.current_user().expect("user rehydrated");
        assert_eq!(user.name, "alice");

        fx.credentials.push_session(None);
        settle().await;
        assert!(fx.manager.current_user().is_none());

        fx.manager.shutdown();
    }

    #[tokio::test]
    async fn test_listener_keeps_prior_user_when_hydration_fails() {
        let fx = fixture();
        let id = seed_alice(&fx).await;
        fx.manager.sign_in("alice", "hunter22").await.unwrap();
        fx.manager.spawn_listener();
        settle().await;

        fx.profiles.fail_next();
        fx.credentials.push_session(Some(Session {
            access_token: "tok2".to_string(),
            user_id: id,
            email: "alice@example.com".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        }));
        settle().await;

        // Hydration failed, so the previously committed user survives.
        assert_eq!(fx.manager.current_user().unwrap().name, "alice");
        fx.manager.shutdown();
    }

    #[tokio::test]
    async fn test_rehydrate_applies_current_session_once() {
        let fx = fixture();
        let id = seed_alice(&fx).await;
        fx.credentials.push_session(Some(Session {
            access_token: "tok".to_string(),
            user_id: id,
            email: "alice@example.com".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        }));

        fx.manager.rehydrate().await;
        assert_eq!(fx.manager.current_user().unwrap().name, "alice");

        // Running it again is a no-op, not an error.
        fx.manager.rehydrate().await;
        assert_eq!(fx.manager.current_user().unwrap().name, "alice");
    }

    #[tokio::test]
    async fn test_rehydrate_ignores_expired_session() {
        let fx = fixture();
        let id = seed_alice(&fx).await;
        fx.credentials.push_session(Some(Session {
            access_token: "tok".to_string(),
            user_id: id,
            email: "alice@example.com".to_string(),
            expires_at: Utc::now() - Duration::minutes(1),
        }));

        fx.manager.rehydrate().await;
        assert!(fx.manager.current_user().is_none());
    }
}
