//! Boundary contracts for the external stores the core talks to.
//!
//! The core never owns persistence: authentication, profile records and the
//! meal table all live behind these traits. `supabase` provides the HTTP
//! implementations used in production; `memory` provides in-process fakes
//! for tests and offline experiments.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

use crate::models::{Meal, MealFields};

pub use supabase::SupabaseClient;

/// An authentication session issued by the credential backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user_id: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Authentication backend: sign-up, password sign-in, sign-out, and a
/// session-change stream.
///
/// `subscribe` hands out a watch receiver that carries the current session
/// at subscribe time and every change afterwards. Notifications are
/// serialized by the channel; observers resolve overlap with explicit calls
/// by last-write-wins.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, CredentialError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, CredentialError>;

    async fn sign_out(&self) -> Result<(), CredentialError>;

    fn subscribe(&self) -> watch::Receiver<Option<Session>>;
}

#[derive(Debug)]
pub enum CredentialError {
    /// The email/password pair was rejected.
    InvalidCredentials,
    /// Sign-up for an email that already has an account.
    EmailInUse,
    /// The backend could not be reached or answered malformed.
    Unavailable(String),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::InvalidCredentials => write!(f, "invalid credentials"),
            CredentialError::EmailInUse => {
                write!(f, "an account with that email already exists")
            }
            CredentialError::Unavailable(e) => {
                write!(f, "authentication service unavailable: {}", e)
            }
        }
    }
}

impl std::error::Error for CredentialError {}

/// Record store mapping account id to the chosen username.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn insert(&self, user_id: &str, username: &str) -> Result<(), DirectoryError>;

    /// Returns the username for an account id, or `None` when no profile
    /// record exists.
    async fn username_by_id(&self, user_id: &str) -> Result<Option<String>, DirectoryError>;
}

#[derive(Debug)]
pub enum DirectoryError {
    /// Insert collided with an existing username.
    UsernameTaken,
    /// The directory could not be reached or answered malformed.
    Unavailable(String),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::UsernameTaken => write!(f, "that username is already taken"),
            DirectoryError::Unavailable(e) => {
                write!(f, "profile directory unavailable: {}", e)
            }
        }
    }
}

impl std::error::Error for DirectoryError {}

/// Privileged username-to-email lookup, used only for username logins.
///
/// On the server side this runs with elevated rights (it reads across the
/// credential/profile boundary) behind its own endpoint; clients only ever
/// see the request/response shape below. `Ok(None)` means no such username.
#[async_trait]
pub trait IdentifierLookup: Send + Sync {
    async fn email_for_username(&self, username: &str) -> Result<Option<String>, LookupError>;
}

#[derive(Debug)]
pub enum LookupError {
    /// The lookup endpoint could not be reached or answered malformed.
    Unavailable(String),
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupError::Unavailable(e) => write!(f, "identifier lookup unavailable: {}", e),
        }
    }
}

impl std::error::Error for LookupError {}

/// CRUD boundary for the per-day meal table.
#[async_trait]
pub trait MealStore: Send + Sync {
    /// All meals for `(user_id, date)`, in insertion order. An empty vec is
    /// a valid result, not an error.
    async fn query(&self, user_id: &str, date: NaiveDate) -> Result<Vec<Meal>, MealStoreError>;

    /// Persists a new meal and returns the store-assigned id.
    async fn insert(
        &self,
        user_id: &str,
        date: NaiveDate,
        fields: &MealFields,
    ) -> Result<String, MealStoreError>;

    async fn update(&self, meal_id: &str, fields: &MealFields) -> Result<(), MealStoreError>;

    async fn delete(&self, meal_id: &str) -> Result<(), MealStoreError>;
}

#[derive(Debug)]
pub enum MealStoreError {
    /// Update or delete keyed by an id the store does not know.
    NotFound,
    /// The store could not be reached or answered malformed.
    Unavailable(String),
}

impl fmt::Display for MealStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MealStoreError::NotFound => write!(f, "meal not found"),
            MealStoreError::Unavailable(e) => write!(f, "meal store unavailable: {}", e),
        }
    }
}

impl std::error::Error for MealStoreError {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_session_expiry() {
        let mut session = Session {
            access_token: "tok".to_string(),
            user_id: "u1".to_string(),
            email: "a@example.com".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        };
        assert!(!session.is_expired());

        session.expires_at = Utc::now() - Duration::seconds(1);
        assert!(session.is_expired());
    }
}
