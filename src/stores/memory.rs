//! In-memory store implementations.
//!
//! Behave like the real backends for a single process: same contracts, same
//! error taxonomy, no network. Used by the test suite and handy for trying
//! the core without a configured server. Each store counts its boundary
//! calls and can be told to fail its next call, which is how the tests pin
//! down "zero network calls" and partial-failure behavior.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use super::{
    CredentialError, CredentialStore, DirectoryError, IdentifierLookup, LookupError, MealStore,
    MealStoreError, ProfileDirectory, Session,
};
use crate::models::{Meal, MealFields};

#[derive(Debug, Clone)]
struct Account {
    id: String,
    password: String,
}

/// In-memory credential backend with a session-change watch channel.
pub struct MemoryCredentialStore {
    accounts: Mutex<HashMap<String, Account>>,
    session_tx: watch::Sender<Option<Session>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            session_tx: watch::channel(None).0,
        }
    }

    /// Pre-seeds an account without signing anyone in. Returns the account id.
    pub fn seed_account(&self, email: &str, password: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.accounts.lock().unwrap().insert(
            email.to_string(),
            Account {
                id: id.clone(),
                password: password.to_string(),
            },
        );
        id
    }

    /// True if a credential exists for the email, signed in or not.
    pub fn has_account(&self, email: &str) -> bool {
        self.accounts.lock().unwrap().contains_key(email)
    }

    /// Injects a session-change notification, as the real backend does when
    /// a session is restored or expires out from under the client.
    pub fn push_session(&self, session: Option<Session>) {
        self.session_tx.send_replace(session);
    }

    fn issue_session(&self, id: &str, email: &str) -> Session {
        let session = Session {
            access_token: Uuid::new_v4().to_string(),
            user_id: id.to_string(),
            email: email.to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        };
        self.session_tx.send_replace(Some(session.clone()));
        session
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, CredentialError> {
        let id = {
            let mut accounts = self.accounts.lock().unwrap();
            if accounts.contains_key(email) {
                return Err(CredentialError::EmailInUse);
            }
            let id = Uuid::new_v4().to_string();
            accounts.insert(
                email.to_string(),
                Account {
                    id: id.clone(),
                    password: password.to_string(),
                },
            );
            id
        };
        Ok(self.issue_session(&id, email))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, CredentialError> {
        let id = {
            let accounts = self.accounts.lock().unwrap();
            match accounts.get(email) {
                Some(account) if account.password == password => account.id.clone(),
                _ => return Err(CredentialError::InvalidCredentials),
            }
        };
        Ok(self.issue_session(&id, email))
    }

    async fn sign_out(&self) -> Result<(), CredentialError> {
        self.session_tx.send_replace(None);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session_tx.subscribe()
    }
}

/// In-memory id-to-username directory.
pub struct MemoryProfileDirectory {
    rows: Mutex<HashMap<String, String>>,
    fail_next: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryProfileDirectory {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            fail_next: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Makes the next directory call fail as unreachable.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check_fail(&self) -> Result<(), DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            Err(DirectoryError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryProfileDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileDirectory for MemoryProfileDirectory {
    async fn insert(&self, user_id: &str, username: &str) -> Result<(), DirectoryError> {
        self.check_fail()?;
        let mut rows = self.rows.lock().unwrap();
        if rows.values().any(|existing| existing == username) {
            return Err(DirectoryError::UsernameTaken);
        }
        rows.insert(user_id.to_string(), username.to_string());
        Ok(())
    }

    async fn username_by_id(&self, user_id: &str) -> Result<Option<String>, DirectoryError> {
        self.check_fail()?;
        Ok(self.rows.lock().unwrap().get(user_id).cloned())
    }
}

/// In-memory username-to-email lookup.
pub struct MemoryIdentifierLookup {
    rows: Mutex<HashMap<String, String>>,
    fail_next: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryIdentifierLookup {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            fail_next: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn map(&self, username: &str, email: &str) {
        self.rows
            .lock()
            .unwrap()
            .insert(username.to_string(), email.to_string());
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Number of lookup calls issued so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MemoryIdentifierLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentifierLookup for MemoryIdentifierLookup {
    async fn email_for_username(&self, username: &str) -> Result<Option<String>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(LookupError::Unavailable("injected failure".to_string()));
        }
        Ok(self.rows.lock().unwrap().get(username).cloned())
    }
}

#[derive(Debug, Clone)]
struct MealRow {
    user_id: String,
    date: NaiveDate,
    fields: MealFields,
    seq: usize,
}

/// In-memory meal table keyed by store-assigned ids.
pub struct MemoryMealStore {
    rows: Mutex<HashMap<String, MealRow>>,
    next_seq: AtomicUsize,
    fail_next: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryMealStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            next_seq: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Makes the next store call fail as unreachable.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Number of store calls issued so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of rows held for `(user_id, date)`.
    pub fn count(&self, user_id: &str, date: NaiveDate) -> usize {
        self.rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.user_id == user_id && row.date == date)
            .count()
    }

    fn check_fail(&self) -> Result<(), MealStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            Err(MealStoreError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryMealStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MealStore for MemoryMealStore {
    async fn query(&self, user_id: &str, date: NaiveDate) -> Result<Vec<Meal>, MealStoreError> {
        self.check_fail()?;
        let rows = self.rows.lock().unwrap();
        let mut matching: Vec<(&String, &MealRow)> = rows
            .iter()
            .filter(|(_, row)| row.user_id == user_id && row.date == date)
            .collect();
        matching.sort_by_key(|(_, row)| row.seq);
        Ok(matching
            .into_iter()
            .map(|(id, row)| Meal::from_fields(id.clone(), row.fields.clone()))
            .collect())
    }

    async fn insert(
        &self,
        user_id: &str,
        date: NaiveDate,
        fields: &MealFields,
    ) -> Result<String, MealStoreError> {
        self.check_fail()?;
        let id = Uuid::new_v4().to_string();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.rows.lock().unwrap().insert(
            id.clone(),
            MealRow {
                user_id: user_id.to_string(),
                date,
                fields: fields.clone(),
                seq,
            },
        );
        Ok(id)
    }

    async fn update(&self, meal_id: &str, fields: &MealFields) -> Result<(), MealStoreError> {
        self.check_fail()?;
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(meal_id) {
            Some(row) => {
                row.fields = fields.clone();
                Ok(())
            }
            None => Err(MealStoreError::NotFound),
        }
    }

    async fn delete(&self, meal_id: &str) -> Result<(), MealStoreError> {
        self.check_fail()?;
        let mut rows = self.rows.lock().unwrap();
        match rows.remove(meal_id) {
            Some(_) => Ok(()),
            None => Err(MealStoreError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[tokio::test]
    async fn test_credential_round_trip() {
        let store = MemoryCredentialStore::new();
        let session = store.sign_up("a@example.com", "hunter22").await.unwrap();
        assert_eq!(session.email, "a@example.com");
        assert!(!session.is_expired());

        store.sign_out().await.unwrap();
        assert!(store.subscribe().borrow().is_none());

        let again = store
            .sign_in_with_password("a@example.com", "hunter22")
            .await
            .unwrap();
        assert_eq!(again.user_id, session.user_id);
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let store = MemoryCredentialStore::new();
        store.seed_account("a@example.com", "right");
        let err = store
            .sign_in_with_password("a@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::InvalidCredentials));
        assert!(store.subscribe().borrow().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = MemoryCredentialStore::new();
        store.seed_account("a@example.com", "pw");
        let err = store.sign_up("a@example.com", "pw2").await.unwrap_err();
        assert!(matches!(err, CredentialError::EmailInUse));
    }

    #[tokio::test]
    async fn test_directory_unique_usernames() {
        let dir = MemoryProfileDirectory::new();
        dir.insert("u1", "alice").await.unwrap();
        let err = dir.insert("u2", "alice").await.unwrap_err();
        assert!(matches!(err, DirectoryError::UsernameTaken));

        assert_eq!(dir.username_by_id("u1").await.unwrap().as_deref(), Some("alice"));
        assert_eq!(dir.username_by_id("u2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_meal_store_ordering() {
        let store = MemoryMealStore::new();
        let first = store
            .insert("u1", date(), &MealFields::new("First", 100.0, 1.0, 1.0, 1.0))
            .await
            .unwrap();
        let second = store
            .insert("u1", date(), &MealFields::new("Second", 200.0, 2.0, 2.0, 2.0))
            .await
            .unwrap();

        let meals = store.query("u1", date()).await.unwrap();
        assert_eq!(meals.len(), 2);
        assert_eq!(meals[0].id, first);
        assert_eq!(meals[1].id, second);
    }

    #[tokio::test]
    async fn test_meal_store_update_missing_id() {
        let store = MemoryMealStore::new();
        let err = store
            .update("no-such-id", &MealFields::new("X", 1.0, 1.0, 1.0, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, MealStoreError::NotFound));
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let store = MemoryMealStore::new();
        store.fail_next();
        assert!(store.query("u1", date()).await.is_err());
        assert!(store.query("u1", date()).await.is_ok());
        assert_eq!(store.calls(), 2);
    }
}
