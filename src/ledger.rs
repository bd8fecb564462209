//! The per-day meal ledger.
//!
//! `MealLedger` holds the meals for the currently selected `(user, date)`
//! key and keeps them in lockstep with the remote store. Every mutation is
//! remote-first: the local list changes only after the store confirms, and
//! is left untouched on failure, so memory never reports a state the store
//! would contradict. The trade-off is visible latency on every write; there
//! are no optimistic updates to roll back.
//!
//! Fetches are tagged with the key they were issued for. Selecting another
//! date, or a session change swapping the user, supersedes the tag and any
//! in-flight result for the old key is discarded on arrival.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tokio::sync::watch;

use crate::auth::SessionState;
use crate::models::{DailyMacros, Meal, MealFields, User, ValidationError};
use crate::stores::{MealStore, MealStoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
struct LedgerKey {
    user_id: String,
    date: NaiveDate,
}

#[derive(Default)]
struct LedgerState {
    /// The key the ledger is currently targeting, set when a fetch is
    /// issued. A completed fetch applies only if its key still matches.
    selected: Option<LedgerKey>,
    /// The key `meals` was actually loaded for.
    loaded: Option<LedgerKey>,
    meals: Vec<Meal>,
}

/// In-memory meal list for one `(user, date)` pair, synchronized with the
/// remote store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MealLedger {
    store: Arc<dyn MealStore>,
    session: watch::Receiver<SessionState>,
    state: Arc<Mutex<LedgerState>>,
}

impl MealLedger {
    pub fn new(store: Arc<dyn MealStore>, session: watch::Receiver<SessionState>) -> Self {
        Self {
            store,
            session,
            state: Arc::new(Mutex::new(LedgerState::default())),
        }
    }

    /// Current user, after dropping ledger contents that belong to a user
    /// the session no longer has.
    fn sync_session(&self) -> Option<User> {
        let user = self.session.borrow().user().cloned();
        let mut state = self.state.lock().unwrap();
        let stale = match (&user, &state.selected) {
            (Some(user), Some(key)) => key.user_id != user.id,
            (None, Some(_)) => true,
            _ => false,
        };
        if stale {
            tracing::debug!("session user changed, invalidating ledger");
            state.selected = None;
            state.loaded = None;
            state.meals.clear();
        }
        user
    }

    fn require_user(&self) -> Result<User, LedgerError> {
        self.sync_session().ok_or(LedgerError::NotAuthenticated)
    }

    /// The meals currently held for the selected key.
    pub fn meals(&self) -> Vec<Meal> {
        self.sync_session();
        self.state.lock().unwrap().meals.clone()
    }

    /// Macro totals derived from the current ledger contents.
    pub fn daily_macros(&self) -> DailyMacros {
        self.sync_session();
        DailyMacros::sum(&self.state.lock().unwrap().meals)
    }

    /// The date the ledger is currently targeting, if any.
    pub fn selected_date(&self) -> Option<NaiveDate> {
        self.sync_session();
        self.state.lock().unwrap().selected.as_ref().map(|k| k.date)
    }

    /// Replaces the ledger with the store's contents for `date`.
    ///
    /// An empty result is a valid empty ledger. A store error leaves the
    /// prior contents untouched so a failed refresh never masquerades as
    /// "no meals". A result arriving after the key was superseded is
    /// discarded.
    pub async fn fetch(&self, date: NaiveDate) -> Result<(), LedgerError> {
        let user = self.require_user()?;
        let key = LedgerKey {
            user_id: user.id,
            date,
        };

        {
            let mut state = self.state.lock().unwrap();
            state.selected = Some(key.clone());
        }

        let meals = self
            .store
            .query(&key.user_id, date)
            .await
            .map_err(LedgerError::Store)?;

        let mut state = self.state.lock().unwrap();
        if state.selected.as_ref() == Some(&key) {
            tracing::debug!(date = %date, count = meals.len(), "ledger loaded");
            state.meals = meals;
            state.loaded = Some(key);
        } else {
            tracing::debug!(date = %date, "discarding fetch result for superseded key");
        }
        Ok(())
    }

    /// Validates a draft locally, persists it, and appends the meal with
    /// its store-assigned id in one local step.
    ///
    /// Validation failures never reach the store. The append and the id are
    /// committed together, so no reader can observe one without the other.
    pub async fn add(&self, fields: MealFields, date: NaiveDate) -> Result<Meal, LedgerError> {
        let user = self.require_user()?;
        fields.validate().map_err(LedgerError::Validation)?;

        let id = self
            .store
            .insert(&user.id, date, &fields)
            .await
            .map_err(LedgerError::Store)?;
        let meal = Meal::from_fields(id, fields);

        let key = LedgerKey {
            user_id: user.id,
            date,
        };
        let mut state = self.state.lock().unwrap();
        if state.loaded.as_ref() == Some(&key) {
            state.meals.push(meal.clone());
        }
        Ok(meal)
    }

    /// Persists new fields for an existing meal, then replaces the entry in
    /// place, keeping its id and list position.
    ///
    /// Drafts cannot be edited; they must be added first.
    pub async fn edit(&self, meal: &Meal, fields: MealFields) -> Result<Meal, LedgerError> {
        self.require_user()?;
        if meal.is_draft() {
            return Err(LedgerError::UnsavedMeal);
        }
        fields.validate().map_err(LedgerError::Validation)?;

        self.store
            .update(&meal.id, &fields)
            .await
            .map_err(LedgerError::Store)?;
        let updated = Meal::from_fields(meal.id.clone(), fields);

        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.meals.iter_mut().find(|m| m.id == meal.id) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    /// Persists a deletion, then removes the matching entry by id.
    pub async fn delete(&self, meal: &Meal) -> Result<(), LedgerError> {
        self.require_user()?;
        if meal.is_draft() {
            return Err(LedgerError::UnsavedMeal);
        }

        self.store
            .delete(&meal.id)
            .await
            .map_err(LedgerError::Store)?;

        let mut state = self.state.lock().unwrap();
        state.meals.retain(|m| m.id != meal.id);
        Ok(())
    }
}

/// Ledger operation failures.
#[derive(Debug)]
pub enum LedgerError {
    /// No authenticated user; nothing was sent to the store.
    NotAuthenticated,
    /// The draft failed local validation; nothing was sent to the store.
    Validation(ValidationError),
    /// Edit or delete of a meal that was never saved.
    UnsavedMeal,
    /// The remote store refused or could not be reached.
    Store(MealStoreError),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::NotAuthenticated => write!(f, "not signed in"),
            LedgerError::Validation(e) => write!(f, "{}", e),
            LedgerError::UnsavedMeal => write!(f, "meal has not been saved yet"),
            LedgerError::Store(MealStoreError::NotFound) => write!(f, "meal not found"),
            LedgerError::Store(_) => {
                write!(f, "could not reach the meal store, try again later")
            }
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::Validation(e) => Some(e),
            LedgerError::Store(e) => Some(e),
            _ => None,
        }
    }
}
