//! Session and meal-ledger synchronization core for a personal nutrition
//! tracker.
//!
//! The crate owns three things: resolving a login identifier (email or
//! username) to an authenticatable email, the session lifecycle including
//! rehydration from asynchronous auth-state notifications, and a per-day
//! meal ledger kept in lockstep with a remote store. Macro totals are
//! always derived from the ledger, never stored.
//!
//! Everything external lives behind the traits in [`stores`]: the
//! credential backend, the profile directory, the privileged
//! username-lookup endpoint and the meal table. [`stores::supabase`] talks
//! to a real backend; [`stores::memory`] runs the whole core in-process.

pub mod auth;
pub mod config;
pub mod estimate;
pub mod ledger;
pub mod models;
pub mod stores;

pub use auth::{Resolver, SessionManager, SessionState};
pub use ledger::MealLedger;
pub use models::{DailyMacros, Meal, MealFields, User};
