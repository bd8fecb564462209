//! Login identifier resolution.
//!
//! Users log in with either their email or their chosen username. Usernames
//! are not authentication keys in the credential backend, so a non-email
//! identifier costs one privileged lookup round trip before the password
//! check can run. Email identifiers are passed through untouched with no
//! network call. Exactly one lookup, no retries: retrying would widen the
//! timing difference between existing and missing usernames beyond what the
//! lookup endpoint already reveals.

use std::fmt;
use std::sync::Arc;

use crate::stores::{IdentifierLookup, LookupError};

/// Syntactic email check.
///
/// A single `@` with a non-empty local part and a dotted, non-empty domain.
/// Intentionally loose: the credential backend is the authority on what it
/// accepts, this only decides which login branch an identifier takes.
pub fn is_email(identifier: &str) -> bool {
    let identifier = identifier.trim();
    if identifier.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = identifier.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !host.is_empty() && !tld.is_empty()
}

/// Resolves a login identifier to an authenticatable email.
pub struct Resolver {
    lookup: Arc<dyn IdentifierLookup>,
}

impl Resolver {
    pub fn new(lookup: Arc<dyn IdentifierLookup>) -> Self {
        Self { lookup }
    }

    /// Returns the email for `identifier`.
    ///
    /// Valid emails resolve to themselves without touching the lookup
    /// boundary; anything else is treated as a username and resolved with a
    /// single lookup call.
    pub async fn resolve(&self, identifier: &str) -> Result<String, ResolveError> {
        let identifier = identifier.trim();
        if is_email(identifier) {
            return Ok(identifier.to_string());
        }

        match self.lookup.email_for_username(identifier).await {
            Ok(Some(email)) => Ok(email),
            Ok(None) => Err(ResolveError::IdentityNotFound),
            Err(LookupError::Unavailable(e)) => Err(ResolveError::Unavailable(e)),
        }
    }
}

/// Failures from identifier resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No account uses that username.
    IdentityNotFound,
    /// The lookup boundary could not answer.
    Unavailable(String),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::IdentityNotFound => write!(f, "no account found for that username"),
            ResolveError::Unavailable(_) => {
                write!(f, "could not look up that username, try again later")
            }
        }
    }
}

impl std::error::Error for ResolveError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::MemoryIdentifierLookup;

    #[test]
    fn test_is_email() {
        assert!(is_email("alice@example.com"));
        assert!(is_email("a.b+tag@sub.example.co"));
        assert!(!is_email("alice"));
        assert!(!is_email("alice@"));
        assert!(!is_email("@example.com"));
        assert!(!is_email("alice@example"));
        assert!(!is_email("alice@.com"));
        assert!(!is_email("alice bob@example.com"));
        assert!(!is_email("alice@@example.com"));
    }

    #[tokio::test]
    async fn test_email_passthrough_makes_no_lookup_call() {
        let lookup = Arc::new(MemoryIdentifierLookup::new());
        let resolver = Resolver::new(lookup.clone());

        let resolved = resolver.resolve("alice@example.com").await.unwrap();
        assert_eq!(resolved, "alice@example.com");
        assert_eq!(lookup.calls(), 0);
    }

    #[tokio::test]
    async fn test_username_resolves_with_one_lookup_call() {
        let lookup = Arc::new(MemoryIdentifierLookup::new());
        lookup.map("alice", "alice@example.com");
        let resolver = Resolver::new(lookup.clone());

        let resolved = resolver.resolve("alice").await.unwrap();
        assert_eq!(resolved, "alice@example.com");
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_username_not_found_after_one_call() {
        let lookup = Arc::new(MemoryIdentifierLookup::new());
        let resolver = Resolver::new(lookup.clone());

        let err = resolver.resolve("nobody").await.unwrap_err();
        assert_eq!(err, ResolveError::IdentityNotFound);
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn test_lookup_outage_is_unavailable() {
        let lookup = Arc::new(MemoryIdentifierLookup::new());
        lookup.map("alice", "alice@example.com");
        lookup.fail_next();
        let resolver = Resolver::new(lookup.clone());

        let err = resolver.resolve("alice").await.unwrap_err();
        assert!(matches!(err, ResolveError::Unavailable(_)));
        // No retry after the failure.
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn test_identifier_is_trimmed() {
        let lookup = Arc::new(MemoryIdentifierLookup::new());
        let resolver = Resolver::new(lookup);

        let resolved = resolver.resolve("  alice@example.com ").await.unwrap();
        assert_eq!(resolved, "alice@example.com");
    }
}
