//! HTTP implementations of the store boundaries against a Supabase-style
//! backend.
//!
//! One client implements all four contracts: the auth endpoints
//! (`/auth/v1/*`) back [`CredentialStore`], the `username_and_email` table
//! backs [`ProfileDirectory`], the privileged `authorization-check` edge
//! function backs [`IdentifierLookup`], and the `meals` table backs
//! [`MealStore`]. Row-level security scopes table reads and writes to the
//! signed-in user; the lookup function alone runs with elevated rights on
//! the server side and is reachable only through its own endpoint.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::watch;

use super::{
    CredentialError, CredentialStore, DirectoryError, IdentifierLookup, LookupError, MealStore,
    MealStoreError, ProfileDirectory, Session,
};
use crate::models::{Meal, MealFields};

/// Client for a Supabase-style backend, holding the current session.
pub struct SupabaseClient {
    base_url: String,
    anon_key: String,
    http: reqwest::Client,
    session_tx: watch::Sender<Option<Session>>,
}

#[derive(Deserialize)]
struct AuthResponse {
    access_token: String,
    expires_in: i64,
    user: AuthUser,
}

#[derive(Deserialize)]
struct AuthUser {
    id: String,
    email: String,
}

#[derive(Deserialize)]
struct UsernameRow {
    username: String,
}

#[derive(Deserialize)]
struct LookupResponse {
    email: String,
}

impl SupabaseClient {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            anon_key: anon_key.into(),
            http: reqwest::Client::new(),
            session_tx: watch::channel(None).0,
        }
    }

    /// The session currently held by the client, if any.
    pub fn current_session(&self) -> Option<Session> {
        self.session_tx.borrow().clone()
    }

    /// Restores a persisted session, e.g. one saved to the config file by a
    /// previous process. Expired sessions are dropped instead of published.
    pub fn restore(&self, session: Session) {
        if session.is_expired() {
            tracing::debug!("persisted session expired, discarding");
            return;
        }
        self.session_tx.send_replace(Some(session));
    }

    /// Bearer token for data-plane calls: the user token when signed in,
    /// the anon key otherwise.
    fn bearer(&self) -> String {
        self.session_tx
            .borrow()
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn table_url(&self, table: &str, filters: &str) -> String {
        if filters.is_empty() {
            format!("{}/rest/v1/{}", self.base_url, table)
        } else {
            format!("{}/rest/v1/{}?{}", self.base_url, table, filters)
        }
    }

    fn function_url(&self, name: &str) -> String {
        format!("{}/functions/v1/{}", self.base_url, name)
    }

    fn session_from(&self, resp: AuthResponse) -> Session {
        let session = Session {
            access_token: resp.access_token,
            user_id: resp.user.id,
            email: resp.user.email,
            expires_at: Utc::now() + Duration::seconds(resp.expires_in),
        };
        self.session_tx.send_replace(Some(session.clone()));
        session
    }
}

/// Pulls a short diagnostic out of an auth/REST error body.
///
/// GoTrue answers `{"msg": ...}` or `{"error_description": ...}`, PostgREST
/// answers `{"message": ...}`; fall back to the raw body.
fn error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["msg", "error_description", "message", "error"] {
            if let Some(text) = json.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    body.to_string()
}

#[async_trait]
impl CredentialStore for SupabaseClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, CredentialError> {
        let response = self
            .http
            .post(self.auth_url("signup"))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| CredentialError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: AuthResponse = response
                .json()
                .await
                .map_err(|e| CredentialError::Unavailable(e.to_string()))?;
            return Ok(self.session_from(body));
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);
        if status == StatusCode::UNPROCESSABLE_ENTITY || message.contains("already registered") {
            Err(CredentialError::EmailInUse)
        } else {
            Err(CredentialError::Unavailable(message))
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, CredentialError> {
        let response = self
            .http
            .post(format!("{}?grant_type=password", self.auth_url("token")))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| CredentialError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: AuthResponse = response
                .json()
                .await
                .map_err(|e| CredentialError::Unavailable(e.to_string()))?;
            return Ok(self.session_from(body));
        }

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            Err(CredentialError::InvalidCredentials)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(CredentialError::Unavailable(error_message(&body)))
        }
    }

    async fn sign_out(&self) -> Result<(), CredentialError> {
        let token = match self.current_session() {
            Some(session) => session.access_token,
            None => {
                // Nothing to revoke.
                self.session_tx.send_replace(None);
                return Ok(());
            }
        };

        let result = self
            .http
            .post(self.auth_url("logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(&token)
            .send()
            .await;

        // The local session is gone either way; revocation failure only
        // means the token lives until expiry server-side.
        self.session_tx.send_replace(None);

        match result {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => {
                let body = response.text().await.unwrap_or_default();
                Err(CredentialError::Unavailable(error_message(&body)))
            }
            Err(e) => Err(CredentialError::Unavailable(e.to_string())),
        }
    }

    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session_tx.subscribe()
    }
}

#[async_trait]
impl ProfileDirectory for SupabaseClient {
    async fn insert(&self, user_id: &str, username: &str) -> Result<(), DirectoryError> {
        // The row carries the email alongside the username so the
        // privileged lookup can resolve logins without a join.
        let email = self
            .current_session()
            .map(|s| s.email)
            .unwrap_or_default();

        let response = self
            .http
            .post(self.table_url("username_and_email", ""))
            .header("apikey", &self.anon_key)
            .header("Prefer", "return=minimal")
            .bearer_auth(self.bearer())
            .json(&serde_json::json!({
                "id": user_id,
                "username": username,
                "email": email,
            }))
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::CONFLICT {
            Err(DirectoryError::UsernameTaken)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(DirectoryError::Unavailable(error_message(&body)))
        }
    }

    async fn username_by_id(&self, user_id: &str) -> Result<Option<String>, DirectoryError> {
        let filters = format!("select=username&id=eq.{}", urlencoding::encode(user_id));
        let response = self
            .http
            .get(self.table_url("username_and_email", &filters))
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Unavailable(error_message(&body)));
        }

        let rows: Vec<UsernameRow> = response
            .json()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        Ok(rows.into_iter().next().map(|row| row.username))
    }
}

#[async_trait]
impl IdentifierLookup for SupabaseClient {
    async fn email_for_username(&self, username: &str) -> Result<Option<String>, LookupError> {
        let response = self
            .http
            .post(self.function_url("authorization-check"))
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .json(&serde_json::json!({ "username": username }))
            .send()
            .await
            .map_err(|e| LookupError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LookupError::Unavailable(error_message(&body)));
        }

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| LookupError::Unavailable(e.to_string()))?;
        Ok(Some(body.email))
    }
}

#[async_trait]
impl MealStore for SupabaseClient {
    async fn query(&self, user_id: &str, date: NaiveDate) -> Result<Vec<Meal>, MealStoreError> {
        let filters = format!(
            "select=id,name,calories,protein,carbs,fats&user_id=eq.{}&date=eq.{}&order=created_at.asc",
            urlencoding::encode(user_id),
            date
        );
        let response = self
            .http
            .get(self.table_url("meals", &filters))
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
            .send()
            .await
            .map_err(|e| MealStoreError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MealStoreError::Unavailable(error_message(&body)));
        }

        response
            .json()
            .await
            .map_err(|e| MealStoreError::Unavailable(e.to_string()))
    }

    async fn insert(
        &self,
        user_id: &str,
        date: NaiveDate,
        fields: &MealFields,
    ) -> Result<String, MealStoreError> {
        let response = self
            .http
            .post(self.table_url("meals", ""))
            .header("apikey", &self.anon_key)
            .header("Prefer", "return=representation")
            .bearer_auth(self.bearer())
            .json(&serde_json::json!({
                "user_id": user_id,
                "date": date.to_string(),
                "name": fields.name,
                "calories": fields.calories,
                "protein": fields.protein,
                "carbs": fields.carbs,
                "fats": fields.fats,
            }))
            .send()
            .await
            .map_err(|e| MealStoreError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MealStoreError::Unavailable(error_message(&body)));
        }

        let rows: Vec<Meal> = response
            .json()
            .await
            .map_err(|e| MealStoreError::Unavailable(e.to_string()))?;
        rows.into_iter()
            .next()
            .map(|meal| meal.id)
            .ok_or_else(|| MealStoreError::Unavailable("insert returned no row".to_string()))
    }

    async fn update(&self, meal_id: &str, fields: &MealFields) -> Result<(), MealStoreError> {
        let filters = format!("id=eq.{}", urlencoding::encode(meal_id));
        let response = self
            .http
            .patch(self.table_url("meals", &filters))
            .header("apikey", &self.anon_key)
            .header("Prefer", "return=representation")
            .bearer_auth(self.bearer())
            .json(&serde_json::json!({
                "name": fields.name,
                "calories": fields.calories,
                "protein": fields.protein,
                "carbs": fields.carbs,
                "fats": fields.fats,
            }))
            .send()
            .await
            .map_err(|e| MealStoreError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MealStoreError::Unavailable(error_message(&body)));
        }

        let rows: Vec<Meal> = response
            .json()
            .await
            .map_err(|e| MealStoreError::Unavailable(e.to_string()))?;
        if rows.is_empty() {
            Err(MealStoreError::NotFound)
        } else {
            Ok(())
        }
    }

    async fn delete(&self, meal_id: &str) -> Result<(), MealStoreError> {
        let filters = format!("id=eq.{}", urlencoding::encode(meal_id));
        let response = self
            .http
            .delete(self.table_url("meals", &filters))
            .header("apikey", &self.anon_key)
            .header("Prefer", "return=representation")
            .bearer_auth(self.bearer())
            .send()
            .await
            .map_err(|e| MealStoreError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MealStoreError::Unavailable(error_message(&body)));
        }

        let rows: Vec<Meal> = response
            .json()
            .await
            .map_err(|e| MealStoreError::Unavailable(e.to_string()))?;
        if rows.is_empty() {
            Err(MealStoreError::NotFound)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_strip_trailing_slash() {
        let client = SupabaseClient::new("https://proj.supabase.co/", "anon");
        assert_eq!(
            client.auth_url("signup"),
            "https://proj.supabase.co/auth/v1/signup"
        );
        assert_eq!(
            client.table_url("meals", "id=eq.7"),
            "https://proj.supabase.co/rest/v1/meals?id=eq.7"
        );
        assert_eq!(
            client.function_url("authorization-check"),
            "https://proj.supabase.co/functions/v1/authorization-check"
        );
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"msg":"User already registered"}"#), "User already registered");
        assert_eq!(error_message(r#"{"error_description":"bad grant"}"#), "bad grant");
        assert_eq!(error_message(r#"{"message":"row not found"}"#), "row not found");
        assert_eq!(error_message("plain text"), "plain text");
    }

    #[test]
    fn test_restore_drops_expired_session() {
        let client = SupabaseClient::new("https://proj.supabase.co", "anon");
        client.restore(Session {
            access_token: "tok".to_string(),
            user_id: "u1".to_string(),
            email: "a@example.com".to_string(),
            expires_at: Utc::now() - Duration::minutes(5),
        });
        assert!(client.current_session().is_none());

        client.restore(Session {
            access_token: "tok".to_string(),
            user_id: "u1".to_string(),
            email: "a@example.com".to_string(),
            expires_at: Utc::now() + Duration::minutes(5),
        });
        assert!(client.current_session().is_some());
    }

    #[test]
    fn test_bearer_prefers_user_token() {
        let client = SupabaseClient::new("https://proj.supabase.co", "anon");
        assert_eq!(client.bearer(), "anon");

        client.restore(Session {
            access_token: "user-token".to_string(),
            user_id: "u1".to_string(),
            email: "a@example.com".to_string(),
            expires_at: Utc::now() + Duration::minutes(5),
        });
        assert_eq!(client.bearer(), "user-token");
    }
}
