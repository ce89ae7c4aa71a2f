//! Auth endpoints and the cached credential.
//!
//! One token blob is persisted per application (keyed by hostname) under the
//! user's home directory; it is loaded lazily on first use and rewritten on
//! every successful sign-in. This is a plain file, not a secure vault.

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use crate::http::{HttpClient, HttpError};

/// Reply of the auth endpoints: the signed token plus the server's user
/// object, which is application-defined.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthData {
    pub token: String,
    #[serde(default)]
    pub user: serde_json::Value,
}

pub struct Auth {
    http: HttpClient,
    app_key: String,
}

impl Auth {
    pub(crate) fn new(http: HttpClient, app_key: &str) -> Auth {
        let auth = Auth {
            http,
            app_key: app_key.replace([':', '/'], "_"),
        };
        if let Some(token) = auth.load_cached_token() {
            auth.http.set_token(Some(token));
        }
        auth
    }

    pub fn token(&self) -> Option<String> {
        self.http.token_slot().lock().ok().and_then(|t| t.clone())
    }

    /// Overrides the token without touching the cache (e.g. tokens minted
    /// by an external identity provider).
    pub fn set_token(&self, token: Option<String>) {
        self.http.set_token(token);
    }

    pub async fn register_with_email_and_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthData, HttpError> {
        self.request("auth/register", serde_json::json!({ "email": email, "password": password }))
            .await
    }

    pub async fn sign_in_with_email_and_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthData, HttpError> {
        self.request("auth/login", serde_json::json!({ "email": email, "password": password }))
            .await
    }

    pub async fn sign_in_anonymously(&self) -> Result<AuthData, HttpError> {
        self.request("auth/anonymous", serde_json::json!({})).await
    }

    pub async fn get_user_data(&self) -> Result<serde_json::Value, HttpError> {
        self.http.get_json("auth/userdata").await
    }

    /// Drops the in-memory token and the cached credential file.
    pub fn sign_out(&self) {
        self.http.set_token(None);
        if let Some(path) = self.token_path() {
            let _ = fs::remove_file(path);
        }
    }

    async fn request(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<AuthData, HttpError> {
        let reply = self.http.post_json(path, &body).await?;
        let data: AuthData = serde_json::from_value(reply)?;
        self.http.set_token(Some(data.token.clone()));
        self.store_cached_token(&data.token);
        Ok(data)
    }

    fn token_path(&self) -> Option<PathBuf> {
        let dir = home::home_dir()?.join(".berth");
        Some(dir.join(format!("{}.token", self.app_key)))
    }

    fn load_cached_token(&self) -> Option<String> {
        let path = self.token_path()?;
        let token = fs::read_to_string(path).ok()?;
        let token = token.trim().to_string();
        (!token.is_empty()).then_some(token)
    }

    fn store_cached_token(&self, token: &str) {
        let Some(path) = self.token_path() else {
            return;
        };
        if let Some(dir) = path.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                log::warn!("could not create credential directory: {e}");
                return;
            }
        }
        if let Err(e) = fs::write(&path, token) {
            log::warn!("could not persist auth token: {e}");
        }
    }
}
