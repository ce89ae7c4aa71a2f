//! HTTP plumbing for matchmaking and auth endpoints.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use berth_client_api_messages::MatchmakeErrorBody;
use http::Uri;
use thiserror::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum HttpError {
    /// The server rejected the request with a structured error body.
    #[error("{message} (code {code})")]
    Server { code: u32, message: String },
    #[error("unexpected response shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Thin reqwest wrapper carrying the base endpoint and the shared auth
/// token. The token is attached as a bearer header once set.
#[derive(Clone)]
pub struct HttpClient {
    base: Uri,
    client: reqwest::Client,
    token: Arc<Mutex<Option<String>>>,
}

impl HttpClient {
    pub fn new(base: Uri) -> HttpClient {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        HttpClient {
            base,
            client,
            token: Arc::new(Mutex::new(None)),
        }
    }

    pub fn token_slot(&self) -> Arc<Mutex<Option<String>>> {
        self.token.clone()
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.lock().expect("auth token lock poisoned") = token;
    }

    fn current_token(&self) -> Option<String> {
        self.token.lock().expect("auth token lock poisoned").clone()
    }

    fn url(&self, path: &str) -> String {
        let base = self.base.to_string();
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, HttpError> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(token) = self.current_token() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            // Matchmaking rejections carry `{code, message}`.
            if let Ok(body) = serde_json::from_str::<MatchmakeErrorBody>(&text) {
                return Err(HttpError::Server {
                    code: body.code,
                    message: body.message,
                });
            }
            return Err(HttpError::Server {
                code: status.as_u16() as u32,
                message: text,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn get_json(&self, path: &str) -> Result<serde_json::Value, HttpError> {
        let mut request = self.client.get(self.url(path));
        if let Some(token) = self.current_token() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(HttpError::Server {
                code: status.as_u16() as u32,
                message: text,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}
