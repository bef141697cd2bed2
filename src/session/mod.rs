//! Panel user session: who is logged in and the token sent with every call.
//!
//! The session is an explicit value built once at startup (from local
//! storage) and handed to every accessor. Login and registration go through
//! `AuthClient`; a successful login is persisted with `SessionStore`.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::error::PanelError;
use crate::remote::{extract_detail, join_url};
use crate::storage::{LocalStorage, StorageError};
use crate::validate::{self, ValidationError};

const KEY_CURRENT_USER: &str = "current_user";
const KEY_AUTH_TOKEN: &str = "auth_token";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("session storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Identity and credentials of the logged-in panel user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionContext {
    pub user: Option<String>,
    pub token: Option<String>,
}

impl SessionContext {
    pub fn new(user: Option<String>, token: Option<String>) -> Self {
        Self {
            user: user.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Token for authenticated calls, or `AuthRequired`.
    pub fn require_token(&self) -> Result<&str, PanelError> {
        self.token.as_deref().ok_or(PanelError::AuthRequired)
    }
}

/// Persists the session in local storage between runs.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn LocalStorage>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn LocalStorage>) -> Self {
        Self { storage }
    }

    /// Load the stored session. Storage failures yield an anonymous session.
    pub fn load(&self) -> SessionContext {
        let read = |key: &str| match self.storage.get(key) {
            Ok(v) => v,
            Err(e) => {
                warn!(key = key, error = %e, "failed to read session key");
                None
            }
        };
        SessionContext::new(read(KEY_CURRENT_USER), read(KEY_AUTH_TOKEN))
    }

    pub fn save(&self, session: &SessionContext) -> Result<(), SessionError> {
        match &session.user {
            Some(user) => self.storage.set(KEY_CURRENT_USER, user)?,
            None => self.storage.remove(KEY_CURRENT_USER)?,
        }
        match &session.token {
            Some(token) => self.storage.set(KEY_AUTH_TOKEN, token)?,
            None => self.storage.remove(KEY_AUTH_TOKEN)?,
        }
        debug!(user = ?session.user, "session saved");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), SessionError> {
        self.storage.remove(KEY_CURRENT_USER)?;
        self.storage.remove(KEY_AUTH_TOKEN)?;
        info!("session cleared");
        Ok(())
    }
}

#[derive(Debug, Deserialize, Default)]
struct AuthResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    auth_token: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl AuthResponse {
    fn token(self) -> Option<String> {
        self.token
            .or(self.access_token)
            .or(self.auth_token)
            .filter(|t| !t.is_empty())
    }
}

/// Login and registration against the panel's user endpoints.
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
    login_path: String,
    register_path: String,
}

impl AuthClient {
    pub fn new(api: &ApiConfig) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(api.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            login_path: api.login_path.clone(),
            register_path: api.register_path.clone(),
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<AuthResponse, SessionError> {
        let url = join_url(&self.base_url, path);
        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(SessionError::Rejected {
                status: status.as_u16(),
                message: extract_detail(&text),
            });
        }
        Ok(serde_json::from_str(&text).unwrap_or_default())
    }

    /// Log in. The returned session carries the token when the backend
    /// issues one.
    pub async fn login(&self, user_id: &str, password: &str) -> Result<SessionContext, SessionError> {
        validate::login(user_id, password)?;
        let user_id = user_id.trim();
        let resp = self
            .post(&self.login_path, json!({ "user_id": user_id, "password": password }))
            .await?;
        let token = resp.token();
        if token.is_none() {
            warn!(user = user_id, "login succeeded without a token; authenticated calls will fail");
        }
        info!(user = user_id, "logged in");
        Ok(SessionContext::new(Some(user_id.to_string()), token))
    }

    /// Register a new panel user. The email doubles as the username.
    /// Returns the backend's confirmation message.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<String, SessionError> {
        validate::registration(name, email, password)?;
        let email = email.trim().to_lowercase();
        let resp = self
            .post(
                &self.register_path,
                json!({
                    "username": email,
                    "name": name.trim(),
                    "email": email,
                    "password": password,
                }),
            )
            .await?;
        info!(user = %email, "registered");
        Ok(resp
            .message
            .or(resp.detail)
            .unwrap_or_else(|| "user created".to_string()))
    }
}
