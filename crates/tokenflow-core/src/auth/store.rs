//! The session store: single owner of the credential triple.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::session::{self, Session, StoredLayout, UserProfile};
use super::AuthError;
use crate::storage::KeyValueStore;

const LOGIN_PATH: &str = "login";
const REGISTER_PATH: &str = "register";
const REFRESH_PATH: &str = "refresh";

/// Token pair returned by login and refresh.
/// Older backends name the access token `token`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(rename = "accessToken", alias = "token")]
    access_token: String,
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<UserProfile>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    username: &'a str,
    password: &'a str,
    email: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

/// Confirmation returned by a successful registration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationResult {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

/// Owns the session, its persistence and the login/register/refresh exchanges.
///
/// Every mutation persists while holding the write lock, and the in-memory
/// state is only replaced once the write succeeded.
pub struct SessionStore {
    http: Client,
    base_url: Url,
    storage: Arc<dyn KeyValueStore>,
    state: RwLock<Session>,
}

impl SessionStore {
    /// Open the store, loading any persisted session.
    ///
    /// A session found only under the legacy key is rewritten under the
    /// current keys right away. Failure to rewrite is logged and otherwise
    /// ignored; the next successful write converges the layout anyway.
    pub fn open(
        http: Client,
        base_url: Url,
        storage: Arc<dyn KeyValueStore>,
    ) -> anyhow::Result<Self> {
        let (loaded, layout) = session::load(storage.as_ref())?;
        debug!(?layout, logged_in = loaded.is_logged_in(), "Session loaded");

        if layout == StoredLayout::Legacy {
            match session::persist(storage.as_ref(), &loaded) {
                Ok(()) => info!("Migrated session from legacy storage key"),
                Err(e) => warn!(error = %e, "Failed to migrate legacy session key"),
            }
        }

        Ok(Self {
            http,
            base_url: normalize_base(base_url),
            storage,
            state: RwLock::new(loaded),
        })
    }

    /// HTTP client shared with the authenticated API client
    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve an API path against the base URL
    pub fn endpoint(&self, path: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("Invalid API path: {}", path))
    }

    /// Copy of the current session
    pub async fn snapshot(&self) -> Session {
        self.state.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.state.read().await.access_token.clone()
    }

    pub async fn has_refresh_token(&self) -> bool {
        self.state.read().await.has_refresh_token()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.state.read().await.is_logged_in()
    }

    pub async fn is_admin(&self) -> bool {
        self.state.read().await.is_admin()
    }

    /// Exchange credentials for a new session, replacing whatever was there.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        let (status, body) = self
            .post(LOGIN_PATH, &LoginRequest { username, password })
            .await?;
        if !status.is_success() {
            debug!(%status, "Login rejected");
            return Err(AuthError::from_login_status(status, &body));
        }

        let tokens: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::InvalidResponse(format!("login response: {}", e)))?;
        let refresh_token = tokens.refresh_token.ok_or_else(|| {
            AuthError::InvalidResponse("login response has no refresh token".to_string())
        })?;

        let new_session = Session {
            access_token: Some(tokens.access_token),
            refresh_token: Some(refresh_token),
            user: tokens.user,
            renewed_at: Some(Utc::now()),
        };

        let mut state = self.state.write().await;
        session::persist(self.storage.as_ref(), &new_session).map_err(AuthError::storage)?;
        *state = new_session.clone();
        drop(state);

        info!(
            username = new_session.username().unwrap_or(username),
            renewed_at = ?new_session.renewed_at,
            "Logged in"
        );
        Ok(new_session)
    }

    /// Create an account. Does not log in.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: &str,
    ) -> Result<RegistrationResult, AuthError> {
        let (status, body) = self
            .post(
                REGISTER_PATH,
                &RegisterRequest {
                    username,
                    password,
                    email,
                },
            )
            .await?;
        if !status.is_success() {
            debug!(%status, "Registration rejected");
            return Err(AuthError::from_register_status(status, &body));
        }

        let text = body.trim();
        if text.is_empty() {
            return Ok(RegistrationResult::default());
        }
        // The account exists at this point; an unexpected body is only a message
        match serde_json::from_str(text) {
            Ok(result) => Ok(result),
            Err(e) => {
                debug!(error = %e, "Registration response is not a structured confirmation");
                Ok(RegistrationResult {
                    message: Some(text.to_string()),
                    user: None,
                })
            }
        }
    }

    /// Trade the refresh token for a new token pair.
    ///
    /// Never clears the session on failure; the caller decides whether a
    /// failed refresh ends the session.
    pub async fn refresh(&self) -> Result<Session, AuthError> {
        let Some(used) = self.state.read().await.refresh_token.clone() else {
            return Err(AuthError::RefreshInvalid("no refresh token".to_string()));
        };

        debug!("Refreshing access token");
        let (status, body) = self
            .post(
                REFRESH_PATH,
                &RefreshRequest {
                    refresh_token: &used,
                },
            )
            .await?;
        if !status.is_success() {
            warn!(%status, "Refresh token rejected");
            return Err(AuthError::from_refresh_status(status, &body));
        }

        let tokens: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::InvalidResponse(format!("refresh response: {}", e)))?;

        let mut state = self.state.write().await;
        match state.refresh_token {
            Some(ref current) if *current == used => {}
            Some(_) => {
                // A login replaced the session while the refresh was out
                debug!("Session replaced during refresh, discarding refreshed tokens");
                return Ok(state.clone());
            }
            None => {
                return Err(AuthError::RefreshInvalid(
                    "session ended during refresh".to_string(),
                ));
            }
        }

        let mut renewed = state.clone();
        renewed.access_token = Some(tokens.access_token);
        if let Some(rotated) = tokens.refresh_token {
            renewed.refresh_token = Some(rotated);
        }
        if let Some(user) = tokens.user {
            renewed.user = Some(user);
        }
        renewed.renewed_at = Some(Utc::now());

        session::persist(self.storage.as_ref(), &renewed).map_err(AuthError::storage)?;
        *state = renewed.clone();
        drop(state);

        info!(renewed_at = ?renewed.renewed_at, "Access token refreshed");
        Ok(renewed)
    }

    /// Clear the session and every persisted key. Safe to call repeatedly.
    ///
    /// Returns whether there was anything in memory to clear. The in-memory
    /// session is cleared even when removing the persisted keys fails; the
    /// error is returned so the caller knows a restart would restore it.
    pub async fn logout(&self) -> Result<bool, AuthError> {
        let mut state = self.state.write().await;
        let had_session = !state.is_empty();
        *state = Session::default();
        let erased = session::erase(self.storage.as_ref());
        drop(state);

        if let Err(e) = erased {
            warn!(error = %e, "Failed to remove persisted session");
            return Err(AuthError::storage(e));
        }
        if had_session {
            info!("Logged out");
        }
        Ok(had_session)
    }

    async fn post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(StatusCode, String), AuthError> {
        let url = self
            .endpoint(path)
            .map_err(|e| AuthError::InvalidResponse(format!("{:#}", e)))?;

        let response = self.http.post(url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }
}

/// `Url::join` drops the last path segment unless the base ends in `/`.
fn normalize_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
