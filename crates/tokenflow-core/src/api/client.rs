//! Authenticated API client.
//!
//! Every call carries the current access token. A `401` triggers one shared
//! refresh and a single replay of the call with the renewed token; if that
//! cannot be done the session is ended and the navigator is told to send
//! the user to login.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::refresh::RefreshCoordinator;
use super::request::{ApiRequest, Attempt};
use super::ApiError;
use crate::auth::SessionStore;
use crate::guard::Navigator;

/// Default time allowed for a token refresh before the session is ended.
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;

/// Clone is cheap - everything shared sits behind `Arc`, and
/// `reqwest::Client` uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    session: Arc<SessionStore>,
    refresher: Arc<RefreshCoordinator>,
    navigator: Arc<dyn Navigator>,
}

impl ApiClient {
    pub fn new(session: Arc<SessionStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self::with_refresh_timeout(
            session,
            navigator,
            Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
        )
    }

    pub fn with_refresh_timeout(
        session: Arc<SessionStore>,
        navigator: Arc<dyn Navigator>,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            http: session.http().clone(),
            refresher: Arc::new(RefreshCoordinator::new(Arc::clone(&session), refresh_timeout)),
            session,
            navigator,
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Send a call, renewing the access token once if the backend rejects it.
    pub async fn send(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        let token = self.session.access_token().await;
        let first = self.dispatch(request, token.as_deref(), Attempt::First).await;
        if !matches!(first, Err(ApiError::Unauthorized)) {
            return first;
        }

        if !self.session.has_refresh_token().await {
            warn!(path = %request.path, "Request unauthorized and no refresh token available");
            self.terminate(request, token.is_none()).await;
            return Err(ApiError::Unauthorized);
        }

        let renewed = match self.refresher.refresh().await {
            Ok(renewed) => renewed,
            Err(e) => {
                warn!(path = %request.path, error = %e, "Token refresh failed, ending session");
                self.terminate(request, false).await;
                return Err(ApiError::Refresh(e));
            }
        };

        // Replay with the token from the refresh we awaited, not whatever the store holds now
        let replay = self
            .dispatch(request, renewed.access_token.as_deref(), Attempt::Retried)
            .await;
        if matches!(replay, Err(ApiError::Unauthorized)) {
            warn!(path = %request.path, "Request still unauthorized after refresh, ending session");
            self.terminate(request, false).await;
        }
        replay
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(&ApiRequest::get(path)).await?;
        Self::parse_json(response, path).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = ApiRequest::post(path).json(Self::to_value(body)?);
        let response = self.send(&request).await?;
        Self::parse_json(response, path).await
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = ApiRequest::put(path).json(Self::to_value(body)?);
        let response = self.send(&request).await?;
        Self::parse_json(response, path).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(&ApiRequest::delete(path)).await?;
        Ok(())
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
        attempt: Attempt,
    ) -> Result<Response, ApiError> {
        let url = self
            .session
            .endpoint(&request.path)
            .map_err(|e| ApiError::InvalidRequest(format!("{:#}", e)))?;

        let mut builder = self.http.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        debug!(
            method = %request.method,
            path = %request.path,
            ?attempt,
            authenticated = token.is_some(),
            "Sending request"
        );
        let response = builder.send().await?;
        Self::check_response(response).await
    }

    /// End the session and ask for the login view.
    ///
    /// Concurrent calls failing on the same refresh all land here; only the
    /// one that actually cleared the session (or an anonymous call, which
    /// had nothing to clear) raises the redirect. A failed erase still
    /// clears the in-memory session, so it redirects too.
    async fn terminate(&self, request: &ApiRequest, anonymous: bool) {
        let cleared = match self.session.logout().await {
            Ok(cleared) => cleared,
            Err(e) => {
                warn!(path = %request.path, error = %e, "Session ended but stored tokens remain");
                true
            }
        };
        if cleared || anonymous {
            self.navigator.redirect_to_login(Some(&request.path));
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", path, e)))
    }

    fn to_value<B: Serialize>(body: &B) -> Result<serde_json::Value, ApiError> {
        serde_json::to_value(body).map_err(|e| ApiError::InvalidRequest(e.to_string()))
    }
}
