use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Failures of the session operations (login, register, refresh).
///
/// Cloneable so that a single refresh outcome can be handed to every caller
/// waiting on it.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Account already exists: {0}")]
    Conflict(String),

    #[error("Registration rejected: {0}")]
    Validation(String),

    #[error("Refresh token rejected: {0}")]
    RefreshInvalid(String),

    #[error("Token refresh timed out after {0:?}")]
    RefreshTimeout(Duration),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[source] Arc<reqwest::Error>),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to persist session: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        AuthError::NetworkError(Arc::new(e))
    }
}

/// Maximum length for error response bodies in error messages
pub(crate) const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Truncate a response body to avoid logging excessive data
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

impl AuthError {
    pub(crate) fn storage(e: anyhow::Error) -> Self {
        AuthError::Storage(format!("{:#}", e))
    }

    fn fallback(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = truncate_body(body);
        match status.as_u16() {
            500..=599 => AuthError::ServerError(truncated),
            _ => AuthError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    pub fn from_login_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => AuthError::InvalidCredentials,
            _ => Self::fallback(status, body),
        }
    }

    pub fn from_register_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            409 => AuthError::Conflict(truncate_body(body)),
            400..=499 => AuthError::Validation(truncate_body(body)),
            _ => Self::fallback(status, body),
        }
    }

    pub fn from_refresh_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            400 | 401 | 403 => AuthError::RefreshInvalid(format!("Status {}", status)),
            _ => Self::fallback(status, body),
        }
    }

    /// True for failures the user can fix by changing what they typed
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials | AuthError::Conflict(_) | AuthError::Validation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_mapping_per_endpoint() {
        assert!(matches!(
            AuthError::from_login_status(StatusCode::UNAUTHORIZED, ""),
            AuthError::InvalidCredentials
        ));
        assert!(matches!(
            AuthError::from_register_status(StatusCode::CONFLICT, "taken"),
            AuthError::Conflict(ref body) if body == "taken"
        ));
        assert!(matches!(
            AuthError::from_register_status(StatusCode::UNPROCESSABLE_ENTITY, "bad email"),
            AuthError::Validation(_)
        ));
        assert!(matches!(
            AuthError::from_refresh_status(StatusCode::FORBIDDEN, ""),
            AuthError::RefreshInvalid(_)
        ));
        assert!(matches!(
            AuthError::from_refresh_status(StatusCode::BAD_GATEWAY, "upstream"),
            AuthError::ServerError(_)
        ));
    }

    #[test]
    fn test_truncate_body() {
        let short = "short body";
        assert_eq!(truncate_body(short), short);

        let long = "é".repeat(400); // 800 bytes, multi-byte chars
        let truncated = truncate_body(&long);
        assert!(truncated.contains("truncated, 800 total bytes"));
    }

    #[test]
    fn test_user_correctable() {
        assert!(AuthError::InvalidCredentials.is_user_correctable());
        assert!(!AuthError::RefreshInvalid("expired".into()).is_user_correctable());
    }
}
