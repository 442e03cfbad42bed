use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::{KeyValueStore, StoreOp};

/// Storage key for the access token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Storage key for the JSON-serialized user profile
pub const USER_KEY: &str = "user";

/// Access token key written by older releases. Read on load, removed on every write.
pub const LEGACY_TOKEN_KEY: &str = "token";

/// Role value that grants admin access
pub const ADMIN_ROLE: &str = "ADMIN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Number(n) => write!(f, "{}", n),
            UserId::Text(s) => f.write_str(s),
        }
    }
}

/// Last known identity of the logged-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Any other fields the backend sends, kept so they survive a save
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    pub fn has_admin_role(&self) -> bool {
        self.role.as_deref() == Some(ADMIN_ROLE)
    }
}

/// The credential triple plus an in-process renewal timestamp.
#[derive(Clone, Default, PartialEq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
    /// When this process last obtained the access token. Not persisted.
    pub renewed_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("user", &self.user)
            .field("renewed_at", &self.renewed_at)
            .finish()
    }
}

impl Session {
    pub fn is_logged_in(&self) -> bool {
        self.access_token.is_some()
    }

    /// Admin requires a live access token; a leftover profile alone never counts.
    pub fn is_admin(&self) -> bool {
        self.is_logged_in() && self.user.as_ref().is_some_and(UserProfile::has_admin_role)
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.user.is_none()
    }

    pub fn username(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.username.as_str())
    }
}

/// Which key scheme a session was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredLayout {
    /// Nothing stored
    Empty,
    /// `accessToken` / `refreshToken` / `user`
    Current,
    /// Access token only under `token`
    Legacy,
}

/// Browser-era clients stored missing values as the literal strings
/// `null` / `undefined`, and some wrote the token JSON-quoted.
fn parse_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let token = if trimmed.starts_with('"') {
        serde_json::from_str::<String>(trimmed).ok()?
    } else {
        trimmed.to_string()
    };

    if token.is_empty()
        || token == "null"
        || token == "undefined"
        || token.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return None;
    }
    Some(token)
}

fn parse_user(raw: &str) -> Option<UserProfile> {
    match serde_json::from_str::<Option<UserProfile>>(raw) {
        Ok(user) => user,
        Err(e) => {
            warn!(error = %e, "Ignoring unparseable stored user profile");
            None
        }
    }
}

/// Read the persisted session, falling back to the legacy key.
pub(crate) fn load(storage: &dyn KeyValueStore) -> Result<(Session, StoredLayout)> {
    let current = storage.get(ACCESS_TOKEN_KEY)?.as_deref().and_then(parse_token);

    let (access_token, mut layout) = match current {
        Some(token) => (Some(token), StoredLayout::Current),
        None => match storage.get(LEGACY_TOKEN_KEY)? {
            Some(raw) => match parse_token(&raw) {
                Some(token) => (Some(token), StoredLayout::Legacy),
                None => {
                    warn!("Ignoring malformed legacy session token");
                    (None, StoredLayout::Empty)
                }
            },
            None => (None, StoredLayout::Empty),
        },
    };

    let refresh_token = storage.get(REFRESH_TOKEN_KEY)?.as_deref().and_then(parse_token);
    let user = storage.get(USER_KEY)?.as_deref().and_then(parse_user);

    let session = Session {
        access_token,
        refresh_token,
        user,
        renewed_at: None,
    };

    if layout == StoredLayout::Empty && !session.is_empty() {
        layout = StoredLayout::Current;
    }
    Ok((session, layout))
}

/// Write the session under the current key scheme and drop the legacy key.
pub(crate) fn persist(storage: &dyn KeyValueStore, session: &Session) -> Result<()> {
    let mut ops = Vec::with_capacity(4);

    match session.access_token {
        Some(ref token) => ops.push(StoreOp::set(ACCESS_TOKEN_KEY, token.as_str())),
        None => ops.push(StoreOp::remove(ACCESS_TOKEN_KEY)),
    }
    match session.refresh_token {
        Some(ref token) => ops.push(StoreOp::set(REFRESH_TOKEN_KEY, token.as_str())),
        None => ops.push(StoreOp::remove(REFRESH_TOKEN_KEY)),
    }
    match session.user {
        Some(ref user) => ops.push(StoreOp::set(USER_KEY, serde_json::to_string(user)?)),
        None => ops.push(StoreOp::remove(USER_KEY)),
    }
    ops.push(StoreOp::remove(LEGACY_TOKEN_KEY));

    storage.apply(&ops)
}

/// Remove every key either scheme may have written.
pub(crate) fn erase(storage: &dyn KeyValueStore) -> Result<()> {
    storage.apply(&[
        StoreOp::remove(ACCESS_TOKEN_KEY),
        StoreOp::remove(REFRESH_TOKEN_KEY),
        StoreOp::remove(USER_KEY),
        StoreOp::remove(LEGACY_TOKEN_KEY),
    ])
}
