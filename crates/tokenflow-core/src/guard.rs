//! Route-level authorization and the login redirect signal.
//!
//! The gate consults the session store's `is_logged_in` / `is_admin`
//! predicates before a protected area is entered. The API client uses the
//! `Navigator` half to send the user back to login after it ends a session.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::SessionStore;

/// Receives the "go to login" signal after a session is terminated.
pub trait Navigator: Send + Sync {
    /// `return_to` is the path the user was trying to reach, if known
    fn redirect_to_login(&self, return_to: Option<&str>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteAccess {
    Public,
    Authenticated,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub prefix: String,
    pub access: RouteAccess,
}

impl RouteRule {
    pub fn new(prefix: impl Into<String>, access: RouteAccess) -> Self {
        Self {
            prefix: prefix.into(),
            access,
        }
    }

    /// Prefix match on whole path segments: `/admin` covers `/admin/orders`
    /// but not `/administrator`.
    fn matches(&self, path: &str) -> bool {
        let prefix = self.prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return true;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Ordered access rules; the longest matching prefix wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    pub rules: Vec<RouteRule>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            rules: vec![
                RouteRule::new("/cart", RouteAccess::Authenticated),
                RouteRule::new("/orders", RouteAccess::Authenticated),
                RouteRule::new("/admin", RouteAccess::Admin),
            ],
        }
    }
}

impl RouteTable {
    pub fn access_for(&self, path: &str) -> RouteAccess {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        self.rules
            .iter()
            .filter(|rule| rule.matches(path))
            .max_by_key(|rule| rule.prefix.trim_end_matches('/').len())
            .map(|rule| rule.access)
            .unwrap_or(RouteAccess::Public)
    }
}

/// What the gate decided for a requested path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Allow,
    /// Not logged in; go to login and come back to `redirect` afterwards
    Login { redirect: String },
    /// Logged in but not allowed here
    Home,
}

pub fn decide(access: RouteAccess, logged_in: bool, admin: bool, requested: &str) -> Navigation {
    match access {
        RouteAccess::Public => Navigation::Allow,
        _ if !logged_in => Navigation::Login {
            redirect: requested.to_string(),
        },
        RouteAccess::Admin if !admin => Navigation::Home,
        _ => Navigation::Allow,
    }
}

/// Check whether the current session may enter `requested`.
pub async fn authorize(store: &SessionStore, routes: &RouteTable, requested: &str) -> Navigation {
    let access = routes.access_for(requested);
    let session = store.snapshot().await;
    let decision = decide(access, session.is_logged_in(), session.is_admin(), requested);
    debug!(requested, ?access, ?decision, "Route authorization");
    decision
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_for_uses_longest_prefix() {
        let mut routes = RouteTable::default();
        routes.rules.push(RouteRule::new("/admin/help", RouteAccess::Public));

        assert_eq!(routes.access_for("/"), RouteAccess::Public);
        assert_eq!(routes.access_for("/cart"), RouteAccess::Authenticated);
        assert_eq!(routes.access_for("/orders?page=2"), RouteAccess::Authenticated);
        assert_eq!(routes.access_for("/admin/orders"), RouteAccess::Admin);
        assert_eq!(routes.access_for("/admin/help/faq"), RouteAccess::Public);
        assert_eq!(routes.access_for("/administrator"), RouteAccess::Public);
    }

    #[test]
    fn test_decide() {
        assert_eq!(decide(RouteAccess::Public, false, false, "/"), Navigation::Allow);
        assert_eq!(
            decide(RouteAccess::Authenticated, false, false, "/cart?x=1"),
            Navigation::Login {
                redirect: "/cart?x=1".to_string()
            }
        );
        assert_eq!(decide(RouteAccess::Authenticated, true, false, "/cart"), Navigation::Allow);
        assert_eq!(
            decide(RouteAccess::Admin, false, false, "/admin/orders"),
            Navigation::Login {
                redirect: "/admin/orders".to_string()
            }
        );
        assert_eq!(decide(RouteAccess::Admin, true, false, "/admin/orders"), Navigation::Home);
        assert_eq!(decide(RouteAccess::Admin, true, true, "/admin/orders"), Navigation::Allow);
    }

    #[test]
    fn test_route_table_config_format() {
        let json = r#"{"rules": [{"prefix": "/settings", "access": "authenticated"}]}"#;
        let routes: RouteTable = serde_json::from_str(json).unwrap();
        assert_eq!(routes.access_for("/settings/profile"), RouteAccess::Authenticated);
        assert_eq!(routes.access_for("/cart"), RouteAccess::Public);
    }

    #[tokio::test]
    async fn test_authorize_with_stale_admin_profile() {
        use crate::auth::session::{ACCESS_TOKEN_KEY, USER_KEY};
        use crate::storage::MemoryStore;
        use std::sync::Arc;

        // Profile says ADMIN but there is no access token
        let storage = Arc::new(MemoryStore::with_entries([(
            USER_KEY,
            r#"{"id":1,"username":"root","role":"ADMIN"}"#,
        )]));
        let base = reqwest::Url::parse("http://localhost:3000").unwrap();
        let store = SessionStore::open(reqwest::Client::new(), base.clone(), storage).unwrap();
        assert!(!store.is_admin().await);
        assert_eq!(
            authorize(&store, &RouteTable::default(), "/admin/products").await,
            Navigation::Login {
                redirect: "/admin/products".to_string()
            }
        );

        let storage = Arc::new(MemoryStore::with_entries([
            (ACCESS_TOKEN_KEY, "a1"),
            (USER_KEY, r#"{"id":1,"username":"root","role":"ADMIN"}"#),
        ]));
        let store = SessionStore::open(reqwest::Client::new(), base, storage).unwrap();
        assert_eq!(
            authorize(&store, &RouteTable::default(), "/admin/products").await,
            Navigation::Allow
        );
    }
}
