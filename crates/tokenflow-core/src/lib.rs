//! tokenflow - client-side session management for token-authenticated APIs.
//!
//! The `SessionStore` owns the access token, refresh token and user profile
//! and persists them through a `KeyValueStore`. The `ApiClient` sends calls
//! with the current token and renews it once, through a single shared
//! refresh, when the backend rejects it.

pub mod api;
pub mod auth;
pub mod config;
pub mod guard;
pub mod storage;

pub use api::{ApiClient, ApiError, ApiRequest};
pub use auth::{AuthError, RegistrationResult, Session, SessionStore, UserProfile};
pub use config::Config;
pub use guard::{Navigation, Navigator, RouteAccess, RouteTable};
