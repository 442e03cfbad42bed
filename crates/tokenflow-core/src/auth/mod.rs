//! Session management.
//!
//! This module provides:
//! - `Session`: the access token, refresh token and user profile
//! - `SessionStore`: owns the session, persists it, and performs the
//!   login / register / refresh exchanges with the backend
//! - `AuthError`: failures of those exchanges
//!
//! Sessions are persisted through a `KeyValueStore` under the keys
//! `accessToken`, `refreshToken` and `user`. Data written by older releases
//! under the single `token` key is read on load and migrated on write.

pub mod error;
pub mod session;
pub mod store;

pub use error::AuthError;
pub use session::{Session, StoredLayout, UserId, UserProfile};
pub use store::{RegistrationResult, SessionStore};
