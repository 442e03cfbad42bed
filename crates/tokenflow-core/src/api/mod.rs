//! Authenticated REST API client.
//!
//! This module provides the `ApiClient`, which attaches the session's bearer
//! token to every call and renews it transparently when the backend answers
//! `401`. Concurrent calls that hit an expired token share one refresh via
//! the `RefreshCoordinator`.

pub mod client;
pub mod error;
pub mod refresh;
pub mod request;

pub use client::ApiClient;
pub use error::ApiError;
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use request::{ApiRequest, Attempt};
