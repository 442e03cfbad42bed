//! Single-flight token refresh.
//!
//! Many calls can see `401` at once when the access token expires. Only the
//! first one starts a refresh; the rest attach to it and receive the same
//! outcome. The slot holds a weak handle, so a refresh whose every waiter
//! has been cancelled is dropped and the next caller starts a fresh one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use tracing::debug;

use crate::auth::{AuthError, Session, SessionStore};

/// Result every waiter of one refresh receives
pub type RefreshOutcome = Result<Session, AuthError>;

type RefreshFuture = BoxFuture<'static, RefreshOutcome>;

#[derive(Default)]
struct Slot {
    generation: u64,
    in_flight: Option<WeakShared<RefreshFuture>>,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    // The slot is two plain fields; a panic elsewhere cannot leave it half-updated
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RefreshCoordinator {
    session: Arc<SessionStore>,
    timeout: Duration,
    slot: Arc<Mutex<Slot>>,
}

impl RefreshCoordinator {
    pub fn new(session: Arc<SessionStore>, timeout: Duration) -> Self {
        Self {
            session,
            timeout,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Await the in-flight refresh, starting one if none is running.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.join_or_start().await
    }

    /// Whether a refresh is currently running with at least one waiter
    pub fn is_refreshing(&self) -> bool {
        lock(&self.slot)
            .in_flight
            .as_ref()
            .and_then(WeakShared::upgrade)
            .is_some()
    }

    fn join_or_start(&self) -> Shared<RefreshFuture> {
        let mut slot = lock(&self.slot);

        if let Some(running) = slot.in_flight.as_ref().and_then(WeakShared::upgrade) {
            debug!(generation = slot.generation, "Joining in-flight token refresh");
            return running;
        }

        slot.generation += 1;
        let generation = slot.generation;
        debug!(generation, "Starting token refresh");

        let session = Arc::clone(&self.session);
        let slot_handle = Arc::clone(&self.slot);
        let timeout = self.timeout;

        let refresh = async move {
            let outcome = match tokio::time::timeout(timeout, session.refresh()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(AuthError::RefreshTimeout(timeout)),
            };

            // Clear before waiters observe the outcome so later failures start anew
            let mut slot = lock(&slot_handle);
            if slot.generation == generation {
                slot.in_flight = None;
            }
            drop(slot);

            outcome
        }
        .boxed()
        .shared();

        slot.in_flight = refresh.downgrade();
        refresh
    }
}
