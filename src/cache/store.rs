//! Single-writer cache store.
//!
//! Holds the canonical [`ApiState`]. Every write goes through [`Store::apply`],
//! which reduces one action under the write lock and stamps it with a
//! monotonic epoch. Readers observe either the state before or after an
//! action, never a partial transition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard};

use metrics::gauge;
use tokio::sync::watch;
use tracing::trace;

use crate::endpoints::EndpointRegistry;
use crate::telemetry::METRIC_SUBSCRIPTIONS;

use super::actions::{Action, Epoch};
use super::config::ApiConfig;
use super::lock::{rw_read, rw_write};
use super::reducer::{Reduced, reduce};
use super::state::ApiState;

const SOURCE: &str = "cache::store";

pub struct Store {
    state: RwLock<ApiState>,
    epoch_counter: AtomicU64,
    changes: watch::Sender<Epoch>,
}

impl Store {
    pub fn new(config: ApiConfig) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: RwLock::new(ApiState::new(config)),
            epoch_counter: AtomicU64::new(0),
            changes,
        }
    }

    /// Reduce `action` and return its epoch together with what changed.
    pub fn apply(&self, action: &Action, endpoints: &EndpointRegistry) -> (Epoch, Reduced) {
        let (reduced, subscriptions) = {
            let mut state = rw_write(&self.state, SOURCE, "apply");
            let reduced = reduce(&mut state, action, endpoints);
            (reduced, state.subscriptions.total())
        };
        let epoch = self.epoch_counter.fetch_add(1, Ordering::SeqCst) + 1;

        trace!(
            target_module = SOURCE,
            action = action.name(),
            epoch,
            applied = reduced.applied,
            "Action reduced"
        );

        gauge!(METRIC_SUBSCRIPTIONS).set(subscriptions as f64);
        if reduced.applied {
            self.changes.send_replace(epoch);
        }
        (epoch, reduced)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ApiState> {
        rw_read(&self.state, SOURCE, "read")
    }

    /// Run `f` against the current state.
    pub fn with_state<T>(&self, f: impl FnOnce(&ApiState) -> T) -> T {
        f(&self.read())
    }

    /// Epoch of the last reduced action.
    pub fn epoch(&self) -> Epoch {
        self.epoch_counter.load(Ordering::SeqCst)
    }

    /// Receiver that observes the epoch of every applied action.
    pub fn changes(&self) -> watch::Receiver<Epoch> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;
    use crate::cache::{Data, QueryCacheKey, QueryRequest, RequestId};

    #[test]
    fn epochs_are_monotonic() {
        let store = Store::new(ApiConfig::default());
        let endpoints = EndpointRegistry::new();

        let (e1, _) = store.apply(&Action::FocusChanged { focused: false }, &endpoints);
        let (e2, _) = store.apply(&Action::FocusChanged { focused: true }, &endpoints);
        assert!(e1 < e2);
        assert_eq!(store.epoch(), e2);
    }

    #[test]
    fn ignored_actions_do_not_notify() {
        let store = Store::new(ApiConfig::default());
        let endpoints = EndpointRegistry::new();
        let mut changes = store.changes();

        let (_, reduced) = store.apply(
            &Action::UnsubscribeQueryResult {
                cache_key: QueryCacheKey::from("getPost(1)"),
                subscriber: RequestId::new(),
            },
            &endpoints,
        );
        assert!(!reduced.applied);
        assert!(!changes.has_changed().unwrap());

        let request = QueryRequest::new("getPost", QueryCacheKey::from("getPost(1)"), Data::from(1));
        store.apply(&Action::QueryRequested(request), &endpoints);
        assert!(changes.has_changed().unwrap());
        assert_eq!(store.with_state(|state| state.subscriptions.total()), 1);
    }

    #[test]
    fn store_recovers_after_poisoned_lock() {
        let store = Store::new(ApiConfig::default());
        let endpoints = EndpointRegistry::new();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.state.write().unwrap();
            panic!("poison store lock");
        }));

        store.apply(&Action::ConnectivityChanged { online: false }, &endpoints);
        assert!(!store.read().config.online);
    }
}
