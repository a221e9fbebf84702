//! Cache collection.
//!
//! Schedules removal of entries nobody subscribes to. The retention period is
//! the endpoint's `keep_unused_data_for`, falling back to the API default, and
//! is clamped to the configured maximum timer delay.

use metrics::counter;
use tracing::{debug, info};

use crate::cache::{Action, QueryCacheKey, QueryRequest, Reduced};
use crate::telemetry::METRIC_ENTRY_REMOVED;

use super::timers::TimerSet;
use super::{Handler, HandlerContext};

pub(crate) struct CollectionHandler {
    removals: TimerSet,
}

impl CollectionHandler {
    pub(crate) fn new() -> Self {
        Self {
            removals: TimerSet::new("removal"),
        }
    }

    pub(crate) fn scheduled(&self) -> Vec<QueryCacheKey> {
        self.removals.keys()
    }

    /// Arm the removal timer for `cache_key` if it has no subscribers.
    fn handle_unsubscribe(
        &mut self,
        cache_key: &QueryCacheKey,
        endpoint_name: Option<&str>,
        ctx: &mut HandlerContext<'_>,
    ) {
        let (subscribed, retention, max_delay) = {
            let state = ctx.state();
            let settings = &state.config.settings;
            // Endpoints that are not injected yet fall back to the API default.
            let retention = endpoint_name
                .and_then(|name| ctx.endpoints.get(name))
                .and_then(|definition| definition.keep_unused_data_for)
                .unwrap_or(settings.keep_unused_data_for);
            (
                state.subscriptions.has_subscribers(cache_key),
                retention,
                settings.max_timer_delay,
            )
        };

        let Some(delay) = retention.delay(max_delay) else {
            return;
        };
        if subscribed {
            return;
        }
        self.removals.schedule(ctx.engine, cache_key, delay, |cache_key, generation| {
            Action::RemovalTimerElapsed {
                cache_key,
                generation,
            }
        });
    }

    fn endpoint_of(ctx: &HandlerContext<'_>, cache_key: &QueryCacheKey) -> Option<String> {
        ctx.state()
            .query(cache_key)
            .map(|entry| entry.endpoint_name.clone())
    }
}

impl Handler for CollectionHandler {
    fn handle(&mut self, action: &Action, reduced: &Reduced, ctx: &mut HandlerContext<'_>) {
        match action {
            Action::QueryRequested(request) if request.subscribe => {
                self.removals.cancel(&request.cache_key);
            }
            Action::UnsubscribeQueryResult { cache_key, .. }
            | Action::QueryFulfilled {
                request: QueryRequest { cache_key, .. },
                ..
            }
            | Action::QueryRejected {
                request: QueryRequest { cache_key, .. },
                ..
            } => {
                // Nothing to collect once the entry is gone.
                let Some(endpoint) = Self::endpoint_of(ctx, cache_key) else {
                    return;
                };
                self.handle_unsubscribe(cache_key, Some(&endpoint), ctx);
            }
            Action::CacheEntriesUpserted { entries, .. } => {
                for entry in entries {
                    self.handle_unsubscribe(&entry.cache_key, Some(&entry.endpoint_name), ctx);
                }
            }
            Action::RemovalTimerElapsed {
                cache_key,
                generation,
            } => {
                if !self.removals.take_if_current(cache_key, *generation) {
                    return;
                }
                if ctx.state().subscriptions.has_subscribers(cache_key) {
                    debug!(cache_key = %cache_key, "Removal skipped; entry was resubscribed");
                    return;
                }
                ctx.dispatch(Action::RemoveQueryResult {
                    cache_key: cache_key.clone(),
                });
            }
            Action::RemoveQueryResult { cache_key } => {
                self.removals.cancel(cache_key);
                if reduced.applied {
                    counter!(METRIC_ENTRY_REMOVED).increment(1);
                    debug!(cache_key = %cache_key, "Cache entry removed");
                }
            }
            Action::ResetApiState => {
                self.removals.clear();
                counter!(METRIC_ENTRY_REMOVED).increment(reduced.removed.len() as u64);
                info!(removed = reduced.removed.len(), "Api state reset");
            }
            Action::Rehydrate(persisted) => {
                for (cache_key, entry) in &persisted.queries {
                    if entry.status.is_settled() {
                        self.handle_unsubscribe(cache_key, Some(&entry.endpoint_name), ctx);
                    }
                }
            }
            _ => {}
        }
    }
}
