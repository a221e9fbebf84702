//! Polling.
//!
//! Each subscribed key polls at the lowest interval requested by any of its
//! subscribers. A poll is rescheduled after every settlement, and immediately
//! when a subscriber asks for a shorter interval than the one running.

use tokio::time::Instant;
use tracing::debug;

use crate::cache::{Action, QueryCacheKey, QueryStatus, Reduced};

use super::thunks::refetch_request;
use super::timers::TimerSet;
use super::{Handler, HandlerContext};

pub(crate) struct PollingHandler {
    polls: TimerSet,
}

impl PollingHandler {
    pub(crate) fn new() -> Self {
        Self {
            polls: TimerSet::new("poll"),
        }
    }

    pub(crate) fn scheduled(&self) -> Vec<QueryCacheKey> {
        self.polls.keys()
    }

    /// Arm the next poll for `cache_key`, replacing any running one.
    fn start_next_poll(&mut self, cache_key: &QueryCacheKey, ctx: &mut HandlerContext<'_>) {
        let interval = {
            let state = ctx.state();
            match state.query(cache_key) {
                Some(entry) if entry.status != QueryStatus::Uninitialized => {}
                _ => return,
            }
            let plan = state.subscriptions.polling_plan(cache_key);
            plan.interval
                .map(|interval| state.config.settings.clamp_delay(interval))
        };
        let Some(interval) = interval else {
            self.polls.cancel(cache_key);
            return;
        };
        self.polls
            .schedule(ctx.engine, cache_key, interval, |cache_key, generation| {
                Action::PollTimerElapsed {
                    cache_key,
                    generation,
                }
            });
    }

    /// React to a change in the subscriber set or its options.
    fn update_polling_interval(&mut self, cache_key: &QueryCacheKey, ctx: &mut HandlerContext<'_>) {
        let interval = {
            let state = ctx.state();
            match state.query(cache_key) {
                Some(entry) if entry.status != QueryStatus::Uninitialized => {}
                _ => return,
            }
            state
                .subscriptions
                .polling_plan(cache_key)
                .interval
                .map(|interval| state.config.settings.clamp_delay(interval))
        };
        let Some(interval) = interval else {
            self.polls.cancel(cache_key);
            return;
        };
        let sooner = self
            .polls
            .deadline(cache_key)
            .is_none_or(|current| Instant::now() + interval < current);
        if sooner {
            self.start_next_poll(cache_key, ctx);
        }
    }

    fn poll(&mut self, cache_key: &QueryCacheKey, ctx: &mut HandlerContext<'_>) {
        let request = {
            let state = ctx.state();
            let Some(entry) = state.query(cache_key) else {
                return;
            };
            let plan = state.subscriptions.polling_plan(cache_key);
            (state.config.focused || !plan.skip_if_unfocused).then(|| refetch_request(cache_key, entry))
        };
        match request {
            Some(request) => ctx.dispatch(Action::QueryRequested(request)),
            None => debug!(cache_key = %cache_key, "Poll skipped while unfocused"),
        }
        self.start_next_poll(cache_key, ctx);
    }
}

impl Handler for PollingHandler {
    fn handle(&mut self, action: &Action, _reduced: &Reduced, ctx: &mut HandlerContext<'_>) {
        match action {
            Action::QueryRequested(request) if request.subscribe => {
                self.update_polling_interval(&request.cache_key, ctx);
            }
            Action::QueryPending { request, .. } => {
                self.update_polling_interval(&request.cache_key, ctx);
            }
            Action::UpdateSubscriptionOptions { cache_key, .. }
            | Action::UnsubscribeQueryResult { cache_key, .. } => {
                self.update_polling_interval(cache_key, ctx);
            }
            Action::QueryFulfilled { request, .. } | Action::QueryRejected { request, .. } => {
                self.start_next_poll(&request.cache_key, ctx);
            }
            Action::PollTimerElapsed {
                cache_key,
                generation,
            } => {
                if self.polls.take_if_current(cache_key, *generation) {
                    self.poll(cache_key, ctx);
                }
            }
            Action::RemoveQueryResult { cache_key } => {
                self.polls.cancel(cache_key);
            }
            Action::ResetApiState => self.polls.clear(),
            _ => {}
        }
    }
}
