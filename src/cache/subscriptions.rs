//! Subscription tracking.
//!
//! Reference-counts consumers per cache key. Each subscriber keeps its own
//! options; background refetch behavior for a key follows the union of them.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::keys::{QueryCacheKey, RequestId};

/// Per-subscriber options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    /// Refetch on this interval while subscribed. `None` or zero disables.
    pub polling_interval: Option<Duration>,
    pub skip_polling_if_unfocused: bool,
    /// `None` defers to the API-wide setting.
    pub refetch_on_reconnect: Option<bool>,
    /// `None` defers to the API-wide setting.
    pub refetch_on_focus: Option<bool>,
}

impl SubscriptionOptions {
    pub fn polling(interval: Duration) -> Self {
        Self {
            polling_interval: Some(interval),
            ..Self::default()
        }
    }

    pub fn skip_polling_if_unfocused(mut self, skip: bool) -> Self {
        self.skip_polling_if_unfocused = skip;
        self
    }

    pub fn refetch_on_focus(mut self, refetch: bool) -> Self {
        self.refetch_on_focus = Some(refetch);
        self
    }

    pub fn refetch_on_reconnect(mut self, refetch: bool) -> Self {
        self.refetch_on_reconnect = Some(refetch);
        self
    }
}

/// Environment events that can trigger a refetch of subscribed entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefetchTrigger {
    Focus,
    Reconnect,
}

/// Polling parameters derived from every subscriber of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollingPlan {
    /// Lowest positive interval across subscribers.
    pub interval: Option<Duration>,
    /// True if any subscriber asked to skip polling while unfocused.
    pub skip_if_unfocused: bool,
}

/// Subscriber sets keyed by cache key.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionState {
    by_key: HashMap<QueryCacheKey, HashMap<RequestId, SubscriptionOptions>>,
}

impl SubscriptionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a subscriber. Returns true if it was new.
    pub fn subscribe(
        &mut self,
        cache_key: &QueryCacheKey,
        subscriber: RequestId,
        options: SubscriptionOptions,
    ) -> bool {
        self.by_key
            .entry(cache_key.clone())
            .or_default()
            .insert(subscriber, options)
            .is_none()
    }

    /// Remove a subscriber. Returns true if it was present.
    pub fn unsubscribe(&mut self, cache_key: &QueryCacheKey, subscriber: RequestId) -> bool {
        let Some(subscribers) = self.by_key.get_mut(cache_key) else {
            return false;
        };
        let removed = subscribers.remove(&subscriber).is_some();
        if subscribers.is_empty() {
            self.by_key.remove(cache_key);
        }
        removed
    }

    /// Replace the options of an existing subscriber.
    pub fn update(
        &mut self,
        cache_key: &QueryCacheKey,
        subscriber: RequestId,
        options: SubscriptionOptions,
    ) -> bool {
        match self
            .by_key
            .get_mut(cache_key)
            .and_then(|subscribers| subscribers.get_mut(&subscriber))
        {
            Some(current) => {
                *current = options;
                true
            }
            None => false,
        }
    }

    pub fn count(&self, cache_key: &QueryCacheKey) -> usize {
        self.by_key.get(cache_key).map_or(0, HashMap::len)
    }

    pub fn has_subscribers(&self, cache_key: &QueryCacheKey) -> bool {
        self.count(cache_key) > 0
    }

    pub fn is_subscribed(&self, cache_key: &QueryCacheKey, subscriber: RequestId) -> bool {
        self.by_key
            .get(cache_key)
            .is_some_and(|subscribers| subscribers.contains_key(&subscriber))
    }

    /// Drop every subscriber of `cache_key`.
    pub fn remove_key(&mut self, cache_key: &QueryCacheKey) {
        self.by_key.remove(cache_key);
    }

    pub fn clear(&mut self) {
        self.by_key.clear();
    }

    /// Keys with at least one subscriber.
    pub fn subscribed_keys(&self) -> impl Iterator<Item = &QueryCacheKey> {
        self.by_key.keys()
    }

    /// Total subscribers across all keys.
    pub fn total(&self) -> usize {
        self.by_key.values().map(HashMap::len).sum()
    }

    /// Union of polling options for `cache_key`.
    pub fn polling_plan(&self, cache_key: &QueryCacheKey) -> PollingPlan {
        let mut plan = PollingPlan::default();
        let Some(subscribers) = self.by_key.get(cache_key) else {
            return plan;
        };
        for options in subscribers.values() {
            if let Some(interval) = options.polling_interval.filter(|i| !i.is_zero()) {
                plan.interval = Some(plan.interval.map_or(interval, |current| current.min(interval)));
            }
            plan.skip_if_unfocused |= options.skip_polling_if_unfocused;
        }
        plan
    }

    /// Whether a focus/reconnect event should refetch `cache_key`.
    ///
    /// Any subscriber opting in wins; if every subscriber left the option
    /// unset the API-wide default applies.
    pub fn wants_refetch(
        &self,
        cache_key: &QueryCacheKey,
        trigger: RefetchTrigger,
        api_default: bool,
    ) -> bool {
        let Some(subscribers) = self.by_key.get(cache_key) else {
            return false;
        };
        let choice = |options: &SubscriptionOptions| match trigger {
            RefetchTrigger::Focus => options.refetch_on_focus,
            RefetchTrigger::Reconnect => options.refetch_on_reconnect,
        };
        subscribers.values().any(|options| choice(options) == Some(true))
            || (subscribers.values().all(|options| choice(options).is_none()) && api_default)
    }
}
