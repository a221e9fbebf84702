//! Cache actions.
//!
//! Every state transition, whether requested by a consumer, produced by a
//! finished request, or fired by a timer, is an [`Action`] dispatched through
//! the same entry point.

use super::config::RefetchPolicy;
use super::keys::{MutationKey, QueryCacheKey, RequestId};
use super::patch::Patch;
use super::state::{FetchDirection, PersistedState};
use super::subscriptions::SubscriptionOptions;
use super::tags::TagDescription;
use super::value::Data;

/// Monotonic sequence number assigned to each reduced action.
pub type Epoch = u64;

/// An initiated query, carried through its whole lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub endpoint_name: String,
    pub cache_key: QueryCacheKey,
    pub original_args: Data,
    pub request_id: RequestId,
    /// Register `request_id` as a subscriber of `cache_key`.
    pub subscribe: bool,
    pub subscription_options: SubscriptionOptions,
    /// Explicit override; `None` defers to `refetch_on_mount_or_arg_change`
    /// for subscribing requests.
    pub force_refetch: Option<RefetchPolicy>,
    pub is_prefetch: bool,
    pub direction: Option<FetchDirection>,
    pub initial_page_param: Option<Data>,
    /// Write this value as the result without calling the base query.
    pub upsert_data: Option<Data>,
}

impl QueryRequest {
    pub fn new(endpoint_name: &str, cache_key: QueryCacheKey, original_args: Data) -> Self {
        Self {
            endpoint_name: endpoint_name.to_string(),
            cache_key,
            original_args,
            request_id: RequestId::new(),
            subscribe: true,
            subscription_options: SubscriptionOptions::default(),
            force_refetch: None,
            is_prefetch: false,
            direction: None,
            initial_page_param: None,
            upsert_data: None,
        }
    }

    /// A non-subscribing forced request for the same key, as issued by
    /// invalidation, polling and focus/reconnect.
    pub fn refetch(endpoint_name: &str, cache_key: &QueryCacheKey, original_args: &Data) -> Self {
        Self {
            subscribe: false,
            force_refetch: Some(RefetchPolicy::Always),
            ..Self::new(endpoint_name, cache_key.clone(), original_args.clone())
        }
    }

    pub fn is_upsert(&self) -> bool {
        self.upsert_data.is_some()
    }
}

/// An initiated mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub endpoint_name: String,
    pub original_args: Data,
    pub request_id: RequestId,
    /// Untracked mutations never enter the cache state.
    pub track: bool,
    pub fixed_cache_key: Option<String>,
}

impl MutationRequest {
    pub fn key(&self) -> MutationKey {
        match &self.fixed_cache_key {
            Some(fixed) => MutationKey::fixed(fixed.clone()),
            None => MutationKey::from(self.request_id),
        }
    }
}

/// Why a request was rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub error: Data,
    pub meta: Option<Data>,
    /// A handled error returned by the transport, as opposed to a failure.
    pub rejected_with_value: bool,
    pub aborted: bool,
}

/// Final outcome of a request, as handed to everyone waiting on it.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Fulfilled { data: Data, meta: Option<Data> },
    Rejected(Rejection),
}

impl Settlement {
    /// The settlement carried by a fulfilled or rejected action.
    pub fn from_action(action: &Action) -> Option<Self> {
        match action {
            Action::QueryFulfilled { data, meta, .. } | Action::MutationFulfilled { data, meta, .. } => {
                Some(Settlement::Fulfilled {
                    data: data.clone(),
                    meta: meta.clone(),
                })
            }
            Action::QueryRejected { rejection, .. } | Action::MutationRejected { rejection, .. } => {
                Some(Settlement::Rejected(rejection.clone()))
            }
            _ => None,
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Settlement::Fulfilled { .. })
    }
}

/// A fulfilled entry written directly, bypassing the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertEntry {
    pub endpoint_name: String,
    pub cache_key: QueryCacheKey,
    pub original_args: Data,
    pub data: Data,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    // Query lifecycle
    QueryRequested(QueryRequest),
    QueryPending {
        request: QueryRequest,
        started_time_stamp: i64,
    },
    QueryFulfilled {
        request: QueryRequest,
        data: Data,
        meta: Option<Data>,
        fulfilled_time_stamp: i64,
    },
    QueryRejected {
        request: QueryRequest,
        rejection: Rejection,
    },

    // Mutation lifecycle
    MutationRequested(MutationRequest),
    MutationPending {
        request: MutationRequest,
        started_time_stamp: i64,
    },
    MutationFulfilled {
        request: MutationRequest,
        data: Data,
        meta: Option<Data>,
        fulfilled_time_stamp: i64,
    },
    MutationRejected {
        request: MutationRequest,
        rejection: Rejection,
    },

    // Subscriptions
    UnsubscribeQueryResult {
        cache_key: QueryCacheKey,
        subscriber: RequestId,
    },
    UpdateSubscriptionOptions {
        cache_key: QueryCacheKey,
        subscriber: RequestId,
        options: SubscriptionOptions,
    },

    // Cache maintenance
    RemoveQueryResult {
        cache_key: QueryCacheKey,
    },
    RemoveMutationResult {
        key: MutationKey,
    },
    QueryResultPatched {
        cache_key: QueryCacheKey,
        patches: Vec<Patch>,
        /// Recompute provided tags from the patched value.
        update_provided: bool,
    },
    CacheEntriesUpserted {
        entries: Vec<UpsertEntry>,
        request_id: RequestId,
        time_stamp: i64,
    },
    InvalidateTags(Vec<TagDescription>),
    QueriesMarkedStale {
        cache_keys: Vec<QueryCacheKey>,
    },
    ResetApiState,
    Rehydrate(PersistedState),

    // Environment
    FocusChanged {
        focused: bool,
    },
    ConnectivityChanged {
        online: bool,
    },

    // Timers
    RemovalTimerElapsed {
        cache_key: QueryCacheKey,
        generation: u64,
    },
    PollTimerElapsed {
        cache_key: QueryCacheKey,
        generation: u64,
    },
}

impl Action {
    /// Stable name for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Action::QueryRequested(_) => "query/requested",
            Action::QueryPending { .. } => "query/pending",
            Action::QueryFulfilled { .. } => "query/fulfilled",
            Action::QueryRejected { .. } => "query/rejected",
            Action::MutationRequested(_) => "mutation/requested",
            Action::MutationPending { .. } => "mutation/pending",
            Action::MutationFulfilled { .. } => "mutation/fulfilled",
            Action::MutationRejected { .. } => "mutation/rejected",
            Action::UnsubscribeQueryResult { .. } => "subscriptions/unsubscribe",
            Action::UpdateSubscriptionOptions { .. } => "subscriptions/update",
            Action::RemoveQueryResult { .. } => "queries/remove",
            Action::RemoveMutationResult { .. } => "mutations/remove",
            Action::QueryResultPatched { .. } => "queries/patched",
            Action::CacheEntriesUpserted { .. } => "queries/upserted",
            Action::InvalidateTags(_) => "tags/invalidate",
            Action::QueriesMarkedStale { .. } => "queries/marked-stale",
            Action::ResetApiState => "api/reset",
            Action::Rehydrate(_) => "api/rehydrate",
            Action::FocusChanged { .. } => "config/focus",
            Action::ConnectivityChanged { .. } => "config/connectivity",
            Action::RemovalTimerElapsed { .. } => "timers/removal",
            Action::PollTimerElapsed { .. } => "timers/poll",
        }
    }

    /// The query key this action is about, if it targets a single one.
    pub fn cache_key(&self) -> Option<&QueryCacheKey> {
        match self {
            Action::QueryRequested(request)
            | Action::QueryPending { request, .. }
            | Action::QueryFulfilled { request, .. }
            | Action::QueryRejected { request, .. } => Some(&request.cache_key),
            Action::UnsubscribeQueryResult { cache_key, .. }
            | Action::UpdateSubscriptionOptions { cache_key, .. }
            | Action::RemoveQueryResult { cache_key }
            | Action::QueryResultPatched { cache_key, .. }
            | Action::RemovalTimerElapsed { cache_key, .. }
            | Action::PollTimerElapsed { cache_key, .. } => Some(cache_key),
            _ => None,
        }
    }

    /// True for the actions that end a query or mutation.
    pub fn is_settlement(&self) -> bool {
        matches!(
            self,
            Action::QueryFulfilled { .. }
                | Action::QueryRejected { .. }
                | Action::MutationFulfilled { .. }
                | Action::MutationRejected { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refetch_requests_are_forced_and_unsubscribed() {
        let key = QueryCacheKey::from("getPost(1)");
        let request = QueryRequest::refetch("getPost", &key, &Data::from(1));
        assert!(!request.subscribe);
        assert_eq!(request.force_refetch, Some(RefetchPolicy::Always));
        assert_eq!(request.cache_key, key);
    }

    #[test]
    fn mutation_key_prefers_fixed_cache_key() {
        let request = MutationRequest {
            endpoint_name: "addPost".to_string(),
            original_args: Data::Null,
            request_id: RequestId::new(),
            track: true,
            fixed_cache_key: Some("shared".to_string()),
        };
        assert_eq!(request.key(), MutationKey::fixed("shared"));

        let unkeyed = MutationRequest {
            fixed_cache_key: None,
            ..request.clone()
        };
        assert_eq!(unkeyed.key(), MutationKey::from(request.request_id));
    }

    #[test]
    fn settlement_actions_are_classified() {
        let key = QueryCacheKey::from("getPost(1)");
        assert!(!Action::RemoveQueryResult { cache_key: key.clone() }.is_settlement());
        let request = QueryRequest::new("getPost", key.clone(), Data::from(1));
        let fulfilled = Action::QueryFulfilled {
            request,
            data: Data::Null,
            meta: None,
            fulfilled_time_stamp: 0,
        };
        assert!(fulfilled.is_settlement());
        assert_eq!(fulfilled.cache_key(), Some(&key));
        assert_eq!(fulfilled.name(), "query/fulfilled");
    }
}
