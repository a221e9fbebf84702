//! Cache state.
//!
//! `ApiState` is the single canonical tree: query entries, mutation entries,
//! the provided-tag index, subscriber sets and runtime configuration. Only
//! the reducer writes to it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::config::ApiConfig;
use super::keys::{MutationKey, QueryCacheKey, RequestId};
use super::registry::ProvidedIndex;
use super::subscriptions::SubscriptionState;
use super::tags::Tag;
use super::value::Data;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(nanos).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Uninitialized,
    Pending,
    Fulfilled,
    Rejected,
}

impl QueryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryStatus::Uninitialized => "uninitialized",
            QueryStatus::Pending => "pending",
            QueryStatus::Fulfilled => "fulfilled",
            QueryStatus::Rejected => "rejected",
        }
    }

    /// Settled entries are the only ones restored from persisted state.
    pub fn is_settled(self) -> bool {
        matches!(self, QueryStatus::Fulfilled | QueryStatus::Rejected)
    }
}

/// Page direction of an infinite query fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchDirection {
    Forward,
    Backward,
}

/// One cached query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySubState {
    pub status: QueryStatus,
    pub endpoint_name: String,
    pub original_args: Data,
    /// The request whose response is authoritative for this entry.
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_time_stamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfilled_time_stamp: Option<i64>,
    /// Set when invalidated without subscribers; the next request refetches.
    #[serde(default)]
    pub invalidated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<FetchDirection>,
}

impl QuerySubState {
    pub(crate) fn new(endpoint_name: &str, original_args: Data, request_id: RequestId) -> Self {
        Self {
            status: QueryStatus::Uninitialized,
            endpoint_name: endpoint_name.to_string(),
            original_args,
            request_id,
            data: None,
            error: None,
            started_time_stamp: None,
            fulfilled_time_stamp: None,
            invalidated: false,
            direction: None,
        }
    }
}

/// One tracked mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationSubState {
    pub status: QueryStatus,
    pub endpoint_name: String,
    pub original_args: Data,
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_cache_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_time_stamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfilled_time_stamp: Option<i64>,
}

/// Runtime configuration plus environment flags.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigState {
    pub settings: ApiConfig,
    pub online: bool,
    pub focused: bool,
}

impl ConfigState {
    pub fn new(settings: ApiConfig) -> Self {
        Self {
            settings,
            online: true,
            focused: true,
        }
    }
}

/// The whole cache for one API instance.
#[derive(Debug, Clone)]
pub struct ApiState {
    pub queries: HashMap<QueryCacheKey, Arc<QuerySubState>>,
    pub mutations: HashMap<MutationKey, Arc<MutationSubState>>,
    pub provided: ProvidedIndex,
    pub subscriptions: SubscriptionState,
    pub config: ConfigState,
}

impl ApiState {
    pub fn new(settings: ApiConfig) -> Self {
        Self {
            queries: HashMap::new(),
            mutations: HashMap::new(),
            provided: ProvidedIndex::new(),
            subscriptions: SubscriptionState::new(),
            config: ConfigState::new(settings),
        }
    }

    pub fn query(&self, cache_key: &QueryCacheKey) -> Option<&Arc<QuerySubState>> {
        self.queries.get(cache_key)
    }

    pub fn mutation(&self, key: &MutationKey) -> Option<&Arc<MutationSubState>> {
        self.mutations.get(key)
    }

    /// True while any query or mutation is in flight.
    pub fn has_pending_requests(&self) -> bool {
        self.queries
            .values()
            .any(|entry| entry.status == QueryStatus::Pending)
            || self
                .mutations
                .values()
                .any(|entry| entry.status == QueryStatus::Pending)
    }

    /// Serializable copy of the cache.
    pub fn extract(&self) -> PersistedState {
        PersistedState {
            queries: self
                .queries
                .iter()
                .map(|(key, entry)| (key.clone(), QuerySubState::clone(entry)))
                .collect(),
            mutations: self
                .mutations
                .iter()
                .map(|(key, entry)| (key.clone(), MutationSubState::clone(entry)))
                .collect(),
            provided: self.provided.snapshot(),
        }
    }
}

/// Persisted cache shape: the entry maps plus provided tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub queries: BTreeMap<QueryCacheKey, QuerySubState>,
    #[serde(default)]
    pub mutations: BTreeMap<MutationKey, MutationSubState>,
    #[serde(default)]
    pub provided: BTreeMap<QueryCacheKey, Vec<Tag>>,
}
