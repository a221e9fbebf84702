//! Read-side views of cache entries.

use std::sync::{Arc, Mutex};

use crate::cache::lock::mutex_lock;
use crate::cache::{
    Data, MutationSubState, QueryCacheKey, QueryStatus, QuerySubState, RequestId,
};
use crate::endpoints::{EndpointDefinition, InfiniteData};

use super::Api;

/// A query entry with derived status flags.
///
/// Missing entries read as uninitialized.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub status: QueryStatus,
    pub endpoint_name: String,
    pub cache_key: QueryCacheKey,
    pub original_args: Option<Data>,
    pub request_id: Option<RequestId>,
    pub data: Option<Data>,
    pub error: Option<Data>,
    pub started_time_stamp: Option<i64>,
    pub fulfilled_time_stamp: Option<i64>,
    pub is_uninitialized: bool,
    pub is_loading: bool,
    pub is_success: bool,
    pub is_error: bool,
    /// Marked stale by invalidation while nobody was subscribed.
    pub is_invalidated: bool,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl QueryResult {
    pub(crate) fn from_entry(
        cache_key: &QueryCacheKey,
        endpoint_name: &str,
        entry: Option<&QuerySubState>,
        definition: Option<&EndpointDefinition>,
    ) -> Self {
        let status = entry.map_or(QueryStatus::Uninitialized, |entry| entry.status);
        let (has_next_page, has_previous_page) = entry
            .zip(definition.and_then(EndpointDefinition::infinite_config))
            .and_then(|(entry, config)| {
                let pages = InfiniteData::from_data(entry.data.as_ref()?)?;
                Some((
                    config.next_page_param(&pages, &entry.original_args).is_some(),
                    config.previous_page_param(&pages, &entry.original_args).is_some(),
                ))
            })
            .unwrap_or((false, false));

        Self {
            status,
            endpoint_name: endpoint_name.to_string(),
            cache_key: cache_key.clone(),
            original_args: entry.map(|entry| entry.original_args.clone()),
            request_id: entry.map(|entry| entry.request_id),
            data: entry.and_then(|entry| entry.data.clone()),
            error: entry.and_then(|entry| entry.error.clone()),
            started_time_stamp: entry.and_then(|entry| entry.started_time_stamp),
            fulfilled_time_stamp: entry.and_then(|entry| entry.fulfilled_time_stamp),
            is_uninitialized: status == QueryStatus::Uninitialized,
            is_loading: status == QueryStatus::Pending,
            is_success: status == QueryStatus::Fulfilled,
            is_error: status == QueryStatus::Rejected,
            is_invalidated: entry.is_some_and(|entry| entry.invalidated),
            has_next_page,
            has_previous_page,
        }
    }
}

/// A mutation entry with derived status flags.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult {
    pub status: QueryStatus,
    pub data: Option<Data>,
    pub error: Option<Data>,
    pub started_time_stamp: Option<i64>,
    pub fulfilled_time_stamp: Option<i64>,
    pub is_uninitialized: bool,
    pub is_loading: bool,
    pub is_success: bool,
    pub is_error: bool,
}

impl MutationResult {
    pub(crate) fn from_entry(entry: Option<&MutationSubState>) -> Self {
        let status = entry.map_or(QueryStatus::Uninitialized, |entry| entry.status);
        Self {
            status,
            data: entry.and_then(|entry| entry.data.clone()),
            error: entry.and_then(|entry| entry.error.clone()),
            started_time_stamp: entry.and_then(|entry| entry.started_time_stamp),
            fulfilled_time_stamp: entry.and_then(|entry| entry.fulfilled_time_stamp),
            is_uninitialized: status == QueryStatus::Uninitialized,
            is_loading: status == QueryStatus::Pending,
            is_success: status == QueryStatus::Fulfilled,
            is_error: status == QueryStatus::Rejected,
        }
    }
}

/// An entry affected by a set of tags.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidatedEntry {
    pub endpoint_name: String,
    pub original_args: Data,
    pub query_cache_key: QueryCacheKey,
}

struct Memo {
    entry: Option<Arc<QuerySubState>>,
    result: Arc<QueryResult>,
}

/// Memoized selector for one endpoint and argument.
///
/// Returns the same `Arc` until the entry itself changes, so callers can
/// compare results with [`Arc::ptr_eq`].
pub struct QuerySelector {
    api: Api,
    endpoint_name: String,
    cache_key: QueryCacheKey,
    definition: Option<Arc<EndpointDefinition>>,
    // Holding the entry keeps copy-on-write from reusing its allocation.
    memo: Mutex<Option<Memo>>,
}

impl QuerySelector {
    pub(crate) fn new(
        api: Api,
        endpoint_name: &str,
        cache_key: QueryCacheKey,
        definition: Option<Arc<EndpointDefinition>>,
    ) -> Self {
        Self {
            api,
            endpoint_name: endpoint_name.to_string(),
            cache_key,
            definition,
            memo: Mutex::new(None),
        }
    }

    pub fn cache_key(&self) -> &QueryCacheKey {
        &self.cache_key
    }

    pub fn select(&self) -> Arc<QueryResult> {
        let entry = self
            .api
            .engine
            .store
            .with_state(|state| state.query(&self.cache_key).cloned());

        let mut memo = mutex_lock(&self.memo, "selector", "select");
        if let Some(previous) = memo.as_ref() {
            let unchanged = match (&previous.entry, &entry) {
                (Some(previous), Some(current)) => Arc::ptr_eq(previous, current),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                return Arc::clone(&previous.result);
            }
        }

        let result = Arc::new(QueryResult::from_entry(
            &self.cache_key,
            &self.endpoint_name,
            entry.as_deref(),
            self.definition.as_deref(),
        ));
        *memo = Some(Memo {
            entry,
            result: Arc::clone(&result),
        });
        result
    }
}
