//! Handles returned by `initiate`.

use tokio::sync::watch;

use crate::cache::{
    Action, Data, FetchDirection, MutationKey, QueryCacheKey, QueryRequest, QueryStatus, RequestId,
    Settlement, SubscriptionOptions,
};
use crate::error::QueryError;

use super::Api;
use super::selectors::{MutationResult, QueryResult};

type SettledReceiver = watch::Receiver<Option<Settlement>>;

/// Wait for a request to settle. A closed channel means the request task
/// went away; callers fall back to cache state.
async fn settled(receiver: &Option<SettledReceiver>) -> Option<Settlement> {
    let mut receiver = receiver.clone()?;
    let settlement = receiver.wait_for(Option::is_some).await.ok()?;
    settlement.clone()
}

/// A started (or joined) query.
#[derive(Clone)]
pub struct QueryHandle {
    api: Api,
    endpoint_name: String,
    arg: Data,
    request_id: RequestId,
    cache_key: QueryCacheKey,
    subscribed: bool,
    settled: Option<SettledReceiver>,
}

impl QueryHandle {
    pub(crate) fn new(api: Api, request: &QueryRequest, settled: Option<SettledReceiver>) -> Self {
        Self {
            api,
            endpoint_name: request.endpoint_name.clone(),
            arg: request.original_args.clone(),
            request_id: request.request_id,
            cache_key: request.cache_key.clone(),
            subscribed: request.subscribe,
            settled,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn cache_key(&self) -> &QueryCacheKey {
        &self.cache_key
    }

    pub fn arg(&self) -> &Data {
        &self.arg
    }

    /// The entry once the request this handle follows has settled.
    pub async fn result(&self) -> QueryResult {
        settled(&self.settled).await;
        self.api.select_key(&self.endpoint_name, &self.cache_key)
    }

    /// The settled data, or the error the request was rejected with.
    ///
    /// Joined requests resolve with the in-flight request's outcome.
    pub async fn unwrap(&self) -> Result<Data, QueryError> {
        if let Some(settlement) = settled(&self.settled).await {
            return match settlement {
                Settlement::Fulfilled { data, .. } => Ok(data),
                Settlement::Rejected(rejection) => Err(QueryError::from(&rejection)),
            };
        }
        let entry = self
            .api
            .engine
            .store
            .with_state(|state| state.query(&self.cache_key).cloned());
        match entry {
            Some(entry) if entry.status == QueryStatus::Fulfilled => {
                entry.data.clone().ok_or_else(|| self.uninitialized())
            }
            Some(entry) if entry.status == QueryStatus::Rejected => match entry.error.clone() {
                Some(error) => Err(QueryError::from_error_data(error)),
                None => Err(self.uninitialized()),
            },
            // Cached data stays readable while a refetch runs.
            Some(entry) => entry.data.clone().ok_or_else(|| self.uninitialized()),
            None => Err(self.uninitialized()),
        }
    }

    fn uninitialized(&self) -> QueryError {
        QueryError::Uninitialized(self.cache_key.to_string())
    }

    /// Drop this handle's subscription. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if !self.subscribed {
            return;
        }
        self.api.engine.dispatch(Action::UnsubscribeQueryResult {
            cache_key: self.cache_key.clone(),
            subscriber: self.request_id,
        });
    }

    /// Abort the request if it is still this handle's own.
    pub fn abort(&self) {
        if let Some(running) = self.api.engine.running_queries.get(&self.cache_key) {
            if running.request_id == self.request_id {
                running.token.cancel();
            }
        }
    }

    /// Force a new request for the same key.
    pub fn refetch(&self) -> QueryHandle {
        let request = QueryRequest::refetch(&self.endpoint_name, &self.cache_key, &self.arg);
        self.api.initiate_request(request)
    }

    pub fn update_subscription_options(&self, options: SubscriptionOptions) {
        if !self.subscribed {
            return;
        }
        self.api.engine.dispatch(Action::UpdateSubscriptionOptions {
            cache_key: self.cache_key.clone(),
            subscriber: self.request_id,
            options,
        });
    }

    /// Infinite queries: append the page after the last cached one.
    pub fn fetch_next_page(&self) -> QueryHandle {
        self.fetch_page(FetchDirection::Forward)
    }

    /// Infinite queries: prepend the page before the first cached one.
    pub fn fetch_previous_page(&self) -> QueryHandle {
        self.fetch_page(FetchDirection::Backward)
    }

    fn fetch_page(&self, direction: FetchDirection) -> QueryHandle {
        let mut request =
            QueryRequest::new(&self.endpoint_name, self.cache_key.clone(), self.arg.clone());
        request.subscribe = false;
        request.direction = Some(direction);
        self.api.initiate_request(request)
    }
}

impl std::fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("request_id", &self.request_id)
            .field("cache_key", &self.cache_key)
            .field("subscribed", &self.subscribed)
            .finish_non_exhaustive()
    }
}

/// A started mutation.
#[derive(Clone)]
pub struct MutationHandle {
    api: Api,
    request_id: RequestId,
    key: MutationKey,
    settled: Option<SettledReceiver>,
}

impl MutationHandle {
    pub(crate) fn new(
        api: Api,
        request_id: RequestId,
        key: MutationKey,
        settled: Option<SettledReceiver>,
    ) -> Self {
        Self {
            api,
            request_id,
            key,
            settled,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn key(&self) -> &MutationKey {
        &self.key
    }

    /// Wait for the mutation and return its outcome.
    ///
    /// Untracked mutations never enter the cache; their outcome comes from
    /// the request itself.
    pub async fn result(&self) -> Option<Settlement> {
        settled(&self.settled).await
    }

    /// The mutation's tracked entry as it is now.
    pub fn state(&self) -> MutationResult {
        self.api.select_mutation(&self.key)
    }

    pub async fn unwrap(&self) -> Result<Data, QueryError> {
        match self.result().await {
            Some(Settlement::Fulfilled { data, .. }) => Ok(data),
            Some(Settlement::Rejected(rejection)) => Err(QueryError::from(&rejection)),
            None => Err(QueryError::Uninitialized(self.key.to_string())),
        }
    }

    /// Remove the mutation's entry from the cache.
    pub fn reset(&self) {
        self.api.engine.dispatch(Action::RemoveMutationResult {
            key: self.key.clone(),
        });
    }

    pub fn abort(&self) {
        if let Some(running) = self.api.engine.running_mutations.get(&self.request_id) {
            running.token.cancel();
        }
    }
}

impl std::fmt::Debug for MutationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationHandle")
            .field("request_id", &self.request_id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
