//! Public API.
//!
//! [`Api`] is a cheap, cloneable handle to one cache instance. Every operation
//! turns into actions dispatched through the engine, so reads made right after
//! a call already observe its synchronous effects.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::info;

use crate::base_query::BaseQuery;
use crate::cache::patch::diff;
use crate::cache::{
    Action, ApiConfig, ApiState, Data, Epoch, MutationKey, MutationRequest, Patch, PersistedState,
    QueryCacheKey, QueryRequest, QueryStatus, RequestId, SerializedArgs, Settlement,
    TagDescription, UpsertEntry, now_millis,
};
use crate::config::ApiSettings;
use crate::endpoints::{
    EndpointDefinition, EndpointKind, EndpointRegistry, OverrideExisting, SchemaFailure,
};
use crate::engine::{Engine, EngineOptions};
use crate::error::ApiError;

mod handles;
mod listeners;
mod options;
mod patches;
mod selectors;

pub use handles::{MutationHandle, QueryHandle};
pub use listeners::{EnvironmentEvent, setup_listeners};
pub use options::{MutationOptions, PrefetchOptions, QueryOptions, UpsertQuery};
pub use patches::PatchCollection;
pub use selectors::{InvalidatedEntry, MutationResult, QueryResult, QuerySelector};

/// Builder for [`Api`].
pub struct ApiBuilder {
    base_query: Arc<dyn BaseQuery>,
    config: ApiConfig,
    endpoints: Vec<EndpointDefinition>,
    options: EngineOptions,
}

impl ApiBuilder {
    pub fn config(mut self, config: ApiConfig) -> Self {
        self.config = config;
        self
    }

    /// Take cache behavior from loaded settings.
    pub fn settings(mut self, settings: &ApiSettings) -> Self {
        self.config = ApiConfig::from(settings);
        self
    }

    pub fn endpoint(mut self, definition: EndpointDefinition) -> Self {
        self.endpoints.push(definition);
        self
    }

    pub fn endpoints(mut self, definitions: impl IntoIterator<Item = EndpointDefinition>) -> Self {
        self.endpoints.extend(definitions);
        self
    }

    /// Value handed to every base query as `BaseQueryApi::extra`.
    pub fn extra(mut self, extra: impl Into<Data>) -> Self {
        self.options.extra = extra.into();
        self
    }

    /// Observe every response that fails endpoint validation.
    pub fn on_schema_failure<F>(mut self, f: F) -> Self
    where
        F: Fn(&SchemaFailure) + Send + Sync + 'static,
    {
        self.options.on_schema_failure = Some(Arc::new(f));
        self
    }

    /// Turn validation failures into handled errors for endpoints that do
    /// not convert them themselves.
    pub fn catch_schema_failure<F>(mut self, f: F) -> Self
    where
        F: Fn(&SchemaFailure) -> Data + Send + Sync + 'static,
    {
        self.options.catch_schema_failure = Some(Arc::new(f));
        self
    }

    /// API-wide cache key serializer; endpoint serializers take precedence.
    pub fn serialize_query_args<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &Data) -> SerializedArgs + Send + Sync + 'static,
    {
        self.options.serialize_query_args = Some(Arc::new(f));
        self
    }

    /// Must be called inside a Tokio runtime; timers and requests run on it.
    pub fn build(self) -> Result<Api, ApiError> {
        let registry = EndpointRegistry::new().extend(self.endpoints, OverrideExisting::Throw)?;
        let endpoints = registry.len();
        let engine = Engine::new(self.config, registry, self.base_query, self.options)?;
        info!(endpoints, "Api built");
        Ok(Api { engine })
    }
}

/// Handle to one cache instance.
#[derive(Clone)]
pub struct Api {
    pub(crate) engine: Arc<Engine>,
}

impl Api {
    pub fn builder(base_query: impl BaseQuery) -> ApiBuilder {
        ApiBuilder {
            base_query: Arc::new(base_query),
            config: ApiConfig::default(),
            endpoints: Vec::new(),
            options: EngineOptions::default(),
        }
    }

    pub(crate) fn from_engine(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn extra(&self) -> Data {
        self.engine.options.extra.clone()
    }

    /// Add endpoints after the API was built.
    pub fn inject_endpoints(
        &self,
        definitions: impl IntoIterator<Item = EndpointDefinition>,
        override_existing: OverrideExisting,
    ) -> Result<(), ApiError> {
        self.engine.inject(definitions, override_existing)
    }

    fn definition(
        &self,
        endpoint_name: &str,
        expected: EndpointKind,
        accepts: impl Fn(EndpointKind) -> bool,
    ) -> Result<Arc<EndpointDefinition>, ApiError> {
        let endpoints = self.engine.endpoints();
        endpoints
            .require(endpoint_name, accepts, expected)
            .map(Arc::clone)
    }

    fn query_definition(&self, endpoint_name: &str) -> Result<Arc<EndpointDefinition>, ApiError> {
        self.definition(endpoint_name, EndpointKind::Query, EndpointKind::is_query_like)
    }

    /// Cache key `arg` maps to under `endpoint_name`.
    pub fn cache_key(&self, endpoint_name: &str, arg: impl Into<Data>) -> Result<QueryCacheKey, ApiError> {
        let definition = self.query_definition(endpoint_name)?;
        Ok(self.engine.cache_key(&definition, &arg.into()))
    }

    /// Start (or join) a query.
    pub fn initiate(
        &self,
        endpoint_name: &str,
        arg: impl Into<Data>,
        options: QueryOptions,
    ) -> Result<QueryHandle, ApiError> {
        let definition =
            self.definition(endpoint_name, EndpointKind::Query, |kind| kind == EndpointKind::Query)?;
        Ok(self.initiate_with(&definition, arg.into(), options))
    }

    /// Start (or join) an infinite query. Pages are fetched through the
    /// returned handle.
    pub fn initiate_infinite(
        &self,
        endpoint_name: &str,
        arg: impl Into<Data>,
        options: QueryOptions,
    ) -> Result<QueryHandle, ApiError> {
        let definition = self.definition(endpoint_name, EndpointKind::InfiniteQuery, |kind| {
            kind == EndpointKind::InfiniteQuery
        })?;
        Ok(self.initiate_with(&definition, arg.into(), options))
    }

    fn initiate_with(
        &self,
        definition: &EndpointDefinition,
        arg: Data,
        options: QueryOptions,
    ) -> QueryHandle {
        let cache_key = self.engine.cache_key(definition, &arg);
        let mut request = QueryRequest::new(definition.name(), cache_key, arg);
        request.subscribe = options.subscribe;
        request.subscription_options = options.subscription_options;
        request.force_refetch = options.force_refetch;
        request.initial_page_param = options.initial_page_param;
        self.initiate_request(request)
    }

    pub(crate) fn initiate_request(&self, request: QueryRequest) -> QueryHandle {
        let cache_key = request.cache_key.clone();
        let (_, settled) = self
            .engine
            .dispatch_then(Action::QueryRequested(request.clone()), |engine| {
                engine
                    .running_queries
                    .get(&cache_key)
                    .map(|running| running.settled.clone())
            });
        QueryHandle::new(self.clone(), &request, settled)
    }

    pub fn initiate_mutation(
        &self,
        endpoint_name: &str,
        arg: impl Into<Data>,
        options: MutationOptions,
    ) -> Result<MutationHandle, ApiError> {
        let definition = self.definition(endpoint_name, EndpointKind::Mutation, |kind| {
            kind == EndpointKind::Mutation
        })?;
        let request = MutationRequest {
            endpoint_name: definition.name().to_string(),
            original_args: arg.into(),
            request_id: RequestId::new(),
            track: options.track,
            fixed_cache_key: options.fixed_cache_key,
        };
        let (request_id, key) = (request.request_id, request.key());
        let (_, settled) = self
            .engine
            .dispatch_then(Action::MutationRequested(request), |engine| {
                engine
                    .running_mutations
                    .get(&request_id)
                    .map(|running| running.settled.clone())
            });
        Ok(MutationHandle::new(self.clone(), request_id, key, settled))
    }

    /// Current entry for `endpoint_name` and `arg`.
    pub fn select(&self, endpoint_name: &str, arg: impl Into<Data>) -> Result<QueryResult, ApiError> {
        let definition = self.query_definition(endpoint_name)?;
        let cache_key = self.engine.cache_key(&definition, &arg.into());
        Ok(self.select_key(endpoint_name, &cache_key))
    }

    pub(crate) fn select_key(&self, endpoint_name: &str, cache_key: &QueryCacheKey) -> QueryResult {
        let endpoints = self.engine.endpoints();
        self.engine.store.with_state(|state| {
            QueryResult::from_entry(
                cache_key,
                endpoint_name,
                state.query(cache_key).map(Arc::as_ref),
                endpoints.get(endpoint_name).map(Arc::as_ref),
            )
        })
    }

    /// A memoized selector for one endpoint and argument.
    pub fn selector(&self, endpoint_name: &str, arg: impl Into<Data>) -> Result<QuerySelector, ApiError> {
        let definition = self.query_definition(endpoint_name)?;
        let cache_key = self.engine.cache_key(&definition, &arg.into());
        Ok(QuerySelector::new(
            self.clone(),
            endpoint_name,
            cache_key,
            Some(definition),
        ))
    }

    pub fn select_mutation(&self, key: &MutationKey) -> MutationResult {
        self.engine
            .store
            .with_state(|state| MutationResult::from_entry(state.mutation(key).map(Arc::as_ref)))
    }

    /// Entries that provide any of `tags`.
    pub fn select_invalidated_by(
        &self,
        tags: impl IntoIterator<Item = TagDescription>,
    ) -> Vec<InvalidatedEntry> {
        let tags: Vec<_> = tags.into_iter().map(|tag| tag.expand()).collect();
        self.engine.store.with_state(|state| {
            state
                .provided
                .select_invalidated_by(&tags)
                .into_iter()
                .filter_map(|cache_key| {
                    let entry = state.query(&cache_key)?;
                    Some(InvalidatedEntry {
                        endpoint_name: entry.endpoint_name.clone(),
                        original_args: entry.original_args.clone(),
                        query_cache_key: cache_key,
                    })
                })
                .collect()
        })
    }

    /// Arguments of every initialized entry of `endpoint_name`.
    pub fn select_cached_args_for_query(&self, endpoint_name: &str) -> Vec<Data> {
        self.engine.store.with_state(|state| {
            let mut entries: Vec<_> = state
                .queries
                .iter()
                .filter(|(_, entry)| {
                    entry.endpoint_name == endpoint_name && entry.status != QueryStatus::Uninitialized
                })
                .collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            entries
                .into_iter()
                .map(|(_, entry)| entry.original_args.clone())
                .collect()
        })
    }

    /// Run `f` against the current state.
    pub fn with_state<T>(&self, f: impl FnOnce(&ApiState) -> T) -> T {
        self.engine.store.with_state(f)
    }

    /// Notified with the new epoch after every applied action.
    pub fn state_changes(&self) -> watch::Receiver<Epoch> {
        self.engine.store.changes()
    }

    /// Dispatch a raw action.
    pub fn dispatch(&self, action: Action) {
        self.engine.dispatch(action);
    }

    pub fn invalidate_tags(&self, tags: impl IntoIterator<Item = TagDescription>) {
        self.engine
            .dispatch(Action::InvalidateTags(tags.into_iter().collect()));
    }

    /// Drop every entry, subscription and timer. Focus and connectivity
    /// flags are kept.
    pub fn reset_api_state(&self) {
        self.engine.dispatch(Action::ResetApiState);
    }

    /// Write `value` as the result for `arg`, creating the entry if needed.
    pub fn upsert_query_data(
        &self,
        endpoint_name: &str,
        arg: impl Into<Data>,
        value: impl Into<Data>,
    ) -> Result<QueryHandle, ApiError> {
        let definition = self.query_definition(endpoint_name)?;
        let arg = arg.into();
        let cache_key = self.engine.cache_key(&definition, &arg);
        let mut request = QueryRequest::new(definition.name(), cache_key, arg);
        request.subscribe = false;
        request.upsert_data = Some(value.into());
        Ok(self.initiate_request(request))
    }

    /// Write several fulfilled entries in one action.
    pub fn upsert_query_entries(
        &self,
        entries: impl IntoIterator<Item = UpsertQuery>,
    ) -> Result<(), ApiError> {
        let entries = entries
            .into_iter()
            .map(|entry| {
                let definition = self.query_definition(&entry.endpoint_name)?;
                Ok(UpsertEntry {
                    endpoint_name: definition.name().to_string(),
                    cache_key: self.engine.cache_key(&definition, &entry.arg),
                    original_args: entry.arg,
                    data: entry.value,
                })
            })
            .collect::<Result<Vec<_>, ApiError>>()?;
        self.engine.dispatch(Action::CacheEntriesUpserted {
            entries,
            request_id: RequestId::new(),
            time_stamp: now_millis(),
        });
        Ok(())
    }

    /// Apply `recipe` to the cached value and return the patches it made.
    ///
    /// Entries without data are left alone and yield an empty collection.
    pub fn update_query_data(
        &self,
        endpoint_name: &str,
        arg: impl Into<Data>,
        recipe: impl FnOnce(&mut Data),
    ) -> Result<PatchCollection, ApiError> {
        let definition = self.query_definition(endpoint_name)?;
        let cache_key = self.engine.cache_key(&definition, &arg.into());
        let current = self.engine.store.with_state(|state| {
            state
                .query(&cache_key)
                .filter(|entry| entry.status != QueryStatus::Uninitialized)
                .and_then(|entry| entry.data.clone())
        });
        let Some(current) = current else {
            return Ok(PatchCollection::empty(self.clone(), cache_key));
        };

        let mut draft = current.clone();
        recipe(&mut draft);
        let patches = diff(&current, &draft);
        if patches.is_empty() {
            return Ok(PatchCollection::empty(self.clone(), cache_key));
        }
        let inverse_patches = diff(&draft, &current);
        self.engine.dispatch(Action::QueryResultPatched {
            cache_key: cache_key.clone(),
            patches: patches.clone(),
            update_provided: true,
        });
        Ok(PatchCollection::new(
            self.clone(),
            cache_key,
            patches,
            inverse_patches,
        ))
    }

    /// Apply `patches` to the cached value.
    pub fn patch_query_data(
        &self,
        endpoint_name: &str,
        arg: impl Into<Data>,
        patches: Vec<Patch>,
        update_provided: bool,
    ) -> Result<(), ApiError> {
        let cache_key = self.cache_key(endpoint_name, arg)?;
        self.engine.dispatch(Action::QueryResultPatched {
            cache_key,
            patches,
            update_provided,
        });
        Ok(())
    }

    /// Fetch into the cache without subscribing.
    pub fn prefetch(
        &self,
        endpoint_name: &str,
        arg: impl Into<Data>,
        options: PrefetchOptions,
    ) -> Result<QueryHandle, ApiError> {
        let definition = self.query_definition(endpoint_name)?;
        let arg = arg.into();
        let cache_key = self.engine.cache_key(&definition, &arg);
        let mut request = QueryRequest::new(definition.name(), cache_key, arg);
        request.subscribe = false;
        request.is_prefetch = true;
        request.force_refetch = Some(options.policy());
        Ok(self.initiate_request(request))
    }

    /// Wait for every query and mutation in flight right now.
    pub async fn running_queries(&self) -> Vec<Settlement> {
        let waits = self.engine.running_receivers().into_iter().map(|mut receiver| async move {
            receiver
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|settlement| settlement.clone())
        });
        join_all(waits).await.into_iter().flatten().collect()
    }

    pub fn set_focused(&self, focused: bool) {
        self.engine.dispatch(Action::FocusChanged { focused });
    }

    pub fn set_online(&self, online: bool) {
        self.engine.dispatch(Action::ConnectivityChanged { online });
    }

    /// Serializable copy of the cache.
    pub fn extract_state(&self) -> PersistedState {
        self.engine.store.with_state(ApiState::extract)
    }

    /// Restore settled entries from `persisted`.
    pub fn rehydrate(&self, persisted: PersistedState) {
        info!(
            queries = persisted.queries.len(),
            mutations = persisted.mutations.len(),
            "Rehydrating api state"
        );
        self.engine.dispatch(Action::Rehydrate(persisted));
    }

    /// Keys waiting for their removal timer.
    pub fn scheduled_removals(&self) -> Vec<QueryCacheKey> {
        self.engine.with_pipeline(|pipeline| pipeline.scheduled_removals())
    }

    /// Keys with a polling timer armed.
    pub fn active_polls(&self) -> Vec<QueryCacheKey> {
        self.engine.with_pipeline(|pipeline| pipeline.active_polls())
    }

    /// Entries in the argument serialization memo.
    pub fn key_memo_len(&self) -> usize {
        self.engine.memo_len()
    }
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("epoch", &self.engine.store.epoch())
            .finish_non_exhaustive()
    }
}
