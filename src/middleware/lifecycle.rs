//! Endpoint lifecycle hooks.
//!
//! `on_query_started` runs when a request starts and can await its outcome.
//! `on_cache_entry_added` runs when a cache entry is created and can await
//! both its first value and its removal. Hooks run on their own tasks; the
//! handler only keeps the senders that resolve their futures.

use std::collections::HashMap;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use crate::api::{Api, PatchCollection, QueryResult};
use crate::cache::{
    Action, Data, MutationKey, QueryCacheKey, Reduced, Rejection, RequestId,
};
use crate::endpoints::EndpointDefinition;
use crate::error::ApiError;

use super::{Handler, HandlerContext};

/// Value a lifecycle future resolves with.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleValue {
    pub data: Data,
    pub meta: Option<Data>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LifecycleError {
    /// The request was rejected. `is_unhandled` is set for transport failures
    /// and aborts, as opposed to error values returned by the base query.
    #[error("request rejected: {error}")]
    Rejected {
        error: Data,
        meta: Option<Data>,
        is_unhandled: bool,
    },
    /// The cache entry went away before it received a value.
    #[error("cache entry removed before its data loaded")]
    EntryRemoved,
    /// The request never settled, for example because the api was reset.
    #[error("request dropped before it settled")]
    Dropped,
}

impl From<&Rejection> for LifecycleError {
    fn from(rejection: &Rejection) -> Self {
        LifecycleError::Rejected {
            error: rejection.error.clone(),
            meta: rejection.meta.clone(),
            is_unhandled: !rejection.rejected_with_value,
        }
    }
}

type LifecycleFuture = Shared<BoxFuture<'static, Result<LifecycleValue, LifecycleError>>>;

/// Which cache entry a cache lifecycle follows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LifecycleKey {
    Query(QueryCacheKey),
    Mutation(MutationKey),
}

/// Handle given to `on_query_started`.
#[derive(Clone)]
pub struct QueryLifecycleApi {
    request_id: RequestId,
    endpoint: String,
    arg: Data,
    cache_key: Option<QueryCacheKey>,
    api: Api,
    query_fulfilled: LifecycleFuture,
}

impl QueryLifecycleApi {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// `None` for mutations.
    pub fn cache_key(&self) -> Option<&QueryCacheKey> {
        self.cache_key.as_ref()
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    /// Current state of the cache entry this request writes to.
    ///
    /// `None` for mutations.
    pub fn get_cache_entry(&self) -> Option<QueryResult> {
        let cache_key = self.cache_key.as_ref()?;
        Some(self.api.select_key(&self.endpoint, cache_key))
    }

    /// Resolves when the request settles.
    pub async fn query_fulfilled(&self) -> Result<LifecycleValue, LifecycleError> {
        self.query_fulfilled.clone().await
    }

    /// Apply `recipe` to this query's cached value.
    ///
    /// Only meaningful for queries; mutations should patch the entries they
    /// affect through [`Api::update_query_data`].
    pub fn update_cached_data(
        &self,
        recipe: impl FnOnce(&mut Data),
    ) -> Result<PatchCollection, ApiError> {
        self.api
            .update_query_data(&self.endpoint, self.arg.clone(), recipe)
    }
}

/// Handle given to `on_cache_entry_added`.
#[derive(Clone)]
pub struct CacheLifecycleApi {
    key: LifecycleKey,
    endpoint: String,
    arg: Data,
    api: Api,
    cache_data_loaded: LifecycleFuture,
    cache_entry_removed: Shared<BoxFuture<'static, ()>>,
}

impl CacheLifecycleApi {
    pub fn key(&self) -> &LifecycleKey {
        &self.key
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    /// Resolves with the entry's first value, or fails if the entry is
    /// removed first.
    pub async fn cache_data_loaded(&self) -> Result<LifecycleValue, LifecycleError> {
        self.cache_data_loaded.clone().await
    }

    /// Current state of the query entry; `None` for mutation entries.
    pub fn get_cache_entry(&self) -> Option<QueryResult> {
        match &self.key {
            LifecycleKey::Query(cache_key) => Some(self.api.select_key(&self.endpoint, cache_key)),
            LifecycleKey::Mutation(_) => None,
        }
    }

    /// Resolves once the entry leaves the cache.
    pub async fn cache_entry_removed(&self) {
        self.cache_entry_removed.clone().await
    }

    pub fn update_cached_data(
        &self,
        recipe: impl FnOnce(&mut Data),
    ) -> Result<PatchCollection, ApiError> {
        self.api
            .update_query_data(&self.endpoint, self.arg.clone(), recipe)
    }
}

struct CacheEntryHooks {
    value: Option<oneshot::Sender<LifecycleValue>>,
    removed: oneshot::Sender<()>,
}

pub(crate) struct LifecycleHandler {
    started: HashMap<RequestId, oneshot::Sender<Result<LifecycleValue, LifecycleError>>>,
    entries: HashMap<LifecycleKey, CacheEntryHooks>,
}

impl LifecycleHandler {
    pub(crate) fn new() -> Self {
        Self {
            started: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    fn query_started(
        &mut self,
        definition: &EndpointDefinition,
        request_id: RequestId,
        arg: &Data,
        cache_key: Option<&QueryCacheKey>,
        ctx: &HandlerContext<'_>,
    ) {
        let Some(hook) = definition.on_query_started.clone() else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        self.started.insert(request_id, tx);

        let query_fulfilled = rx
            .map(|result| result.unwrap_or(Err(LifecycleError::Dropped)))
            .boxed()
            .shared();
        let lifecycle = QueryLifecycleApi {
            request_id,
            endpoint: definition.name().to_string(),
            arg: arg.clone(),
            cache_key: cache_key.cloned(),
            api: Api::from_engine(ctx.engine.clone()),
            query_fulfilled,
        };
        debug!(endpoint = %definition.name(), request_id = %request_id, "on_query_started");
        ctx.engine.spawn(hook(arg.clone(), lifecycle));
    }

    fn query_settled(&mut self, request_id: RequestId, result: Result<LifecycleValue, LifecycleError>) {
        if let Some(tx) = self.started.remove(&request_id) {
            // The hook may have returned without awaiting.
            let _ = tx.send(result);
        }
    }

    fn entry_added(
        &mut self,
        definition: &EndpointDefinition,
        key: LifecycleKey,
        arg: &Data,
        ctx: &HandlerContext<'_>,
    ) {
        let Some(hook) = definition.on_cache_entry_added.clone() else {
            return;
        };
        let (value_tx, value_rx) = oneshot::channel();
        let (removed_tx, removed_rx) = oneshot::channel::<()>();

        let cache_data_loaded = value_rx
            .map(|value| value.map_err(|_| LifecycleError::EntryRemoved))
            .boxed()
            .shared();
        let cache_entry_removed = removed_rx.map(|_| ()).boxed().shared();
        let lifecycle = CacheLifecycleApi {
            key: key.clone(),
            endpoint: definition.name().to_string(),
            arg: arg.clone(),
            api: Api::from_engine(ctx.engine.clone()),
            cache_data_loaded,
            cache_entry_removed,
        };
        self.entries.insert(
            key,
            CacheEntryHooks {
                value: Some(value_tx),
                removed: removed_tx,
            },
        );
        debug!(endpoint = %definition.name(), "on_cache_entry_added");
        ctx.engine.spawn(hook(arg.clone(), lifecycle));
    }

    fn entry_loaded(&mut self, key: &LifecycleKey, value: LifecycleValue) {
        if let Some(sender) = self.entries.get_mut(key).and_then(|hooks| hooks.value.take()) {
            let _ = sender.send(value);
        }
    }

    fn entry_removed(&mut self, key: &LifecycleKey) {
        if let Some(hooks) = self.entries.remove(key) {
            let _ = hooks.removed.send(());
        }
    }
}

impl Handler for LifecycleHandler {
    fn handle(&mut self, action: &Action, reduced: &Reduced, ctx: &mut HandlerContext<'_>) {
        match action {
            Action::QueryPending { request, .. } => {
                let Some(definition) = ctx.endpoints.get(&request.endpoint_name).cloned() else {
                    return;
                };
                if !request.is_upsert() {
                    self.query_started(
                        &definition,
                        request.request_id,
                        &request.original_args,
                        Some(&request.cache_key),
                        ctx,
                    );
                }
                for cache_key in &reduced.created {
                    self.entry_added(
                        &definition,
                        LifecycleKey::Query(cache_key.clone()),
                        &request.original_args,
                        ctx,
                    );
                }
            }
            Action::QueryFulfilled {
                request, data, meta, ..
            } => {
                let value = LifecycleValue {
                    data: data.clone(),
                    meta: meta.clone(),
                };
                self.query_settled(request.request_id, Ok(value.clone()));
                if reduced.applied {
                    self.entry_loaded(&LifecycleKey::Query(request.cache_key.clone()), value);
                }
            }
            Action::QueryRejected { request, rejection } => {
                self.query_settled(request.request_id, Err(rejection.into()));
            }
            Action::CacheEntriesUpserted { entries, .. } => {
                for entry in entries {
                    let key = LifecycleKey::Query(entry.cache_key.clone());
                    if reduced.created.contains(&entry.cache_key) {
                        if let Some(definition) = ctx.endpoints.get(&entry.endpoint_name).cloned() {
                            self.entry_added(&definition, key.clone(), &entry.original_args, ctx);
                        }
                    }
                    self.entry_loaded(
                        &key,
                        LifecycleValue {
                            data: entry.data.clone(),
                            meta: None,
                        },
                    );
                }
            }
            Action::MutationPending { request, .. } => {
                let Some(definition) = ctx.endpoints.get(&request.endpoint_name).cloned() else {
                    return;
                };
                self.query_started(&definition, request.request_id, &request.original_args, None, ctx);
                if request.track {
                    self.entry_added(
                        &definition,
                        LifecycleKey::Mutation(request.key()),
                        &request.original_args,
                        ctx,
                    );
                }
            }
            Action::MutationFulfilled {
                request, data, meta, ..
            } => {
                let value = LifecycleValue {
                    data: data.clone(),
                    meta: meta.clone(),
                };
                self.query_settled(request.request_id, Ok(value.clone()));
                self.entry_loaded(&LifecycleKey::Mutation(request.key()), value);
            }
            Action::MutationRejected { request, rejection } => {
                self.query_settled(request.request_id, Err(rejection.into()));
            }
            Action::RemoveMutationResult { key } => {
                self.entry_removed(&LifecycleKey::Mutation(key.clone()));
            }
            Action::ResetApiState => {
                for (_, hooks) in self.entries.drain() {
                    let _ = hooks.removed.send(());
                }
                self.started.clear();
            }
            _ => {}
        }
        for cache_key in &reduced.removed {
            self.entry_removed(&LifecycleKey::Query(cache_key.clone()));
        }
    }
}
