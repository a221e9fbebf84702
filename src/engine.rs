//! Dispatcher.
//!
//! Owns the store, the endpoint registry and the middleware pipeline. Every
//! action, whether it comes from the public API, a finished request or a
//! timer, enters through [`Engine::dispatch`]. Follow-up actions produced by
//! handlers are queued and drained in order before `dispatch` returns, so the
//! pipeline never re-enters itself.

use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::base_query::BaseQuery;
use crate::cache::lock::{mutex_lock, rw_read, rw_write};
use crate::cache::{
    Action, ApiConfig, Data, DEFAULT_KEY_MEMO_CAPACITY, KeySerializer, QueryCacheKey, Reduced,
    RequestId, SerializeQueryArgsFn, Settlement, Store,
};
use crate::endpoints::{
    EndpointDefinition, EndpointRegistry, OverrideExisting, SchemaFailure, SchemaFailureConverter,
};
use crate::error::ApiError;
use crate::middleware::{HandlerContext, Pipeline};

const SOURCE: &str = "engine";

/// API-level observer for responses that fail endpoint validation.
pub type SchemaFailureObserver = Arc<dyn Fn(&SchemaFailure) + Send + Sync>;

/// Settings fixed when the API is built.
#[derive(Clone, Default)]
pub(crate) struct EngineOptions {
    pub(crate) extra: Data,
    pub(crate) on_schema_failure: Option<SchemaFailureObserver>,
    pub(crate) catch_schema_failure: Option<SchemaFailureConverter>,
    pub(crate) serialize_query_args: Option<SerializeQueryArgsFn>,
}

/// An in-flight request that later callers can attach to.
pub(crate) struct RunningRequest {
    pub(crate) request_id: RequestId,
    pub(crate) token: CancellationToken,
    pub(crate) settled: watch::Receiver<Option<Settlement>>,
}

impl RunningRequest {
    /// Create the running record and the sender its task settles through.
    pub(crate) fn start(request_id: RequestId) -> (Self, watch::Sender<Option<Settlement>>) {
        let (tx, settled) = watch::channel(None);
        (
            Self {
                request_id,
                token: CancellationToken::new(),
                settled,
            },
            tx,
        )
    }
}

pub(crate) struct Engine {
    pub(crate) store: Store,
    endpoints: RwLock<Arc<EndpointRegistry>>,
    keys: KeySerializer,
    pub(crate) base_query: Arc<dyn BaseQuery>,
    pipeline: Mutex<Pipeline>,
    pub(crate) running_queries: DashMap<QueryCacheKey, RunningRequest>,
    pub(crate) running_mutations: DashMap<RequestId, RunningRequest>,
    pub(crate) options: EngineOptions,
    runtime: Handle,
}

impl Engine {
    pub(crate) fn new(
        config: ApiConfig,
        endpoints: EndpointRegistry,
        base_query: Arc<dyn BaseQuery>,
        options: EngineOptions,
    ) -> Result<Arc<Self>, ApiError> {
        let runtime = Handle::try_current().map_err(|_| ApiError::NoRuntime)?;
        let memo_capacity = NonZeroUsize::new(config.key_memo_capacity)
            .or(NonZeroUsize::new(DEFAULT_KEY_MEMO_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);

        Ok(Arc::new(Self {
            store: Store::new(config),
            endpoints: RwLock::new(Arc::new(endpoints)),
            keys: KeySerializer::new(memo_capacity),
            base_query,
            pipeline: Mutex::new(Pipeline::new()),
            running_queries: DashMap::new(),
            running_mutations: DashMap::new(),
            options,
            runtime,
        }))
    }

    /// Current endpoint registry.
    pub(crate) fn endpoints(&self) -> Arc<EndpointRegistry> {
        rw_read(&self.endpoints, SOURCE, "endpoints").clone()
    }

    /// Swap in a registry extended with `definitions`.
    pub(crate) fn inject<I>(&self, definitions: I, override_existing: OverrideExisting) -> Result<(), ApiError>
    where
        I: IntoIterator<Item = EndpointDefinition>,
    {
        let mut endpoints = rw_write(&self.endpoints, SOURCE, "inject");
        let extended = endpoints.extend(definitions, override_existing)?;
        debug!(
            target_module = SOURCE,
            endpoints = extended.len(),
            "Endpoints injected"
        );
        *endpoints = Arc::new(extended);
        Ok(())
    }

    /// Cache key for `args` under `definition`.
    ///
    /// Endpoint serializers win over the API-wide one.
    pub(crate) fn cache_key(&self, definition: &EndpointDefinition, args: &Data) -> QueryCacheKey {
        let custom = definition
            .serialize_query_args
            .as_ref()
            .or(self.options.serialize_query_args.as_ref());
        self.keys.cache_key(definition.name(), args, custom)
    }

    pub(crate) fn memo_len(&self) -> usize {
        self.keys.memo_len()
    }

    /// Reduce `action`, run the pipeline, and drain every follow-up.
    ///
    /// Returns what the first action changed.
    pub(crate) fn dispatch(self: &Arc<Self>, action: Action) -> Reduced {
        self.dispatch_then(action, |_| ()).0
    }

    /// Dispatch `action`, then run `inspect` before any other dispatch can
    /// start. Requests started by the action cannot settle in between.
    pub(crate) fn dispatch_then<T>(
        self: &Arc<Self>,
        action: Action,
        inspect: impl FnOnce(&Self) -> T,
    ) -> (Reduced, T) {
        let mut pipeline = mutex_lock(&self.pipeline, SOURCE, "dispatch");
        let mut queue = VecDeque::from([action]);
        let mut first: Option<Reduced> = None;

        while let Some(action) = queue.pop_front() {
            let endpoints = self.endpoints();
            let (_, reduced) = self.store.apply(&action, &endpoints);
            {
                let mut ctx = HandlerContext::new(self, &endpoints, &mut queue);
                pipeline.handle(&action, &reduced, &mut ctx);
            }
            if first.is_none() {
                first = Some(reduced);
            }
        }
        (first.unwrap_or_default(), inspect(self))
    }

    /// Read-only access to the pipeline's bookkeeping.
    pub(crate) fn with_pipeline<T>(&self, f: impl FnOnce(&Pipeline) -> T) -> T {
        f(&mutex_lock(&self.pipeline, SOURCE, "with_pipeline"))
    }

    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    /// Receivers for every request currently in flight.
    /// Cancel every in-flight request and forget it. Their settlements still
    /// reach the reducer, which discards them against the emptied state.
    pub(crate) fn abort_running(&self) -> usize {
        let mut aborted = 0;
        let mut cancel = |running: &mut RunningRequest| {
            running.token.cancel();
            aborted += 1;
            false
        };
        self.running_queries.retain(|_, running| cancel(running));
        self.running_mutations.retain(|_, running| cancel(running));
        aborted
    }

    pub(crate) fn running_receivers(&self) -> Vec<watch::Receiver<Option<Settlement>>> {
        self.running_queries
            .iter()
            .map(|entry| entry.settled.clone())
            .chain(self.running_mutations.iter().map(|entry| entry.settled.clone()))
            .collect()
    }
}
