//! Endpoint definitions.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::base_query::{BaseQuery, BaseQueryApi, BaseQueryResult};
use crate::cache::{
    Data, QuerySubState, RequestId, ResultDescription, Retention, SerializeQueryArgsFn,
    SerializedArgs,
};
use crate::middleware::lifecycle::{CacheLifecycleApi, QueryLifecycleApi};

use super::infinite::InfiniteQueryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointKind {
    Query,
    Mutation,
    InfiniteQuery,
}

impl EndpointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointKind::Query => "query",
            EndpointKind::Mutation => "mutation",
            EndpointKind::InfiniteQuery => "infinite query",
        }
    }

    /// Queries and infinite queries share the cache entry machinery.
    pub fn is_query_like(self) -> bool {
        !matches!(self, EndpointKind::Mutation)
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps the endpoint argument to base query arguments.
pub type QueryArgsFn = Arc<dyn Fn(&Data) -> Data + Send + Sync>;
/// Replaces the base query entirely for one endpoint.
pub type QueryFn =
    Arc<dyn Fn(Data, BaseQueryApi, Arc<dyn BaseQuery>) -> BoxFuture<'static, BaseQueryResult> + Send + Sync>;
/// `(value, meta, arg) -> value` transform for responses or errors.
pub type TransformFn = Arc<dyn Fn(Data, Option<&Data>, &Data) -> Data + Send + Sync>;
/// Folds a fresh response into the cached value in place.
pub type MergeFn = Arc<dyn Fn(&mut Data, Data, &MergeContext<'_>) + Send + Sync>;
pub type ForceRefetchFn = Arc<dyn Fn(&ForceRefetchContext<'_>) -> bool + Send + Sync>;
/// Validates a transformed response; `Err` carries the failure message.
pub type ResponseValidator = Arc<dyn Fn(&Data) -> Result<(), String> + Send + Sync>;
/// Converts a schema failure into a handled error payload.
pub type SchemaFailureConverter = Arc<dyn Fn(&SchemaFailure) -> Data + Send + Sync>;
pub type OnQueryStarted = Arc<dyn Fn(Data, QueryLifecycleApi) -> BoxFuture<'static, ()> + Send + Sync>;
pub type OnCacheEntryAdded =
    Arc<dyn Fn(Data, CacheLifecycleApi) -> BoxFuture<'static, ()> + Send + Sync>;

/// Inputs to a merge function.
#[derive(Debug, Clone, Copy)]
pub struct MergeContext<'a> {
    pub arg: &'a Data,
    pub base_query_meta: Option<&'a Data>,
    pub request_id: RequestId,
    pub fulfilled_time_stamp: i64,
}

/// Inputs to a force-refetch decision.
#[derive(Debug, Clone, Copy)]
pub struct ForceRefetchContext<'a> {
    pub current_arg: &'a Data,
    pub previous_arg: &'a Data,
    pub entry: &'a QuerySubState,
}

/// A response that failed endpoint validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaFailure {
    pub endpoint: String,
    pub arg: Data,
    pub value: Data,
    pub message: String,
}

#[derive(Clone)]
pub(crate) enum QuerySource {
    Args(QueryArgsFn),
    Fn(QueryFn),
}

/// One endpoint: kind, request mapping, tags, transforms and hooks.
///
/// Callbacks run while the dispatcher holds the cache; they must not call
/// back into [`crate::Api`] synchronously. Lifecycle hooks run on their own
/// task and may use the API freely.
#[derive(Clone)]
pub struct EndpointDefinition {
    pub(crate) name: String,
    pub(crate) kind: EndpointKind,
    pub(crate) source: QuerySource,
    pub(crate) provides_tags: Option<ResultDescription>,
    pub(crate) invalidates_tags: Option<ResultDescription>,
    pub(crate) transform_response: Option<TransformFn>,
    pub(crate) transform_error_response: Option<TransformFn>,
    pub(crate) merge: Option<MergeFn>,
    pub(crate) force_refetch: Option<ForceRefetchFn>,
    pub(crate) keep_unused_data_for: Option<Retention>,
    pub(crate) serialize_query_args: Option<SerializeQueryArgsFn>,
    pub(crate) structural_sharing: bool,
    pub(crate) on_query_started: Option<OnQueryStarted>,
    pub(crate) on_cache_entry_added: Option<OnCacheEntryAdded>,
    pub(crate) extra_options: Data,
    pub(crate) response_schema: Option<ResponseValidator>,
    pub(crate) catch_schema_failure: Option<SchemaFailureConverter>,
    pub(crate) infinite: Option<InfiniteQueryConfig>,
}

impl EndpointDefinition {
    fn new(name: impl Into<String>, kind: EndpointKind) -> Self {
        Self {
            name: name.into(),
            kind,
            source: QuerySource::Args(Arc::new(|arg: &Data| arg.clone())),
            provides_tags: None,
            invalidates_tags: None,
            transform_response: None,
            transform_error_response: None,
            merge: None,
            force_refetch: None,
            keep_unused_data_for: None,
            serialize_query_args: None,
            structural_sharing: true,
            on_query_started: None,
            on_cache_entry_added: None,
            extra_options: Data::Null,
            response_schema: None,
            catch_schema_failure: None,
            infinite: None,
        }
    }

    /// A cached, subscribable read.
    pub fn query(name: impl Into<String>) -> Self {
        Self::new(name, EndpointKind::Query)
    }

    /// A write; never cached by argument.
    pub fn mutation(name: impl Into<String>) -> Self {
        Self::new(name, EndpointKind::Mutation)
    }

    /// A paged read whose cached value accumulates pages.
    pub fn infinite_query(name: impl Into<String>, config: InfiniteQueryConfig) -> Self {
        let mut definition = Self::new(name, EndpointKind::InfiniteQuery);
        definition.infinite = Some(config);
        definition
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Map the endpoint argument to base query arguments.
    ///
    /// Infinite queries receive `{"queryArg": .., "pageParam": ..}`.
    pub fn request<F>(mut self, f: F) -> Self
    where
        F: Fn(&Data) -> Data + Send + Sync + 'static,
    {
        self.source = QuerySource::Args(Arc::new(f));
        self
    }

    /// Resolve this endpoint with custom logic instead of the base query.
    pub fn query_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Data, BaseQueryApi, Arc<dyn BaseQuery>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BaseQueryResult> + Send + 'static,
    {
        self.source = QuerySource::Fn(Arc::new(move |arg, api, base| f(arg, api, base).boxed()));
        self
    }

    pub fn provides_tags(mut self, tags: impl Into<ResultDescription>) -> Self {
        self.provides_tags = Some(tags.into());
        self
    }

    pub fn invalidates_tags(mut self, tags: impl Into<ResultDescription>) -> Self {
        self.invalidates_tags = Some(tags.into());
        self
    }

    pub fn transform_response<F>(mut self, f: F) -> Self
    where
        F: Fn(Data, Option<&Data>, &Data) -> Data + Send + Sync + 'static,
    {
        self.transform_response = Some(Arc::new(f));
        self
    }

    pub fn transform_error_response<F>(mut self, f: F) -> Self
    where
        F: Fn(Data, Option<&Data>, &Data) -> Data + Send + Sync + 'static,
    {
        self.transform_error_response = Some(Arc::new(f));
        self
    }

    /// Merge fresh responses into existing cached data instead of replacing it.
    pub fn merge<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Data, Data, &MergeContext<'_>) + Send + Sync + 'static,
    {
        self.merge = Some(Arc::new(f));
        self
    }

    pub fn force_refetch<F>(mut self, f: F) -> Self
    where
        F: Fn(&ForceRefetchContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.force_refetch = Some(Arc::new(f));
        self
    }

    pub fn keep_unused_data_for(mut self, retention: Retention) -> Self {
        self.keep_unused_data_for = Some(retention);
        self
    }

    pub fn serialize_query_args<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &Data) -> SerializedArgs + Send + Sync + 'static,
    {
        self.serialize_query_args = Some(Arc::new(f));
        self
    }

    pub fn structural_sharing(mut self, enabled: bool) -> Self {
        self.structural_sharing = enabled;
        self
    }

    pub fn on_query_started<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Data, QueryLifecycleApi) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_query_started = Some(Arc::new(move |arg, api| f(arg, api).boxed()));
        self
    }

    pub fn on_cache_entry_added<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Data, CacheLifecycleApi) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_cache_entry_added = Some(Arc::new(move |arg, api| f(arg, api).boxed()));
        self
    }

    /// Opaque options forwarded to the base query.
    pub fn extra_options(mut self, options: impl Into<Data>) -> Self {
        self.extra_options = options.into();
        self
    }

    pub fn response_schema<F>(mut self, f: F) -> Self
    where
        F: Fn(&Data) -> Result<(), String> + Send + Sync + 'static,
    {
        self.response_schema = Some(Arc::new(f));
        self
    }

    pub fn catch_schema_failure<F>(mut self, f: F) -> Self
    where
        F: Fn(&SchemaFailure) -> Data + Send + Sync + 'static,
    {
        self.catch_schema_failure = Some(Arc::new(f));
        self
    }

    pub fn infinite_config(&self) -> Option<&InfiniteQueryConfig> {
        self.infinite.as_ref()
    }
}

impl fmt::Debug for EndpointDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("provides_tags", &self.provides_tags)
            .field("invalidates_tags", &self.invalidates_tags)
            .field("keep_unused_data_for", &self.keep_unused_data_for)
            .field("structural_sharing", &self.structural_sharing)
            .field("infinite", &self.infinite)
            .finish_non_exhaustive()
    }
}
