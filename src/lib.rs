//! Subscription-counted cache for asynchronous endpoint data.
//!
//! An [`Api`] owns a set of query and mutation endpoints that share one base
//! query. Query results are cached by a stable serialization of their
//! arguments, deduplicated while in flight, refetched on demand, focus,
//! reconnect or tag invalidation, and collected once nothing subscribes to
//! them for long enough.

pub mod api;
pub mod base_query;
pub mod cache;
pub mod config;
pub mod endpoints;
pub(crate) mod engine;
pub mod error;
pub mod middleware;
pub mod retry;
pub mod telemetry;

pub use api::{
    Api, ApiBuilder, EnvironmentEvent, InvalidatedEntry, MutationHandle, MutationOptions,
    MutationResult, PatchCollection, PrefetchOptions, QueryHandle, QueryOptions, QueryResult,
    QuerySelector, UpsertQuery, setup_listeners,
};
pub use base_query::{
    AbortSignal, BaseQuery, BaseQueryApi, BaseQueryFailure, BaseQueryResult, QueryOutcome,
    base_query_fn,
};
pub use cache::{
    ApiConfig, Data, InvalidationBehavior, QueryCacheKey, QueryStatus, RefetchPolicy, RequestId,
    Retention, SubscriptionOptions, Tag, TagDescription,
};
pub use endpoints::{EndpointDefinition, EndpointKind, InfiniteData, InfiniteQueryConfig};
pub use engine::SchemaFailureObserver;
pub use error::{ApiError, QueryError};
pub use middleware::lifecycle::{
    CacheLifecycleApi, LifecycleError, LifecycleKey, LifecycleValue, QueryLifecycleApi,
};
pub use retry::{Retry, retry};
