//! Transport seam.
//!
//! The cache never talks to a network itself; every endpoint resolves
//! through a [`BaseQuery`] supplied when the API is built.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::Api;
use crate::cache::{Data, QueryCacheKey};
use crate::endpoints::EndpointKind;
use crate::error::ABORT_ERROR_NAME;

/// Result of a base query that reached the transport.
///
/// `Error` is a handled failure: the entry is rejected "with value", the
/// endpoint's tag functions still run and retries may apply.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Data { data: Data, meta: Option<Data> },
    Error { error: Data, meta: Option<Data> },
}

impl QueryOutcome {
    pub fn data(data: impl Into<Data>) -> Self {
        QueryOutcome::Data {
            data: data.into(),
            meta: None,
        }
    }

    pub fn error(error: impl Into<Data>) -> Self {
        QueryOutcome::Error {
            error: error.into(),
            meta: None,
        }
    }

    pub fn with_meta(self, meta: impl Into<Data>) -> Self {
        match self {
            QueryOutcome::Data { data, .. } => QueryOutcome::Data {
                data,
                meta: Some(meta.into()),
            },
            QueryOutcome::Error { error, .. } => QueryOutcome::Error {
                error,
                meta: Some(meta.into()),
            },
        }
    }

    pub fn meta(&self) -> Option<&Data> {
        match self {
            QueryOutcome::Data { meta, .. } | QueryOutcome::Error { meta, .. } => meta.as_ref(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, QueryOutcome::Error { .. })
    }
}

/// Unhandled failure (the transport itself blew up).
///
/// Stored in the entry as `{"name": .., "message": ..}`.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct BaseQueryFailure {
    pub name: String,
    pub message: String,
}

impl BaseQueryFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
        }
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn aborted() -> Self {
        Self::named(ABORT_ERROR_NAME, "Aborted")
    }

    pub fn is_abort(&self) -> bool {
        self.name == ABORT_ERROR_NAME
    }

    pub fn to_data(&self) -> Data {
        Data::object([
            ("name", Data::from(self.name.as_str())),
            ("message", Data::from(self.message.as_str())),
        ])
    }
}

/// Cancellation handle passed to base queries.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(CancellationToken);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_token(token: CancellationToken) -> Self {
        Self(token)
    }

    pub fn is_aborted(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once the request is aborted.
    pub async fn aborted(&self) {
        self.0.cancelled().await
    }

    pub fn abort(&self) {
        self.0.cancel()
    }
}

/// Context handed to every base query call.
#[derive(Clone)]
pub struct BaseQueryApi {
    pub signal: AbortSignal,
    pub endpoint: String,
    pub kind: EndpointKind,
    /// True when the request bypassed cached data on purpose.
    pub forced: bool,
    pub query_cache_key: Option<QueryCacheKey>,
    /// API-wide extra value configured on the builder.
    pub extra: Data,
    api: Option<Api>,
}

impl BaseQueryApi {
    pub(crate) fn new(
        signal: AbortSignal,
        endpoint: &str,
        kind: EndpointKind,
        forced: bool,
        query_cache_key: Option<QueryCacheKey>,
        api: Api,
    ) -> Self {
        Self {
            signal,
            endpoint: endpoint.to_string(),
            kind,
            forced,
            query_cache_key,
            extra: api.extra(),
            api: Some(api),
        }
    }

    /// A context not attached to any API, for calling a base query directly.
    pub fn detached(endpoint: impl Into<String>, kind: EndpointKind) -> Self {
        Self {
            signal: AbortSignal::new(),
            endpoint: endpoint.into(),
            kind,
            forced: false,
            query_cache_key: None,
            extra: Data::Null,
            api: None,
        }
    }

    /// The API that issued the request, for reading state or dispatching.
    pub fn api(&self) -> Option<&Api> {
        self.api.as_ref()
    }
}

pub type BaseQueryResult = Result<QueryOutcome, BaseQueryFailure>;

/// The injected transport.
#[async_trait]
pub trait BaseQuery: Send + Sync + 'static {
    async fn execute(&self, args: Data, api: BaseQueryApi, extra_options: Data) -> BaseQueryResult;
}

#[async_trait]
impl<B: BaseQuery + ?Sized> BaseQuery for Arc<B> {
    async fn execute(&self, args: Data, api: BaseQueryApi, extra_options: Data) -> BaseQueryResult {
        (**self).execute(args, api, extra_options).await
    }
}

/// Adapter turning an async closure into a [`BaseQuery`].
pub struct FnBaseQuery<F>(F);

/// Wrap `f(args, api, extra_options)` as a base query.
pub fn base_query_fn<F, Fut>(f: F) -> FnBaseQuery<F>
where
    F: Fn(Data, BaseQueryApi, Data) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BaseQueryResult> + Send + 'static,
{
    FnBaseQuery(f)
}

#[async_trait]
impl<F, Fut> BaseQuery for FnBaseQuery<F>
where
    F: Fn(Data, BaseQueryApi, Data) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BaseQueryResult> + Send + 'static,
{
    async fn execute(&self, args: Data, api: BaseQueryApi, extra_options: Data) -> BaseQueryResult {
        (self.0)(args, api, extra_options).await
    }
}
