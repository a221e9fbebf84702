//! Endpoint definitions and the per-API registry.

mod definition;
mod infinite;
mod registry;

pub(crate) use definition::QuerySource;
pub use definition::{
    EndpointDefinition, EndpointKind, ForceRefetchContext, MergeContext, OnCacheEntryAdded,
    OnQueryStarted, QueryArgsFn, QueryFn, ResponseValidator, SchemaFailure,
    SchemaFailureConverter, TransformFn,
};
pub use infinite::{InfiniteData, InfiniteQueryConfig, PageParamContext, PageParamFn};
pub use registry::{EndpointRegistry, OverrideExisting};
