//! Cache core.
//!
//! The canonical state tree and everything that transforms it without side
//! effects:
//!
//! - **Values**: `Data` trees with observable identity, structural sharing
//!   and patches.
//! - **Keys**: stable argument serialization for query cache keys.
//! - **Tags**: provided-by index used by invalidation.
//! - **Subscriptions**: reference counts and per-subscriber options.
//! - **Reducer/Store**: the single-writer transition function over
//!   [`ApiState`].

mod actions;
mod config;
mod keys;
pub(crate) mod lock;
pub mod patch;
mod reducer;
mod registry;
mod sharing;
mod state;
mod store;
mod subscriptions;
mod tags;
mod value;

pub use actions::{
    Action, Epoch, MutationRequest, QueryRequest, Rejection, Settlement, UpsertEntry,
};
pub use config::{
    ApiConfig, DEFAULT_KEY_MEMO_CAPACITY, DEFAULT_MAX_TIMER_DELAY_SECS, InvalidationBehavior,
    RefetchPolicy, Retention,
};
pub use keys::{
    KeySerializer, MutationKey, QueryCacheKey, RequestId, SerializeQueryArgsFn, SerializedArgs,
    default_serialize_query_args, stable_stringify,
};
pub use patch::{Patch, PatchError, PathSegment};
pub use reducer::{Reduced, reduce};
pub use registry::ProvidedIndex;
pub use sharing::copy_with_structural_sharing;
pub use state::{
    ApiState, ConfigState, FetchDirection, MutationSubState, PersistedState, QueryStatus,
    QuerySubState, now_millis,
};
pub use store::Store;
pub use subscriptions::{PollingPlan, RefetchTrigger, SubscriptionOptions, SubscriptionState};
pub use tags::{
    ResultDescription, Tag, TagContext, TagDescription, TagId, TagsFn, calculate_provided_by,
};
pub use value::{Data, DataMap};
