//! Tracing subscriber installation and metric names.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};
use crate::error::TelemetryError;

pub const METRIC_REQUEST_STARTED: &str = "endpoint_cache_request_started_total";
pub const METRIC_REQUEST_DEDUPLICATED: &str = "endpoint_cache_request_deduplicated_total";
pub const METRIC_STALE_RESPONSE_DISCARDED: &str = "endpoint_cache_stale_response_discarded_total";
pub const METRIC_ENTRY_REMOVED: &str = "endpoint_cache_entry_removed_total";
pub const METRIC_INVALIDATED: &str = "endpoint_cache_invalidated_total";
pub const METRIC_SUBSCRIPTIONS: &str = "endpoint_cache_subscriptions";
pub const METRIC_REQUEST_MS: &str = "endpoint_cache_request_ms";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Also registers descriptions for the metrics the cache emits. Fails when a
/// global subscriber is already set.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| TelemetryError::init(format!("failed to install tracing subscriber: {err}")))
}

/// Register metric descriptions with the installed recorder. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_REQUEST_STARTED,
            Unit::Count,
            "Total number of query and mutation requests sent to the base query."
        );
        describe_counter!(
            METRIC_REQUEST_DEDUPLICATED,
            Unit::Count,
            "Total number of query requests joined to one already in flight."
        );
        describe_counter!(
            METRIC_STALE_RESPONSE_DISCARDED,
            Unit::Count,
            "Total number of responses dropped because a newer request owns the entry."
        );
        describe_counter!(
            METRIC_ENTRY_REMOVED,
            Unit::Count,
            "Total number of query entries removed from the cache."
        );
        describe_counter!(
            METRIC_INVALIDATED,
            Unit::Count,
            "Total number of query entries hit by tag invalidation."
        );
        describe_gauge!(
            METRIC_SUBSCRIPTIONS,
            Unit::Count,
            "Current number of live query subscriptions."
        );
        describe_histogram!(
            METRIC_REQUEST_MS,
            Unit::Milliseconds,
            "Request latency from start to settlement in milliseconds."
        );
    });
}
