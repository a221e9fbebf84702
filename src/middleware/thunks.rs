//! Request execution.
//!
//! Decides whether a requested query actually needs the transport, starts the
//! request on its own task, and settles it back through the dispatcher.

use std::sync::Arc;

use metrics::{counter, histogram};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::api::Api;
use crate::base_query::{AbortSignal, BaseQueryApi, BaseQueryFailure, QueryOutcome};
use crate::cache::{
    Action, ApiState, Data, FetchDirection, MutationRequest, QueryCacheKey, QueryRequest,
    QueryStatus, QuerySubState, Reduced, Rejection, Settlement, now_millis,
};
use crate::endpoints::{
    EndpointDefinition, ForceRefetchContext, InfiniteData, InfiniteQueryConfig, QuerySource,
    SchemaFailure,
};
use crate::engine::{Engine, RunningRequest};
use crate::telemetry::{METRIC_REQUEST_DEDUPLICATED, METRIC_REQUEST_MS, METRIC_REQUEST_STARTED};

use super::{Handler, HandlerContext};

const SCHEMA_ERROR_NAME: &str = "SchemaError";

/// A forced refetch of an existing entry, keeping its endpoint and args.
pub(crate) fn refetch_request(cache_key: &QueryCacheKey, entry: &QuerySubState) -> QueryRequest {
    QueryRequest::refetch(&entry.endpoint_name, cache_key, &entry.original_args)
}

pub(crate) struct ThunkHandler;

/// Outcome of the pre-flight check for a query request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Condition {
    Run { forced: bool },
    AlreadyPending,
    CacheHit,
}

fn query_condition(
    request: &QueryRequest,
    definition: &EndpointDefinition,
    state: &ApiState,
    now: i64,
) -> Condition {
    if request.is_upsert() {
        return Condition::Run { forced: false };
    }
    let Some(entry) = state.query(&request.cache_key) else {
        return Condition::Run { forced: false };
    };
    if entry.status == QueryStatus::Pending {
        return Condition::AlreadyPending;
    }

    let policy = request.force_refetch.or(request
        .subscribe
        .then_some(state.config.settings.refetch_on_mount_or_arg_change));
    if policy.is_some_and(|policy| policy.is_forced(entry.fulfilled_time_stamp, now)) {
        return Condition::Run { forced: true };
    }
    if entry.invalidated {
        return Condition::Run { forced: false };
    }
    if let Some(force_refetch) = &definition.force_refetch {
        let context = ForceRefetchContext {
            current_arg: &request.original_args,
            previous_arg: &entry.original_args,
            entry,
        };
        if force_refetch(&context) {
            return Condition::Run { forced: true };
        }
    }
    if entry.fulfilled_time_stamp.is_some() && request.direction.is_none() {
        return Condition::CacheHit;
    }
    Condition::Run { forced: false }
}

impl ThunkHandler {
    #[instrument(level = "debug", skip_all, fields(cache_key = %request.cache_key))]
    fn start_query(request: &QueryRequest, ctx: &mut HandlerContext<'_>) {
        let Some(definition) = ctx.endpoints.get(&request.endpoint_name).cloned() else {
            warn!(endpoint = %request.endpoint_name, "Query requested for unknown endpoint");
            return;
        };

        let now = now_millis();
        let (condition, existing) = {
            let state = ctx.state();
            let condition = query_condition(request, &definition, &state, now);
            let existing = state
                .query(&request.cache_key)
                .and_then(|entry| entry.data.clone());
            (condition, existing)
        };
        let forced = match condition {
            Condition::Run { forced } => forced,
            Condition::AlreadyPending => {
                counter!(METRIC_REQUEST_DEDUPLICATED).increment(1);
                debug!(cache_key = %request.cache_key, "Request joined in-flight query");
                return;
            }
            Condition::CacheHit => {
                debug!(cache_key = %request.cache_key, "Served from cache");
                return;
            }
        };

        ctx.dispatch(Action::QueryPending {
            request: request.clone(),
            started_time_stamp: now,
        });

        if let Some(data) = &request.upsert_data {
            ctx.dispatch(Action::QueryFulfilled {
                request: request.clone(),
                data: data.clone(),
                meta: None,
                fulfilled_time_stamp: now,
            });
            return;
        }

        counter!(METRIC_REQUEST_STARTED, "kind" => definition.kind().as_str()).increment(1);
        debug!(
            endpoint = %request.endpoint_name,
            cache_key = %request.cache_key,
            request_id = %request.request_id,
            forced,
            direction = ?request.direction,
            "Query started"
        );

        let (running, settled) = RunningRequest::start(request.request_id);
        let scope = RequestScope::new(
            ctx.engine,
            definition,
            request.original_args.clone(),
            running.token.clone(),
            forced,
            Some(request.cache_key.clone()),
        );
        ctx.engine
            .running_queries
            .insert(request.cache_key.clone(), running);

        let request = request.clone();
        ctx.engine.spawn(async move {
            let started = Instant::now();
            let settlement = match scope.definition.infinite_config().cloned() {
                Some(config) => {
                    let existing = existing.as_ref().and_then(InfiniteData::from_data);
                    scope
                        .cancellable(resolve_infinite(&scope, &config, &request, existing))
                        .await
                }
                None => {
                    scope
                        .cancellable(scope.resolve(request.original_args.clone()))
                        .await
                }
            };
            record_duration(&scope, &settlement, started);

            let action = match settlement.clone() {
                Settlement::Fulfilled { data, meta } => Action::QueryFulfilled {
                    request: request.clone(),
                    data,
                    meta,
                    fulfilled_time_stamp: now_millis(),
                },
                Settlement::Rejected(rejection) => Action::QueryRejected {
                    request: request.clone(),
                    rejection,
                },
            };
            scope.engine.dispatch(action);
            settle(&settled, settlement);
            scope
                .engine
                .running_queries
                .remove_if(&request.cache_key, |_, running| {
                    running.request_id == request.request_id
                });
        });
    }

    #[instrument(level = "debug", skip_all, fields(endpoint = %request.endpoint_name))]
    fn start_mutation(request: &MutationRequest, ctx: &mut HandlerContext<'_>) {
        let Some(definition) = ctx.endpoints.get(&request.endpoint_name).cloned() else {
            warn!(endpoint = %request.endpoint_name, "Mutation requested for unknown endpoint");
            return;
        };

        ctx.dispatch(Action::MutationPending {
            request: request.clone(),
            started_time_stamp: now_millis(),
        });
        counter!(METRIC_REQUEST_STARTED, "kind" => definition.kind().as_str()).increment(1);
        debug!(
            endpoint = %request.endpoint_name,
            request_id = %request.request_id,
            track = request.track,
            "Mutation started"
        );

        let (running, settled) = RunningRequest::start(request.request_id);
        let scope = RequestScope::new(
            ctx.engine,
            definition,
            request.original_args.clone(),
            running.token.clone(),
            false,
            None,
        );
        ctx.engine
            .running_mutations
            .insert(request.request_id, running);

        let request = request.clone();
        ctx.engine.spawn(async move {
            let started = Instant::now();
            let settlement = scope
                .cancellable(scope.resolve(request.original_args.clone()))
                .await;
            record_duration(&scope, &settlement, started);

            let action = match settlement.clone() {
                Settlement::Fulfilled { data, meta } => Action::MutationFulfilled {
                    request: request.clone(),
                    data,
                    meta,
                    fulfilled_time_stamp: now_millis(),
                },
                Settlement::Rejected(rejection) => Action::MutationRejected {
                    request: request.clone(),
                    rejection,
                },
            };
            scope.engine.dispatch(action);
            settle(&settled, settlement);
            scope.engine.running_mutations.remove(&request.request_id);
        });
    }
}

impl Handler for ThunkHandler {
    fn handle(&mut self, action: &Action, _reduced: &Reduced, ctx: &mut HandlerContext<'_>) {
        match action {
            Action::QueryRequested(request) => Self::start_query(request, ctx),
            Action::MutationRequested(request) => Self::start_mutation(request, ctx),
            Action::ResetApiState => {
                let aborted = ctx.engine.abort_running();
                if aborted > 0 {
                    debug!(aborted, "Aborted requests running before reset");
                }
            }
            _ => {}
        }
    }
}

fn settle(settled: &watch::Sender<Option<Settlement>>, settlement: Settlement) {
    // Nobody may be listening; the cache already holds the result.
    settled.send_replace(Some(settlement));
}

fn record_duration(scope: &RequestScope, settlement: &Settlement, started: Instant) {
    let outcome = match settlement {
        Settlement::Fulfilled { .. } => "fulfilled",
        Settlement::Rejected(rejection) if rejection.aborted => "aborted",
        Settlement::Rejected(_) => "rejected",
    };
    histogram!(
        METRIC_REQUEST_MS,
        "kind" => scope.definition.kind().as_str(),
        "outcome" => outcome
    )
    .record(started.elapsed().as_secs_f64() * 1000.0);
}

/// Everything one running request needs from its task.
struct RequestScope {
    engine: Arc<Engine>,
    definition: Arc<EndpointDefinition>,
    original_args: Data,
    token: CancellationToken,
    api: BaseQueryApi,
}

impl RequestScope {
    fn new(
        engine: &Arc<Engine>,
        definition: Arc<EndpointDefinition>,
        original_args: Data,
        token: CancellationToken,
        forced: bool,
        cache_key: Option<QueryCacheKey>,
    ) -> Self {
        let api = BaseQueryApi::new(
            AbortSignal::from_token(token.clone()),
            definition.name(),
            definition.kind(),
            forced,
            cache_key,
            Api::from_engine(Arc::clone(engine)),
        );
        Self {
            engine: Arc::clone(engine),
            definition,
            original_args,
            token,
            api,
        }
    }

    /// Race `work` against the request's abort token.
    async fn cancellable(&self, work: impl Future<Output = Settlement>) -> Settlement {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Settlement::Rejected(aborted()),
            settlement = work => settlement,
        }
    }

    /// One transport call for `arg`, mapped through the endpoint's transforms.
    async fn resolve(&self, arg: Data) -> Settlement {
        let outcome = match &self.definition.source {
            QuerySource::Args(to_args) => {
                self.engine
                    .base_query
                    .execute(
                        to_args(&arg),
                        self.api.clone(),
                        self.definition.extra_options.clone(),
                    )
                    .await
            }
            QuerySource::Fn(query_fn) => {
                query_fn(arg, self.api.clone(), Arc::clone(&self.engine.base_query)).await
            }
        };

        match outcome {
            Ok(QueryOutcome::Data { data, meta }) => self.accept(data, meta),
            Ok(QueryOutcome::Error { error, meta }) => {
                let error = match &self.definition.transform_error_response {
                    Some(transform) => transform(error, meta.as_ref(), &self.original_args),
                    None => error,
                };
                Settlement::Rejected(Rejection {
                    error,
                    meta,
                    rejected_with_value: true,
                    aborted: false,
                })
            }
            Err(failure) if failure.is_abort() || self.token.is_cancelled() => {
                Settlement::Rejected(aborted())
            }
            Err(failure) => {
                warn!(
                    endpoint = %self.definition.name(),
                    error = %failure,
                    "Base query failed"
                );
                Settlement::Rejected(Rejection {
                    error: failure.to_data(),
                    meta: None,
                    rejected_with_value: false,
                    aborted: false,
                })
            }
        }
    }

    /// Transform and validate a successful response.
    fn accept(&self, data: Data, meta: Option<Data>) -> Settlement {
        let data = match &self.definition.transform_response {
            Some(transform) => transform(data, meta.as_ref(), &self.original_args),
            None => data,
        };
        let Some(schema) = &self.definition.response_schema else {
            return Settlement::Fulfilled { data, meta };
        };
        let Err(message) = schema(&data) else {
            return Settlement::Fulfilled { data, meta };
        };

        let failure = SchemaFailure {
            endpoint: self.definition.name().to_string(),
            arg: self.original_args.clone(),
            value: data,
            message,
        };
        warn!(
            endpoint = %failure.endpoint,
            message = %failure.message,
            "Response failed schema validation"
        );
        if let Some(observer) = &self.engine.options.on_schema_failure {
            observer(&failure);
        }
        let converter = self
            .definition
            .catch_schema_failure
            .as_ref()
            .or(self.engine.options.catch_schema_failure.as_ref());
        let rejection = match converter {
            Some(convert) => Rejection {
                error: convert(&failure),
                meta,
                rejected_with_value: true,
                aborted: false,
            },
            None => Rejection {
                error: Data::object([
                    ("name", Data::from(SCHEMA_ERROR_NAME)),
                    ("message", Data::from(failure.message.as_str())),
                ]),
                meta,
                rejected_with_value: false,
                aborted: false,
            },
        };
        Settlement::Rejected(rejection)
    }

    /// Fetch the page for `param` and add it to `data`.
    ///
    /// A missing param with pages already present leaves `data` untouched.
    async fn fetch_page(
        &self,
        config: &InfiniteQueryConfig,
        mut data: InfiniteData,
        param: Option<Data>,
        previous: bool,
    ) -> Result<(InfiniteData, Option<Data>), Rejection> {
        let param = match param {
            Some(param) => param,
            None if !data.is_empty() => return Ok((data, None)),
            None => Data::Null,
        };
        let page_arg = Data::object([
            ("queryArg", self.original_args.clone()),
            ("pageParam", param.clone()),
        ]);
        match self.resolve(page_arg).await {
            Settlement::Fulfilled { data: page, meta } => {
                if previous {
                    data.add_to_start(page, param, config.max_pages);
                } else {
                    data.add_to_end(page, param, config.max_pages);
                }
                Ok((data, meta))
            }
            Settlement::Rejected(rejection) => Err(rejection),
        }
    }
}

fn aborted() -> Rejection {
    Rejection {
        error: BaseQueryFailure::aborted().to_data(),
        meta: None,
        rejected_with_value: false,
        aborted: true,
    }
}

/// Fetch one page in `request.direction`, or refetch every cached page.
///
/// A refetch without a direction rebuilds the pages from scratch, starting at
/// the first cached param and fetching as many pages as were cached.
async fn resolve_infinite(
    scope: &RequestScope,
    config: &InfiniteQueryConfig,
    request: &QueryRequest,
    cached: Option<InfiniteData>,
) -> Settlement {
    let query_arg = &request.original_args;
    let result = match (request.direction, cached) {
        (Some(direction), Some(existing)) if !existing.is_empty() => {
            let previous = direction == FetchDirection::Backward;
            let param = if previous {
                config.previous_page_param(&existing, query_arg)
            } else {
                config.next_page_param(&existing, query_arg)
            };
            scope.fetch_page(config, existing, param, previous).await
        }
        (_, cached) => {
            let cached_params = cached.map(|data| data.page_params).unwrap_or_default();
            let first_param = cached_params
                .first()
                .cloned()
                .or_else(|| request.initial_page_param.clone())
                .unwrap_or_else(|| config.initial_page_param().clone());
            refetch_pages(scope, config, query_arg, first_param, cached_params.len()).await
        }
    };

    match result {
        Ok((data, meta)) => Settlement::Fulfilled {
            data: data.to_data(),
            meta,
        },
        Err(rejection) => Settlement::Rejected(rejection),
    }
}

async fn refetch_pages(
    scope: &RequestScope,
    config: &InfiniteQueryConfig,
    query_arg: &Data,
    first_param: Data,
    page_count: usize,
) -> Result<(InfiniteData, Option<Data>), Rejection> {
    let (mut data, mut meta) = scope
        .fetch_page(config, InfiniteData::default(), Some(first_param), false)
        .await?;
    for _ in 1..page_count {
        let param = config.next_page_param(&data, query_arg);
        let (next, next_meta) = scope.fetch_page(config, data, param, false).await?;
        data = next;
        meta = next_meta.or(meta);
    }
    Ok((data, meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ApiConfig, RefetchPolicy, RequestId};
    use serde_json::json;

    fn request(subscribe: bool) -> QueryRequest {
        let mut request = QueryRequest::new(
            "getPost",
            QueryCacheKey::from("getPost(1)"),
            Data::from(json!(1)),
        );
        request.subscribe = subscribe;
        request
    }

    fn state_with(entry: QuerySubState) -> ApiState {
        let mut state = ApiState::new(ApiConfig::default());
        state
            .queries
            .insert(QueryCacheKey::from("getPost(1)"), Arc::new(entry));
        state
    }

    fn fulfilled_at(ts: i64) -> QuerySubState {
        let mut entry = QuerySubState::new("getPost", Data::from(json!(1)), RequestId::new());
        entry.status = QueryStatus::Fulfilled;
        entry.data = Some(Data::from(json!({"id": 1})));
        entry.fulfilled_time_stamp = Some(ts);
        entry
    }

    #[test]
    fn missing_entries_run() {
        let state = ApiState::new(ApiConfig::default());
        let definition = EndpointDefinition::query("getPost");
        assert_eq!(
            query_condition(&request(true), &definition, &state, 0),
            Condition::Run { forced: false }
        );
    }

    #[test]
    fn pending_entries_are_joined() {
        let mut entry = fulfilled_at(0);
        entry.status = QueryStatus::Pending;
        let state = state_with(entry);
        let mut forced = request(false);
        forced.force_refetch = Some(RefetchPolicy::Always);
        assert_eq!(
            query_condition(&forced, &EndpointDefinition::query("getPost"), &state, 0),
            Condition::AlreadyPending
        );
    }

    #[test]
    fn fresh_data_is_a_cache_hit() {
        let state = state_with(fulfilled_at(1_000));
        assert_eq!(
            query_condition(&request(true), &EndpointDefinition::query("getPost"), &state, 2_000),
            Condition::CacheHit
        );
    }

    #[test]
    fn mount_policy_applies_only_to_subscribing_requests() {
        let mut state = state_with(fulfilled_at(1_000));
        state.config.settings.refetch_on_mount_or_arg_change =
            RefetchPolicy::IfOlderThan(std::time::Duration::from_secs(10));
        let definition = EndpointDefinition::query("getPost");

        assert_eq!(
            query_condition(&request(true), &definition, &state, 5_000),
            Condition::CacheHit
        );
        assert_eq!(
            query_condition(&request(true), &definition, &state, 11_000),
            Condition::Run { forced: true }
        );
        assert_eq!(
            query_condition(&request(false), &definition, &state, 11_000),
            Condition::CacheHit
        );
    }

    #[test]
    fn invalidated_entries_refetch() {
        let mut entry = fulfilled_at(1_000);
        entry.invalidated = true;
        let state = state_with(entry);
        assert_eq!(
            query_condition(&request(true), &EndpointDefinition::query("getPost"), &state, 1_000),
            Condition::Run { forced: false }
        );
    }

    #[test]
    fn endpoint_force_refetch_sees_both_args() {
        let state = state_with(fulfilled_at(1_000));
        let definition = EndpointDefinition::query("getPost")
            .force_refetch(|context| context.current_arg != context.previous_arg);

        let mut changed = request(true);
        changed.original_args = Data::from(json!(2));
        assert_eq!(
            query_condition(&changed, &definition, &state, 1_000),
            Condition::Run { forced: true }
        );
        assert_eq!(
            query_condition(&request(true), &definition, &state, 1_000),
            Condition::CacheHit
        );
    }

    #[test]
    fn page_requests_bypass_the_cache() {
        let state = state_with(fulfilled_at(1_000));
        let mut next = request(false);
        next.direction = Some(FetchDirection::Forward);
        assert_eq!(
            query_condition(&next, &EndpointDefinition::query("getPost"), &state, 1_000),
            Condition::Run { forced: false }
        );
    }

    #[test]
    fn upserts_always_run() {
        let mut entry = fulfilled_at(1_000);
        entry.status = QueryStatus::Pending;
        let state = state_with(entry);
        let mut upsert = request(false);
        upsert.upsert_data = Some(Data::from(json!({"id": 1})));
        assert_eq!(
            query_condition(&upsert, &EndpointDefinition::query("getPost"), &state, 0),
            Condition::Run { forced: false }
        );
    }
}
