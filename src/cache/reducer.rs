//! The cache reducer.
//!
//! Pure transition function over [`ApiState`]. It never performs I/O and never
//! dispatches; the middleware pipeline reacts to what it reports.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use crate::endpoints::{EndpointDefinition, EndpointRegistry, MergeContext};
use crate::telemetry::METRIC_STALE_RESPONSE_DISCARDED;

use super::actions::{Action, MutationRequest, QueryRequest, Rejection, UpsertEntry};
use super::keys::{QueryCacheKey, RequestId};
use super::patch;
use super::sharing::copy_with_structural_sharing;
use super::state::{ApiState, MutationSubState, PersistedState, QueryStatus, QuerySubState};
use super::tags::{TagContext, calculate_provided_by};
use super::value::Data;

const SOURCE: &str = "cache::reducer";

/// What a reduction did, for the middleware that runs after it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reduced {
    /// False when the action was ignored (stale response, missing entry).
    pub applied: bool,
    /// Query entries that did not exist before this action.
    pub created: Vec<QueryCacheKey>,
    /// Query entries deleted by this action.
    pub removed: Vec<QueryCacheKey>,
}

impl Reduced {
    fn applied() -> Self {
        Self {
            applied: true,
            ..Self::default()
        }
    }

    fn ignored() -> Self {
        Self::default()
    }

    fn from_flag(applied: bool) -> Self {
        Self {
            applied,
            ..Self::default()
        }
    }
}

/// Apply `action` to `state`.
pub fn reduce(state: &mut ApiState, action: &Action, endpoints: &EndpointRegistry) -> Reduced {
    match action {
        Action::QueryRequested(request) => {
            if request.subscribe {
                state.subscriptions.subscribe(
                    &request.cache_key,
                    request.request_id,
                    request.subscription_options.clone(),
                );
            }
            Reduced::applied()
        }
        Action::QueryPending {
            request,
            started_time_stamp,
        } => query_pending(state, request, *started_time_stamp),
        Action::QueryFulfilled {
            request,
            data,
            meta,
            fulfilled_time_stamp,
        } => {
            let definition = endpoints.get(&request.endpoint_name);
            query_fulfilled(
                state,
                definition.map(Arc::as_ref),
                request,
                data.clone(),
                meta.as_ref(),
                *fulfilled_time_stamp,
            )
        }
        Action::QueryRejected { request, rejection } => {
            let definition = endpoints.get(&request.endpoint_name);
            query_rejected(state, definition.map(Arc::as_ref), request, rejection)
        }

        Action::MutationRequested(_) => Reduced::applied(),
        Action::MutationPending {
            request,
            started_time_stamp,
        } => mutation_pending(state, request, *started_time_stamp),
        Action::MutationFulfilled {
            request,
            data,
            fulfilled_time_stamp,
            ..
        } => mutation_settled(state, request, |entry| {
            entry.status = QueryStatus::Fulfilled;
            entry.data = Some(data.clone());
            entry.error = None;
            entry.fulfilled_time_stamp = Some(*fulfilled_time_stamp);
        }),
        Action::MutationRejected { request, rejection } => mutation_settled(state, request, |entry| {
            entry.status = QueryStatus::Rejected;
            entry.error = Some(rejection.error.clone());
        }),

        Action::UnsubscribeQueryResult {
            cache_key,
            subscriber,
        } => Reduced::from_flag(state.subscriptions.unsubscribe(cache_key, *subscriber)),
        Action::UpdateSubscriptionOptions {
            cache_key,
            subscriber,
            options,
        } => Reduced::from_flag(
            state
                .subscriptions
                .update(cache_key, *subscriber, options.clone()),
        ),

        Action::RemoveQueryResult { cache_key } => remove_query(state, cache_key),
        Action::RemoveMutationResult { key } => {
            Reduced::from_flag(state.mutations.remove(key).is_some())
        }
        Action::QueryResultPatched {
            cache_key,
            patches,
            update_provided,
        } => {
            let Some(entry) = state.queries.get_mut(cache_key) else {
                return Reduced::ignored();
            };
            let current = entry.data.clone().unwrap_or_default();
            let patched = match patch::apply(&current, patches) {
                Ok(patched) => patched,
                Err(err) => {
                    warn!(
                        target_module = SOURCE,
                        cache_key = %cache_key,
                        error = %err,
                        "Discarded patches that do not fit the cached value"
                    );
                    return Reduced::ignored();
                }
            };
            let entry = Arc::make_mut(entry);
            entry.data = Some(patched);
            if *update_provided {
                let definition = endpoints.get(&entry.endpoint_name).cloned();
                let context = TagContext {
                    result: entry.data.as_ref(),
                    error: None,
                    arg: &entry.original_args,
                    meta: None,
                };
                let tags = calculate_provided_by(
                    definition.as_deref().and_then(|d| d.provides_tags.as_ref()),
                    &context,
                );
                state.provided.update_provided_by(cache_key, tags);
            }
            Reduced::applied()
        }
        Action::CacheEntriesUpserted {
            entries,
            request_id,
            time_stamp,
        } => upsert_entries(state, endpoints, entries, *request_id, *time_stamp),
        Action::InvalidateTags(_) => Reduced::applied(),
        Action::QueriesMarkedStale { cache_keys } => {
            let mut applied = false;
            for cache_key in cache_keys {
                if let Some(entry) = state.queries.get_mut(cache_key) {
                    Arc::make_mut(entry).invalidated = true;
                    applied = true;
                }
            }
            Reduced::from_flag(applied)
        }
        Action::ResetApiState => {
            let removed = state.queries.keys().cloned().collect();
            state.queries.clear();
            state.mutations.clear();
            state.provided.clear();
            state.subscriptions.clear();
            Reduced {
                applied: true,
                created: Vec::new(),
                removed,
            }
        }
        Action::Rehydrate(persisted) => rehydrate(state, persisted),

        Action::FocusChanged { focused } => {
            state.config.focused = *focused;
            Reduced::applied()
        }
        Action::ConnectivityChanged { online } => {
            state.config.online = *online;
            Reduced::applied()
        }

        Action::RemovalTimerElapsed { .. } | Action::PollTimerElapsed { .. } => Reduced::applied(),
    }
}

fn query_pending(state: &mut ApiState, request: &QueryRequest, started_time_stamp: i64) -> Reduced {
    let mut reduced = Reduced::applied();
    let entry = state
        .queries
        .entry(request.cache_key.clone())
        .or_insert_with(|| {
            reduced.created.push(request.cache_key.clone());
            Arc::new(QuerySubState::new(
                &request.endpoint_name,
                request.original_args.clone(),
                request.request_id,
            ))
        });

    let entry = Arc::make_mut(entry);
    entry.status = QueryStatus::Pending;
    // An upsert into an existing entry keeps the authoritative request.
    if !(request.is_upsert() && reduced.created.is_empty()) {
        entry.request_id = request.request_id;
    }
    entry.original_args = request.original_args.clone();
    entry.started_time_stamp = Some(started_time_stamp);
    entry.invalidated = false;
    entry.direction = request.direction;
    reduced
}

fn is_stale(entry: &QuerySubState, request: &QueryRequest) -> bool {
    entry.request_id != request.request_id && !request.is_upsert()
}

fn discard_stale(request: &QueryRequest, current: RequestId) -> Reduced {
    counter!(METRIC_STALE_RESPONSE_DISCARDED).increment(1);
    debug!(
        target_module = SOURCE,
        cache_key = %request.cache_key,
        request_id = %request.request_id,
        current_request_id = %current,
        "Discarded stale response"
    );
    Reduced::ignored()
}

fn query_fulfilled(
    state: &mut ApiState,
    definition: Option<&EndpointDefinition>,
    request: &QueryRequest,
    data: Data,
    meta: Option<&Data>,
    fulfilled_time_stamp: i64,
) -> Reduced {
    let Some(entry) = state.queries.get_mut(&request.cache_key) else {
        return Reduced::ignored();
    };
    if is_stale(entry, request) {
        return discard_stale(request, entry.request_id);
    }

    let entry = Arc::make_mut(entry);
    let next = match (definition.and_then(|d| d.merge.as_ref()), entry.data.take()) {
        (Some(merge), Some(mut current)) => {
            let context = MergeContext {
                arg: &request.original_args,
                base_query_meta: meta,
                request_id: request.request_id,
                fulfilled_time_stamp,
            };
            merge(&mut current, data.clone(), &context);
            current
        }
        (_, current) => {
            let sharing = definition.is_none_or(|d| d.structural_sharing);
            match current {
                Some(current) if sharing => copy_with_structural_sharing(&current, data.clone()),
                _ => data.clone(),
            }
        }
    };
    entry.data = Some(next);
    entry.error = None;
    entry.status = QueryStatus::Fulfilled;
    entry.fulfilled_time_stamp = Some(fulfilled_time_stamp);

    let context = TagContext {
        result: Some(&data),
        error: None,
        arg: &request.original_args,
        meta,
    };
    let tags = calculate_provided_by(definition.and_then(|d| d.provides_tags.as_ref()), &context);
    state.provided.update_provided_by(&request.cache_key, tags);
    Reduced::applied()
}

fn query_rejected(
    state: &mut ApiState,
    definition: Option<&EndpointDefinition>,
    request: &QueryRequest,
    rejection: &Rejection,
) -> Reduced {
    let Some(entry) = state.queries.get_mut(&request.cache_key) else {
        return Reduced::ignored();
    };
    if entry.request_id != request.request_id {
        return discard_stale(request, entry.request_id);
    }

    let entry = Arc::make_mut(entry);
    entry.status = QueryStatus::Rejected;
    entry.error = Some(rejection.error.clone());

    // Unhandled failures leave the provided tags untouched.
    if rejection.rejected_with_value {
        let context = TagContext {
            result: None,
            error: Some(&rejection.error),
            arg: &request.original_args,
            meta: rejection.meta.as_ref(),
        };
        let tags =
            calculate_provided_by(definition.and_then(|d| d.provides_tags.as_ref()), &context);
        state.provided.update_provided_by(&request.cache_key, tags);
    }
    Reduced::applied()
}

fn mutation_pending(
    state: &mut ApiState,
    request: &MutationRequest,
    started_time_stamp: i64,
) -> Reduced {
    if !request.track {
        return Reduced::ignored();
    }
    state.mutations.insert(
        request.key(),
        Arc::new(MutationSubState {
            status: QueryStatus::Pending,
            endpoint_name: request.endpoint_name.clone(),
            original_args: request.original_args.clone(),
            request_id: request.request_id,
            fixed_cache_key: request.fixed_cache_key.clone(),
            data: None,
            error: None,
            started_time_stamp: Some(started_time_stamp),
            fulfilled_time_stamp: None,
        }),
    );
    Reduced::applied()
}

/// Settle a tracked mutation if the entry still belongs to `request`.
///
/// A shared `fixed_cache_key` entry may have been taken over by a later
/// mutation; its result wins.
fn mutation_settled(
    state: &mut ApiState,
    request: &MutationRequest,
    settle: impl FnOnce(&mut MutationSubState),
) -> Reduced {
    if !request.track {
        return Reduced::ignored();
    }
    match state.mutations.get_mut(&request.key()) {
        Some(entry) if entry.request_id == request.request_id => {
            settle(Arc::make_mut(entry));
            Reduced::applied()
        }
        _ => Reduced::ignored(),
    }
}

fn remove_query(state: &mut ApiState, cache_key: &QueryCacheKey) -> Reduced {
    if state.queries.remove(cache_key).is_none() {
        return Reduced::ignored();
    }
    state.provided.remove_key(cache_key);
    state.subscriptions.remove_key(cache_key);
    Reduced {
        applied: true,
        created: Vec::new(),
        removed: vec![cache_key.clone()],
    }
}

fn upsert_entries(
    state: &mut ApiState,
    endpoints: &EndpointRegistry,
    entries: &[UpsertEntry],
    request_id: RequestId,
    time_stamp: i64,
) -> Reduced {
    let mut reduced = Reduced::applied();
    for upsert in entries {
        let definition = endpoints.get(&upsert.endpoint_name).cloned();
        let entry = state
            .queries
            .entry(upsert.cache_key.clone())
            .or_insert_with(|| {
                reduced.created.push(upsert.cache_key.clone());
                Arc::new(QuerySubState::new(
                    &upsert.endpoint_name,
                    upsert.original_args.clone(),
                    request_id,
                ))
            });

        let entry = Arc::make_mut(entry);
        let sharing = definition.as_deref().is_none_or(|d| d.structural_sharing);
        let next = match entry.data.take() {
            Some(current) if sharing => copy_with_structural_sharing(&current, upsert.data.clone()),
            _ => upsert.data.clone(),
        };
        entry.status = QueryStatus::Fulfilled;
        entry.original_args = upsert.original_args.clone();
        entry.data = Some(next);
        entry.error = None;
        entry.started_time_stamp = Some(time_stamp);
        entry.fulfilled_time_stamp = Some(time_stamp);
        entry.invalidated = false;

        let context = TagContext {
            result: Some(&upsert.data),
            error: None,
            arg: &upsert.original_args,
            meta: None,
        };
        let tags = calculate_provided_by(
            definition.as_deref().and_then(|d| d.provides_tags.as_ref()),
            &context,
        );
        state.provided.update_provided_by(&upsert.cache_key, tags);
    }
    reduced
}

fn rehydrate(state: &mut ApiState, persisted: &PersistedState) -> Reduced {
    let mut restored = 0usize;
    for (cache_key, entry) in &persisted.queries {
        if !entry.status.is_settled() {
            continue;
        }
        state
            .queries
            .insert(cache_key.clone(), Arc::new(entry.clone()));
        if let Some(tags) = persisted.provided.get(cache_key) {
            state.provided.update_provided_by(cache_key, tags.clone());
        }
        restored += 1;
    }
    for (key, entry) in &persisted.mutations {
        if entry.status.is_settled() {
            state.mutations.insert(key.clone(), Arc::new(entry.clone()));
        }
    }
    debug!(
        target_module = SOURCE,
        restored,
        skipped = persisted.queries.len() - restored,
        "Rehydrated query entries"
    );
    Reduced::applied()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::{ApiConfig, MutationKey, Tag};
    use crate::endpoints::OverrideExisting;

    fn registry() -> EndpointRegistry {
        EndpointRegistry::new()
            .extend(
                [
                    EndpointDefinition::query("getPost").provides_tags(
                        crate::cache::ResultDescription::from_fn(|ctx| {
                            ctx.result
                                .and_then(|post| post.get("id"))
                                .and_then(crate::cache::TagId::from_data)
                                .map(|id| vec![Tag::with_id("Post", id).into()])
                                .unwrap_or_default()
                        }),
                    ),
                    EndpointDefinition::query("feed").merge(|current, incoming, _ctx| {
                        if let (Some(items), Some(more)) =
                            (current.as_array_mut(), incoming.as_array())
                        {
                            items.extend(more.iter().cloned());
                        }
                    }),
                    EndpointDefinition::query("raw").structural_sharing(false),
                ],
                OverrideExisting::Throw,
            )
            .unwrap()
    }

    fn request(endpoint: &str, arg: serde_json::Value) -> QueryRequest {
        let key = QueryCacheKey::new(format!("{endpoint}({arg})"));
        QueryRequest::new(endpoint, key, Data::from(arg))
    }

    fn pending(state: &mut ApiState, endpoints: &EndpointRegistry, request: &QueryRequest) -> Reduced {
        reduce(
            state,
            &Action::QueryPending {
                request: request.clone(),
                started_time_stamp: 1,
            },
            endpoints,
        )
    }

    fn fulfilled(request: &QueryRequest, data: serde_json::Value) -> Action {
        Action::QueryFulfilled {
            request: request.clone(),
            data: Data::from(data),
            meta: None,
            fulfilled_time_stamp: 2,
        }
    }

    #[test]
    fn pending_creates_the_entry_once() {
        let endpoints = registry();
        let mut state = ApiState::new(ApiConfig::default());
        let first = request("getPost", json!({"id": 1}));

        let reduced = pending(&mut state, &endpoints, &first);
        assert_eq!(reduced.created, vec![first.cache_key.clone()]);
        let entry = state.query(&first.cache_key).unwrap();
        assert_eq!(entry.status, QueryStatus::Pending);
        assert_eq!(entry.request_id, first.request_id);

        let second = QueryRequest {
            request_id: RequestId::new(),
            ..first.clone()
        };
        let reduced = pending(&mut state, &endpoints, &second);
        assert!(reduced.created.is_empty());
        assert_eq!(state.query(&first.cache_key).unwrap().request_id, second.request_id);
    }

    #[test]
    fn stale_responses_do_not_touch_the_entry_or_its_tags() {
        let endpoints = registry();
        let mut state = ApiState::new(ApiConfig::default());
        let older = request("getPost", json!({"id": 1}));
        let newer = QueryRequest {
            request_id: RequestId::new(),
            ..older.clone()
        };

        pending(&mut state, &endpoints, &older);
        pending(&mut state, &endpoints, &newer);
        let reduced = reduce(&mut state, &fulfilled(&older, json!({"id": 1})), &endpoints);

        assert!(!reduced.applied);
        let entry = state.query(&older.cache_key).unwrap();
        assert_eq!(entry.status, QueryStatus::Pending);
        assert_eq!(entry.request_id, newer.request_id);
        assert_eq!(state.provided.key_count(), 0);

        let rejected = Action::QueryRejected {
            request: older.clone(),
            rejection: Rejection {
                error: Data::from("late"),
                meta: None,
                rejected_with_value: true,
                aborted: false,
            },
        };
        assert!(!reduce(&mut state, &rejected, &endpoints).applied);
        assert!(state.query(&older.cache_key).unwrap().error.is_none());
    }

    #[test]
    fn fulfilled_replaces_tags_and_keeps_unchanged_subtrees() {
        let endpoints = registry();
        let mut state = ApiState::new(ApiConfig::default());
        let first = request("getPost", json!({"id": 1}));
        pending(&mut state, &endpoints, &first);
        reduce(
            &mut state,
            &fulfilled(&first, json!({"id": 1, "author": {"name": "ada"}, "views": 1})),
            &endpoints,
        );
        let before = state.query(&first.cache_key).unwrap().data.clone().unwrap();
        assert_eq!(
            state.provided.tags_for_key(&first.cache_key).into_iter().collect::<Vec<_>>(),
            vec![Tag::with_id("Post", 1)]
        );

        let refetch = QueryRequest {
            request_id: RequestId::new(),
            ..first.clone()
        };
        pending(&mut state, &endpoints, &refetch);
        reduce(
            &mut state,
            &fulfilled(&refetch, json!({"id": 2, "author": {"name": "ada"}, "views": 2})),
            &endpoints,
        );
        let after = state.query(&first.cache_key).unwrap().data.clone().unwrap();

        assert!(!Data::ptr_eq(&before, &after));
        assert!(Data::ptr_eq(before.get("author").unwrap(), after.get("author").unwrap()));
        assert_eq!(
            state.provided.tags_for_key(&first.cache_key).into_iter().collect::<Vec<_>>(),
            vec![Tag::with_id("Post", 2)]
        );
        assert!(state.provided.keys_for_tag(&Tag::with_id("Post", 1)).is_empty());
    }

    #[test]
    fn merge_folds_into_existing_data() {
        let endpoints = registry();
        let mut state = ApiState::new(ApiConfig::default());
        let first = request("feed", json!(null));
        pending(&mut state, &endpoints, &first);
        reduce(&mut state, &fulfilled(&first, json!([1, 2])), &endpoints);

        let next = QueryRequest {
            request_id: RequestId::new(),
            ..first.clone()
        };
        pending(&mut state, &endpoints, &next);
        reduce(&mut state, &fulfilled(&next, json!([3])), &endpoints);

        let data = state.query(&first.cache_key).unwrap().data.clone().unwrap();
        assert_eq!(data.to_value(), json!([1, 2, 3]));
    }

    #[test]
    fn structural_sharing_can_be_disabled() {
        let endpoints = registry();
        let mut state = ApiState::new(ApiConfig::default());
        let first = request("raw", json!(null));
        pending(&mut state, &endpoints, &first);
        reduce(&mut state, &fulfilled(&first, json!({"a": [1]})), &endpoints);
        let before = state.query(&first.cache_key).unwrap().data.clone().unwrap();

        let again = QueryRequest {
            request_id: RequestId::new(),
            ..first.clone()
        };
        pending(&mut state, &endpoints, &again);
        reduce(&mut state, &fulfilled(&again, json!({"a": [1]})), &endpoints);
        let after = state.query(&first.cache_key).unwrap().data.clone().unwrap();
        assert!(!Data::ptr_eq(before.get("a").unwrap(), after.get("a").unwrap()));
    }

    #[test]
    fn unhandled_rejections_keep_previous_tags() {
        let endpoints = registry();
        let mut state = ApiState::new(ApiConfig::default());
        let first = request("getPost", json!({"id": 1}));
        pending(&mut state, &endpoints, &first);
        reduce(&mut state, &fulfilled(&first, json!({"id": 1})), &endpoints);

        let retry = QueryRequest {
            request_id: RequestId::new(),
            ..first.clone()
        };
        pending(&mut state, &endpoints, &retry);
        reduce(
            &mut state,
            &Action::QueryRejected {
                request: retry.clone(),
                rejection: Rejection {
                    error: Data::from(json!({"name": "Error", "message": "boom"})),
                    meta: None,
                    rejected_with_value: false,
                    aborted: false,
                },
            },
            &endpoints,
        );

        let entry = state.query(&first.cache_key).unwrap();
        assert_eq!(entry.status, QueryStatus::Rejected);
        assert_eq!(entry.data.as_ref().unwrap().to_value(), json!({"id": 1}));
        assert_eq!(state.provided.key_count(), 1);
    }

    #[test]
    fn untracked_mutations_stay_out_of_state() {
        let endpoints = registry();
        let mut state = ApiState::new(ApiConfig::default());
        let mut mutation = MutationRequest {
            endpoint_name: "deletePost".to_string(),
            original_args: Data::from(1),
            request_id: RequestId::new(),
            track: false,
            fixed_cache_key: None,
        };
        let action = Action::MutationPending {
            request: mutation.clone(),
            started_time_stamp: 1,
        };
        reduce(&mut state, &action, &endpoints);
        assert!(state.mutations.is_empty());

        mutation.track = true;
        reduce(
            &mut state,
            &Action::MutationPending {
                request: mutation.clone(),
                started_time_stamp: 1,
            },
            &endpoints,
        );
        reduce(
            &mut state,
            &Action::MutationFulfilled {
                request: mutation.clone(),
                data: Data::from(true),
                meta: None,
                fulfilled_time_stamp: 3,
            },
            &endpoints,
        );
        let entry = state.mutation(&MutationKey::from(mutation.request_id)).unwrap();
        assert_eq!(entry.status, QueryStatus::Fulfilled);
        assert_eq!(entry.fulfilled_time_stamp, Some(3));
    }

    #[test]
    fn remove_clears_entry_tags_and_subscribers() {
        let endpoints = registry();
        let mut state = ApiState::new(ApiConfig::default());
        let first = request("getPost", json!({"id": 1}));
        reduce(&mut state, &Action::QueryRequested(first.clone()), &endpoints);
        pending(&mut state, &endpoints, &first);
        reduce(&mut state, &fulfilled(&first, json!({"id": 1})), &endpoints);
        assert!(state.subscriptions.has_subscribers(&first.cache_key));

        let reduced = reduce(
            &mut state,
            &Action::RemoveQueryResult {
                cache_key: first.cache_key.clone(),
            },
            &endpoints,
        );
        assert_eq!(reduced.removed, vec![first.cache_key.clone()]);
        assert!(state.query(&first.cache_key).is_none());
        assert_eq!(state.provided.key_count(), 0);
        assert!(!state.subscriptions.has_subscribers(&first.cache_key));
    }

    #[test]
    fn rehydrate_restores_only_settled_entries() {
        let endpoints = registry();
        let mut source = ApiState::new(ApiConfig::default());
        let settled = request("getPost", json!({"id": 1}));
        let in_flight = request("getPost", json!({"id": 2}));
        pending(&mut source, &endpoints, &settled);
        reduce(&mut source, &fulfilled(&settled, json!({"id": 1})), &endpoints);
        pending(&mut source, &endpoints, &in_flight);

        let mut target = ApiState::new(ApiConfig::default());
        reduce(&mut target, &Action::Rehydrate(source.extract()), &endpoints);

        assert!(target.query(&settled.cache_key).is_some());
        assert!(target.query(&in_flight.cache_key).is_none());
        assert_eq!(
            target
                .provided
                .select_invalidated_by([&Tag::of_type("Post")])
                .into_iter()
                .collect::<Vec<_>>(),
            vec![settled.cache_key.clone()]
        );
    }

    #[test]
    fn upserts_report_new_keys_and_provide_tags() {
        let endpoints = registry();
        let mut state = ApiState::new(ApiConfig::default());
        let key = QueryCacheKey::from("getPost({\"id\":5})");
        let reduced = reduce(
            &mut state,
            &Action::CacheEntriesUpserted {
                entries: vec![UpsertEntry {
                    endpoint_name: "getPost".to_string(),
                    cache_key: key.clone(),
                    original_args: Data::from(json!({"id": 5})),
                    data: Data::from(json!({"id": 5})),
                }],
                request_id: RequestId::new(),
                time_stamp: 9,
            },
            &endpoints,
        );
        assert_eq!(reduced.created, vec![key.clone()]);
        let entry = state.query(&key).unwrap();
        assert_eq!(entry.status, QueryStatus::Fulfilled);
        assert_eq!(entry.fulfilled_time_stamp, Some(9));
        assert!(state.provided.keys_for_tag(&Tag::with_id("Post", 5)).contains(&key));
    }

    #[test]
    fn reset_keeps_environment_flags() {
        let endpoints = registry();
        let mut state = ApiState::new(ApiConfig::default());
        reduce(&mut state, &Action::FocusChanged { focused: false }, &endpoints);
        let first = request("getPost", json!({"id": 1}));
        pending(&mut state, &endpoints, &first);

        let reduced = reduce(&mut state, &Action::ResetApiState, &endpoints);
        assert_eq!(reduced.removed, vec![first.cache_key]);
        assert!(state.queries.is_empty());
        assert!(!state.config.focused);
    }
}
