//! Tag invalidation.
//!
//! Collects tags from `invalidate_tags` and from settled mutations, then
//! refetches every subscribed entry that provides one of them. Entries without
//! subscribers are only marked stale.
//!
//! With [`InvalidationBehavior::Delayed`] tags accumulate until no query or
//! mutation is pending, so a mutation's own follow-up refetches see its result.

use std::collections::BTreeSet;

use metrics::counter;
use tracing::{debug, instrument};

use crate::cache::{
    Action, InvalidationBehavior, QueryCacheKey, QueryStatus, Reduced, Tag, TagContext,
    calculate_provided_by,
};
use crate::telemetry::METRIC_INVALIDATED;

use super::thunks::refetch_request;
use super::{Handler, HandlerContext};

pub(crate) struct InvalidationHandler {
    pending_tags: Vec<Tag>,
}

impl InvalidationHandler {
    pub(crate) fn new() -> Self {
        Self {
            pending_tags: Vec::new(),
        }
    }

    /// Tags a settled mutation invalidates.
    fn mutation_tags(action: &Action, ctx: &HandlerContext<'_>) -> Vec<Tag> {
        let (request, result, error, meta) = match action {
            Action::MutationFulfilled {
                request, data, meta, ..
            } => (request, Some(data), None, meta.as_ref()),
            Action::MutationRejected { request, rejection } if rejection.rejected_with_value => (
                request,
                None,
                Some(&rejection.error),
                rejection.meta.as_ref(),
            ),
            _ => return Vec::new(),
        };
        // Settlements of mutations aborted by a reset no longer belong to this state.
        if !ctx.engine.running_mutations.contains_key(&request.request_id) {
            debug!(
                request_id = %request.request_id,
                "Ignoring tags of a mutation started before reset"
            );
            return Vec::new();
        }
        let Some(definition) = ctx.endpoints.get(&request.endpoint_name) else {
            return Vec::new();
        };
        let context = TagContext {
            result,
            error,
            arg: &request.original_args,
            meta,
        };
        calculate_provided_by(definition.invalidates_tags.as_ref(), &context)
    }

    #[instrument(level = "debug", skip_all, fields(tags = self.pending_tags.len()))]
    fn flush(&mut self, ctx: &mut HandlerContext<'_>) {
        if self.pending_tags.is_empty() {
            return;
        }
        let tags = std::mem::take(&mut self.pending_tags);

        let mut refetch = Vec::new();
        let mut stale: Vec<QueryCacheKey> = Vec::new();
        {
            let state = ctx.state();
            let affected: BTreeSet<QueryCacheKey> = state.provided.select_invalidated_by(&tags);
            for cache_key in affected {
                let Some(entry) = state.query(&cache_key) else {
                    continue;
                };
                if !state.subscriptions.has_subscribers(&cache_key) {
                    stale.push(cache_key);
                } else if entry.status != QueryStatus::Uninitialized {
                    refetch.push(refetch_request(&cache_key, entry));
                }
            }
        }

        debug!(
            refetched = refetch.len(),
            marked_stale = stale.len(),
            "Tags invalidated"
        );
        counter!(METRIC_INVALIDATED, "outcome" => "refetch").increment(refetch.len() as u64);
        counter!(METRIC_INVALIDATED, "outcome" => "stale").increment(stale.len() as u64);

        if !stale.is_empty() {
            ctx.dispatch(Action::QueriesMarkedStale { cache_keys: stale });
        }
        for request in refetch {
            ctx.dispatch(Action::QueryRequested(request));
        }
    }
}

impl Handler for InvalidationHandler {
    fn handle(&mut self, action: &Action, _reduced: &Reduced, ctx: &mut HandlerContext<'_>) {
        let new_tags = match action {
            Action::InvalidateTags(descriptions) => {
                descriptions.iter().map(|description| description.expand()).collect()
            }
            Action::MutationFulfilled { .. } | Action::MutationRejected { .. } => {
                Self::mutation_tags(action, ctx)
            }
            Action::ResetApiState => {
                self.pending_tags.clear();
                return;
            }
            Action::QueryFulfilled { .. } | Action::QueryRejected { .. } => Vec::new(),
            _ => return,
        };
        self.pending_tags.extend(new_tags);
        if self.pending_tags.is_empty() {
            return;
        }

        let (behavior, busy) = {
            let state = ctx.state();
            (
                state.config.settings.invalidation_behavior,
                state.has_pending_requests(),
            )
        };
        match behavior {
            InvalidationBehavior::Immediate => self.flush(ctx),
            InvalidationBehavior::Delayed if !busy => self.flush(ctx),
            InvalidationBehavior::Delayed => {
                debug!(
                    pending_tags = self.pending_tags.len(),
                    "Invalidation delayed until pending requests settle"
                );
            }
        }
    }
}
