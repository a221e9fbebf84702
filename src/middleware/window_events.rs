//! Focus and reconnect refetching.

use tracing::debug;

use crate::cache::{Action, QueryStatus, Reduced, RefetchTrigger};

use super::thunks::refetch_request;
use super::{Handler, HandlerContext};

pub(crate) struct WindowEventHandler;

impl WindowEventHandler {
    fn refetch_valid_queries(trigger: RefetchTrigger, ctx: &mut HandlerContext<'_>) {
        let requests: Vec<_> = {
            let state = ctx.state();
            let api_default = match trigger {
                RefetchTrigger::Focus => state.config.settings.refetch_on_focus,
                RefetchTrigger::Reconnect => state.config.settings.refetch_on_reconnect,
            };
            let mut keys: Vec<_> = state.subscriptions.subscribed_keys().collect();
            keys.sort();
            keys.into_iter()
                .filter(|key| state.subscriptions.wants_refetch(key, trigger, api_default))
                .filter_map(|key| {
                    let entry = state.query(key)?;
                    (entry.status != QueryStatus::Uninitialized).then(|| refetch_request(key, entry))
                })
                .collect()
        };
        debug!(trigger = ?trigger, refetched = requests.len(), "Refetching subscribed queries");
        for request in requests {
            ctx.dispatch(Action::QueryRequested(request));
        }
    }
}

impl Handler for WindowEventHandler {
    fn handle(&mut self, action: &Action, _reduced: &Reduced, ctx: &mut HandlerContext<'_>) {
        match action {
            Action::FocusChanged { focused: true } => {
                Self::refetch_valid_queries(RefetchTrigger::Focus, ctx);
            }
            Action::ConnectivityChanged { online: true } => {
                Self::refetch_valid_queries(RefetchTrigger::Reconnect, ctx);
            }
            _ => {}
        }
    }
}
