//! Middleware pipeline.
//!
//! Runs after every reduced action, in a fixed order, and is the only place
//! side effects start: base query calls, timers, refetches and lifecycle
//! hooks. Handlers never dispatch directly; follow-up actions are queued on
//! the [`HandlerContext`] and reduced by the same dispatch loop.

use std::collections::VecDeque;
use std::sync::{Arc, RwLockReadGuard};

use crate::cache::{Action, ApiState, Reduced};
use crate::endpoints::EndpointRegistry;
use crate::engine::Engine;

mod collection;
mod invalidation;
pub mod lifecycle;
mod polling;
mod thunks;
mod timers;
mod window_events;

use collection::CollectionHandler;
use invalidation::InvalidationHandler;
use lifecycle::LifecycleHandler;
use polling::PollingHandler;
use thunks::ThunkHandler;
use window_events::WindowEventHandler;

/// Everything a handler may touch while reacting to one action.
pub(crate) struct HandlerContext<'a> {
    pub(crate) engine: &'a Arc<Engine>,
    pub(crate) endpoints: &'a Arc<EndpointRegistry>,
    queue: &'a mut VecDeque<Action>,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(
        engine: &'a Arc<Engine>,
        endpoints: &'a Arc<EndpointRegistry>,
        queue: &'a mut VecDeque<Action>,
    ) -> Self {
        Self {
            engine,
            endpoints,
            queue,
        }
    }

    /// Queue a follow-up action; it is reduced after the current one.
    pub(crate) fn dispatch(&mut self, action: Action) {
        self.queue.push_back(action);
    }

    pub(crate) fn state(&self) -> RwLockReadGuard<'_, ApiState> {
        self.engine.store.read()
    }
}

/// One pass of the pipeline.
pub(crate) trait Handler: Send {
    fn handle(&mut self, action: &Action, reduced: &Reduced, ctx: &mut HandlerContext<'_>);
}

/// Handlers in execution order.
pub(crate) struct Pipeline {
    thunks: ThunkHandler,
    collection: CollectionHandler,
    invalidation: InvalidationHandler,
    polling: PollingHandler,
    window_events: WindowEventHandler,
    lifecycle: LifecycleHandler,
}

impl Pipeline {
    pub(crate) fn new() -> Self {
        Self {
            thunks: ThunkHandler,
            collection: CollectionHandler::new(),
            invalidation: InvalidationHandler::new(),
            polling: PollingHandler::new(),
            window_events: WindowEventHandler,
            lifecycle: LifecycleHandler::new(),
        }
    }

    pub(crate) fn handle(&mut self, action: &Action, reduced: &Reduced, ctx: &mut HandlerContext<'_>) {
        self.thunks.handle(action, reduced, ctx);
        self.collection.handle(action, reduced, ctx);
        self.invalidation.handle(action, reduced, ctx);
        self.polling.handle(action, reduced, ctx);
        self.window_events.handle(action, reduced, ctx);
        self.lifecycle.handle(action, reduced, ctx);
    }

    /// Keys with a pending removal timer.
    pub(crate) fn scheduled_removals(&self) -> Vec<crate::cache::QueryCacheKey> {
        self.collection.scheduled()
    }

    /// Keys with an active polling timer.
    pub(crate) fn active_polls(&self) -> Vec<crate::cache::QueryCacheKey> {
        self.polling.scheduled()
    }
}
