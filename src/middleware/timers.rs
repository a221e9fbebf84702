//! Keyed one-shot timers.
//!
//! A firing timer never touches state itself: it dispatches an action carrying
//! its generation, and the owning handler ignores it unless that generation is
//! still current. Rescheduling or cancelling a key therefore can never race an
//! already-elapsed timer into acting twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::{Action, QueryCacheKey};
use crate::engine::Engine;

struct ScheduledTimer {
    generation: u64,
    deadline: Instant,
    handle: JoinHandle<()>,
}

pub(crate) struct TimerSet {
    kind: &'static str,
    timers: HashMap<QueryCacheKey, ScheduledTimer>,
    next_generation: u64,
}

impl TimerSet {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            timers: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Arm (or re-arm) the timer for `cache_key`.
    ///
    /// `fire` builds the action dispatched when the delay elapses.
    pub(crate) fn schedule(
        &mut self,
        engine: &Arc<Engine>,
        cache_key: &QueryCacheKey,
        delay: Duration,
        fire: impl FnOnce(QueryCacheKey, u64) -> Action,
    ) -> Instant {
        self.cancel(cache_key);

        self.next_generation += 1;
        let generation = self.next_generation;
        let deadline = Instant::now() + delay;
        let action = fire(cache_key.clone(), generation);
        let weak = Arc::downgrade(engine);
        let handle = engine.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(engine) = weak.upgrade() {
                engine.dispatch(action);
            }
        });

        debug!(
            timer = self.kind,
            cache_key = %cache_key,
            generation,
            delay_ms = delay.as_millis() as u64,
            "Timer scheduled"
        );
        self.timers.insert(
            cache_key.clone(),
            ScheduledTimer {
                generation,
                deadline,
                handle,
            },
        );
        deadline
    }

    /// Abort the timer for `cache_key`. Returns true if one was armed.
    pub(crate) fn cancel(&mut self, cache_key: &QueryCacheKey) -> bool {
        match self.timers.remove(cache_key) {
            Some(timer) => {
                timer.handle.abort();
                debug!(timer = self.kind, cache_key = %cache_key, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Claim an elapsed timer. False when it was superseded or cancelled.
    pub(crate) fn take_if_current(&mut self, cache_key: &QueryCacheKey, generation: u64) -> bool {
        match self.timers.get(cache_key) {
            Some(timer) if timer.generation == generation => {
                self.timers.remove(cache_key);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn deadline(&self, cache_key: &QueryCacheKey) -> Option<Instant> {
        self.timers.get(cache_key).map(|timer| timer.deadline)
    }

    pub(crate) fn keys(&self) -> Vec<QueryCacheKey> {
        let mut keys: Vec<QueryCacheKey> = self.timers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub(crate) fn clear(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.clear();
    }
}
