//! Per-API cache configuration.
//!
//! Controls retention, refetch triggers and invalidation ordering. Values come
//! from [`crate::config::ApiSettings`] or are set directly on the builder.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// Default values for cache configuration
const DEFAULT_KEEP_UNUSED_DATA_FOR_SECS: f64 = 60.0;
/// Largest delay a 32-bit millisecond timer can hold, in whole seconds.
pub const DEFAULT_MAX_TIMER_DELAY_SECS: u64 = 2_147_483_647 / 1_000 - 1;
pub const DEFAULT_KEY_MEMO_CAPACITY: usize = 256;

/// How long an entry without subscribers is kept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Retention {
    Seconds(f64),
    Forever,
}

impl Retention {
    /// Timer delay for this retention, clamped to `[0, max_delay]`.
    ///
    /// `None` means the entry is never collected.
    pub fn delay(self, max_delay: Duration) -> Option<Duration> {
        match self {
            Retention::Forever => None,
            Retention::Seconds(secs) if secs.is_infinite() && secs > 0.0 => None,
            Retention::Seconds(secs) => {
                let secs = if secs.is_nan() { 0.0 } else { secs.max(0.0) };
                Some(Duration::from_secs_f64(secs.min(max_delay.as_secs_f64())))
            }
        }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Retention::Seconds(DEFAULT_KEEP_UNUSED_DATA_FOR_SECS)
    }
}

/// Whether a request should bypass cached data: `refetchOnMountOrArgChange`,
/// `forceRefetch`, and the prefetch `ifOlderThan` option share this shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefetchPolicy {
    #[default]
    Never,
    Always,
    /// Refetch when the cached result is at least this old.
    IfOlderThan(Duration),
}

impl RefetchPolicy {
    /// Decide against the age of the last fulfilled result.
    ///
    /// Entries that never fulfilled count as infinitely old.
    pub fn is_forced(self, fulfilled_at_ms: Option<i64>, now_ms: i64) -> bool {
        match self {
            RefetchPolicy::Never => false,
            RefetchPolicy::Always => true,
            RefetchPolicy::IfOlderThan(max_age) => match fulfilled_at_ms {
                None => true,
                Some(fulfilled) => {
                    let age_ms = now_ms.saturating_sub(fulfilled).max(0);
                    u128::try_from(age_ms).unwrap_or(0) >= max_age.as_millis()
                }
            },
        }
    }
}

impl From<bool> for RefetchPolicy {
    fn from(force: bool) -> Self {
        if force {
            RefetchPolicy::Always
        } else {
            RefetchPolicy::Never
        }
    }
}

/// When invalidation-driven refetches run relative to in-flight requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationBehavior {
    /// Wait until no query or mutation is pending.
    #[default]
    Delayed,
    /// Invalidate as soon as the tags are known.
    Immediate,
}

impl fmt::Display for InvalidationBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationBehavior::Delayed => f.write_str("delayed"),
            InvalidationBehavior::Immediate => f.write_str("immediate"),
        }
    }
}

/// API-wide cache behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    /// Retention for endpoints that do not set their own.
    pub keep_unused_data_for: Retention,
    pub refetch_on_mount_or_arg_change: RefetchPolicy,
    pub refetch_on_focus: bool,
    pub refetch_on_reconnect: bool,
    pub invalidation_behavior: InvalidationBehavior,
    /// Upper bound for any removal or polling timer.
    pub max_timer_delay: Duration,
    /// Capacity of the argument serialization memo.
    pub key_memo_capacity: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            keep_unused_data_for: Retention::default(),
            refetch_on_mount_or_arg_change: RefetchPolicy::Never,
            refetch_on_focus: false,
            refetch_on_reconnect: false,
            invalidation_behavior: InvalidationBehavior::Delayed,
            max_timer_delay: Duration::from_secs(DEFAULT_MAX_TIMER_DELAY_SECS),
            key_memo_capacity: DEFAULT_KEY_MEMO_CAPACITY,
        }
    }
}

impl From<&crate::config::ApiSettings> for ApiConfig {
    fn from(settings: &crate::config::ApiSettings) -> Self {
        Self {
            keep_unused_data_for: settings.keep_unused_data_for,
            refetch_on_mount_or_arg_change: settings.refetch_on_mount_or_arg_change,
            refetch_on_focus: settings.refetch_on_focus,
            refetch_on_reconnect: settings.refetch_on_reconnect,
            invalidation_behavior: settings.invalidation_behavior,
            max_timer_delay: settings.max_timer_delay,
            key_memo_capacity: settings.key_memo_capacity.get(),
        }
    }
}

impl ApiConfig {
    /// Clamp a polling interval the same way removal timers are clamped.
    pub fn clamp_delay(&self, delay: Duration) -> Duration {
        delay.min(self.max_timer_delay)
    }
}
