use std::time::Duration;

use crate::cache::{Data, RefetchPolicy, SubscriptionOptions};

/// Options for [`crate::Api::initiate`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Count the caller as a subscriber until it unsubscribes.
    pub subscribe: bool,
    /// Overrides the API's `refetch_on_mount_or_arg_change`.
    pub force_refetch: Option<RefetchPolicy>,
    pub subscription_options: SubscriptionOptions,
    /// Infinite queries only: first page param when nothing is cached.
    pub initial_page_param: Option<Data>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            subscribe: true,
            force_refetch: None,
            subscription_options: SubscriptionOptions::default(),
            initial_page_param: None,
        }
    }
}

impl QueryOptions {
    pub fn unsubscribed() -> Self {
        Self {
            subscribe: false,
            ..Self::default()
        }
    }

    pub fn force_refetch(mut self, policy: impl Into<RefetchPolicy>) -> Self {
        self.force_refetch = Some(policy.into());
        self
    }

    pub fn subscription(mut self, options: SubscriptionOptions) -> Self {
        self.subscription_options = options;
        self
    }

    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.subscription_options.polling_interval = Some(interval);
        self
    }

    pub fn initial_page_param(mut self, param: impl Into<Data>) -> Self {
        self.initial_page_param = Some(param.into());
        self
    }
}

/// Options for [`crate::Api::initiate_mutation`].
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOptions {
    /// Keep the mutation's state in the cache.
    pub track: bool,
    /// Share one mutation entry across calls.
    pub fixed_cache_key: Option<String>,
}

impl Default for MutationOptions {
    fn default() -> Self {
        Self {
            track: true,
            fixed_cache_key: None,
        }
    }
}

impl MutationOptions {
    pub fn untracked() -> Self {
        Self {
            track: false,
            fixed_cache_key: None,
        }
    }

    pub fn fixed_cache_key(mut self, key: impl Into<String>) -> Self {
        self.fixed_cache_key = Some(key.into());
        self
    }
}

/// Options for [`crate::Api::prefetch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchOptions {
    /// Fetch even when cached data exists.
    pub force: bool,
    /// Fetch only when the cached data is at least this old.
    pub if_older_than: Option<Duration>,
}

impl PrefetchOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            if_older_than: None,
        }
    }

    pub fn if_older_than(max_age: Duration) -> Self {
        Self {
            force: false,
            if_older_than: Some(max_age),
        }
    }

    pub(crate) fn policy(self) -> RefetchPolicy {
        match (self.force, self.if_older_than) {
            (true, _) => RefetchPolicy::Always,
            (false, Some(max_age)) => RefetchPolicy::IfOlderThan(max_age),
            (false, None) => RefetchPolicy::Never,
        }
    }
}

/// One entry for [`crate::Api::upsert_query_entries`].
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertQuery {
    pub endpoint_name: String,
    pub arg: Data,
    pub value: Data,
}

impl UpsertQuery {
    pub fn new(endpoint_name: impl Into<String>, arg: impl Into<Data>, value: impl Into<Data>) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            arg: arg.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_subscribe_and_mutations_track_by_default() {
        assert!(QueryOptions::default().subscribe);
        assert!(!QueryOptions::unsubscribed().subscribe);
        assert!(MutationOptions::default().track);
    }

    #[test]
    fn prefetch_force_wins_over_age() {
        let options = PrefetchOptions {
            force: true,
            if_older_than: Some(Duration::from_secs(5)),
        };
        assert_eq!(options.policy(), RefetchPolicy::Always);
        assert_eq!(
            PrefetchOptions::if_older_than(Duration::from_secs(5)).policy(),
            RefetchPolicy::IfOlderThan(Duration::from_secs(5))
        );
        assert_eq!(PrefetchOptions::default().policy(), RefetchPolicy::Never);
    }
}
