//! Retrying base query decorator.
//!
//! Wraps any [`BaseQuery`] and retries failed calls with exponential backoff
//! and jitter. Aborted requests are never retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::base_query::{BaseQuery, BaseQueryApi, BaseQueryFailure, BaseQueryResult, QueryOutcome};
use crate::cache::Data;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
const BACKOFF_BASE_MS: u64 = 300;
/// Endpoint `extra_options` key overriding the retry count.
pub const MAX_RETRIES_OPTION: &str = "maxRetries";

/// What a retry condition gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext<'a> {
    /// Retries made so far, including the one being considered.
    pub attempt: u32,
    pub max_retries: u32,
    pub args: &'a Data,
    pub result: &'a BaseQueryResult,
    pub extra_options: &'a Data,
}

pub type RetryConditionFn = Arc<dyn Fn(&RetryContext<'_>) -> bool + Send + Sync>;
/// `(attempt, max_retries) -> delay`.
pub type BackoffFn = Arc<dyn Fn(u32, u32) -> Duration + Send + Sync>;

/// `(random + 0.4) * 300ms * 2^attempt`, with the exponent capped at
/// `max_retries`.
pub fn default_backoff(attempt: u32, max_retries: u32) -> Duration {
    let exponent = attempt.min(max_retries).min(16);
    let jitter = rand::random::<f64>() + 0.4;
    let millis = jitter * (BACKOFF_BASE_MS << exponent) as f64;
    Duration::from_millis(millis as u64)
}

/// A base query that retries `inner`.
pub struct Retry<B> {
    inner: B,
    max_retries: u32,
    retry_condition: Option<RetryConditionFn>,
    backoff: BackoffFn,
}

/// Wrap `inner` with the default retry policy.
pub fn retry<B: BaseQuery>(inner: B) -> Retry<B> {
    Retry {
        inner,
        max_retries: DEFAULT_MAX_RETRIES,
        retry_condition: None,
        backoff: Arc::new(default_backoff),
    }
}

impl<B: BaseQuery> Retry<B> {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Replace the default "retry while under `max_retries`" decision.
    pub fn retry_condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&RetryContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Some(Arc::new(f));
        self
    }

    pub fn backoff<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, u32) -> Duration + Send + Sync + 'static,
    {
        self.backoff = Arc::new(f);
        self
    }

    fn should_retry(&self, context: &RetryContext<'_>) -> bool {
        match &self.retry_condition {
            Some(condition) => condition(context),
            None => context.attempt <= context.max_retries,
        }
    }
}

fn is_retryable(result: &BaseQueryResult) -> bool {
    match result {
        Ok(QueryOutcome::Data { .. }) => false,
        Ok(QueryOutcome::Error { .. }) => true,
        Err(failure) => !failure.is_abort(),
    }
}

#[async_trait]
impl<B: BaseQuery> BaseQuery for Retry<B> {
    async fn execute(&self, args: Data, api: BaseQueryApi, extra_options: Data) -> BaseQueryResult {
        let max_retries = extra_options
            .get(MAX_RETRIES_OPTION)
            .and_then(Data::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(self.max_retries);

        let mut attempt = 0;
        loop {
            let result = self
                .inner
                .execute(args.clone(), api.clone(), extra_options.clone())
                .await;
            if api.signal.is_aborted() {
                return Err(BaseQueryFailure::aborted());
            }
            if !is_retryable(&result) {
                return result;
            }

            attempt += 1;
            let context = RetryContext {
                attempt,
                max_retries,
                args: &args,
                result: &result,
                extra_options: &extra_options,
            };
            if !self.should_retry(&context) {
                return result;
            }

            let delay = (self.backoff)(attempt, max_retries);
            debug!(
                endpoint = %api.endpoint,
                attempt,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                "Retrying base query"
            );
            tokio::select! {
                biased;
                _ = api.signal.aborted() => return Err(BaseQueryFailure::aborted()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_query::base_query_fn;
    use crate::endpoints::EndpointKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn flaky(failures: u32, calls: Arc<AtomicU32>) -> impl BaseQuery {
        base_query_fn(move |_args: Data, _api, _extra| {
            let calls = Arc::clone(&calls);
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call <= failures {
                    Err(BaseQueryFailure::new("connection reset"))
                } else {
                    Ok(QueryOutcome::data(Data::from(json!({"call": call}))))
                }
            }
        })
    }

    fn api() -> BaseQueryApi {
        BaseQueryApi::detached("getPost", EndpointKind::Query)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let base = retry(flaky(2, Arc::clone(&calls)));
        let result = base.execute(Data::Null, api(), Data::Null).await;
        assert_eq!(result, Ok(QueryOutcome::data(Data::from(json!({"call": 3})))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let base = retry(flaky(10, Arc::clone(&calls))).max_retries(2);
        let result = base.execute(Data::Null, api(), Data::Null).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn extra_options_override_the_retry_count() {
        let calls = Arc::new(AtomicU32::new(0));
        let base = retry(flaky(10, Arc::clone(&calls)));
        let extra = Data::from(json!({"maxRetries": 0}));
        let result = base.execute(Data::Null, api(), extra).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handled_errors_follow_the_condition() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let inner = base_query_fn(move |_args: Data, _api, _extra| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(QueryOutcome::error(Data::from(json!({"status": 404})))) }
        });
        let base = retry(inner).retry_condition(|context| {
            let status = match context.result {
                Ok(QueryOutcome::Error { error, .. }) => error.get("status").and_then(Data::as_i64),
                _ => None,
            };
            status.is_some_and(|status| status >= 500) && context.attempt <= context.max_retries
        });
        let result = base.execute(Data::Null, api(), Data::Null).await;
        assert!(matches!(result, Ok(QueryOutcome::Error { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn aborting_stops_the_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let base = retry(flaky(10, Arc::clone(&calls)));
        let api = api();
        let signal = api.signal.clone();
        let task = tokio::spawn(async move { base.execute(Data::Null, api, Data::Null).await });
        tokio::task::yield_now().await;
        signal.abort();
        let result = task.await.unwrap();
        assert_eq!(result, Err(BaseQueryFailure::aborted()));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        for _ in 0..20 {
            let first = default_backoff(1, 5);
            assert!(first >= Duration::from_millis(240) && first < Duration::from_millis(840));
            let capped = default_backoff(9, 2);
            assert!(capped < Duration::from_millis(1_680));
        }
    }
}
