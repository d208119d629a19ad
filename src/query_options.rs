use std::rc::Rc;
use std::time::Duration;

use crate::{QueryError, RetryPolicy};

const DEFAULT_STALE_TIME: Duration = Duration::from_secs(10);
const DEFAULT_GC_TIME: Duration = Duration::from_secs(60 * 5);

/// Default options for all queries under one client.
/// Only differs from [`QueryOptions`] in that it carries no per-query values.
#[derive(Debug, Clone, Copy)]
pub struct DefaultQueryOptions {
    /// Time before a successful write is considered stale.
    pub stale_time: Option<Duration>,
    /// Time before an entry with no subscribers is evicted.
    pub gc_time: Option<Duration>,
    /// Retry policy for fetches.
    pub retry: RetryPolicy,
}

impl Default for DefaultQueryOptions {
    fn default() -> Self {
        DefaultQueryOptions {
            stale_time: Some(DEFAULT_STALE_TIME),
            gc_time: Some(DEFAULT_GC_TIME),
            retry: RetryPolicy::default(),
        }
    }
}

pub(crate) type SuccessCallback<V> = Rc<dyn Fn(&V)>;
pub(crate) type ErrorCallback = Rc<dyn Fn(&QueryError)>;
pub(crate) type SettledCallback = Rc<dyn Fn()>;

/// Options for a single query handle.
///
/// `stale_time` can never be greater than `gc_time`; [`validate`](Self::validate)
/// clamps it. If different handles use different `gc_time` for the same key,
/// the maximum is kept.
#[derive(Clone)]
pub struct QueryOptions<V> {
    /// Gate on fetching. A disabled handle never fetches; enabling re-arms it.
    pub enabled: bool,
    /// The duration that should pass before a successful write is considered
    /// stale. `None` means never stale by age.
    pub stale_time: Option<Duration>,
    /// How long an entry with no subscribers stays cached.
    pub gc_time: Option<Duration>,
    /// Retry policy for this handle's fetches.
    pub retry: RetryPolicy,
    /// Seeds the cache on mount when it holds nothing for the key.
    pub initial_data: Option<V>,
    /// Display-only filler while loading. Never written to the cache and
    /// ignored the instant real data arrives.
    pub placeholder_data: Option<V>,
    pub(crate) on_success: Option<SuccessCallback<V>>,
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) on_settled: Option<SettledCallback>,
}

impl<V> Default for QueryOptions<V> {
    fn default() -> Self {
        QueryOptions::from_defaults(&DefaultQueryOptions::default())
    }
}

impl<V> QueryOptions<V> {
    /// Options seeded from client-scope defaults.
    pub fn from_defaults(defaults: &DefaultQueryOptions) -> Self {
        QueryOptions {
            enabled: true,
            stale_time: defaults.stale_time,
            gc_time: defaults.gc_time,
            retry: defaults.retry,
            initial_data: None,
            placeholder_data: None,
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }

    /// Set the enabled gate.
    pub fn set_enabled(self, enabled: bool) -> Self {
        QueryOptions { enabled, ..self }
    }

    /// Set the stale time.
    pub fn set_stale_time(self, stale_time: Option<Duration>) -> Self {
        QueryOptions { stale_time, ..self }
    }

    /// Set the gc time.
    pub fn set_gc_time(self, gc_time: Option<Duration>) -> Self {
        QueryOptions { gc_time, ..self }
    }

    /// Set the retry policy.
    pub fn set_retry(self, retry: RetryPolicy) -> Self {
        QueryOptions { retry, ..self }
    }

    /// Set the initial data.
    pub fn set_initial_data(self, initial_data: Option<V>) -> Self {
        QueryOptions {
            initial_data,
            ..self
        }
    }

    /// Set the placeholder data.
    pub fn set_placeholder_data(self, placeholder_data: Option<V>) -> Self {
        QueryOptions {
            placeholder_data,
            ..self
        }
    }

    /// Called once per successful settle with the fetched value.
    pub fn on_success(self, callback: impl Fn(&V) + 'static) -> Self {
        QueryOptions {
            on_success: Some(Rc::new(callback)),
            ..self
        }
    }

    /// Called once per terminal failure. Never called for aborted fetches.
    pub fn on_error(self, callback: impl Fn(&QueryError) + 'static) -> Self {
        QueryOptions {
            on_error: Some(Rc::new(callback)),
            ..self
        }
    }

    /// Called once after every settle, success or failure.
    pub fn on_settled(self, callback: impl Fn() + 'static) -> Self {
        QueryOptions {
            on_settled: Some(Rc::new(callback)),
            ..self
        }
    }

    /// Ensures that `gc_time >= stale_time`.
    pub fn validate(self) -> Self {
        let stale_time = ensure_valid_stale_time(&self.stale_time, &self.gc_time);
        QueryOptions { stale_time, ..self }
    }
}

impl<V> std::fmt::Debug for QueryOptions<V>
where
    V: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptions")
            .field("enabled", &self.enabled)
            .field("stale_time", &self.stale_time)
            .field("gc_time", &self.gc_time)
            .field("retry", &self.retry)
            .field("initial_data", &self.initial_data)
            .field("placeholder_data", &self.placeholder_data)
            .finish()
    }
}

fn ensure_valid_stale_time(
    stale_time: &Option<Duration>,
    gc_time: &Option<Duration>,
) -> Option<Duration> {
    match (stale_time, gc_time) {
        (Some(ref stale_time), Some(ref gc_time)) => {
            if stale_time > gc_time {
                tracing::warn!(
                    "stale_time is greater than gc_time. Using gc_time instead. stale_time: {}, gc_time: {}",
                    stale_time.as_millis(),
                    gc_time.as_millis()
                );
                Some(*gc_time)
            } else {
                Some(*stale_time)
            }
        }
        (None, Some(ref gc_duration)) => {
            tracing::warn!(
                "stale_time (infinity) is greater than gc_time. Using gc_time instead. gc_time: {}",
                gc_duration.as_millis()
            );
            *gc_time
        }
        (stale_time, _) => *stale_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_stale_time_less_than_gc_time() {
        let options = QueryOptions::<i32>::default()
            .set_stale_time(Some(Duration::from_secs(5)))
            .set_gc_time(Some(Duration::from_secs(10)))
            .validate();

        assert_eq!(
            options.stale_time,
            Some(Duration::from_secs(5)),
            "stale_time should remain unchanged"
        );
        assert_eq!(
            options.gc_time,
            Some(Duration::from_secs(10)),
            "gc_time should remain unchanged"
        );
    }

    #[test]
    fn validate_stale_time_greater_than_gc_time() {
        let options = QueryOptions::<i32>::default()
            .set_stale_time(Some(Duration::from_secs(15)))
            .set_gc_time(Some(Duration::from_secs(10)))
            .validate();

        assert_eq!(
            options.stale_time,
            Some(Duration::from_secs(10)),
            "stale_time should be clamped to gc_time"
        );
        assert_eq!(options.gc_time, Some(Duration::from_secs(10)));
    }

    #[test]
    fn validate_stale_time_without_gc_time() {
        let options = QueryOptions::<i32>::default()
            .set_stale_time(Some(Duration::from_secs(5)))
            .set_gc_time(None)
            .validate();

        assert_eq!(options.stale_time, Some(Duration::from_secs(5)));
        assert_eq!(options.gc_time, None);
    }

    #[test]
    fn validate_gc_time_without_stale_time() {
        let options = QueryOptions::<i32>::default()
            .set_stale_time(None)
            .set_gc_time(Some(Duration::from_secs(10)))
            .validate();

        assert_eq!(
            options.stale_time,
            Some(Duration::from_secs(10)),
            "stale_time should become gc_time"
        );
        assert_eq!(options.gc_time, Some(Duration::from_secs(10)));
    }

    #[test]
    fn validate_none_stale_and_gc_time() {
        let options = QueryOptions::<i32>::default()
            .set_stale_time(None)
            .set_gc_time(None)
            .validate();

        assert_eq!(options.stale_time, None);
        assert_eq!(options.gc_time, None);
    }
}
