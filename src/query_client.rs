use std::future::Future;
use std::rc::Rc;

use futures::FutureExt;

use crate::cache_observer::CacheObserver;
use crate::infinite_query::{InfiniteQueryHandle, InfiniteQueryOptions, PageFetcher};
use crate::mutation::{MutationHandle, MutationOptions, Mutator};
use crate::query_cache::{CacheObserverKey, QueryCache, QuerySubscription};
use crate::trace::TraceSink;
use crate::use_query::{QueryFetcher, QueryHandle};
use crate::{
    DefaultQueryOptions, QueryError, QueryKey, QueryOptions, QueryState, QueryValue,
};

/// Provides the query cache and the operations to read, write and observe it.
///
/// Cheap to clone; clones share one cache. The client is single-threaded and
/// expects to run on a current-thread runtime inside a
/// [`tokio::task::LocalSet`], which hosts the fetch and gc tasks.
pub struct QueryClient {
    inner: Rc<ClientInner>,
}

impl Clone for QueryClient {
    fn clone(&self) -> Self {
        QueryClient {
            inner: self.inner.clone(),
        }
    }
}

struct ClientInner {
    cache: QueryCache,
    default_options: DefaultQueryOptions,
    trace: Rc<TraceSink>,
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryClient {
    /// A client with the stock defaults (10s stale time, 5min gc time,
    /// 3 retries).
    pub fn new() -> Self {
        Self::with_options(DefaultQueryOptions::default())
    }

    /// A client with custom client-scope defaults.
    pub fn with_options(default_options: DefaultQueryOptions) -> Self {
        QueryClient {
            inner: Rc::new(ClientInner {
                cache: QueryCache::new(),
                default_options,
                trace: Rc::new(TraceSink::new()),
            }),
        }
    }

    pub(crate) fn cache(&self) -> QueryCache {
        self.inner.cache.clone()
    }

    pub(crate) fn trace_handle(&self) -> Rc<TraceSink> {
        self.inner.trace.clone()
    }

    /// The fetch lifecycle trace of this client.
    pub fn trace(&self) -> &TraceSink {
        &self.inner.trace
    }

    /// The client-scope defaults.
    pub fn default_options(&self) -> DefaultQueryOptions {
        self.inner.default_options
    }

    /// Per-query options seeded from this client's defaults.
    pub fn query_options<V>(&self) -> QueryOptions<V> {
        QueryOptions::from_defaults(&self.inner.default_options)
    }

    /// Mounts a query handle on `key`.
    ///
    /// `fetcher` is invoked with the key for the initial fetch and every
    /// refetch. See [`QueryHandle`] for the lifecycle.
    pub fn query<V, F, Fu>(
        &self,
        key: QueryKey,
        fetcher: F,
        options: QueryOptions<V>,
    ) -> QueryHandle<V>
    where
        V: QueryValue + 'static,
        F: Fn(QueryKey) -> Fu + 'static,
        Fu: Future<Output = Result<V, QueryError>> + 'static,
    {
        let fetcher: QueryFetcher<V> = Rc::new(move |key| fetcher(key).boxed_local());
        QueryHandle::new(self.clone(), key, fetcher, options)
    }

    /// Mounts a paginated query handle on `key`.
    ///
    /// `fetcher` is invoked with the key and a page parameter, once per page.
    pub fn infinite_query<V, P, F, Fu>(
        &self,
        key: QueryKey,
        fetcher: F,
        options: InfiniteQueryOptions<V, P>,
    ) -> InfiniteQueryHandle<V, P>
    where
        V: QueryValue + 'static,
        P: Clone + std::fmt::Debug + 'static,
        F: Fn(QueryKey, P) -> Fu + 'static,
        Fu: Future<Output = Result<V, QueryError>> + 'static,
    {
        let fetcher: PageFetcher<V, P> =
            Rc::new(move |key, param| fetcher(key, param).boxed_local());
        InfiniteQueryHandle::new(self.clone(), key, fetcher, options)
    }

    /// Builds a mutation handle.
    pub fn mutation<A, T, F, Fu>(
        &self,
        mutator: F,
        options: MutationOptions<T>,
    ) -> MutationHandle<A, T>
    where
        A: 'static,
        T: Clone + 'static,
        F: Fn(A) -> Fu + 'static,
        Fu: Future<Output = Result<T, QueryError>> + 'static,
    {
        let mutator: Mutator<A, T> = Rc::new(move |args| mutator(args).boxed_local());
        MutationHandle::new(self.clone(), mutator, options)
    }

    /// Writes `data` for `key` directly, as if a fetch had just succeeded.
    /// Subscribers are notified and the staleness window restarts.
    pub fn set_query_data<V>(&self, key: QueryKey, data: V)
    where
        V: QueryValue + 'static,
    {
        let query = self.inner.cache.get_or_create_query::<V>(key);
        query.update_gc_time(self.inner.default_options.gc_time);
        query.write_success(data, self.inner.default_options.stale_time);
    }

    /// Rewrites the data for `key` through `updater`.
    ///
    /// Bails out and returns false when the entry holds no data; the updater
    /// is then never called.
    pub fn update_query_data<V, F>(&self, key: &QueryKey, updater: F) -> bool
    where
        V: QueryValue + 'static,
        F: FnOnce(&V) -> V,
    {
        let Some(query) = self.inner.cache.get_query::<V>(key) else {
            return false;
        };
        let Some(current) = query.with_state(|state| state.data().cloned()) else {
            return false;
        };
        query.write_success(updater(&current), self.inner.default_options.stale_time);
        true
    }

    /// Reads the cached data for `key` without touching the entry.
    pub fn get_query_data<V>(&self, key: &QueryKey) -> Option<V>
    where
        V: QueryValue + 'static,
    {
        self.inner
            .cache
            .get_query::<V>(key)?
            .with_state(|state| state.data().cloned())
    }

    /// Reads the full state for `key` without touching the entry.
    pub fn peek_query_state<V>(&self, key: &QueryKey) -> Option<QueryState<V>>
    where
        V: QueryValue + 'static,
    {
        Some(self.inner.cache.get_query::<V>(key)?.get_state())
    }

    /// Whether the entry for `key` is stale. An absent entry is stale.
    pub fn is_stale<V>(&self, key: &QueryKey) -> bool
    where
        V: QueryValue + 'static,
    {
        self.inner
            .cache
            .get_query::<V>(key)
            .map(|query| query.is_stale())
            .unwrap_or(true)
    }

    /// Subscribes `callback` to every state change of the entry for `key`.
    ///
    /// The entry is created if absent, and counts as observed (so it is not
    /// gc'd) until the returned guard is dropped.
    pub fn subscribe<V, F>(&self, key: QueryKey, callback: F) -> QuerySubscription<V>
    where
        V: QueryValue + 'static,
        F: Fn(&QueryState<V>) + 'static,
    {
        let query = self.inner.cache.get_or_create_query::<V>(key);
        query.update_gc_time(self.inner.default_options.gc_time);
        let listener = query.subscribe(Rc::new(callback));
        QuerySubscription::new(query, listener)
    }

    /// Marks every entry under `key` stale, across all value types. Active
    /// handles refetch. Returns true if any entry was newly invalidated.
    pub fn invalidate_query(&self, key: &QueryKey) -> bool {
        self.inner.cache.invalidate_query(key)
    }

    /// Marks every cached entry stale.
    pub fn invalidate_all_queries(&self) {
        self.inner.cache.invalidate_all_queries();
    }

    /// Registers a cache-wide observer for entry lifecycle events.
    pub fn register_observer(&self, observer: Rc<dyn CacheObserver>) -> CacheObserverKey {
        self.inner.cache.register_observer(observer)
    }

    /// Unregisters a cache-wide observer. Returns false if unknown.
    pub fn unregister_observer(&self, key: CacheObserverKey) -> bool {
        self.inner.cache.unregister_observer(key)
    }

    /// Number of cached entries, across all value types.
    pub fn size(&self) -> usize {
        self.inner.cache.size()
    }

    /// Drops every cached entry. Subscribed handles keep their detached
    /// entries alive until dropped.
    pub fn clear(&self) {
        self.inner.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use crate::cache_observer::{CacheEvent, CacheObserver};
    use crate::query_key;

    use super::*;

    #[test]
    fn set_and_get_query_data() {
        let client = QueryClient::new();
        let key = query_key!["user", 1];

        assert_eq!(client.get_query_data::<String>(&key), None);
        client.set_query_data(key.clone(), "alice".to_string());
        assert_eq!(
            client.get_query_data::<String>(&key),
            Some("alice".to_string())
        );
        assert_eq!(client.size(), 1);
    }

    #[test]
    fn update_query_data_bails_without_data() {
        let client = QueryClient::new();
        let key = query_key!["count"];

        let updated = client.update_query_data(&key, |n: &u32| n + 1);
        assert!(!updated, "no entry, no update");

        client.set_query_data(key.clone(), 1u32);
        let updated = client.update_query_data(&key, |n: &u32| n + 1);
        assert!(updated);
        assert_eq!(client.get_query_data::<u32>(&key), Some(2));
    }

    #[test]
    fn same_key_different_value_types_are_distinct_entries() {
        let client = QueryClient::new();
        let key = query_key!["thing"];

        client.set_query_data(key.clone(), 1u32);
        client.set_query_data(key.clone(), "one".to_string());

        assert_eq!(client.size(), 2);
        assert_eq!(client.get_query_data::<u32>(&key), Some(1));
        assert_eq!(client.get_query_data::<String>(&key), Some("one".to_string()));
    }

    #[test]
    fn subscriber_sees_writes_until_dropped() {
        let client = QueryClient::new();
        let key = query_key!["feed"];

        let seen = Rc::new(RefCell::new(Vec::new()));
        let subscription = client.subscribe(key.clone(), {
            let seen = seen.clone();
            move |state: &QueryState<u32>| seen.borrow_mut().push(state.data().copied())
        });

        client.set_query_data(key.clone(), 1u32);
        client.set_query_data(key.clone(), 2u32);
        assert_eq!(*seen.borrow(), vec![Some(1), Some(2)]);
        assert_eq!(subscription.key(), &key);

        drop(subscription);
        client.set_query_data(key.clone(), 3u32);
        assert_eq!(*seen.borrow(), vec![Some(1), Some(2)]);
    }

    #[test]
    fn invalidate_marks_entry_stale() {
        let client = QueryClient::new();
        let key = query_key!["posts", 7];

        client.set_query_data(key.clone(), vec![1u32, 2, 3]);
        assert!(!client.is_stale::<Vec<u32>>(&key), "fresh after write");

        assert!(client.invalidate_query(&key));
        assert!(client.is_stale::<Vec<u32>>(&key));
        assert!(
            !client.invalidate_query(&key),
            "already invalidated entries do not re-report"
        );
    }

    #[test]
    fn invalidate_spans_value_types() {
        let client = QueryClient::new();
        let key = query_key!["mixed"];

        client.set_query_data(key.clone(), 1u32);
        client.set_query_data(key.clone(), "one".to_string());
        assert!(client.invalidate_query(&key));
        assert!(client.is_stale::<u32>(&key));
        assert!(client.is_stale::<String>(&key));
    }

    #[test]
    fn missing_entry_is_stale() {
        let client = QueryClient::new();
        assert!(client.is_stale::<u32>(&query_key!["nowhere"]));
    }

    #[test]
    fn clear_empties_the_cache() {
        let client = QueryClient::new();
        client.set_query_data(query_key!["a"], 1u32);
        client.set_query_data(query_key!["b"], 2u32);
        assert_eq!(client.size(), 2);

        client.clear();
        assert_eq!(client.size(), 0);
        assert_eq!(client.get_query_data::<u32>(&query_key!["a"]), None);
    }

    struct CountingObserver {
        created: Cell<usize>,
        updated: Cell<usize>,
        evicted: Cell<usize>,
    }

    impl CacheObserver for CountingObserver {
        fn process_cache_event(&self, event: CacheEvent) {
            match event {
                CacheEvent::Created(_) => self.created.set(self.created.get() + 1),
                CacheEvent::Updated(_) => self.updated.set(self.updated.get() + 1),
                CacheEvent::Evicted(_) => self.evicted.set(self.evicted.get() + 1),
            }
        }
    }

    #[test]
    fn observer_sees_entry_lifecycle() {
        let client = QueryClient::new();
        let observer = Rc::new(CountingObserver {
            created: Cell::new(0),
            updated: Cell::new(0),
            evicted: Cell::new(0),
        });
        let registration = client.register_observer(observer.clone());

        client.set_query_data(query_key!["a"], 1u32);
        client.set_query_data(query_key!["a"], 2u32);
        client.clear();

        assert_eq!(observer.created.get(), 1);
        assert_eq!(observer.updated.get(), 2);
        assert_eq!(observer.evicted.get(), 1);

        assert!(client.unregister_observer(registration));
        client.set_query_data(query_key!["b"], 3u32);
        assert_eq!(observer.created.get(), 1, "unregistered observer is quiet");
    }
}
