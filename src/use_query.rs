use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures_channel::oneshot;

use crate::query::{Listener, ListenerKey, Query};
use crate::query_executor::fetch_with_retry;
use crate::{
    FetchStatus, QueryClient, QueryError, QueryKey, QueryOptions, QueryState, QueryValue,
};

pub(crate) type QueryFetcher<V> =
    Rc<dyn Fn(QueryKey) -> LocalBoxFuture<'static, Result<V, QueryError>>>;

/// An active observer of one cache entry.
///
/// Created by [`QueryClient::query`](crate::QueryClient::query). On creation
/// the handle subscribes to its entry and fetches if the entry holds no fresh
/// data; it refetches when the entry is invalidated. Dropping the handle
/// aborts its in-flight fetch, unsubscribes, and lets the gc clock start once
/// the entry has no other subscribers.
///
/// Handles are single-owner. Multiple handles on the same key share one cache
/// entry and coalesce their initial fetches.
pub struct QueryHandle<V: QueryValue + 'static> {
    inner: Rc<HandleInner<V>>,
}

pub(crate) struct HandleInner<V: QueryValue + 'static> {
    client: QueryClient,
    options: QueryOptions<V>,
    enabled: Cell<bool>,
    fetcher: QueryFetcher<V>,
    query: RefCell<Query<V>>,
    listener: Cell<Option<ListenerKey>>,
    // Abort channel of this handle's in-flight fetch, if any.
    current_fetch: Cell<Option<oneshot::Sender<()>>>,
    active_generation: Cell<Option<u64>>,
    // Guards against the invalidation listener re-entering while refetch()
    // marks the entry invalid itself.
    refetching: Cell<bool>,
}

impl<V> QueryHandle<V>
where
    V: QueryValue + 'static,
{
    pub(crate) fn new(
        client: QueryClient,
        key: QueryKey,
        fetcher: QueryFetcher<V>,
        options: QueryOptions<V>,
    ) -> Self {
        let options = options.validate();
        let query = client.cache().get_or_create_query::<V>(key);
        query.update_gc_time(options.gc_time);

        let enabled = options.enabled;
        let handle = QueryHandle {
            inner: Rc::new(HandleInner {
                client,
                options,
                enabled: Cell::new(enabled),
                fetcher,
                query: RefCell::new(query.clone()),
                listener: Cell::new(None),
                current_fetch: Cell::new(None),
                active_generation: Cell::new(None),
                refetching: Cell::new(false),
            }),
        };

        let listener = query.subscribe(handle.make_listener());
        handle.inner.listener.set(Some(listener));
        handle.arm();
        handle
    }

    fn make_listener(&self) -> Listener<V> {
        let weak = Rc::downgrade(&self.inner);
        Rc::new(move |state: &QueryState<V>| {
            if let Some(inner) = weak.upgrade() {
                QueryHandle { inner }.on_state_change(state);
            }
        })
    }

    /// Refetch trigger: an invalidated entry with no fetch in flight.
    fn on_state_change(&self, state: &QueryState<V>) {
        if self.inner.refetching.get() || !self.inner.enabled.get() {
            return;
        }
        let query = self.query();
        if query.is_invalidated() && !state.is_fetching() {
            self.execute(false);
        }
    }

    /// Seeds initial data and starts the mount fetch when warranted.
    fn arm(&self) {
        if !self.inner.enabled.get() {
            return;
        }
        let query = self.query();
        if let Some(initial) = self.inner.options.initial_data.clone() {
            if query.with_state(|state| state.data().is_none()) {
                query.write_success(initial, self.inner.options.stale_time);
            }
        }
        if query.with_state(|state| state.data().is_none()) || query.is_stale() {
            self.execute(false);
        }
    }

    /// Starts a fetch cycle. Unforced calls coalesce with a fetch already in
    /// flight for the entry; forced calls supersede it.
    fn execute(&self, forced: bool) {
        let inner = &self.inner;
        if !inner.enabled.get() {
            return;
        }
        let query = self.query();
        if !forced && query.is_fetching() {
            return;
        }

        if let Some(abort) = inner.current_fetch.take() {
            let _ = abort.send(());
        }
        let (abort_tx, abort_rx) = oneshot::channel();
        inner.current_fetch.set(Some(abort_tx));
        let generation = query.begin_fetch();
        inner.active_generation.set(Some(generation));
        query.set_fetch_status(FetchStatus::Fetching);

        let fetcher = inner.fetcher.clone();
        let key = query.key().clone();
        let retry = inner.options.retry;
        let stale_time = inner.options.stale_time;
        let trace = inner.client.trace_handle();
        let on_success = inner.options.on_success.clone();
        let on_error = inner.options.on_error.clone();
        let on_settled = inner.options.on_settled.clone();

        tokio::task::spawn_local(async move {
            let hash = key.hash64();
            let make_attempt = {
                let fetcher = fetcher.clone();
                let key = key.clone();
                move || fetcher(key.clone())
            };
            let result = fetch_with_retry(make_attempt, abort_rx, retry, &trace, hash).await;
            match result {
                Ok(value) => {
                    // A superseded fetch's result is discarded wholesale.
                    if query.is_current(generation) {
                        query.write_success(value.clone(), stale_time);
                        if let Some(on_success) = on_success {
                            on_success(&value);
                        }
                        if let Some(on_settled) = on_settled {
                            on_settled();
                        }
                    }
                }
                Err(QueryError::Aborted) => {
                    // The aborting owner may have coalesced other handles
                    // onto this fetch; settle the entry and invalidate so
                    // survivors restart the cycle.
                    if query.is_current(generation) {
                        query.set_fetch_status(FetchStatus::Idle);
                        query.mark_invalid();
                    }
                }
                Err(error) => {
                    if query.is_current(generation) {
                        query.write_error(error.clone());
                        if let Some(on_error) = on_error {
                            on_error(&error);
                        }
                        if let Some(on_settled) = on_settled {
                            on_settled();
                        }
                    }
                }
            }
        });
    }

    fn query(&self) -> Query<V> {
        self.inner.query.try_borrow().expect("query borrow").clone()
    }

    /// Key this handle currently observes.
    pub fn key(&self) -> QueryKey {
        self.query().key().clone()
    }

    /// Snapshot of the observed entry's state.
    pub fn state(&self) -> QueryState<V> {
        self.query().get_state()
    }

    /// Cached data for the key, falling back to the handle's placeholder.
    pub fn data(&self) -> Option<V> {
        self.query()
            .with_state(|state| state.data().cloned())
            .or_else(|| self.inner.options.placeholder_data.clone())
    }

    /// Latest terminal error, if the entry is in the error status.
    pub fn error(&self) -> Option<QueryError> {
        self.query().with_state(|state| state.error.clone())
    }

    /// No fetch has ever settled for this entry.
    pub fn is_pending(&self) -> bool {
        self.query().with_state(|state| state.is_pending())
    }

    /// Pending with a fetch in flight: the first load.
    pub fn is_loading(&self) -> bool {
        self.query().with_state(|state| state.is_loading())
    }

    /// A fetch is in flight, first load or background refresh alike.
    pub fn is_fetching(&self) -> bool {
        self.query().is_fetching()
    }

    /// The last settle wrote data.
    pub fn is_success(&self) -> bool {
        self.query().with_state(|state| state.is_success())
    }

    /// The last settle wrote an error.
    pub fn is_error(&self) -> bool {
        self.query().with_state(|state| state.is_error())
    }

    /// Whether the entry's data is stale (aged out or invalidated).
    pub fn is_stale(&self) -> bool {
        self.query().is_stale()
    }

    /// Forces a fresh fetch, superseding any fetch in flight.
    pub fn refetch(&self) {
        if !self.inner.enabled.get() {
            return;
        }
        self.inner.refetching.set(true);
        self.query().mark_invalid();
        self.inner.refetching.set(false);
        self.execute(true);
    }

    /// Moves the handle to a different key.
    ///
    /// The in-flight fetch (if any) is aborted, the old entry keeps its data
    /// and may be gc'd once unobserved, and the handle mounts on the new key
    /// exactly as on creation.
    pub fn set_key(&self, key: QueryKey) {
        let inner = &self.inner;
        let old = self.query();
        if old.key() == &key {
            return;
        }

        if let Some(abort) = inner.current_fetch.take() {
            let _ = abort.send(());
        }
        if let Some(generation) = inner.active_generation.take() {
            old.end_fetch(generation);
        }
        if let Some(listener) = inner.listener.take() {
            old.unsubscribe(listener);
        }

        let query = inner.client.cache().get_or_create_query::<V>(key);
        query.update_gc_time(inner.options.gc_time);
        let listener = query.subscribe(self.make_listener());
        inner.listener.set(Some(listener));
        *inner.query.try_borrow_mut().expect("set_key borrow_mut") = query;

        self.arm();
    }

    /// Gates fetching. Disabling aborts the in-flight fetch; enabling re-arms
    /// the handle as on creation.
    pub fn set_enabled(&self, enabled: bool) {
        let inner = &self.inner;
        if inner.enabled.get() == enabled {
            return;
        }
        inner.enabled.set(enabled);
        if enabled {
            self.arm();
        } else {
            if let Some(abort) = inner.current_fetch.take() {
                let _ = abort.send(());
            }
            if let Some(generation) = inner.active_generation.take() {
                self.query().end_fetch(generation);
            }
        }
    }

    /// Whether this handle currently fetches at all.
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.get()
    }
}

impl<V> Drop for HandleInner<V>
where
    V: QueryValue + 'static,
{
    fn drop(&mut self) {
        if let Some(abort) = self.current_fetch.take() {
            let _ = abort.send(());
        }
        let query = self.query.get_mut();
        if let Some(generation) = self.active_generation.take() {
            query.end_fetch(generation);
        }
        if let Some(listener) = self.listener.take() {
            query.unsubscribe(listener);
        }
    }
}
