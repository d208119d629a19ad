use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures_channel::oneshot;

use crate::query::{Listener, ListenerKey, Query};
use crate::query_executor::fetch_with_retry;
use crate::{
    FetchStatus, QueryClient, QueryError, QueryKey, QueryOptions, QueryState, QueryValue,
};

/// The accumulated pages of an infinite query, in order.
///
/// `pages[i]` was fetched with `page_params[i]`; the two vectors always have
/// equal length. This is the value stored in the cache, so other handles and
/// store subscribers observe the whole accumulation.
#[derive(Debug, Clone, PartialEq)]
pub struct InfiniteData<V, P> {
    /// Fetched pages, oldest first.
    pub pages: Vec<V>,
    /// The parameter each page was fetched with.
    pub page_params: Vec<P>,
}

impl<V, P> InfiniteData<V, P>
where
    V: Clone,
    P: Clone,
{
    /// An accumulation of exactly one page.
    pub fn single(page: V, param: P) -> Self {
        InfiniteData {
            pages: vec![page],
            page_params: vec![param],
        }
    }

    /// A copy with `page` appended at the end.
    pub fn appended(&self, page: V, param: P) -> Self {
        let mut next = self.clone();
        next.pages.push(page);
        next.page_params.push(param);
        next
    }

    /// A copy with `page` prepended at the front.
    pub fn prepended(&self, page: V, param: P) -> Self {
        let mut next = self.clone();
        next.pages.insert(0, page);
        next.page_params.insert(0, param);
        next
    }
}

/// Derives the next (or previous) page parameter from the last (or first)
/// fetched page and the full page list. `None` means that direction is
/// exhausted.
pub type PageParamFn<V, P> = Rc<dyn Fn(&V, &[V]) -> Option<P>>;

pub(crate) type PageFetcher<V, P> =
    Rc<dyn Fn(QueryKey, P) -> LocalBoxFuture<'static, Result<V, QueryError>>>;

/// Options for an infinite query handle.
pub struct InfiniteQueryOptions<V, P> {
    /// Options shared with plain queries; `initial_data` seeds the whole
    /// accumulation.
    pub query: QueryOptions<InfiniteData<V, P>>,
    /// Parameter of the first page.
    pub initial_page_param: P,
    /// Derives the parameter for [`fetch_next_page`](InfiniteQueryHandle::fetch_next_page).
    pub get_next_page_param: PageParamFn<V, P>,
    /// Derives the parameter for [`fetch_previous_page`](InfiniteQueryHandle::fetch_previous_page).
    /// Without it, backwards pagination is unavailable.
    pub get_previous_page_param: Option<PageParamFn<V, P>>,
}

impl<V, P> InfiniteQueryOptions<V, P> {
    /// Options with the given first-page parameter and forward pagination.
    pub fn new(
        initial_page_param: P,
        get_next_page_param: impl Fn(&V, &[V]) -> Option<P> + 'static,
    ) -> Self {
        InfiniteQueryOptions {
            query: QueryOptions::default(),
            initial_page_param,
            get_next_page_param: Rc::new(get_next_page_param),
            get_previous_page_param: None,
        }
    }

    /// Replace the shared query options.
    pub fn set_query(self, query: QueryOptions<InfiniteData<V, P>>) -> Self {
        InfiniteQueryOptions { query, ..self }
    }

    /// Enable backwards pagination.
    pub fn get_previous_page_param(
        self,
        callback: impl Fn(&V, &[V]) -> Option<P> + 'static,
    ) -> Self {
        InfiniteQueryOptions {
            get_previous_page_param: Some(Rc::new(callback)),
            ..self
        }
    }
}

/// An active observer of a paginated cache entry.
///
/// Created by [`QueryClient::infinite_query`](crate::QueryClient::infinite_query).
/// The initial fetch loads one page with `initial_page_param`;
/// [`fetch_next_page`](Self::fetch_next_page) extends the accumulation one
/// page at a time. Refetching and invalidation reset the entry to a fresh
/// first page.
pub struct InfiniteQueryHandle<V, P>
where
    V: QueryValue + 'static,
    P: Clone + std::fmt::Debug + 'static,
{
    inner: Rc<InfiniteInner<V, P>>,
}

pub(crate) struct InfiniteInner<V, P>
where
    V: QueryValue + 'static,
    P: Clone + std::fmt::Debug + 'static,
{
    client: QueryClient,
    options: InfiniteQueryOptions<V, P>,
    enabled: Cell<bool>,
    fetcher: PageFetcher<V, P>,
    query: RefCell<Query<InfiniteData<V, P>>>,
    listener: Cell<Option<ListenerKey>>,
    current_fetch: Cell<Option<oneshot::Sender<()>>>,
    active_generation: Cell<Option<u64>>,
    refetching: Cell<bool>,
}

impl<V, P> InfiniteQueryHandle<V, P>
where
    V: QueryValue + 'static,
    P: Clone + std::fmt::Debug + 'static,
{
    pub(crate) fn new(
        client: QueryClient,
        key: QueryKey,
        fetcher: PageFetcher<V, P>,
        options: InfiniteQueryOptions<V, P>,
    ) -> Self {
        let options = InfiniteQueryOptions {
            query: options.query.validate(),
            ..options
        };
        let query = client
            .cache()
            .get_or_create_query::<InfiniteData<V, P>>(key);
        query.update_gc_time(options.query.gc_time);

        let enabled = options.query.enabled;
        let handle = InfiniteQueryHandle {
            inner: Rc::new(InfiniteInner {
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

    fn make_listener(&self) -> Listener<InfiniteData<V, P>> {
        let weak = Rc::downgrade(&self.inner);
        Rc::new(move |state: &QueryState<InfiniteData<V, P>>| {
            if let Some(inner) = weak.upgrade() {
                InfiniteQueryHandle { inner }.on_state_change(state);
            }
        })
    }

    fn on_state_change(&self, state: &QueryState<InfiniteData<V, P>>) {
        if self.inner.refetching.get() || !self.inner.enabled.get() {
            return;
        }
        let query = self.query();
        if query.is_invalidated() && !state.is_fetching() {
            self.execute_initial(false);
        }
    }

    fn arm(&self) {
        if !self.inner.enabled.get() {
            return;
        }
        let query = self.query();
        if let Some(initial) = self.inner.options.query.initial_data.clone() {
            if query.with_state(|state| state.data().is_none()) {
                query.write_success(initial, self.inner.options.query.stale_time);
            }
        }
        if query.with_state(|state| state.data().is_none()) || query.is_stale() {
            self.execute_initial(false);
        }
    }

    /// Starts a first-page fetch. On success the accumulation is REPLACED by
    /// the single fresh page.
    fn execute_initial(&self, forced: bool) {
        let inner = &self.inner;
        if !inner.enabled.get() {
            return;
        }
        let query = self.query();
        if !forced && query.is_fetching() {
            return;
        }

        let (abort_rx, generation) = self.begin(&query);
        let fetcher = inner.fetcher.clone();
        let key = query.key().clone();
        let param = inner.options.initial_page_param.clone();
        let retry = inner.options.query.retry;
        let stale_time = inner.options.query.stale_time;
        let trace = inner.client.trace_handle();
        let on_success = inner.options.query.on_success.clone();
        let on_error = inner.options.query.on_error.clone();
        let on_settled = inner.options.query.on_settled.clone();

        tokio::task::spawn_local(async move {
            let hash = key.hash64();
            let make_attempt = {
                let fetcher = fetcher.clone();
                let key = key.clone();
                let param = param.clone();
                move || fetcher(key.clone(), param.clone())
            };
            let result = fetch_with_retry(make_attempt, abort_rx, retry, &trace, hash).await;
            match result {
                Ok(page) => {
                    if query.is_current(generation) {
                        let data = InfiniteData::single(page, param);
                        query.write_success(data.clone(), stale_time);
                        if let Some(on_success) = on_success {
                            on_success(&data);
                        }
                        if let Some(on_settled) = on_settled {
                            on_settled();
                        }
                    }
                }
                Err(QueryError::Aborted) => {
                    // Settle and invalidate so handles coalesced onto this
                    // fetch restart the cycle.
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

    /// Fetches one more page at the end of the accumulation.
    ///
    /// No-op when the handle is disabled, when no initial data exists yet, or
    /// when `get_next_page_param` reports the forward direction exhausted.
    pub fn fetch_next_page(&self) {
        let get_param = self.inner.options.get_next_page_param.clone();
        self.fetch_page(get_param, Direction::Forward);
    }

    /// Fetches one more page at the front of the accumulation.
    ///
    /// No-op without a `get_previous_page_param` callback, and under the same
    /// conditions as [`fetch_next_page`](Self::fetch_next_page).
    pub fn fetch_previous_page(&self) {
        let Some(get_param) = self.inner.options.get_previous_page_param.clone() else {
            return;
        };
        self.fetch_page(get_param, Direction::Backward);
    }

    fn fetch_page(&self, get_param: PageParamFn<V, P>, direction: Direction) {
        let inner = &self.inner;
        if !inner.enabled.get() {
            return;
        }
        let query = self.query();
        let Some(param) = query.with_state(|state| {
            let data = state.data()?;
            let edge = match direction {
                Direction::Forward => data.pages.last()?,
                Direction::Backward => data.pages.first()?,
            };
            get_param(edge, &data.pages)
        }) else {
            return;
        };

        let (abort_rx, generation) = self.begin(&query);
        let fetcher = inner.fetcher.clone();
        let key = query.key().clone();
        let retry = inner.options.query.retry;
        let stale_time = inner.options.query.stale_time;
        let trace = inner.client.trace_handle();
        let on_success = inner.options.query.on_success.clone();
        let on_error = inner.options.query.on_error.clone();
        let on_settled = inner.options.query.on_settled.clone();

        tokio::task::spawn_local(async move {
            let hash = key.hash64();
            let make_attempt = {
                let fetcher = fetcher.clone();
                let key = key.clone();
                let param = param.clone();
                move || fetcher(key.clone(), param.clone())
            };
            let result = fetch_with_retry(make_attempt, abort_rx, retry, &trace, hash).await;
            match result {
                Ok(page) => {
                    if query.is_current(generation) {
                        // Merge into whatever the cache holds NOW; the
                        // accumulation may have changed since the fetch began.
                        let merged = query.with_state(|state| {
                            state.data().map(|data| match direction {
                                Direction::Forward => data.appended(page.clone(), param.clone()),
                                Direction::Backward => data.prepended(page.clone(), param.clone()),
                            })
                        });
                        // A page for an entry that lost its data is dropped.
                        if let Some(data) = merged {
                            query.write_success(data.clone(), stale_time);
                            if let Some(on_success) = on_success {
                                on_success(&data);
                            }
                            if let Some(on_settled) = on_settled {
                                on_settled();
                            }
                        }
                    }
                }
                Err(QueryError::Aborted) => {
                    // Settle and invalidate so handles coalesced onto this
                    // fetch restart the cycle.
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

    /// Aborts this handle's in-flight fetch and registers a new one.
    fn begin(&self, query: &Query<InfiniteData<V, P>>) -> (oneshot::Receiver<()>, u64) {
        let inner = &self.inner;
        if let Some(abort) = inner.current_fetch.take() {
            let _ = abort.send(());
        }
        let (abort_tx, abort_rx) = oneshot::channel();
        inner.current_fetch.set(Some(abort_tx));
        let generation = query.begin_fetch();
        inner.active_generation.set(Some(generation));
        query.set_fetch_status(FetchStatus::Fetching);
        (abort_rx, generation)
    }

    fn query(&self) -> Query<InfiniteData<V, P>> {
        self.inner.query.try_borrow().expect("query borrow").clone()
    }

    /// Key this handle observes.
    pub fn key(&self) -> QueryKey {
        self.query().key().clone()
    }

    /// Snapshot of the observed entry's state.
    pub fn state(&self) -> QueryState<InfiniteData<V, P>> {
        self.query().get_state()
    }

    /// The accumulated pages, if any page has been fetched.
    pub fn data(&self) -> Option<InfiniteData<V, P>> {
        self.query().with_state(|state| state.data().cloned())
    }

    /// Latest terminal error, if the entry is in the error status.
    pub fn error(&self) -> Option<QueryError> {
        self.query().with_state(|state| state.error.clone())
    }

    /// Whether `get_next_page_param` reports a further page.
    /// False until the first page arrives.
    pub fn has_next_page(&self) -> bool {
        let get_param = &self.inner.options.get_next_page_param;
        self.query()
            .with_state(|state| {
                let data = state.data()?;
                let last = data.pages.last()?;
                get_param(last, &data.pages)
            })
            .is_some()
    }

    /// Whether backwards pagination is available and reports a further page.
    pub fn has_previous_page(&self) -> bool {
        let Some(get_param) = &self.inner.options.get_previous_page_param else {
            return false;
        };
        self.query()
            .with_state(|state| {
                let data = state.data()?;
                let first = data.pages.first()?;
                get_param(first, &data.pages)
            })
            .is_some()
    }

    /// A fetch (initial or page) is in flight.
    pub fn is_fetching(&self) -> bool {
        self.query().is_fetching()
    }

    /// No fetch has ever settled for this entry.
    pub fn is_pending(&self) -> bool {
        self.query().with_state(|state| state.is_pending())
    }

    /// The last settle wrote data.
    pub fn is_success(&self) -> bool {
        self.query().with_state(|state| state.is_success())
    }

    /// The last settle wrote an error.
    pub fn is_error(&self) -> bool {
        self.query().with_state(|state| state.is_error())
    }

    /// Whether the accumulation is stale (aged out or invalidated).
    pub fn is_stale(&self) -> bool {
        self.query().is_stale()
    }

    /// Forces a fresh first page, discarding the accumulation on success.
    pub fn refetch(&self) {
        if !self.inner.enabled.get() {
            return;
        }
        self.inner.refetching.set(true);
        self.query().mark_invalid();
        self.inner.refetching.set(false);
        self.execute_initial(true);
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

impl<V, P> Drop for InfiniteInner<V, P>
where
    V: QueryValue + 'static,
    P: Clone + std::fmt::Debug + 'static,
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
