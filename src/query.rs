use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use slotmap::SlotMap;

use crate::cache_observer::CacheEvent;
use crate::garbage_collector::GarbageCollector;
use crate::instant::Instant;
use crate::util::time_until_stale;
use crate::{FetchStatus, QueryData, QueryError, QueryKey, QueryState, QueryStatus};

slotmap::new_key_type! {
    /// Handle for one registered per-entry state listener.
    pub struct ListenerKey;
}

pub(crate) type Listener<V> = Rc<dyn Fn(&QueryState<V>)>;

/// One cache entry: the state for a single query key plus its staleness
/// metadata, subscriber set and gc bookkeeping.
///
/// Cheap to clone; all interior state is shared. State transitions are
/// monotonic per fetch cycle (`Pending -> Success | Error`); only
/// invalidation re-opens the cycle.
pub(crate) struct Query<V> {
    key: QueryKey,
    state: Rc<RefCell<QueryState<V>>>,
    stale_time: Rc<Cell<Option<Duration>>>,
    invalidated: Rc<Cell<bool>>,
    // Bumped per started fetch; a superseded fetch's resolution is discarded.
    generation: Rc<Cell<u64>>,
    listeners: Rc<RefCell<SlotMap<ListenerKey, Listener<V>>>>,
    gc: Rc<GarbageCollector>,
    events: Rc<dyn Fn(CacheEvent)>,
}

impl<V> Clone for Query<V> {
    fn clone(&self) -> Self {
        Query {
            key: self.key.clone(),
            state: self.state.clone(),
            stale_time: self.stale_time.clone(),
            invalidated: self.invalidated.clone(),
            generation: self.generation.clone(),
            listeners: self.listeners.clone(),
            gc: self.gc.clone(),
            events: self.events.clone(),
        }
    }
}

impl<V> PartialEq for Query<V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<V> Eq for Query<V> {}

impl<V> Query<V>
where
    V: crate::QueryValue + 'static,
{
    pub(crate) fn new(
        key: QueryKey,
        evict: Rc<dyn Fn()>,
        events: Rc<dyn Fn(CacheEvent)>,
    ) -> Self {
        Query {
            key,
            state: Rc::new(RefCell::new(QueryState::default())),
            stale_time: Rc::new(Cell::new(None)),
            invalidated: Rc::new(Cell::new(false)),
            generation: Rc::new(Cell::new(0)),
            listeners: Rc::new(RefCell::new(SlotMap::with_key())),
            gc: Rc::new(GarbageCollector::new(evict)),
            events,
        }
    }

    pub(crate) fn key(&self) -> &QueryKey {
        &self.key
    }

    pub(crate) fn get_state(&self) -> QueryState<V> {
        self.state.try_borrow().expect("get_state borrow").clone()
    }

    // Useful to avoid clones.
    pub(crate) fn with_state<T>(&self, func: impl FnOnce(&QueryState<V>) -> T) -> T {
        func(&self.state.try_borrow().expect("with_state borrow"))
    }

    /// Records a successful fetch result. Clears invalidation, re-arms the
    /// staleness window and settles the fetch status.
    pub(crate) fn write_success(&self, data: V, stale_time: Option<Duration>) {
        {
            let mut state = self.state.try_borrow_mut().expect("write_success borrow");
            state.status = QueryStatus::Success;
            state.fetch_status = FetchStatus::Idle;
            state.data = Some(QueryData::now(data));
            state.error = None;
        }
        self.stale_time.set(stale_time);
        self.invalidated.set(false);
        self.gc.new_update(Instant::now());
        self.notify();
    }

    /// Records a terminal fetch error. Prior data is kept.
    ///
    /// Like a success, an error settle consumes a pending invalidation; the
    /// refetch cycle re-opens only via a new invalidation.
    pub(crate) fn write_error(&self, error: QueryError) {
        {
            let mut state = self.state.try_borrow_mut().expect("write_error borrow");
            state.status = QueryStatus::Error;
            state.fetch_status = FetchStatus::Idle;
            state.error = Some(error);
        }
        self.invalidated.set(false);
        self.notify();
    }

    pub(crate) fn set_fetch_status(&self, fetch_status: FetchStatus) {
        let changed = {
            let mut state = self
                .state
                .try_borrow_mut()
                .expect("set_fetch_status borrow");
            let changed = state.fetch_status != fetch_status;
            state.fetch_status = fetch_status;
            changed
        };
        if changed {
            self.notify();
        }
    }

    /// Marks the entry invalid, which makes it stale immediately.
    /// Returns false if it was already invalidated.
    pub(crate) fn mark_invalid(&self) -> bool {
        if self.invalidated.get() {
            return false;
        }
        self.invalidated.set(true);
        self.notify();
        true
    }

    pub(crate) fn is_invalidated(&self) -> bool {
        self.invalidated.get()
    }

    pub(crate) fn is_fetching(&self) -> bool {
        self.with_state(|state| state.is_fetching())
    }

    pub(crate) fn is_stale(&self) -> bool {
        if self.invalidated.get() {
            return true;
        }
        let updated_at = self.with_state(|state| state.updated_at());
        match (updated_at, self.stale_time.get()) {
            // Nothing fetched yet.
            (None, _) => true,
            // No stale time: never stale by age.
            (Some(_), None) => false,
            (Some(updated_at), Some(stale_time)) => {
                time_until_stale(updated_at, stale_time).is_zero()
            }
        }
    }

    /**
     * Subscriptions.
     */

    pub(crate) fn subscribe(&self, listener: Listener<V>) -> ListenerKey {
        let key = self
            .listeners
            .try_borrow_mut()
            .expect("subscribe borrow_mut")
            .insert(listener);
        self.gc.disable();
        key
    }

    pub(crate) fn unsubscribe(&self, key: ListenerKey) -> bool {
        let (removed, empty) = {
            let mut listeners = self
                .listeners
                .try_borrow_mut()
                .expect("unsubscribe borrow_mut");
            let removed = listeners.remove(key).is_some();
            (removed, listeners.is_empty())
        };
        if empty {
            self.gc.enable();
        }
        removed
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners
            .try_borrow()
            .expect("listener_count borrow")
            .len()
    }

    fn notify(&self) {
        let state = self.get_state();
        // Snapshot so listeners may (un)subscribe during the pass without
        // being skipped or double-called.
        let listeners: Vec<Listener<V>> = self
            .listeners
            .try_borrow()
            .expect("notify borrow")
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener(&state);
        }
        (self.events)(CacheEvent::Updated(self.key.clone()));
    }

    /**
     * Execution bookkeeping.
     */

    /// Registers a newly started fetch and returns its generation.
    pub(crate) fn begin_fetch(&self) -> u64 {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        generation
    }

    /// Whether `generation` is still the latest fetch for this entry.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.get() == generation
    }

    /// Settles the fetch status if `generation` was not superseded.
    pub(crate) fn end_fetch(&self, generation: u64) {
        if self.is_current(generation) {
            self.set_fetch_status(FetchStatus::Idle);
        }
    }

    pub(crate) fn update_gc_time(&self, gc_time: Option<Duration>) {
        self.gc.update_gc_time(gc_time);
    }
}
