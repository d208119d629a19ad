use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{hash_map::Entry, HashMap};
use std::rc::Rc;

use slotmap::SlotMap;

use crate::cache_observer::{CacheEvent, CacheObserver};
use crate::query::{ListenerKey, Query};
use crate::{QueryKey, QueryState, QueryValue};

slotmap::new_key_type! {
    /// Handle for a registered cache-wide observer.
    pub struct CacheObserverKey;
}

/// The process-wide store: one entry per query key, grouped into typed
/// sub-caches keyed by the value's `TypeId`.
///
/// Owned by the client and shared by every handle. Single-threaded; interior
/// mutability only.
pub(crate) struct QueryCache {
    inner: Rc<CacheInner>,
}

impl Clone for QueryCache {
    fn clone(&self) -> Self {
        QueryCache {
            inner: self.inner.clone(),
        }
    }
}

struct CacheInner {
    cache: RefCell<HashMap<TypeId, Box<dyn CacheEntryTrait>>>,
    observers: RefCell<SlotMap<CacheObserverKey, Rc<dyn CacheObserver>>>,
}

struct CacheEntry<V>(HashMap<QueryKey, Query<V>>);

// Trait to enable cache introspection among distinct typed entry maps.
// Invalidation hands back deferred closures so no map borrow is held while
// subscribers get notified.
trait CacheEntryTrait {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn size(&self) -> usize;
    fn keys(&self) -> Vec<QueryKey>;
    fn invalidator(&self, key: &QueryKey) -> Option<Box<dyn FnOnce() -> bool>>;
    fn invalidators_all(&self) -> Vec<Box<dyn FnOnce() -> bool>>;
}

impl<V> CacheEntryTrait for CacheEntry<V>
where
    V: QueryValue + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn size(&self) -> usize {
        self.0.len()
    }

    fn keys(&self) -> Vec<QueryKey> {
        self.0.keys().cloned().collect()
    }

    fn invalidator(&self, key: &QueryKey) -> Option<Box<dyn FnOnce() -> bool>> {
        let query = self.0.get(key)?.clone();
        Some(Box::new(move || query.mark_invalid()))
    }

    fn invalidators_all(&self) -> Vec<Box<dyn FnOnce() -> bool>> {
        self.0
            .values()
            .map(|query| {
                let query = query.clone();
                Box::new(move || query.mark_invalid()) as Box<dyn FnOnce() -> bool>
            })
            .collect()
    }
}

impl QueryCache {
    pub(crate) fn new() -> Self {
        QueryCache {
            inner: Rc::new(CacheInner {
                cache: RefCell::new(HashMap::new()),
                observers: RefCell::new(SlotMap::with_key()),
            }),
        }
    }

    pub(crate) fn get_or_create_query<V>(&self, key: QueryKey) -> Query<V>
    where
        V: QueryValue + 'static,
    {
        let (query, created) = {
            let mut cache = self
                .inner
                .cache
                .try_borrow_mut()
                .expect("get_or_create_query borrow_mut");

            let entry: &mut Box<dyn CacheEntryTrait> = match cache.entry(TypeId::of::<V>()) {
                Entry::Occupied(o) => o.into_mut(),
                Entry::Vacant(v) => v.insert(Box::new(CacheEntry::<V>(HashMap::new()))),
            };
            let entry = entry
                .as_any_mut()
                .downcast_mut::<CacheEntry<V>>()
                .expect(EXPECT_CACHE_ERROR);

            match entry.0.entry(key.clone()) {
                Entry::Occupied(o) => (o.get().clone(), false),
                Entry::Vacant(v) => {
                    let query = self.make_query::<V>(key.clone());
                    v.insert(query.clone());
                    (query, true)
                }
            }
        };

        // Notify outside the map borrow: observers are free to read the cache.
        if created {
            self.notify_observers(CacheEvent::Created(key));
        }

        query
    }

    fn make_query<V>(&self, key: QueryKey) -> Query<V>
    where
        V: QueryValue + 'static,
    {
        let weak = Rc::downgrade(&self.inner);
        let evict = {
            let weak = weak.clone();
            let key = key.clone();
            Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    QueryCache { inner }.evict_if_inactive::<V>(&key);
                }
            }) as Rc<dyn Fn()>
        };
        let events = Rc::new(move |event: CacheEvent| {
            if let Some(inner) = weak.upgrade() {
                QueryCache { inner }.notify_observers(event);
            }
        }) as Rc<dyn Fn(CacheEvent)>;

        Query::new(key, evict, events)
    }

    pub(crate) fn get_query<V>(&self, key: &QueryKey) -> Option<Query<V>>
    where
        V: QueryValue + 'static,
    {
        let cache = self.inner.cache.try_borrow().expect("get_query borrow");
        let entry = cache.get(&TypeId::of::<V>())?;
        let entry = entry
            .as_any()
            .downcast_ref::<CacheEntry<V>>()
            .expect(EXPECT_CACHE_ERROR);
        entry.0.get(key).cloned()
    }

    /// Removes the entry if it still has no subscribers. Used by the gc.
    pub(crate) fn evict_if_inactive<V>(&self, key: &QueryKey) -> bool
    where
        V: QueryValue + 'static,
    {
        let evicted = {
            let mut cache = self
                .inner
                .cache
                .try_borrow_mut()
                .expect("evict_if_inactive borrow_mut");
            let Some(entry) = cache.get_mut(&TypeId::of::<V>()) else {
                return false;
            };
            let entry = entry
                .as_any_mut()
                .downcast_mut::<CacheEntry<V>>()
                .expect(EXPECT_CACHE_ERROR);
            match entry.0.get(key) {
                Some(query) if query.listener_count() == 0 => {
                    entry.0.remove(key);
                    true
                }
                _ => false,
            }
        };
        if evicted {
            tracing::debug!(key = %key, "evicted inactive query");
            self.notify_observers(CacheEvent::Evicted(key.clone()));
        }
        evicted
    }

    /// Marks every typed entry under `key` invalid. Returns true if any
    /// entry matched.
    pub(crate) fn invalidate_query(&self, key: &QueryKey) -> bool {
        let invalidators: Vec<Box<dyn FnOnce() -> bool>> = {
            let cache = self
                .inner
                .cache
                .try_borrow()
                .expect("invalidate_query borrow");
            cache
                .values()
                .filter_map(|entry| entry.invalidator(key))
                .collect()
        };
        let mut any = false;
        for invalidate in invalidators {
            any |= invalidate();
        }
        any
    }

    pub(crate) fn invalidate_all_queries(&self) {
        let invalidators: Vec<Box<dyn FnOnce() -> bool>> = {
            let cache = self
                .inner
                .cache
                .try_borrow()
                .expect("invalidate_all_queries borrow");
            cache
                .values()
                .flat_map(|entry| entry.invalidators_all())
                .collect()
        };
        for invalidate in invalidators {
            invalidate();
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.inner
            .cache
            .try_borrow()
            .expect("size borrow")
            .values()
            .map(|entry| entry.size())
            .sum()
    }

    pub(crate) fn clear(&self) {
        let keys: Vec<QueryKey> = {
            let mut cache = self.inner.cache.try_borrow_mut().expect("clear borrow_mut");
            let keys = cache.values().flat_map(|entry| entry.keys()).collect();
            cache.clear();
            keys
        };
        for key in keys {
            self.notify_observers(CacheEvent::Evicted(key));
        }
    }

    pub(crate) fn register_observer(&self, observer: Rc<dyn CacheObserver>) -> CacheObserverKey {
        self.inner
            .observers
            .try_borrow_mut()
            .expect("register_observer borrow_mut")
            .insert(observer)
    }

    pub(crate) fn unregister_observer(&self, key: CacheObserverKey) -> bool {
        self.inner
            .observers
            .try_borrow_mut()
            .expect("unregister_observer borrow_mut")
            .remove(key)
            .is_some()
    }

    pub(crate) fn notify_observers(&self, event: CacheEvent) {
        // Snapshot so observers may (un)register during the pass.
        let observers: Vec<Rc<dyn CacheObserver>> = self
            .inner
            .observers
            .try_borrow()
            .expect("notify_observers borrow")
            .values()
            .cloned()
            .collect();
        for observer in observers {
            observer.process_cache_event(event.clone());
        }
    }
}

/// Guard for a store-level subscription created by
/// [`QueryClient::subscribe`](crate::QueryClient::subscribe).
/// Dropping it unregisters the callback.
pub struct QuerySubscription<V: QueryValue + 'static> {
    query: Query<V>,
    listener: Option<ListenerKey>,
}

impl<V> QuerySubscription<V>
where
    V: QueryValue + 'static,
{
    pub(crate) fn new(query: Query<V>, listener: ListenerKey) -> Self {
        QuerySubscription {
            query,
            listener: Some(listener),
        }
    }

    /// Current state of the subscribed entry.
    pub fn state(&self) -> QueryState<V> {
        self.query.get_state()
    }

    /// Key of the subscribed entry.
    pub fn key(&self) -> &QueryKey {
        self.query.key()
    }
}

impl<V> Drop for QuerySubscription<V>
where
    V: QueryValue + 'static,
{
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.query.unsubscribe(listener);
        }
    }
}

const EXPECT_CACHE_ERROR: &str =
    "Error: Query Cache Type Mismatch. This should not happen. Please file a bug report.";
