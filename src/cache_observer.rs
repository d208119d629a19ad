use crate::QueryKey;

/// Subscribing to cache-wide events.
///
/// Observers see entry lifecycle transitions for every key in the cache.
/// The devtools-style consumers hook in here; the per-entry subscriber
/// callbacks registered through handles are a separate, typed channel.
pub trait CacheObserver {
    /// Receive a cache event.
    fn process_cache_event(&self, event: CacheEvent);
}

/// The events that can be observed from the query cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// An entry was inserted for this key.
    Created(QueryKey),
    /// The state of this key's entry changed.
    Updated(QueryKey),
    /// This key's entry was removed from the cache.
    Evicted(QueryKey),
}

impl CacheEvent {
    /// The key the event refers to.
    pub fn key(&self) -> &QueryKey {
        match self {
            CacheEvent::Created(key) | CacheEvent::Updated(key) | CacheEvent::Evicted(key) => key,
        }
    }
}
