use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use crate::instant::Instant;
use crate::util::time_until_stale;

/// Evicts an inactive cache entry once `gc_time` passes without subscribers.
///
/// Armed when the last subscriber unregisters, disarmed when one returns.
/// The eviction closure is supplied by the cache and re-checks that the entry
/// is still inactive before removing it.
pub(crate) struct GarbageCollector {
    gc_time: Cell<Option<Duration>>,
    updated_at: Cell<Option<Instant>>,
    task: Cell<Option<tokio::task::JoinHandle<()>>>,
    evict: Rc<dyn Fn()>,
}

impl GarbageCollector {
    pub(crate) fn new(evict: Rc<dyn Fn()>) -> Self {
        GarbageCollector {
            gc_time: Cell::new(None),
            updated_at: Cell::new(None),
            task: Cell::new(None),
            evict,
        }
    }

    /// Keep the maximum gc time seen across handles.
    pub(crate) fn update_gc_time(&self, gc_time: Option<Duration>) {
        match (self.gc_time.get(), gc_time) {
            (Some(current), Some(gc_time)) if gc_time > current => {
                self.gc_time.set(Some(gc_time));
            }
            (None, Some(gc_time)) => {
                self.gc_time.set(Some(gc_time));
            }
            _ => {}
        }
    }

    pub(crate) fn new_update(&self, updated_at: Instant) {
        self.updated_at.set(Some(updated_at));
    }

    pub(crate) fn enable(&self) {
        let task = self.task.take();
        if task.is_some() {
            self.task.set(task);
            return;
        }
        let (Some(gc_time), Some(updated_at)) = (self.gc_time.get(), self.updated_at.get()) else {
            return;
        };
        // Without a runtime there is no timer to arm; entries then live until
        // evicted explicitly.
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let delay = time_until_stale(updated_at, gc_time);
        let evict = self.evict.clone();
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            evict();
        });
        self.task.set(Some(handle));
    }

    pub(crate) fn disable(&self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        self.disable();
    }
}
