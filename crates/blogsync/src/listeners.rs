//! Callback registry used for cache change and job progress notifications.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Handle returned by [`ListenerRegistry::add`], used to remove the listener.
pub type ListenerId = u64;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A set of callbacks invoked with every emitted event.
///
/// The listener list is snapshotted before delivery, so a listener may add or
/// remove listeners (itself included) from inside its own callback. A listener
/// that panics is logged and skipped; the remaining listeners still run.
pub struct ListenerRegistry<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Callback<E>)>>,
}

impl<E> ListenerRegistry<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Delivers `event` to every listener registered at the time of the call.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<(ListenerId, Callback<E>)> = self.lock().clone();

        for (id, listener) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                log::error!("Listener {} panicked while handling an event", id);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ListenerId, Callback<E>)>> {
        match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Listener registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl<E> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Invokes a single callback, isolating panics.
///
/// Returns false if the callback panicked.
pub(crate) fn deliver<E>(callback: &(dyn Fn(&E) + Send + Sync), event: &E) -> bool {
    catch_unwind(AssertUnwindSafe(|| callback(event))).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_all_listeners() {
        let registry = ListenerRegistry::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let total = Arc::clone(&total);
            registry.add(move |value| {
                total.fetch_add(*value as usize, Ordering::SeqCst);
            });
        }

        registry.emit(&2);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_remove_listener() {
        let registry = ListenerRegistry::<()>::new();
        let id = registry.add(|_| {});
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let registry = ListenerRegistry::<()>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        registry.add(|_| panic!("broken observer"));
        let counter = Arc::clone(&calls);
        registry.add(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.emit(&());
        registry.emit(&());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_can_unsubscribe_itself() {
        let registry = Arc::new(ListenerRegistry::<()>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let own_id = Arc::new(AtomicU64::new(0));

        let weak = Arc::downgrade(&registry);
        let counter = Arc::clone(&calls);
        let id_cell = Arc::clone(&own_id);
        let id = registry.add(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(registry) = weak.upgrade() {
                registry.remove(id_cell.load(Ordering::SeqCst));
            }
        });
        own_id.store(id, Ordering::SeqCst);

        let other = Arc::new(AtomicUsize::new(0));
        let other_counter = Arc::clone(&other);
        registry.add(move |_| {
            other_counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.emit(&());
        registry.emit(&());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 2);
    }
}
