//! Predicate/callback subscriptions over an incoming report stream.
//!
//! `dispatch` runs on whichever thread delivers reports. Subscribers may be
//! added or removed from any thread, including from inside their own
//! callback. Once `unsubscribe` returns, the callback will not run again: it
//! waits for an in-flight call on another thread to finish, and a call on
//! the same thread (self-removal) only flips the flag.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

struct Subscription<T: ?Sized> {
    id: u64,
    predicate: Predicate<T>,
    callback: Callback<T>,
    once: bool,
    /// Held for the whole predicate + callback call.
    live: ReentrantMutex<Cell<bool>>,
}

struct Subscribers<T: ?Sized> {
    next_id: AtomicU64,
    subs: Mutex<BTreeMap<u64, Arc<Subscription<T>>>>,
}

trait Unregister: Send + Sync {
    fn unregister(&self, id: u64);
}

impl<T: ?Sized + 'static> Unregister for Subscribers<T> {
    fn unregister(&self, id: u64) {
        let removed = self.subs.lock().remove(&id);
        if let Some(sub) = removed {
            sub.live.lock().set(false);
        }
    }
}

/// Registry of subscriptions over items of type `T`.
pub struct EventRegistry<T: ?Sized + 'static> {
    inner: Arc<Subscribers<T>>,
}

impl<T: ?Sized + 'static> Default for EventRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> EventRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Subscribers {
                next_id: AtomicU64::new(1),
                subs: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Register `callback` for every item matching `predicate`.
    pub fn subscribe<P, C>(&self, predicate: P, callback: C) -> EventHandle
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
        C: Fn(&T) + Send + Sync + 'static,
    {
        self.insert(Box::new(predicate), Box::new(callback), false)
    }

    /// Like `subscribe`, but the subscription removes itself before its
    /// callback first runs, so the callback fires at most once.
    pub fn subscribe_once<P, C>(&self, predicate: P, callback: C) -> EventHandle
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
        C: Fn(&T) + Send + Sync + 'static,
    {
        self.insert(Box::new(predicate), Box::new(callback), true)
    }

    fn insert(&self, predicate: Predicate<T>, callback: Callback<T>, once: bool) -> EventHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let sub = Arc::new(Subscription {
            id,
            predicate,
            callback,
            once,
            live: ReentrantMutex::new(Cell::new(true)),
        });
        self.inner.subs.lock().insert(id, sub);

        let registry: Arc<dyn Unregister> = self.inner.clone();
        EventHandle {
            slot: Some((id, Arc::downgrade(&registry))),
        }
    }

    /// Deliver `item` to every matching subscription, in registration order.
    pub fn dispatch(&self, item: &T) {
        let snapshot: Vec<_> = self.inner.subs.lock().values().cloned().collect();

        for sub in snapshot {
            let live = sub.live.lock();
            if !live.get() || !(sub.predicate)(item) {
                continue;
            }
            if sub.once {
                live.set(false);
                self.inner.subs.lock().remove(&sub.id);
            }
            (sub.callback)(item);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.subs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owner of one subscription. Dropping or clearing it unsubscribes.
#[derive(Default)]
pub struct EventHandle {
    slot: Option<(u64, Weak<dyn Unregister>)>,
}

impl EventHandle {
    /// A handle that owns nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }

    /// Unsubscribe now. No-op on an empty handle.
    pub fn clear(&mut self) {
        if let Some((id, registry)) = self.slot.take() {
            if let Some(registry) = registry.upgrade() {
                registry.unregister(id);
            }
        }
    }
}

impl Drop for EventHandle {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for EventHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.slot {
            Some((id, _)) => write!(f, "EventHandle({id})"),
            None => write!(f, "EventHandle(empty)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_dispatch_to_all_matching_in_order() {
        let registry = EventRegistry::<u8>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        let _a = registry.subscribe(|n| n % 2 == 0, move |n| s.lock().push(("even", *n)));
        let s = seen.clone();
        let _b = registry.subscribe(|_| true, move |n| s.lock().push(("any", *n)));

        registry.dispatch(&4);
        registry.dispatch(&5);

        assert_eq!(*seen.lock(), vec![("even", 4), ("any", 4), ("any", 5)]);
    }

    #[test]
    fn test_drop_handle_unsubscribes() {
        let registry = EventRegistry::<u8>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let handle = registry.subscribe(|_| true, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        registry.dispatch(&1);
        drop(handle);
        registry.dispatch(&1);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let registry = EventRegistry::<u8>::new();
        let mut handle = registry.subscribe(|_| true, |_| {});
        assert!(!handle.is_empty());
        handle.clear();
        handle.clear();
        assert!(handle.is_empty());

        let mut empty = EventHandle::empty();
        empty.clear();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_handle_outliving_registry() {
        let registry = EventRegistry::<u8>::new();
        let handle = registry.subscribe(|_| true, |_| {});
        drop(registry);
        drop(handle);
    }

    #[test]
    fn test_once_fires_at_most_once() {
        let registry = EventRegistry::<u8>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let _handle = registry.subscribe_once(|n| *n == 5, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        registry.dispatch(&4);
        registry.dispatch(&5);
        registry.dispatch(&5);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_once_under_concurrent_dispatch() {
        let registry = Arc::new(EventRegistry::<u8>::new());
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let _handle = registry.subscribe_once(|_| true, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.dispatch(&1))
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_from_own_callback() {
        let registry = EventRegistry::<u8>::new();
        let slot: Arc<Mutex<EventHandle>> = Arc::new(Mutex::new(EventHandle::empty()));
        let count = Arc::new(AtomicUsize::new(0));

        let s = slot.clone();
        let c = count.clone();
        let handle = registry.subscribe(|_| true, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            s.lock().clear();
        });
        *slot.lock() = handle;

        registry.dispatch(&1);
        registry.dispatch(&1);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(slot.lock().is_empty());
    }

    #[test]
    fn test_unsubscribe_waits_for_in_flight_callback() {
        let registry = Arc::new(EventRegistry::<u8>::new());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let finished = Arc::new(AtomicUsize::new(0));

        let f = finished.clone();
        let mut handle = registry.subscribe(|_| true, move |_| {
            let _ = entered_tx.send(());
            let _ = release_rx.lock().recv();
            f.fetch_add(1, Ordering::SeqCst);
        });

        let r = registry.clone();
        let dispatcher = thread::spawn(move || r.dispatch(&1));
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let _ = release_tx.send(());
        });
        handle.clear();
        // The callback must have finished before `clear` returned.
        assert_eq!(finished.load(Ordering::SeqCst), 1);

        dispatcher.join().unwrap();
        releaser.join().unwrap();
        registry.dispatch(&1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_from_callback() {
        let registry = Arc::new(EventRegistry::<u8>::new());
        let added = Arc::new(Mutex::new(Vec::new()));

        let r = Arc::downgrade(&registry);
        let a = added.clone();
        let _handle = registry.subscribe(|n| *n == 0, move |_| {
            if let Some(r) = r.upgrade() {
                a.lock().push(r.subscribe(|_| true, |_| {}));
            }
        });

        registry.dispatch(&0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unsized_items() {
        let registry = EventRegistry::<[u8]>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _handle = registry.subscribe(
            |raw| raw.first() == Some(&0x10),
            move |raw| s.lock().push(raw.to_vec()),
        );

        registry.dispatch(&[0x10, 0x01][..]);
        registry.dispatch(&[0x11, 0x01][..]);
        assert_eq!(*seen.lock(), vec![vec![0x10, 0x01]]);
    }
}
