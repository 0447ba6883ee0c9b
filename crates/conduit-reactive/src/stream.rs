//! `Stream<T>`: a multi-listener event emitter with no current value,
//! the base primitive every other reactive type in this crate is built
//! from (§4.1).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::listener::Listener;

type Callback<T> = Box<dyn FnMut(&T) + Send>;

struct Inner<T> {
    listeners: Mutex<HashMap<u64, Callback<T>>>,
    /// Ids unsubscribed while a callback for that same id was mid-dispatch
    /// (see [`Stream::emit`]); checked before a taken-out callback is put
    /// back so a listener that drops itself during its own callback stays
    /// gone instead of being resurrected.
    tombstones: Mutex<HashSet<u64>>,
    next_id: AtomicU64,
}

/// An event stream with no notion of "current value" — every [`Stream::on`]
/// subscriber only sees events emitted after it subscribes. [`crate::Value`]
/// and the mutable collections are built on top of one of these plus a
/// stored current state.
pub struct Stream<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> Default for Stream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Stream<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                listeners: Mutex::new(HashMap::new()),
                tombstones: Mutex::new(HashSet::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to future emissions. The callback fires on whichever
    /// task/thread calls [`Stream::emit`]; it must not block.
    pub fn on(&self, mut callback: impl FnMut(&T) + Send + 'static) -> Listener {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap()
            .insert(id, Box::new(move |v| callback(v)));

        let inner = self.inner.clone();
        Listener::new(move || {
            if inner.listeners.lock().unwrap().remove(&id).is_none() {
                // Not present: either never dispatched, or currently
                // mid-dispatch and taken out by `emit`. Either way, make
                // sure it does not get reinserted afterward.
                inner.tombstones.lock().unwrap().insert(id);
            }
        })
    }

    /// Emit an event to every current subscriber. Subscribers added from
    /// within a callback do not see this emission; subscribers removed
    /// from within a callback (including a listener removing itself) do
    /// not fire again after being removed.
    pub fn emit(&self, value: &T) {
        let ids: Vec<u64> = {
            let listeners = self.inner.listeners.lock().unwrap();
            listeners.keys().copied().collect()
        };
        for id in ids {
            let callback = self.inner.listeners.lock().unwrap().remove(&id);
            let Some(mut callback) = callback else {
                continue;
            };
            callback(value);
            let mut tombstones = self.inner.tombstones.lock().unwrap();
            if tombstones.remove(&id) {
                continue;
            }
            drop(tombstones);
            self.inner.listeners.lock().unwrap().entry(id).or_insert(callback);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn emit_reaches_subscribers() {
        let stream: Stream<i32> = Stream::new();
        let seen = Arc::new(AtomicI32::new(0));
        let seen2 = seen.clone();
        let _listener = stream.on(move |v| {
            seen2.store(*v, Ordering::SeqCst);
        });
        stream.emit(&42);
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn dropping_listener_unsubscribes() {
        let stream: Stream<i32> = Stream::new();
        let seen = Arc::new(AtomicI32::new(0));
        let seen2 = seen.clone();
        let listener = stream.on(move |v| {
            seen2.store(*v, Ordering::SeqCst);
        });
        drop(listener);
        stream.emit(&7);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(stream.listener_count(), 0);
    }
}
