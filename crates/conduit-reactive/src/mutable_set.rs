//! `MutableSet<T>`: a reactive set emitting add/delete events, with an
//! explicit `from_sync` flag on every mutation (§4.1).

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use crate::listener::Listener;
use crate::stream::Stream;

/// An add or delete on a [`MutableSet`]. `from_sync` is `true` when the
/// mutation originated from an inbound sync message rather than local
/// code, so a subscriber that forwards local edits to the server (or vice
/// versa) can avoid echoing a change back to where it came from — the
/// explicit-argument realization of the `fromSync` suppression flag
/// (§4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetEvent<T> {
    Added { value: T, from_sync: bool },
    Deleted { value: T, from_sync: bool },
}

pub struct MutableSet<T: Eq + Hash + Clone + Send + 'static> {
    items: Arc<Mutex<HashSet<T>>>,
    events: Stream<SetEvent<T>>,
}

impl<T: Eq + Hash + Clone + Send + 'static> Clone for MutableSet<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            events: self.events.clone(),
        }
    }
}

impl<T: Eq + Hash + Clone + Send + 'static> Default for MutableSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone + Send + 'static> MutableSet<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(HashSet::new())),
            events: Stream::new(),
        }
    }

    pub fn contains(&self, value: &T) -> bool {
        self.items.lock().unwrap().contains(value)
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().unwrap().iter().cloned().collect()
    }

    /// Insert `value`, returning `true` if it was not already present.
    pub fn insert(&self, value: T) -> bool {
        self.insert_from_sync(value, false)
    }

    pub fn insert_from_sync(&self, value: T, from_sync: bool) -> bool {
        let inserted = self.items.lock().unwrap().insert(value.clone());
        if inserted {
            self.events.emit(&SetEvent::Added { value, from_sync });
        }
        inserted
    }

    /// Remove `value`, returning `true` if it was present.
    pub fn remove(&self, value: &T) -> bool {
        self.remove_from_sync(value, false)
    }

    pub fn remove_from_sync(&self, value: &T, from_sync: bool) -> bool {
        let removed = self.items.lock().unwrap().remove(value);
        if removed {
            self.events.emit(&SetEvent::Deleted {
                value: value.clone(),
                from_sync,
            });
        }
        removed
    }

    /// Subscribe to add/delete events. Unlike [`crate::Value::subscribe`],
    /// there is no immediate replay of existing members — call
    /// [`MutableSet::snapshot`] first if the caller needs the current
    /// contents.
    pub fn subscribe(&self, callback: impl FnMut(&SetEvent<T>) + Send + 'static) -> Listener {
        self.events.on(callback)
    }
}
