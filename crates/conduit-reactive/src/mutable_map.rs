//! `MutableMap<K, V>`: a reactive key/value map emitting set/delete
//! events, with the same explicit `from_sync` flag as [`crate::MutableSet`]
//! (§4.1).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use crate::listener::Listener;
use crate::stream::Stream;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapEvent<K, V> {
    Set { key: K, value: V, from_sync: bool },
    Deleted { key: K, from_sync: bool },
}

pub struct MutableMap<K: Eq + Hash + Clone + Send + 'static, V: Clone + Send + 'static> {
    entries: Arc<Mutex<HashMap<K, V>>>,
    events: Stream<MapEvent<K, V>>,
}

impl<K: Eq + Hash + Clone + Send + 'static, V: Clone + Send + 'static> Clone for MutableMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            events: self.events.clone(),
        }
    }
}

impl<K: Eq + Hash + Clone + Send + 'static, V: Clone + Send + 'static> Default for MutableMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone + Send + 'static, V: Clone + Send + 'static> MutableMap<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            events: Stream::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn snapshot(&self) -> Vec<(K, V)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn set(&self, key: K, value: V) {
        self.set_from_sync(key, value, false)
    }

    pub fn set_from_sync(&self, key: K, value: V, from_sync: bool) {
        self.entries.lock().unwrap().insert(key.clone(), value.clone());
        self.events.emit(&MapEvent::Set { key, value, from_sync });
    }

    pub fn delete(&self, key: &K) -> bool {
        self.delete_from_sync(key, false)
    }

    pub fn delete_from_sync(&self, key: &K, from_sync: bool) -> bool {
        let removed = self.entries.lock().unwrap().remove(key).is_some();
        if removed {
            self.events.emit(&MapEvent::Deleted {
                key: key.clone(),
                from_sync,
            });
        }
        removed
    }

    pub fn subscribe(&self, callback: impl FnMut(&MapEvent<K, V>) + Send + 'static) -> Listener {
        self.events.on(callback)
    }
}
