//! Write coalescing (§5 "Shared state": persistent writes are batched,
//! not written synchronously on every mutation). One [`Coalescer`] runs
//! per process, buffering sync ops per object path and flushing them to
//! a [`DataStore`] on a fixed period or on explicit shutdown.
//!
//! `VALSET` collapses to last-write-wins per property index; `SETADD`/
//! `SETDEL`/`MAPSET`/`MAPDEL` collapse to the disjoint per-key/value
//! outcome of replaying the buffered ops in order, so e.g. an add
//! immediately followed by a delete of the same value nets out to
//! nothing rather than emitting both.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conduit_common::codec::{Keyable, Value};
use conduit_common::path::Path;
use tracing::{debug, warn};

use crate::datastore::DataStore;
use crate::settings::SyncFlushSettings;
use crate::sync::SyncOp;

#[derive(Debug, Clone, Default)]
struct Pending {
    values: HashMap<u16, Value>,
    set_ops: HashMap<u16, HashMap<Keyable, bool>>,
    map_ops: HashMap<u16, HashMap<Keyable, Option<Value>>>,
}

impl Pending {
    fn absorb(&mut self, op: SyncOp) {
        match op {
            SyncOp::ValSet { index, value } => {
                self.values.insert(index, value);
            }
            SyncOp::SetAdd { index, value } => {
                self.set_ops.entry(index).or_default().insert(Keyable(value), true);
            }
            SyncOp::SetDel { index, value } => {
                self.set_ops.entry(index).or_default().insert(Keyable(value), false);
            }
            SyncOp::MapSet { index, key, value } => {
                self.map_ops.entry(index).or_default().insert(Keyable(key), Some(value));
            }
            SyncOp::MapDel { index, key } => {
                self.map_ops.entry(index).or_default().insert(Keyable(key), None);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty() && self.set_ops.is_empty() && self.map_ops.is_empty()
    }

    /// Replay the coalesced state as the minimal set of ops a `DataStore`
    /// needs to reach the same end state.
    fn drain_into_ops(self) -> Vec<SyncOp> {
        let mut ops = Vec::new();
        for (index, value) in self.values {
            ops.push(SyncOp::ValSet { index, value });
        }
        for (index, members) in self.set_ops {
            for (value, present) in members {
                let value = Value::from(value);
                ops.push(if present {
                    SyncOp::SetAdd { index, value }
                } else {
                    SyncOp::SetDel { index, value }
                });
            }
        }
        for (index, entries) in self.map_ops {
            for (key, value) in entries {
                let key = Value::from(key);
                ops.push(match value {
                    Some(value) => SyncOp::MapSet { index, key, value },
                    None => SyncOp::MapDel { index, key },
                });
            }
        }
        ops
    }
}

/// Batches sync traffic per object and periodically flushes it to a
/// [`DataStore`]. Holds no reference to any live [`crate::object::Object`]
/// — callers feed it ops as they are emitted, via [`Coalescer::record`].
pub struct Coalescer {
    store: Arc<dyn DataStore>,
    settings: SyncFlushSettings,
    pending: Mutex<HashMap<Path, Pending>>,
}

impl Coalescer {
    pub fn new(store: Arc<dyn DataStore>, settings: SyncFlushSettings) -> Arc<Self> {
        Arc::new(Self {
            store,
            settings,
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn record(&self, path: Path, op: SyncOp) {
        self.pending.lock().unwrap().entry(path).or_default().absorb(op);
    }

    /// Flush everything currently buffered, persisting each object's
    /// coalesced ops in turn. Used both by the periodic task spawned in
    /// [`Coalescer::spawn_flush_loop`] and by an orderly shutdown, which
    /// must flush synchronously rather than wait out the period.
    pub async fn flush(&self) {
        let batch: Vec<(Path, Pending)> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().filter(|(_, p)| !p.is_empty()).collect()
        };
        if batch.is_empty() {
            return;
        }
        debug!(objects = batch.len(), "flushing coalesced sync writes");
        for (path, pending) in batch {
            for op in pending.drain_into_ops() {
                if let Err(err) = self.store.persist_sync(&path, &op).await {
                    warn!(%path, %err, "failed to persist coalesced sync op");
                }
            }
        }
    }

    /// Spawn the periodic flush task. The returned handle should be
    /// aborted (or simply dropped, since it owns no other state) once the
    /// owning process is ready to flush a final time and shut down.
    pub fn spawn_flush_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.settings.flush_period);
            loop {
                interval.tick().await;
                this.flush().await;
            }
        })
    }

    pub async fn shutdown(&self) {
        self.flush().await;
        self.store.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::InMemoryDataStore;
    use crate::metadata::ObjectTypeMeta;

    #[tokio::test]
    async fn valset_coalesces_to_last_write() {
        let store = Arc::new(InMemoryDataStore::new());
        let coalescer = Coalescer::new(store.clone(), SyncFlushSettings { flush_period: Duration::from_secs(3600) });
        let path = Path::root().child("rooms");

        coalescer.record(path.clone(), SyncOp::ValSet { index: 0, value: Value::String("first".into()) });
        coalescer.record(path.clone(), SyncOp::ValSet { index: 0, value: Value::String("second".into()) });
        coalescer.flush().await;

        let meta = ObjectTypeMeta::builder("Room").build();
        let fields = store.resolve_data(&path, &meta).await.unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].data, Value::String("second".into()));
    }

    #[tokio::test]
    async fn add_then_delete_of_same_value_nets_to_nothing() {
        let store = Arc::new(InMemoryDataStore::new());
        let coalescer = Coalescer::new(store.clone(), SyncFlushSettings::default());
        let path = Path::root().child("rooms");
        let value = Value::Uuid(uuid::Uuid::nil());

        coalescer.record(path.clone(), SyncOp::SetAdd { index: 1, value: value.clone() });
        coalescer.record(path.clone(), SyncOp::SetDel { index: 1, value: value.clone() });
        coalescer.flush().await;

        let meta = ObjectTypeMeta::builder("Room").build();
        let fields = store.resolve_data(&path, &meta).await.unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].data, Value::Array(Vec::new()));
    }
}
