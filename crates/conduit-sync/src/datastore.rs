//! The `DataStore` collaborator (§4.4 "Persistence", §5 "Shared state",
//! §9 open question on backing storage): resolves an object's durable
//! state on first subscribe, persists coalesced sync traffic, and backs
//! table/view record CRUD. `conduit-sync` ships [`InMemoryDataStore`] as
//! the default, an in-process world state that needs no external store
//! to get an application running.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_common::codec::Value;
use conduit_common::path::Path;
use dashmap::DashMap;
use tracing::warn;
use uuid::Uuid;

use crate::error::ObjectError;
use crate::metadata::ObjectTypeMeta;
use crate::protocol::SnapshotField;
use crate::sync::SyncOp;
use crate::table::{Filter, ViewSpec};

/// Durable backing for objects, tables, and views. One instance is
/// shared process-wide; every method may be called concurrently from any
/// session (§4.4).
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Load the durable field state for the object at `path`, or an empty
    /// set of fields for one that has never been persisted — first
    /// resolve implicitly creates the object, matching the way a fresh
    /// path under a `Collection` property always resolves rather than
    /// 404ing (§4.4 "Resolution").
    async fn resolve_data(&self, path: &Path, meta: &Arc<ObjectTypeMeta>) -> Result<Vec<SnapshotField>, ObjectError>;

    /// Load the current record set for the view at `path` given its
    /// declared `spec`, used to seed a fresh [`crate::table::ViewProjection`]
    /// before it starts tracking live table mutations.
    async fn resolve_view_data(&self, path: &Path, spec: &ViewSpec) -> Result<Vec<(Uuid, Value)>, ObjectError>;

    /// Persist one coalesced sync operation against the object at `path`.
    /// Called by [`crate::coalescer::Coalescer`] on each flush, never
    /// once per individual mutation (§5).
    async fn persist_sync(&self, path: &Path, op: &SyncOp) -> Result<(), ObjectError>;

    async fn create_record(&self, path: &Path, key: Uuid, data: Value) -> Result<(), ObjectError>;
    async fn update_record(&self, path: &Path, key: Uuid, data: Value, merge: bool) -> Result<(), ObjectError>;
    async fn delete_record(&self, path: &Path, key: Uuid) -> Result<(), ObjectError>;

    /// Flush any buffered writes and release resources; called once
    /// during orderly server shutdown.
    async fn shutdown(&self);
}

fn record_fields(data: &Value) -> Vec<(String, Value)> {
    match data {
        Value::Record(fields) => fields.clone(),
        _ => Vec::new(),
    }
}

fn apply_op_to_fields(fields: &mut Vec<SnapshotField>, op: &SyncOp) {
    match op.clone() {
        SyncOp::ValSet { index, value } => {
            set_field(fields, index, value);
        }
        SyncOp::SetAdd { index, value } => {
            let mut items = match take_field(fields, index) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            if !items.contains(&value) {
                items.push(value);
            }
            set_field(fields, index, Value::Array(items));
        }
        SyncOp::SetDel { index, value } => {
            let mut items = match take_field(fields, index) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            items.retain(|v| v != &value);
            set_field(fields, index, Value::Array(items));
        }
        SyncOp::MapSet { index, key, value } => {
            let mut pairs = match take_field(fields, index) {
                Some(Value::Map(pairs)) => pairs,
                _ => Vec::new(),
            };
            pairs.retain(|(k, _)| k != &key);
            pairs.push((key, value));
            set_field(fields, index, Value::Map(pairs));
        }
        SyncOp::MapDel { index, key } => {
            let mut pairs = match take_field(fields, index) {
                Some(Value::Map(pairs)) => pairs,
                _ => Vec::new(),
            };
            pairs.retain(|(k, _)| k != &key);
            set_field(fields, index, Value::Map(pairs));
        }
    }
}

fn take_field(fields: &mut Vec<SnapshotField>, index: u16) -> Option<Value> {
    let pos = fields.iter().position(|f| f.index == index)?;
    Some(fields.remove(pos).data)
}

fn set_field(fields: &mut Vec<SnapshotField>, index: u16, data: Value) {
    if let Some(existing) = fields.iter_mut().find(|f| f.index == index) {
        existing.data = data;
    } else {
        fields.push(SnapshotField { index, data });
    }
}

/// The default process-local store: keeps every object's fields and
/// every table's records in memory, with no disk or network I/O. Good
/// enough for tests and single-process deployments; a real backend
/// implements [`DataStore`] against whatever it actually persists to.
#[derive(Default)]
pub struct InMemoryDataStore {
    objects: DashMap<Path, Vec<SnapshotField>>,
    tables: DashMap<Path, HashMap<Uuid, Value>>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
    async fn resolve_data(&self, path: &Path, _meta: &Arc<ObjectTypeMeta>) -> Result<Vec<SnapshotField>, ObjectError> {
        Ok(self.objects.get(path).map(|f| f.clone()).unwrap_or_default())
    }

    async fn resolve_view_data(&self, path: &Path, spec: &ViewSpec) -> Result<Vec<(Uuid, Value)>, ObjectError> {
        let table = self.tables.get(path);
        let Some(table) = table else {
            return Ok(Vec::new());
        };
        Ok(table
            .iter()
            .filter(|(_, data)| matches_spec(spec, data))
            .map(|(k, v)| (*k, v.clone()))
            .collect())
    }

    async fn persist_sync(&self, path: &Path, op: &SyncOp) -> Result<(), ObjectError> {
        let mut fields = self.objects.entry(path.clone()).or_default();
        apply_op_to_fields(&mut fields, op);
        Ok(())
    }

    async fn create_record(&self, path: &Path, key: Uuid, data: Value) -> Result<(), ObjectError> {
        let mut table = self.tables.entry(path.clone()).or_default();
        if table.contains_key(&key) {
            warn!(%path, %key, "TADD against an existing key, treating as TSET (last-write-wins)");
        }
        table.insert(key, data);
        Ok(())
    }

    async fn update_record(&self, path: &Path, key: Uuid, data: Value, merge: bool) -> Result<(), ObjectError> {
        let mut table = self.tables.entry(path.clone()).or_default();
        if merge {
            let mut merged = table.get(&key).map(record_fields).unwrap_or_default();
            for (name, value) in record_fields(&data) {
                merged.retain(|(n, _)| n != &name);
                merged.push((name, value));
            }
            table.insert(key, Value::Record(merged));
        } else {
            table.insert(key, data);
        }
        Ok(())
    }

    async fn delete_record(&self, path: &Path, key: Uuid) -> Result<(), ObjectError> {
        let mut table = self.tables.entry(path.clone()).or_default();
        table.remove(&key);
        Ok(())
    }

    async fn shutdown(&self) {}
}

fn matches_spec(spec: &ViewSpec, data: &Value) -> bool {
    spec.filters.iter().all(|f: &Filter| {
        record_fields(data).iter().any(|(name, value)| name == &f.field && value == &f.value)
    })
}
