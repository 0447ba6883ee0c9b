//! Tables and views (§4.4 "Tables and views", §4.6 `TADD/TSET/TDEL`,
//! `VSUB/VUNSUB`): a table is a keyed collection of free-form records; a
//! view is a server-resolved, filtered/ordered projection of a sibling
//! table, pushed to subscribers as an initial batch then per-record
//! `VSET`/`VDEL`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use conduit_common::codec::{Keyable, Value};
use conduit_reactive::{Listener, MapEvent, MutableMap};
use uuid::Uuid;

/// A table is a keyed map from record key to its free-form field data
/// (§3 "records are free-form field maps with typed scalar/array/set/map
/// leaves"); represented on the wire and in memory as a single tagged
/// [`Value::Record`].
pub struct Table {
    records: MutableMap<Keyable, Value>,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Self { records: MutableMap::new() }
    }

    pub fn get(&self, key: Uuid) -> Option<Value> {
        self.records.get(&Keyable(Value::Uuid(key)))
    }

    pub fn snapshot(&self) -> Vec<(Uuid, Value)> {
        self.records
            .snapshot()
            .into_iter()
            .filter_map(|(k, v)| match k.0 {
                Value::Uuid(id) => Some((id, v)),
                _ => None,
            })
            .collect()
    }

    /// Insert a new record. Per SPEC_FULL's resolution of the open
    /// question on `TADD` collision handling, the default in-memory store
    /// treats an existing key the same as [`Table::set`] (last-write-wins)
    /// and the caller is expected to log a warning; a persistence-backed
    /// `DataStore` may choose to reject instead.
    pub fn add(&self, key: Uuid, data: Value) {
        self.records.set(Keyable(Value::Uuid(key)), data);
    }

    pub fn set(&self, key: Uuid, data: Value) {
        self.records.set(Keyable(Value::Uuid(key)), data);
    }

    pub fn delete(&self, key: Uuid) -> bool {
        self.records.delete(&Keyable(Value::Uuid(key)))
    }

    pub fn subscribe_changes(&self, callback: impl FnMut(&MapEvent<Keyable, Value>) + Send + 'static) -> conduit_reactive::Listener {
        self.records.subscribe(callback)
    }
}

/// An equality filter over one record field (§4.4 View bullet).
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// A named view's declared shape: which sibling table it projects, what
/// equality filters restrict membership, and what field (if any) orders
/// the result. Ordering only affects the order an initial batch is sent
/// in; a view's wire representation to subscribers is still per-key
/// `VSET`/`VDEL`, not a positional list (§4.4).
#[derive(Debug, Clone, Default)]
pub struct ViewSpec {
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Order)>,
}

impl ViewSpec {
    fn record_field<'a>(data: &'a Value, name: &str) -> Option<&'a Value> {
        match data {
            Value::Record(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    fn matches(&self, data: &Value) -> bool {
        self.filters.iter().all(|f| Self::record_field(data, &f.field) == Some(&f.value))
    }

    fn sort_key(&self, data: &Value) -> Option<Value> {
        let (field, _) = self.order_by.as_ref()?;
        Self::record_field(data, field).cloned()
    }
}

struct ViewSubscriber {
    id: u64,
    on_set: Arc<dyn Fn(Uuid, Value) + Send + Sync>,
    on_del: Arc<dyn Fn(Uuid) + Send + Sync>,
}

static NEXT_VIEW_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// A live projection of `table` filtered/ordered per `spec`. Recomputes
/// its membership on each table mutation and diffs the old vs. new key
/// set to decide which subscribers get a `VSET` or a `VDEL`.
pub struct ViewProjection {
    spec: ViewSpec,
    table: Arc<Table>,
    member_keys: Mutex<HashSet<Uuid>>,
    subscribers: Mutex<Vec<ViewSubscriber>>,
    /// Keeps this projection subscribed to `table`'s mutation stream for as
    /// long as the projection itself is alive; dropped (and so
    /// unsubscribed) along with the `ViewProjection`.
    table_listener: Mutex<Option<Listener>>,
}

impl ViewProjection {
    /// Build a projection over `table` and keep it live: every subsequent
    /// `TADD`/`TSET`/`TDEL` against `table` (from any session, since
    /// `TableRegistry` hands out one shared `Table` per path) is diffed
    /// against `spec` and fanned out to this projection's subscribers.
    pub fn new(table: Arc<Table>, spec: ViewSpec) -> Arc<Self> {
        let initial: HashSet<Uuid> = table
            .snapshot()
            .into_iter()
            .filter(|(_, data)| spec.matches(data))
            .map(|(k, _)| k)
            .collect();
        let this = Arc::new(Self {
            spec,
            table: table.clone(),
            member_keys: Mutex::new(initial),
            subscribers: Mutex::new(Vec::new()),
            table_listener: Mutex::new(None),
        });

        let weak = Arc::downgrade(&this);
        let listener = table.subscribe_changes(move |event| {
            let Some(view) = weak.upgrade() else { return };
            match event {
                MapEvent::Set { key, value, .. } => {
                    if let Value::Uuid(id) = key.0 {
                        view.on_table_change(id, Some(value.clone()));
                    }
                }
                MapEvent::Deleted { key, .. } => {
                    if let Value::Uuid(id) = key.0 {
                        view.on_table_change(id, None);
                    }
                }
            }
        });
        *this.table_listener.lock().unwrap() = Some(listener);
        this
    }

    /// The initial record batch a fresh subscriber receives, ordered per
    /// `order_by` when one is declared (§4.4: "view subscriber receives
    /// initial `VSET` with the full record set").
    pub fn initial_batch(&self) -> Vec<(Uuid, Value)> {
        let mut rows: Vec<(Uuid, Value)> = self
            .table
            .snapshot()
            .into_iter()
            .filter(|(_, data)| self.spec.matches(data))
            .collect();
        if self.spec.order_by.is_some() {
            rows.sort_by(|(_, a), (_, b)| {
                let ka = self.spec.sort_key(a);
                let kb = self.spec.sort_key(b);
                compare_values(&ka, &kb)
            });
            if matches!(self.spec.order_by.as_ref().map(|(_, o)| o), Some(Order::Desc)) {
                rows.reverse();
            }
        }
        rows
    }

    pub fn subscribe(
        &self,
        on_set: Arc<dyn Fn(Uuid, Value) + Send + Sync>,
        on_del: Arc<dyn Fn(Uuid) + Send + Sync>,
    ) -> u64 {
        let id = NEXT_VIEW_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().unwrap().push(ViewSubscriber { id, on_set, on_del });
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().unwrap().retain(|s| s.id != id);
    }

    /// Recompute membership for `key` after a table mutation and notify
    /// subscribers of whatever changed: entered the view (`VSET`), left it
    /// (`VDEL`), or had its data updated while remaining a member
    /// (`VSET`). Called by the session/table layer after every
    /// `TADD`/`TSET`/`TDEL`.
    pub fn on_table_change(&self, key: Uuid, data: Option<Value>) {
        let is_member_now = data.as_ref().is_some_and(|d| self.spec.matches(d));
        let mut members = self.member_keys.lock().unwrap();
        let was_member = members.contains(&key);

        match (was_member, is_member_now) {
            (false, true) => {
                members.insert(key);
                drop(members);
                let data = data.unwrap();
                for sub in self.subscribers.lock().unwrap().iter() {
                    (sub.on_set)(key, data.clone());
                }
            }
            (true, true) => {
                drop(members);
                let data = data.unwrap();
                for sub in self.subscribers.lock().unwrap().iter() {
                    (sub.on_set)(key, data.clone());
                }
            }
            (true, false) => {
                members.remove(&key);
                drop(members);
                for sub in self.subscribers.lock().unwrap().iter() {
                    (sub.on_del)(key);
                }
            }
            (false, false) => {}
        }
    }
}

fn compare_values(a: &Option<Value>, b: &Option<Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::I32(a), Value::I32(b)) => a.cmp(b),
            (Value::VarInt(a), Value::VarInt(b)) => a.cmp(b),
            (Value::VarSize(a), Value::VarSize(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.as_millis().partial_cmp(&b.as_millis()).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}
