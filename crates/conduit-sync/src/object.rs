//! The object engine (§4.4): one [`Object`] per instance, holding one
//! reactive cell per metadata entry in declaration order, dispatching
//! local writes to subscribers as [`SyncOp`]s and applying inbound syncs
//! with echo suppression.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use conduit_common::codec::Value;
use conduit_common::path::Path;
use conduit_reactive::{MutableMap, MutableSet, Value as Cell};
use tracing::warn;

use crate::access::AuthContext;
use crate::error::ObjectError;
use crate::metadata::{Identity, ObjectTypeMeta, PropertyKind};
use crate::protocol::SnapshotField;
use crate::state::ObjectState;
use crate::sync::SyncOp;

type Keyable = conduit_common::codec::Keyable;

/// The reactive storage backing one property. Kinds that have no local
/// cell (`Collection`, `Singleton`, `Table`, `View`, `Queue`) are tracked
/// elsewhere (by the session/table/queue layers); `Object` only owns the
/// cells for `Value`/`Set`/`Map` properties, matching §4.5's "collection
/// and queue properties contribute nothing" to the snapshot.
enum PropertyCell {
    Value(Cell<Value>),
    Set(MutableSet<Keyable>),
    Map(MutableMap<Keyable, Value>),
    Opaque,
}

impl PropertyCell {
    fn for_kind(kind: PropertyKind) -> Self {
        match kind {
            PropertyKind::Value { .. } => PropertyCell::Value(Cell::with_eq(Value::Bool(false), |a, b| a == b)),
            PropertyKind::Set { .. } => PropertyCell::Set(MutableSet::new()),
            PropertyKind::Map { .. } => PropertyCell::Map(MutableMap::new()),
            PropertyKind::Collection
            | PropertyKind::Singleton
            | PropertyKind::Table
            | PropertyKind::View
            | PropertyKind::Queue => PropertyCell::Opaque,
        }
    }
}

/// A registered listener of an object's live sync traffic: a session that
/// has subscribed on behalf of one authenticated identity. `forward` is
/// the session's own encode-and-send closure, so `Object` never needs to
/// know about channels, interning, or transports.
struct Subscriber {
    id: u64,
    auth: AuthContext<Identity>,
    forward: Arc<dyn Fn(SyncOp) + Send + Sync>,
}

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// One live instance of an object type at a given path (§3, §4.4).
pub struct Object {
    pub path: Path,
    pub meta: Arc<ObjectTypeMeta>,
    pub state: Cell<ObjectState>,
    cells: Vec<PropertyCell>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Object {
    pub fn new(path: Path, meta: Arc<ObjectTypeMeta>) -> Self {
        let cells = meta.properties().iter().map(|p| PropertyCell::for_kind(p.kind)).collect();
        Self {
            path,
            meta,
            state: Cell::with_eq(ObjectState::Resolving, |a, b| a == b),
            cells,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn cell(&self, index: u16) -> Option<&PropertyCell> {
        self.cells.get(index as usize)
    }

    // -- reads --------------------------------------------------------

    pub fn read_value(&self, index: u16) -> Option<Value> {
        match self.cell(index)? {
            PropertyCell::Value(cell) => Some(cell.get()),
            _ => None,
        }
    }

    pub fn read_set(&self, index: u16) -> Option<Vec<Value>> {
        match self.cell(index)? {
            PropertyCell::Set(set) => Some(set.snapshot().into_iter().map(Value::from).collect()),
            _ => None,
        }
    }

    pub fn read_map(&self, index: u16) -> Option<Vec<(Value, Value)>> {
        match self.cell(index)? {
            PropertyCell::Map(map) => Some(map.snapshot().into_iter().map(|(k, v)| (Value::from(k), v)).collect()),
            _ => None,
        }
    }

    // -- local writes (forwarded to subscribers unless echoed) ---------

    pub fn set_value(&self, index: u16, value: Value) -> Result<(), ObjectError> {
        self.mutate_value(index, value, false)
    }

    pub fn set_add(&self, index: u16, value: Value) -> Result<(), ObjectError> {
        self.mutate_set_add(index, value, false)
    }

    pub fn set_del(&self, index: u16, value: Value) -> Result<(), ObjectError> {
        self.mutate_set_del(index, value, false)
    }

    pub fn map_set(&self, index: u16, key: Value, value: Value) -> Result<(), ObjectError> {
        self.mutate_map_set(index, key, value, false)
    }

    pub fn map_del(&self, index: u16, key: Value) -> Result<(), ObjectError> {
        self.mutate_map_del(index, key, false)
    }

    /// Apply an inbound sync message with echo suppression set, per §4.4
    /// "Sync application". An op naming an unknown index or a kind
    /// mismatch is reported as [`ObjectError::MalformedSync`] rather than
    /// applied — the caller is expected to log it as a `DECERR` and drop
    /// the message, not propagate it as a panic.
    ///
    /// This alone does not broadcast to this object's other subscribers —
    /// it is the client's shape of "apply what the server just sent me,
    /// and don't echo it back upstream". The server instead wants
    /// [`Object::apply_sync_broadcast`], which applies the same way but
    /// also fans the op out to every *other* subscriber.
    pub fn apply_sync(&self, op: SyncOp) -> Result<(), ObjectError> {
        match op {
            SyncOp::ValSet { index, value } => self.mutate_value(index, value, true),
            SyncOp::SetAdd { index, value } => self.mutate_set_add(index, value, true),
            SyncOp::SetDel { index, value } => self.mutate_set_del(index, value, true),
            SyncOp::MapSet { index, key, value } => self.mutate_map_set(index, key, value, true),
            SyncOp::MapDel { index, key } => self.mutate_map_del(index, key, true),
        }
    }

    /// The server-side counterpart of [`Object::apply_sync`]: applies the
    /// op with echo suppression (so it is not handed straight back to the
    /// subscriber it came from) and then forwards it to every *other*
    /// subscriber, per §4.4's "a write is visible to every other
    /// subscriber of the object". `exclude` is the sending session's own
    /// subscriber id for this path, if it has subscribed one — a session
    /// need not be subscribed to write, so this is frequently `None`.
    pub fn apply_sync_broadcast(&self, op: SyncOp, exclude: Option<u64>) -> Result<(), ObjectError> {
        self.apply_sync(op.clone())?;
        self.forward_excluding(op, exclude);
        Ok(())
    }

    fn mutate_value(&self, index: u16, value: Value, from_sync: bool) -> Result<(), ObjectError> {
        match self.cell(index) {
            Some(PropertyCell::Value(cell)) => {
                cell.set(value.clone());
                if !from_sync {
                    self.forward(SyncOp::ValSet { index, value });
                }
                Ok(())
            }
            Some(_) => Err(ObjectError::MalformedSync { index, reason: "VALSET against a non-value property" }),
            None => Err(ObjectError::MalformedSync { index, reason: "VALSET against an unknown property index" }),
        }
    }

    fn mutate_set_add(&self, index: u16, value: Value, from_sync: bool) -> Result<(), ObjectError> {
        match self.cell(index) {
            Some(PropertyCell::Set(set)) => {
                set.insert_from_sync(Keyable(value.clone()), from_sync);
                if !from_sync {
                    self.forward(SyncOp::SetAdd { index, value });
                }
                Ok(())
            }
            Some(_) => Err(ObjectError::MalformedSync { index, reason: "SETADD against a non-set property" }),
            None => Err(ObjectError::MalformedSync { index, reason: "SETADD against an unknown property index" }),
        }
    }

    fn mutate_set_del(&self, index: u16, value: Value, from_sync: bool) -> Result<(), ObjectError> {
        match self.cell(index) {
            Some(PropertyCell::Set(set)) => {
                set.remove_from_sync(&Keyable(value.clone()), from_sync);
                if !from_sync {
                    self.forward(SyncOp::SetDel { index, value });
                }
                Ok(())
            }
            Some(_) => Err(ObjectError::MalformedSync { index, reason: "SETDEL against a non-set property" }),
            None => Err(ObjectError::MalformedSync { index, reason: "SETDEL against an unknown property index" }),
        }
    }

    fn mutate_map_set(&self, index: u16, key: Value, value: Value, from_sync: bool) -> Result<(), ObjectError> {
        match self.cell(index) {
            Some(PropertyCell::Map(map)) => {
                map.set_from_sync(Keyable(key.clone()), value.clone(), from_sync);
                if !from_sync {
                    self.forward(SyncOp::MapSet { index, key, value });
                }
                Ok(())
            }
            Some(_) => Err(ObjectError::MalformedSync { index, reason: "MAPSET against a non-map property" }),
            None => Err(ObjectError::MalformedSync { index, reason: "MAPSET against an unknown property index" }),
        }
    }

    fn mutate_map_del(&self, index: u16, key: Value, from_sync: bool) -> Result<(), ObjectError> {
        match self.cell(index) {
            Some(PropertyCell::Map(map)) => {
                map.delete_from_sync(&Keyable(key.clone()), from_sync);
                if !from_sync {
                    self.forward(SyncOp::MapDel { index, key });
                }
                Ok(())
            }
            Some(_) => Err(ObjectError::MalformedSync { index, reason: "MAPDEL against a non-map property" }),
            None => Err(ObjectError::MalformedSync { index, reason: "MAPDEL against an unknown property index" }),
        }
    }

    // -- subscription & fan-out -----------------------------------------

    /// Register a subscriber. Per §4.4 "Subscribers are added only after
    /// the object reaches `active`" — callers are expected to have already
    /// emitted the `SOBJ` snapshot before calling this.
    pub fn subscribe(&self, auth: AuthContext<Identity>, forward: Arc<dyn Fn(SyncOp) + Send + Sync>) -> u64 {
        let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().unwrap().push(Subscriber { id, auth, forward });
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().unwrap().retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    fn forward(&self, op: SyncOp) {
        self.forward_excluding(op, None);
    }

    /// Fan `op` out to every subscriber except `exclude`, honoring each
    /// subscriber's own `can_read` outcome (§4.4: access control applies
    /// per-subscriber, not just once at subscribe time).
    fn forward_excluding(&self, op: SyncOp, exclude: Option<u64>) {
        let subscribers = self.subscribers.lock().unwrap();
        for sub in subscribers.iter() {
            if Some(sub.id) == exclude {
                continue;
            }
            match self.meta.access.can_read(&self.path, op.index(), &sub.auth) {
                crate::access::AuthResult::Authorized => (sub.forward)(op.clone()),
                crate::access::AuthResult::Denied(reason) => {
                    warn!(path = %self.path, index = op.index(), %reason, "sync withheld from subscriber by can_read");
                }
            }
        }
    }

    // -- snapshot (§4.5) --------------------------------------------------

    /// Build the `SOBJ` field list visible to `auth`, in metadata order,
    /// skipping properties `auth` may not read and the kinds that
    /// "contribute nothing" (collections, singletons, tables, views,
    /// queues).
    pub fn snapshot(&self, auth: &AuthContext<Identity>) -> Vec<SnapshotField> {
        let mut fields = Vec::new();
        for prop in self.meta.properties() {
            if !prop.kind.contributes_to_snapshot() {
                continue;
            }
            if !self.meta.access.can_read(&self.path, prop.index, auth).is_authorized() {
                continue;
            }
            let data = match self.cell(prop.index) {
                Some(PropertyCell::Value(cell)) => cell.get(),
                Some(PropertyCell::Set(set)) => Value::Array(set.snapshot().into_iter().map(Value::from).collect()),
                Some(PropertyCell::Map(map)) => {
                    Value::Map(map.snapshot().into_iter().map(|(k, v)| (Value::from(k), v)).collect())
                }
                _ => continue,
            };
            fields.push(SnapshotField { index: prop.index, data });
        }
        fields
    }

    /// Apply a decoded `SOBJ` field list as suppressed writes (§4.5
    /// "Decoding iterates until the sentinel, locating the local property
    /// by index and applying a suppressed write for each").
    pub fn apply_snapshot(&self, fields: Vec<SnapshotField>) -> Result<(), ObjectError> {
        for field in fields {
            match self.cell(field.index) {
                Some(PropertyCell::Value(cell)) => {
                    cell.set(field.data);
                }
                Some(PropertyCell::Set(set)) => {
                    let Value::Array(items) = field.data else {
                        return Err(ObjectError::MalformedSync { index: field.index, reason: "snapshot for a set property was not an array" });
                    };
                    for item in items {
                        set.insert_from_sync(Keyable(item), true);
                    }
                }
                Some(PropertyCell::Map(map)) => {
                    let Value::Map(pairs) = field.data else {
                        return Err(ObjectError::MalformedSync { index: field.index, reason: "snapshot for a map property was not a map" });
                    };
                    for (k, v) in pairs {
                        map.set_from_sync(Keyable(k), v, true);
                    }
                }
                Some(PropertyCell::Opaque) | None => {
                    return Err(ObjectError::MalformedSync { index: field.index, reason: "snapshot named a non-cell or unknown property index" });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ObjectTypeMeta;
    use conduit_common::codec::TypeTag;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    fn room_meta() -> Arc<ObjectTypeMeta> {
        ObjectTypeMeta::builder("Room")
            .value("name", TypeTag::String, true)
            .set("occupants", TypeTag::Uuid, true)
            .build()
    }

    #[test]
    fn local_write_forwards_to_subscriber_and_not_to_itself() {
        let object = Object::new(Path::root().child("rooms"), room_meta());
        let received = Arc::new(StdMutex::new(Vec::new()));
        let received2 = received.clone();
        object.subscribe(
            AuthContext::system(),
            Arc::new(move |op| received2.lock().unwrap().push(op)),
        );

        object.set_value(0, Value::String("Test Room".into())).unwrap();
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn apply_sync_does_not_reforward() {
        let object = Object::new(Path::root().child("rooms"), room_meta());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        object.subscribe(AuthContext::system(), Arc::new(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        }));

        object.apply_sync(SyncOp::ValSet { index: 0, value: Value::String("from peer".into()) }).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(object.read_value(0), Some(Value::String("from peer".into())));
    }

    #[test]
    fn apply_sync_broadcast_skips_the_excluded_subscriber_only() {
        let object = Object::new(Path::root().child("rooms"), room_meta());
        let from_sender = Arc::new(StdMutex::new(Vec::new()));
        let from_sender2 = from_sender.clone();
        let sender_id = object.subscribe(AuthContext::system(), Arc::new(move |op| from_sender2.lock().unwrap().push(op)));

        let from_other = Arc::new(StdMutex::new(Vec::new()));
        let from_other2 = from_other.clone();
        object.subscribe(AuthContext::system(), Arc::new(move |op| from_other2.lock().unwrap().push(op)));

        object
            .apply_sync_broadcast(SyncOp::SetAdd { index: 1, value: Value::Uuid(uuid::Uuid::nil()) }, Some(sender_id))
            .unwrap();

        assert!(from_sender.lock().unwrap().is_empty());
        assert_eq!(from_other.lock().unwrap().len(), 1);
        assert_eq!(object.read_set(1), Some(vec![Value::Uuid(uuid::Uuid::nil())]));
    }

    #[test]
    fn unknown_index_is_malformed_not_panic() {
        let object = Object::new(Path::root().child("rooms"), room_meta());
        let err = object.apply_sync(SyncOp::ValSet { index: 99, value: Value::Bool(true) }).unwrap_err();
        assert!(matches!(err, ObjectError::MalformedSync { index: 99, .. }));
    }

    #[test]
    fn snapshot_round_trips_through_apply_snapshot() {
        let object = Object::new(Path::root().child("rooms"), room_meta());
        object.set_value(0, Value::String("Test Room".into())).unwrap();
        object.set_add(1, Value::Uuid(uuid::Uuid::nil())).unwrap();

        let fields = object.snapshot(&AuthContext::system());
        let shadow = Object::new(Path::root().child("rooms"), room_meta());
        shadow.apply_snapshot(fields).unwrap();

        assert_eq!(shadow.read_value(0), Some(Value::String("Test Room".into())));
        assert_eq!(shadow.read_set(1), Some(vec![Value::Uuid(uuid::Uuid::nil())]));
    }

    #[test]
    fn can_read_false_withholds_forward() {
        struct DenyAll;
        impl crate::access::AccessControl<Identity> for DenyAll {
            fn can_read(&self, _path: &Path, _prop: u16, _auth: &AuthContext<Identity>) -> crate::access::AuthResult {
                crate::access::AuthResult::denied("nope")
            }
        }
        let meta = ObjectTypeMeta::builder("Secret")
            .value("name", TypeTag::String, true)
            .access(Arc::new(DenyAll))
            .build();
        let object = Object::new(Path::root().child("secrets"), meta);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        object.subscribe(AuthContext::system(), Arc::new(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        }));
        object.set_value(0, Value::String("shh".into())).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
