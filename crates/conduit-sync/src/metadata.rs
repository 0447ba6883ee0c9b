//! Object type metadata (§3, §9 "Decorators for metadata"): a one-shot,
//! builder-produced, immutable per-type schema stored in a process-wide
//! registry keyed by the Rust `TypeId`, one registration record per type.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use conduit_common::codec::TypeTag;
use uuid::Uuid;

use crate::access::{AccessControl, SystemOnly};

/// The authenticated identity carried by a session, realized directly as
/// the `uuid` the wire's `AUTH(source, id, token)` message already
/// carries (§6) rather than an abstract generic parameter — the protocol
/// has exactly one identity shape, so `conduit-sync` commits to it.
pub type Identity = Uuid;

/// The kind of a declared property (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// A scalar cell typed by `vtype`.
    Value { vtype: TypeTag },
    /// A set of keyable scalars typed by `etype`.
    Set { etype: TypeTag },
    /// A map from `ktype` to `vtype`.
    Map { ktype: TypeTag, vtype: TypeTag },
    /// A named space of sub-objects keyed by UUID.
    Collection,
    /// A named single sub-object of a fixed type.
    Singleton,
    /// A table of free-form records.
    Table,
    /// A projection of a named sibling table.
    View,
    /// A typed inbox dispatched to a registered handler.
    Queue,
}

impl PropertyKind {
    /// Whether this property's current state is serialized into `SOBJ`
    /// (§4.5: "collection and queue properties contribute nothing").
    pub fn contributes_to_snapshot(&self) -> bool {
        matches!(
            self,
            PropertyKind::Value { .. } | PropertyKind::Set { .. } | PropertyKind::Map { .. }
        )
    }
}

/// One property's declaration within an `ObjectTypeMeta` (§3).
#[derive(Debug, Clone)]
pub struct PropertyMeta {
    pub index: u16,
    pub name: &'static str,
    pub kind: PropertyKind,
    pub persist: bool,
}

/// The immutable, shared-by-value-across-instances metadata for one
/// object type (§3 invariants: "property indices within a type are
/// dense, stable, and assigned in declaration order").
pub struct ObjectTypeMeta {
    pub type_name: &'static str,
    properties: Vec<PropertyMeta>,
    pub access: Arc<dyn AccessControl<Identity>>,
}

impl std::fmt::Debug for ObjectTypeMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectTypeMeta")
            .field("type_name", &self.type_name)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

impl ObjectTypeMeta {
    pub fn builder(type_name: &'static str) -> ObjectTypeMetaBuilder {
        ObjectTypeMetaBuilder {
            type_name,
            properties: Vec::new(),
            access: None,
        }
    }

    pub fn properties(&self) -> &[PropertyMeta] {
        &self.properties
    }

    pub fn property(&self, index: u16) -> Option<&PropertyMeta> {
        self.properties.iter().find(|p| p.index == index)
    }

    pub fn property_named(&self, name: &str) -> Option<&PropertyMeta> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// Builds an [`ObjectTypeMeta`] one property at a time, assigning dense
/// indices in declaration order — the explicit-builder realization of
/// §9's "one-shot type-registration step" redesign flag.
pub struct ObjectTypeMetaBuilder {
    type_name: &'static str,
    properties: Vec<PropertyMeta>,
    access: Option<Arc<dyn AccessControl<Identity>>>,
}

impl ObjectTypeMetaBuilder {
    fn push(mut self, name: &'static str, kind: PropertyKind, persist: bool) -> Self {
        let index = self.properties.len() as u16;
        self.properties.push(PropertyMeta {
            index,
            name,
            kind,
            persist,
        });
        self
    }

    pub fn value(self, name: &'static str, vtype: TypeTag, persist: bool) -> Self {
        self.push(name, PropertyKind::Value { vtype }, persist)
    }

    pub fn set(self, name: &'static str, etype: TypeTag, persist: bool) -> Self {
        self.push(name, PropertyKind::Set { etype }, persist)
    }

    pub fn map(self, name: &'static str, ktype: TypeTag, vtype: TypeTag, persist: bool) -> Self {
        self.push(name, PropertyKind::Map { ktype, vtype }, persist)
    }

    pub fn collection(self, name: &'static str) -> Self {
        self.push(name, PropertyKind::Collection, false)
    }

    pub fn singleton(self, name: &'static str) -> Self {
        self.push(name, PropertyKind::Singleton, false)
    }

    pub fn table(self, name: &'static str) -> Self {
        self.push(name, PropertyKind::Table, false)
    }

    pub fn view(self, name: &'static str) -> Self {
        self.push(name, PropertyKind::View, false)
    }

    pub fn queue(self, name: &'static str) -> Self {
        self.push(name, PropertyKind::Queue, false)
    }

    pub fn access(mut self, access: Arc<dyn AccessControl<Identity>>) -> Self {
        self.access = Some(access);
        self
    }

    pub fn build(self) -> Arc<ObjectTypeMeta> {
        Arc::new(ObjectTypeMeta {
            type_name: self.type_name,
            properties: self.properties,
            access: self.access.unwrap_or_else(|| Arc::new(SystemOnly)),
        })
    }
}

type Registry = RwLock<HashMap<TypeId, Arc<ObjectTypeMeta>>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register `meta` as the metadata for Rust type `T`. Intended to run
/// once at process start (e.g. from a `lazy_static`-free `fn register()`
/// an application calls during startup); a second registration for the
/// same `T` simply replaces the first.
pub fn register<T: 'static>(meta: Arc<ObjectTypeMeta>) {
    registry().write().unwrap().insert(TypeId::of::<T>(), meta);
}

/// Look up the metadata previously registered for Rust type `T`.
pub fn lookup<T: 'static>() -> Option<Arc<ObjectTypeMeta>> {
    registry().read().unwrap().get(&TypeId::of::<T>()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Room;

    #[test]
    fn builder_assigns_dense_indices_in_order() {
        let meta = ObjectTypeMeta::builder("Room")
            .value("name", TypeTag::String, true)
            .set("occupants", TypeTag::Uuid, true)
            .queue("chatq")
            .build();

        assert_eq!(meta.property(0).unwrap().name, "name");
        assert_eq!(meta.property(1).unwrap().name, "occupants");
        assert_eq!(meta.property(2).unwrap().name, "chatq");
        assert!(!meta.property(2).unwrap().kind.contributes_to_snapshot());
    }

    #[test]
    fn registry_round_trips_by_type_id() {
        let meta = ObjectTypeMeta::builder("Room").value("name", TypeTag::String, true).build();
        register::<Room>(meta.clone());
        let looked_up = lookup::<Room>().unwrap();
        assert_eq!(looked_up.type_name, "Room");
    }
}
