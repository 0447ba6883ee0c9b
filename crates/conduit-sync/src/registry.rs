//! Server-side object and table registries (§4.4 "Resolution"): the
//! process-wide map from [`Path`] to live [`Object`]/[`Table`] instance,
//! resolved through a [`DataStore`] on first access and kept warm for as
//! long as any session holds a subscription.

use std::sync::Arc;

use conduit_common::path::Path;
use dashmap::DashMap;

use crate::datastore::DataStore;
use crate::error::ObjectError;
use crate::metadata::ObjectTypeMeta;
use crate::object::Object;
use crate::state::ObjectState;
use crate::table::Table;

/// Maps a path to the object type that should be resolved there. A real
/// server implements this against its own routing convention (e.g. "the
/// first path segment names a top-level collection, whose declared
/// element type is looked up from its own metadata"); `conduit-sync`
/// only specifies the seam.
pub trait TypeResolver: Send + Sync {
    fn resolve(&self, path: &Path) -> Option<Arc<ObjectTypeMeta>>;
}

/// A [`TypeResolver`] that always resolves to the same type, for servers
/// with exactly one object type per top-level collection (the common
/// case exercised in tests).
pub struct FixedTypeResolver(pub Arc<ObjectTypeMeta>);

impl TypeResolver for FixedTypeResolver {
    fn resolve(&self, _path: &Path) -> Option<Arc<ObjectTypeMeta>> {
        Some(self.0.clone())
    }
}

/// Maps a view instance's path to the sibling table it projects and the
/// filter/order spec that projection uses. The same seam as
/// [`TypeResolver`], for `VSUB` instead of `SUB`: a real server implements
/// its own routing convention, `conduit-sync` only specifies the boundary.
pub trait ViewResolver: Send + Sync {
    fn resolve(&self, path: &Path) -> Option<(Path, crate::table::ViewSpec)>;
}

/// A [`ViewResolver`] that never resolves anything, for a server that
/// declares no views — every `VSUB` reports "no view registered".
pub struct NoViews;

impl ViewResolver for NoViews {
    fn resolve(&self, _path: &Path) -> Option<(Path, crate::table::ViewSpec)> {
        None
    }
}

/// Live objects, keyed by path, resolved lazily and cached for the life
/// of the process (§4.4: "resolution is refcounted by subscription, not
/// tied to any one connection").
pub struct ObjectRegistry {
    objects: DashMap<Path, Arc<Object>>,
    resolver: Arc<dyn TypeResolver>,
    store: Arc<dyn DataStore>,
}

impl ObjectRegistry {
    pub fn new(resolver: Arc<dyn TypeResolver>, store: Arc<dyn DataStore>) -> Arc<Self> {
        Arc::new(Self {
            objects: DashMap::new(),
            resolver,
            store,
        })
    }

    pub fn get(&self, path: &Path) -> Option<Arc<Object>> {
        self.objects.get(path).map(|e| e.value().clone())
    }

    /// Return the already-resident object at `path`, or resolve it fresh
    /// from the `DataStore` (§4.4 "Resolution": unknown type is a hard
    /// failure, but an unknown *instance* of a known type resolves to a
    /// blank one).
    pub async fn resolve(&self, path: &Path) -> Result<Arc<Object>, ObjectError> {
        if let Some(object) = self.get(path) {
            return Ok(object);
        }
        let meta = self.resolver.resolve(path).ok_or_else(|| ObjectError::NotFound {
            path: path.to_string(),
            cause: "no object type registered for this path".to_string(),
        })?;
        let fields = self.store.resolve_data(path, &meta).await?;
        let object = Arc::new(Object::new(path.clone(), meta));
        object.apply_snapshot(fields)?;
        object.state.set(ObjectState::Active);
        self.objects.insert(path.clone(), object.clone());
        Ok(object)
    }

    /// Drop the cached object once nothing subscribes to it any longer.
    pub fn evict_if_unreferenced(&self, path: &Path) {
        if let Some(object) = self.get(path) {
            if object.subscriber_count() == 0 {
                self.objects.remove(path);
            }
        }
    }
}

/// Live tables, keyed by path, created on first write (§4.4 "Tables").
pub struct TableRegistry {
    tables: DashMap<Path, Arc<Table>>,
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TableRegistry {
    pub fn new() -> Self {
        Self { tables: DashMap::new() }
    }

    pub fn get_or_create(&self, path: &Path) -> Arc<Table> {
        self.tables.entry(path.clone()).or_insert_with(|| Arc::new(Table::new())).clone()
    }

    pub fn get(&self, path: &Path) -> Option<Arc<Table>> {
        self.tables.get(path).map(|e| e.value().clone())
    }
}
