//! Refcounted handles returned by [`crate::store::ClientStore`]. Each
//! handle owns exactly one refcount unit on its path — dropping it, rather
//! than any explicit `release()` call, is what triggers `UNSUB`/`VUNSUB`
//! once the last handle for a path goes away (§4.7 "when the last handle
//! releases, the store sends UNSUB").

use std::sync::Arc;

use conduit_common::codec::Value as WireValue;
use conduit_common::path::Path;
use conduit_reactive::{Listener, MapEvent};
use conduit_sync::{Object, ObjectState};
use uuid::Uuid;

use crate::error::ClientError;
use crate::store::ClientStore;

/// A shared handle on one object instance: the reactive object shadow
/// itself, plus release-on-drop bookkeeping.
pub struct ObjectHandle {
    store: Arc<ClientStore>,
    path: Path,
    object: Arc<Object>,
}

impl ObjectHandle {
    pub(crate) fn new(store: Arc<ClientStore>, path: Path, object: Arc<Object>) -> Self {
        Self { store, path, object }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> ObjectState {
        self.object.state.get()
    }

    /// Subscribe to lifecycle transitions (fires once immediately with the
    /// current state, then again on every change, per §4.1's replay-on-
    /// subscribe contract).
    pub fn on_state_change(&self, callback: impl FnMut(&ObjectState) + Send + 'static) -> Listener {
        self.object.state.subscribe(callback)
    }

    pub fn read_value(&self, index: u16) -> Option<WireValue> {
        self.object.read_value(index)
    }

    pub fn read_set(&self, index: u16) -> Option<Vec<WireValue>> {
        self.object.read_set(index)
    }

    pub fn read_map(&self, index: u16) -> Option<Vec<(WireValue, WireValue)>> {
        self.object.read_map(index)
    }

    /// Mutate the local shadow and forward the change to the server. A
    /// write made while `state()` is not [`ObjectState::Active`] still
    /// updates the local cell immediately; the forwarded sync simply has
    /// nowhere to go until reconnection re-establishes the channel.
    pub fn set_value(&self, index: u16, value: WireValue) -> Result<(), ClientError> {
        Ok(self.object.set_value(index, value)?)
    }

    pub fn set_add(&self, index: u16, value: WireValue) -> Result<(), ClientError> {
        Ok(self.object.set_add(index, value)?)
    }

    pub fn set_del(&self, index: u16, value: WireValue) -> Result<(), ClientError> {
        Ok(self.object.set_del(index, value)?)
    }

    pub fn map_set(&self, index: u16, key: WireValue, value: WireValue) -> Result<(), ClientError> {
        Ok(self.object.map_set(index, key, value)?)
    }

    pub fn map_del(&self, index: u16, key: WireValue) -> Result<(), ClientError> {
        Ok(self.object.map_del(index, key)?)
    }

    /// Post a message to one of this object's queue properties.
    pub fn post(&self, queue_name: impl Into<String>, msg: WireValue) {
        self.store.post(self.path.clone().child(queue_name.into()), msg);
    }
}

impl Drop for ObjectHandle {
    fn drop(&mut self) {
        self.store.release_object(&self.path);
    }
}

/// A shared handle on a table view's projected record set (§4.4 "View").
pub struct ViewHandle {
    store: Arc<ClientStore>,
    path: Path,
    map: conduit_reactive::MutableMap<Uuid, WireValue>,
}

impl ViewHandle {
    pub(crate) fn new(store: Arc<ClientStore>, path: Path, map: conduit_reactive::MutableMap<Uuid, WireValue>) -> Self {
        Self { store, path, map }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Vec<(Uuid, WireValue)> {
        self.map.snapshot()
    }

    pub fn subscribe(&self, callback: impl FnMut(&MapEvent<Uuid, WireValue>) + Send + 'static) -> Listener {
        self.map.subscribe(callback)
    }
}

impl Drop for ViewHandle {
    fn drop(&mut self) {
        self.store.release_view(&self.path);
    }
}
