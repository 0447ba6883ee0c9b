//! Per-direction path interning dictionary (§4.2, §4.3).
//!
//! The first time a connection sends a given [`Path`] over a channel it
//! spells the path out in full and assigns it the next interned id; every
//! subsequent reference to that path uses the 32-bit id instead. Each side
//! of each channel keeps its own table, since ids are assigned in the order
//! a side happens to first mention a path — there is no negotiation.

use std::collections::HashMap;

use crate::error::WireError;
use crate::path::Path;

/// One direction's path dictionary. `conduit` owns one instance per
/// inbound and one per outbound direction per channel; both are dropped
/// when the channel closes (§4.3's cancellation policy).
#[derive(Debug, Default)]
pub struct PathInterner {
    by_path: HashMap<Path, u32>,
    by_id: Vec<Path>,
}

impl PathInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the id already assigned to `path`, if any.
    pub fn id_of(&self, path: &Path) -> Option<u32> {
        self.by_path.get(path).copied()
    }

    /// Assign the next id to `path`, recording it for future lookups.
    /// Callers only invoke this the first time they need to send `path`;
    /// the wire format distinguishes "new path, here's its spelling" from
    /// "known path, here's its id" at a higher layer (the meta/object
    /// message encoder), not inside the interner itself.
    pub fn intern(&mut self, path: Path) -> u32 {
        if let Some(&id) = self.by_path.get(&path) {
            return id;
        }
        let id = self.by_id.len() as u32;
        self.by_id.push(path.clone());
        self.by_path.insert(path, id);
        id
    }

    pub fn resolve(&self, id: u32) -> Option<&Path> {
        self.by_id.get(id as usize)
    }

    /// Record that the peer has just spelled out `path` as `id` (the
    /// decode side of [`PathInterner::intern`]). Peers always introduce an
    /// id the first time they use it, so `id` arrives in the same
    /// increasing order the encoder assigned it; a duplicate
    /// (re)introduction of an already-known id is accepted as a no-op. An id
    /// that skips ahead of the next expected slot is rejected rather than
    /// silently corrupting the id-to-path mapping.
    pub fn insert_at(&mut self, id: u32, path: Path) -> Result<(), WireError> {
        let idx = id as usize;
        if idx < self.by_id.len() {
            return Ok(());
        }
        if idx != self.by_id.len() {
            return Err(WireError::OutOfOrderIntern {
                id,
                expected: self.by_id.len() as u32,
            });
        }
        self.by_id.push(path.clone());
        self.by_path.insert(path, id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
