//! Per-direction channel id table and the lifecycle state of one channel
//! (§4.3, §8 invariant 4: "channel ids assigned by one side are never
//! reused while that id is live").

use std::collections::HashMap;

use crate::error::ChannelError;
use crate::settings::ChannelSettings;

/// A channel progresses `Connecting -> Open -> Closed`, or `Connecting ->
/// Failed` if the peer rejects the `OPEN`. There is no way back to
/// `Connecting` from `Closed`/`Failed`; a fresh `OPEN` gets a fresh id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open { remote_id: u16 },
    Failed { cause: String },
    Closed,
}

impl ChannelState {
    pub fn is_open(&self) -> bool {
        matches!(self, ChannelState::Open { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Failed { .. } | ChannelState::Closed)
    }
}

/// One side's table of locally-assigned channel ids. Ids are handed out
/// by linear probing from a monotonically advancing cursor over
/// `1..65534` (`0` is reserved for the meta channel; `65534`/`65535` are
/// left unused as sentinel headroom), wrapping back to `1` once the
/// cursor passes the top. A full table is a hard error, never silent
/// reuse of a live id.
#[derive(Debug)]
pub struct ChannelTable {
    entries: HashMap<u16, ChannelState>,
    cursor: u16,
    probe_limit: usize,
}

const FIRST_ID: u16 = 1;
const LAST_ID: u16 = 65533;

impl ChannelTable {
    pub fn new(settings: &ChannelSettings) -> Self {
        Self {
            entries: HashMap::new(),
            cursor: FIRST_ID,
            probe_limit: settings.id_probe_limit,
        }
    }

    /// Allocate the next free id and register it as `Connecting`.
    pub fn allocate(&mut self) -> Result<u16, ChannelError> {
        let start = self.cursor;
        for _ in 0..self.probe_limit {
            let candidate = self.cursor;
            self.cursor = if self.cursor >= LAST_ID {
                FIRST_ID
            } else {
                self.cursor + 1
            };
            if !self.entries.contains_key(&candidate) {
                self.entries.insert(candidate, ChannelState::Connecting);
                return Ok(candidate);
            }
            if self.cursor == start {
                break;
            }
        }
        Err(ChannelError::IdSpaceExhausted)
    }

    /// Register a specific id as `Connecting` (used by the peer side of an
    /// `OPEN`, which allocates its own local id rather than probing).
    pub fn insert_connecting(&mut self, id: u16) {
        self.entries.insert(id, ChannelState::Connecting);
    }

    pub fn get(&self, id: u16) -> Option<&ChannelState> {
        self.entries.get(&id)
    }

    pub fn set_open(&mut self, id: u16, remote_id: u16) {
        self.entries.insert(id, ChannelState::Open { remote_id });
    }

    pub fn set_failed(&mut self, id: u16, cause: String) {
        self.entries.insert(id, ChannelState::Failed { cause });
    }

    pub fn remove(&mut self, id: u16) -> Option<ChannelState> {
        self.entries.remove(&id)
    }

    /// Transition every live channel to `Closed`, e.g. on transport loss
    /// (§4.3 "Cancellation and failure").
    pub fn close_all(&mut self) -> Vec<u16> {
        let ids: Vec<u16> = self.entries.keys().copied().collect();
        self.entries.clear();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_assigns_distinct_ids() {
        let settings = ChannelSettings::default();
        let mut table = ChannelTable::new(&settings);
        let a = table.allocate().unwrap();
        let b = table.allocate().unwrap();
        assert_ne!(a, b);
        assert_eq!(table.get(a), Some(&ChannelState::Connecting));
    }

    #[test]
    fn table_full_is_hard_error() {
        let settings = ChannelSettings {
            id_probe_limit: 4,
            ..ChannelSettings::default()
        };
        let mut table = ChannelTable::new(&settings);
        // Fill a small window so the next allocate must fail within the probe limit.
        for _ in 0..4 {
            table.allocate().unwrap();
        }
        assert!(matches!(table.allocate(), Err(ChannelError::IdSpaceExhausted)));
    }

    #[test]
    fn close_all_empties_table() {
        let settings = ChannelSettings::default();
        let mut table = ChannelTable::new(&settings);
        table.allocate().unwrap();
        table.allocate().unwrap();
        let closed = table.close_all();
        assert_eq!(closed.len(), 2);
        assert!(table.is_empty());
    }
}
