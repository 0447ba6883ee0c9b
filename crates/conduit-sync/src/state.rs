//! Object lifecycle (§3 "Lifecycle"): a plain enum driven by a
//! `conduit_reactive::Value` cell, satisfying §9's "resolution returning a
//! reactive cell" redesign flag without an inheritance hierarchy.

/// Where an object instance is in its lifecycle, from either side of the
/// connection. Servers only ever produce `Resolving -> Active ->
/// Disposed` or `Resolving -> Failed`; clients additionally see
/// `Disconnected` when the transport drops (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectState {
    Resolving,
    Active,
    Disconnected,
    Failed { cause: String },
    Disposed,
}

impl ObjectState {
    pub fn is_active(&self) -> bool {
        matches!(self, ObjectState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ObjectState::Failed { .. } | ObjectState::Disposed)
    }
}
