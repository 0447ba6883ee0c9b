use std::time::Duration;

/// Tunables for the channel multiplexer, one small `*Settings` struct per
/// subsystem rather than a single monolithic config type.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Upper bound on simultaneously open non-meta channels per
    /// connection, past which `OPEN` is refused with `FAILED` rather than
    /// exhausting the id table slowly.
    pub max_channels: usize,
    /// Channel ids are assigned by linear probing starting from the last
    /// assigned id, wrapping within `1..65534`; this caps how many probe
    /// attempts are made before declaring [`crate::ChannelError::IdSpaceExhausted`].
    pub id_probe_limit: usize,
    /// Bound on the outbound per-channel queue used for send-gating while
    /// a channel is `connecting` (§4.3).
    pub pending_send_capacity: usize,
    /// How long a channel may sit `connecting` before the open attempt is
    /// treated as failed.
    pub open_timeout: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            max_channels: 4096,
            id_probe_limit: 65533,
            pending_send_capacity: 256,
            open_timeout: Duration::from_secs(10),
        }
    }
}
