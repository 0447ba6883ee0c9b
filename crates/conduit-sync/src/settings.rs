use std::time::Duration;

/// Per-backend persistent-write coalescing period (§5 "Shared state").
/// Cloud document stores default to a longer flush period than local file
/// backends; both are overridable per `DataStore` instance.
#[derive(Debug, Clone, Copy)]
pub struct SyncFlushSettings {
    pub flush_period: Duration,
}

impl SyncFlushSettings {
    pub const fn cloud() -> Self {
        Self {
            flush_period: Duration::from_secs(60),
        }
    }

    pub const fn file() -> Self {
        Self {
            flush_period: Duration::from_secs(10),
        }
    }
}

impl Default for SyncFlushSettings {
    fn default() -> Self {
        Self::file()
    }
}

/// Per-connection session tuning: how many up-messages may queue before
/// `AUTHED` arrives before the session is terminated (§4.6, §7).
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub pending_queue_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            pending_queue_capacity: 256,
        }
    }
}
