use thiserror::Error;

/// Failure domain for the multiplexer layer (§4.3).
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A channel's id table has wrapped all the way around `1..65534`
    /// without finding a free slot (§8 invariant 4).
    #[error("channel id space exhausted")]
    IdSpaceExhausted,

    /// `OPEN` named a `ctype` with no registered handler on this side.
    #[error("no handler registered for channel type {ctype:?}")]
    UnknownChannelType { ctype: String },

    /// A send was attempted on a channel that is `closed` or `failed`.
    #[error("channel {id} is not open")]
    ChannelNotOpen { id: u16 },

    /// The underlying transport returned an I/O error.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame failed to decode.
    #[error(transparent)]
    Wire(#[from] conduit_common::WireError),

    /// The connection was dropped while a caller awaited a state
    /// transition (e.g. `open`, or the meta channel's `AUTHED`).
    #[error("connection closed while waiting for {awaited}")]
    ConnectionClosed { awaited: &'static str },

    /// `OPEN` was not answered with `READY`/`FAILED` within
    /// [`crate::settings::ChannelSettings::open_timeout`].
    #[error("channel open timed out waiting for READY")]
    OpenTimedOut,

    /// A peer's `OPEN` would push this side's channel table past
    /// [`crate::settings::ChannelSettings::max_channels`].
    #[error("channel table is at its configured maximum ({max_channels})")]
    TooManyChannels { max_channels: usize },
}
