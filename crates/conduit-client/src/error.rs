use thiserror::Error;

/// Failure domain for the client store (§4.7).
#[derive(Debug, Error)]
pub enum ClientError {
    /// `resolve`/`post` was called before the store has ever reached
    /// `connected` — the caller is expected to retry once
    /// [`crate::store::ConnectionState::Connected`] is observed, not treat
    /// this as a terminal error.
    #[error("client store is not currently connected")]
    NotConnected,

    /// No metadata has been registered (via `conduit_sync::metadata::register`)
    /// for the Rust type passed to `resolve`.
    #[error("no object type metadata registered for this Rust type")]
    UnregisteredType,

    #[error(transparent)]
    Object(#[from] conduit_sync::ObjectError),

    #[error(transparent)]
    Channel(#[from] conduit::ChannelError),

    #[error(transparent)]
    Wire(#[from] conduit_common::WireError),
}
