use thiserror::Error;

/// Failure domain for the object engine and session layer (§4.4, §4.6, §7).
#[derive(Debug, Error)]
pub enum ObjectError {
    /// `SUB`/`VSUB` named a path with no registered object/view type, or
    /// the data store could not resolve it.
    #[error("no object at path {path}: {cause}")]
    NotFound { path: String, cause: String },

    /// `canSubscribe`/`canRead`/`canWrite`/`canCreate` returned false.
    /// Carried only for logging — per §7 the client is never told which
    /// property failed, just that the overall subscribe/write failed.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A sync message named a property index absent from the type's
    /// metadata, or used an operation the property's kind does not
    /// support (§4.4 "malformed messages").
    #[error("decode error applying sync to property {index}: {reason}")]
    MalformedSync { index: u16, reason: &'static str },

    /// The `DataStore` collaborator returned an error from
    /// create/update/delete/persist (§6, §7 "persistence errors").
    #[error("data store error: {0}")]
    Store(String),

    /// A wire-level decode/encode failure surfaced while building or
    /// applying a sync message.
    #[error(transparent)]
    Wire(#[from] conduit_common::WireError),

    /// The channel carrying this session's object-subscription traffic is
    /// no longer open.
    #[error(transparent)]
    Channel(#[from] conduit::ChannelError),

    /// The session's pending-until-authed queue is full (§7 "authentication
    /// failures ... after which the session is terminated").
    #[error("pending queue capacity ({capacity}) exceeded before authentication")]
    PendingQueueFull { capacity: usize },
}
