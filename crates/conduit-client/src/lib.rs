//! The client-side store for conduit (§4.7): resolves paths to shared,
//! refcounted object and view handles, forwards local writes as `SYNC`,
//! and keeps everything subscribed across reconnects.
//!
//! Pairs with a concrete [`conduit::Transport`] (e.g. `conduit-tcp`) the
//! way `conduit-sync`'s [`conduit_sync::Session`] pairs with a server's
//! [`conduit::MultiplexedConnection`] — this crate supplies the other end
//! of the same wire protocol.

pub mod error;
pub mod handle;
pub mod settings;
pub mod store;

pub use error::ClientError;
pub use handle::{ObjectHandle, ViewHandle};
pub use settings::ReconnectSettings;
pub use store::{ClientStore, ConnectFuture, ConnectionState, TransportFactory};
