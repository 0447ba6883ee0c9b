//! Channel multiplexer: the meta channel handshake (`AUTH`/`AUTHED`/`OPEN`/
//! `READY`/`FAILED`/`CLOSE`), per-connection channel id tables, and the
//! `Transport` abstraction concrete collaborators implement (§4.3, §6).

pub mod auth;
pub mod channel;
pub mod connection;
pub mod error;
pub mod settings;
pub mod transport;

pub use auth::{AllowAllValidator, AuthValidator};
pub use channel::{ChannelState, ChannelTable};
pub use connection::{ChannelAcceptor, ChannelSender, ConnectionId, MultiplexedConnection};
pub use error::ChannelError;
pub use settings::ChannelSettings;
pub use transport::Transport;
