//! Shared wire format: the byte-level codec, path type, path interning, and
//! the meta-channel message union, used by every other `conduit*` crate.

pub mod codec;
pub mod error;
pub mod messages;
pub mod path;

pub use codec::{Reader, Writer};
pub use error::WireError;
pub use messages::{MetaMessage, META_CHANNEL_ID};
pub use path::{Path, PathSegment};
