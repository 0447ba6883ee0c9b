//! Object metadata, the reactive object engine, access control, and
//! per-connection session dispatch for `conduit` (§3, §4.4-§4.6).
//!
//! `conduit` supplies the channel multiplexer; this crate supplies what
//! travels over one kind of channel — declared object types, live
//! instances, tables/views, queues, and the `DataStore`/`Coalescer`
//! persistence seam around them.

pub mod access;
pub mod coalescer;
pub mod datastore;
pub mod error;
pub mod metadata;
pub mod object;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod session;
pub mod settings;
pub mod state;
pub mod sync;
pub mod table;

pub use access::{AccessControl, AllowAll, AuthContext, AuthResult, SystemOnly};
pub use coalescer::Coalescer;
pub use datastore::{DataStore, InMemoryDataStore};
pub use error::ObjectError;
pub use metadata::{Identity, ObjectTypeMeta, ObjectTypeMetaBuilder, PropertyKind, PropertyMeta};
pub use object::Object;
pub use protocol::{DownMessage, SnapshotField, UpMessage, OBJECT_CHANNEL_TYPE};
pub use queue::{DContext, MetaMsg, QueueDispatcher, QueueHandler};
pub use registry::{FixedTypeResolver, NoViews, ObjectRegistry, TableRegistry, TypeResolver, ViewResolver};
pub use session::{Session, SessionAcceptor};
pub use settings::{SessionSettings, SyncFlushSettings};
pub use state::ObjectState;
pub use sync::{SyncOp, SyncOpCode};
pub use table::{Filter, Order, Table, ViewProjection, ViewSpec};
