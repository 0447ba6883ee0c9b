//! End-to-end scenarios driven over real `MultiplexedConnection` pairs and
//! real `Session`s, exercising the literal examples from §8: joining a
//! chat room and seeing another occupant's write, being denied a
//! subscription to someone else's object, and subscribing to a path with
//! no registered type.
//!
//! Each connection gets its own in-memory duplex transport (the same
//! framing `conduit/tests/handshake.rs` uses), but all connections share
//! one server-side registry/store/dispatcher — modeling several clients
//! of a single running server.

use std::sync::Arc;

use async_trait::async_trait;
use conduit::{AllowAllValidator, ChannelAcceptor, ChannelError, ChannelSender, ChannelSettings, MultiplexedConnection, Transport};
use conduit_common::codec::{PathInterner, Reader, TypeTag, Value, Writer};
use conduit_common::path::Path;
use conduit_sync::access::{AccessControl, AllowAll, AuthContext, AuthResult};
use conduit_sync::datastore::InMemoryDataStore;
use conduit_sync::metadata::{Identity, ObjectTypeMeta};
use conduit_sync::protocol::{DownMessage, UpMessage, OBJECT_CHANNEL_TYPE};
use conduit_sync::queue::QueueDispatcher;
use conduit_sync::registry::{ObjectRegistry, TableRegistry, TypeResolver, ViewResolver};
use conduit_sync::session::Session;
use conduit_sync::settings::SessionSettings;
use conduit_sync::sync::SyncOp;
use conduit_sync::table::ViewSpec;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use uuid::Uuid;

struct DuplexTransport(DuplexStream);

#[async_trait]
impl Transport for DuplexTransport {
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        let mut len_buf = [0u8; 4];
        match self.0.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(ChannelError::Transport(e.to_string())),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        self.0.read_exact(&mut buf).await.map_err(|e| ChannelError::Transport(e.to_string()))?;
        Ok(Some(buf))
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), ChannelError> {
        let len = (frame.len() as u32).to_be_bytes();
        self.0.write_all(&len).await.map_err(|e| ChannelError::Transport(e.to_string()))?;
        self.0.write_all(frame).await.map_err(|e| ChannelError::Transport(e.to_string()))
    }
}

fn pair() -> (DuplexTransport, DuplexTransport) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (DuplexTransport(a), DuplexTransport(b))
}

/// Best-effort `tracing` output for these tests, gated by `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Mirrors [`conduit_sync::session::SessionAcceptor`] but also hands the
/// freshly-built `Session` back to the test over `captured`, since the
/// production acceptor has no reason to expose it and application code
/// normally drives `Session::authenticate` from its own meta-channel glue
/// rather than from the test harness.
struct CapturingAcceptor {
    settings: SessionSettings,
    objects: Arc<ObjectRegistry>,
    tables: Arc<TableRegistry>,
    store: Arc<InMemoryDataStore>,
    dispatcher: Arc<QueueDispatcher>,
    views: Arc<dyn ViewResolver>,
    captured: mpsc::UnboundedSender<Arc<Session>>,
}

#[async_trait]
impl ChannelAcceptor for CapturingAcceptor {
    async fn accept(
        self: Arc<Self>,
        _cpath: Path,
        _local_id: u16,
        mut inbound: mpsc::Receiver<Vec<u8>>,
        outbound: ChannelSender,
    ) -> Result<(), String> {
        let session = Session::new(
            self.settings,
            self.objects.clone(),
            self.tables.clone(),
            self.store.clone(),
            self.dispatcher.clone(),
            self.views.clone(),
            outbound,
        );
        let _ = self.captured.send(session.clone());
        tokio::spawn(async move {
            while let Some(payload) = inbound.recv().await {
                session.handle_frame(&payload).await;
            }
        });
        Ok(())
    }
}

/// Routes `rooms/*` to `Room` and `users/*` to `User`; anything else is
/// unresolvable, matching the literal "missing object" scenario.
struct ChatResolver {
    room: Arc<ObjectTypeMeta>,
    user: Arc<ObjectTypeMeta>,
}

impl TypeResolver for ChatResolver {
    fn resolve(&self, path: &Path) -> Option<Arc<ObjectTypeMeta>> {
        match path.segments().first()? {
            conduit_common::PathSegment::Name(name) if name == "rooms" => Some(self.room.clone()),
            conduit_common::PathSegment::Name(name) if name == "users" => Some(self.user.clone()),
            _ => None,
        }
    }
}

fn room_meta() -> Arc<ObjectTypeMeta> {
    ObjectTypeMeta::builder("Room")
        .value("name", TypeTag::String, true)
        .set("occupants", TypeTag::Uuid, true)
        .queue("chatq")
        .access(Arc::new(AllowAll))
        .build()
}

/// Only the identity named by a `users/<id>` path's own key may subscribe
/// to or read it — the literal per-instance policy enabled by threading
/// `path` through [`AccessControl`].
struct OwnerOnly;

impl AccessControl<Identity> for OwnerOnly {
    fn can_subscribe(&self, path: &Path, auth: &AuthContext<Identity>) -> AuthResult {
        owner_check(path, auth)
    }
    fn can_read(&self, path: &Path, _prop: u16, auth: &AuthContext<Identity>) -> AuthResult {
        owner_check(path, auth)
    }
    fn can_write(&self, path: &Path, _prop: u16, auth: &AuthContext<Identity>) -> AuthResult {
        owner_check(path, auth)
    }
}

fn owner_check(path: &Path, auth: &AuthContext<Identity>) -> AuthResult {
    if auth.is_system {
        return AuthResult::Authorized;
    }
    match (path.segments().last(), &auth.identity) {
        (Some(conduit_common::PathSegment::Key(owner)), Some(identity)) if owner == identity => AuthResult::Authorized,
        _ => AuthResult::denied("not the owner of this user object"),
    }
}

/// Routes `rooms/<id>/messages_view` to the unfiltered, unordered
/// projection of its sibling `rooms/<id>/messages` table.
struct RoomsViewResolver;

impl ViewResolver for RoomsViewResolver {
    fn resolve(&self, path: &Path) -> Option<(Path, ViewSpec)> {
        let parent = path.parent()?;
        match path.segments().last()? {
            conduit_common::PathSegment::Name(name) if name == "messages_view" => {
                Some((parent.child("messages"), ViewSpec::default()))
            }
            _ => None,
        }
    }
}

fn user_meta() -> Arc<ObjectTypeMeta> {
    ObjectTypeMeta::builder("User")
        .value("display_name", TypeTag::String, true)
        .access(Arc::new(OwnerOnly))
        .build()
}

/// Shared server-side state every accepted connection's `Session` resolves
/// objects against — one `ObjectRegistry`/`TableRegistry`/`DataStore`/
/// `QueueDispatcher` for the whole (simulated) server process, so two
/// connections see the same live `Room` instance.
struct ServerState {
    settings: SessionSettings,
    objects: Arc<ObjectRegistry>,
    tables: Arc<TableRegistry>,
    store: Arc<InMemoryDataStore>,
    dispatcher: Arc<QueueDispatcher>,
    views: Arc<dyn ViewResolver>,
}

fn server_state() -> Arc<ServerState> {
    Arc::new(ServerState {
        settings: SessionSettings::default(),
        objects: ObjectRegistry::new(
            Arc::new(ChatResolver { room: room_meta(), user: user_meta() }),
            Arc::new(InMemoryDataStore::new()),
        ),
        tables: Arc::new(TableRegistry::new()),
        store: Arc::new(InMemoryDataStore::new()),
        dispatcher: Arc::new(QueueDispatcher::new()),
        views: Arc::new(RoomsViewResolver),
    })
}

/// One accepted connection into the shared server, with a channel the
/// test drains to get at the `Session` `CapturingAcceptor` built for it.
struct ServerConn {
    connection: Arc<MultiplexedConnection<AllowAllValidator>>,
    sessions: mpsc::UnboundedReceiver<Arc<Session>>,
}

fn accept_connection(server_io: DuplexTransport, state: Arc<ServerState>) -> ServerConn {
    let connection = MultiplexedConnection::new(Box::new(server_io), ChannelSettings::default(), AllowAllValidator);
    let (captured_tx, captured_rx) = mpsc::unbounded_channel();
    let acceptor = CapturingAcceptor {
        settings: state.settings,
        objects: state.objects.clone(),
        tables: state.tables.clone(),
        store: state.store.clone(),
        dispatcher: state.dispatcher.clone(),
        views: state.views.clone(),
        captured: captured_tx,
    };
    connection.register_acceptor(OBJECT_CHANNEL_TYPE, Arc::new(acceptor));
    let run_conn = connection.clone();
    tokio::spawn(async move {
        let _ = run_conn.run().await;
    });
    ServerConn { connection, sessions: captured_rx }
}

/// One connected client: its own up/down path interners plus the raw
/// channel halves, so the test can hand-encode `UpMessage`s and decode
/// `DownMessage`s exactly as `ClientStore` would.
struct Client {
    connection: Arc<MultiplexedConnection<AllowAllValidator>>,
    sender: ChannelSender,
    inbound: mpsc::Receiver<Vec<u8>>,
    enc: PathInterner,
    dec: PathInterner,
}

async fn spawn_client(client_io: DuplexTransport) -> Client {
    let connection = MultiplexedConnection::new(Box::new(client_io), ChannelSettings::default(), AllowAllValidator);
    let run_conn = connection.clone();
    tokio::spawn(async move {
        let _ = run_conn.run().await;
    });
    connection.authenticate("password", "token").await.unwrap();
    let (sender, inbound) = connection.open_channel(OBJECT_CHANNEL_TYPE, Path::root()).await.unwrap();
    Client { connection, sender, inbound, enc: PathInterner::new(), dec: PathInterner::new() }
}

impl Client {
    async fn send_up(&mut self, msg: UpMessage) {
        let mut w = Writer::new();
        msg.encode(&mut w, &mut self.enc).unwrap();
        self.sender.send(w.into_bytes()).await.unwrap();
    }

    async fn recv_down(&mut self) -> DownMessage {
        let bytes = tokio::time::timeout(std::time::Duration::from_secs(1), self.inbound.recv())
            .await
            .expect("timed out waiting for a down-message")
            .expect("down channel closed");
        let mut r = Reader::new(&bytes);
        DownMessage::decode(&mut r, &mut self.dec, None).unwrap()
    }
}

async fn next_session(server: &mut ServerConn) -> Arc<Session> {
    tokio::time::timeout(std::time::Duration::from_secs(1), server.sessions.recv())
        .await
        .expect("timed out waiting for a session to be captured")
        .expect("session channel closed")
}

#[tokio::test]
async fn joining_a_room_shows_snapshot_then_a_later_occupants_write() {
    init_tracing();
    let state = server_state();
    let (alice_io, server_io_a) = pair();
    let (bob_io, server_io_b) = pair();

    // Two independent connections into the same shared server state.
    let mut server_a = accept_connection(server_io_a, state.clone());
    let mut alice = spawn_client(alice_io).await;
    let alice_session = next_session(&mut server_a).await;
    let alice_id = Uuid::new_v4();
    alice_session.authenticate(alice_id).await;

    let mut server_b = accept_connection(server_io_b, state.clone());
    let mut bob = spawn_client(bob_io).await;
    let bob_session = next_session(&mut server_b).await;
    let bob_id = Uuid::new_v4();
    bob_session.authenticate(bob_id).await;

    let room_id = Uuid::new_v4();
    let room_path = Path::root().child("rooms").member(room_id);

    alice.send_up(UpMessage::Sub { path: room_path.clone() }).await;
    let snapshot = alice.recv_down().await;
    match snapshot {
        DownMessage::Sobj { path, fields } => {
            assert_eq!(path, room_path);
            let occupants = fields.iter().find(|f| f.index == 1).expect("occupants field present");
            assert_eq!(occupants.data, Value::Array(vec![]));
        }
        other => panic!("expected SOBJ, got {other:?}"),
    }

    alice
        .send_up(UpMessage::Sync {
            path: room_path.clone(),
            op: SyncOp::SetAdd { index: 1, value: Value::Uuid(alice_id) },
        })
        .await;

    bob.send_up(UpMessage::Sub { path: room_path.clone() }).await;
    let bob_snapshot = bob.recv_down().await;
    match bob_snapshot {
        DownMessage::Sobj { path, fields } => {
            assert_eq!(path, room_path);
            let occupants = fields.iter().find(|f| f.index == 1).expect("occupants field present");
            assert_eq!(occupants.data, Value::Array(vec![Value::Uuid(alice_id)]));
        }
        other => panic!("expected SOBJ, got {other:?}"),
    }

    bob.send_up(UpMessage::Sync {
        path: room_path.clone(),
        op: SyncOp::SetAdd { index: 1, value: Value::Uuid(bob_id) },
    })
    .await;

    let forwarded = alice.recv_down().await;
    match forwarded {
        DownMessage::Sync { path, op } => {
            assert_eq!(path, room_path);
            assert_eq!(op, SyncOp::SetAdd { index: 1, value: Value::Uuid(bob_id) });
        }
        other => panic!("expected a forwarded SYNC, got {other:?}"),
    }

    drop(alice.connection);
    drop(bob.connection);
    drop(server_a.connection);
    drop(server_b.connection);
}

#[tokio::test]
async fn subscribing_to_someone_elses_user_object_is_denied() {
    init_tracing();
    let state = server_state();
    let (alice_io, server_io) = pair();
    let mut server = accept_connection(server_io, state);
    let mut alice = spawn_client(alice_io).await;
    let alice_session = next_session(&mut server).await;
    alice_session.authenticate(Uuid::new_v4()).await;

    let other_id = Uuid::new_v4();
    let other_path = Path::root().child("users").member(other_id);

    alice.send_up(UpMessage::Sub { path: other_path.clone() }).await;
    let reply = alice.recv_down().await;
    match reply {
        DownMessage::Serr { path, cause } => {
            assert_eq!(path, other_path);
            assert!(cause.contains("Access denied"), "cause was {cause:?}");
        }
        other => panic!("expected SERR, got {other:?}"),
    }

    drop(alice.connection);
    drop(server.connection);
}

#[tokio::test]
async fn subscribing_to_an_unresolvable_path_reports_the_path() {
    init_tracing();
    let state = server_state();
    let (alice_io, server_io) = pair();
    let mut server = accept_connection(server_io, state);
    let mut alice = spawn_client(alice_io).await;
    let alice_session = next_session(&mut server).await;
    alice_session.authenticate(Uuid::new_v4()).await;

    let ghost_id = Uuid::new_v4();
    let ghost_path = Path::root().child("ghosts").member(ghost_id);

    alice.send_up(UpMessage::Sub { path: ghost_path.clone() }).await;
    let reply = alice.recv_down().await;
    match reply {
        DownMessage::Serr { path, cause } => {
            assert_eq!(path, ghost_path);
            assert!(cause.contains(&ghost_path.to_string()) || !cause.is_empty());
        }
        other => panic!("expected SERR, got {other:?}"),
    }

    drop(alice.connection);
    drop(server.connection);
}

#[tokio::test]
async fn vsub_against_a_registered_view_delivers_a_live_tadd() {
    init_tracing();
    let state = server_state();
    let (alice_io, server_io_a) = pair();
    let (bob_io, server_io_b) = pair();

    let mut server_a = accept_connection(server_io_a, state.clone());
    let mut alice = spawn_client(alice_io).await;
    let alice_session = next_session(&mut server_a).await;
    alice_session.authenticate(Uuid::new_v4()).await;

    let mut server_b = accept_connection(server_io_b, state.clone());
    let mut bob = spawn_client(bob_io).await;
    let bob_session = next_session(&mut server_b).await;
    bob_session.authenticate(Uuid::new_v4()).await;

    let room_id = Uuid::new_v4();
    let room_path = Path::root().child("rooms").member(room_id);
    let view_path = room_path.clone().child("messages_view");
    let table_path = room_path.clone().child("messages");

    // A view's owning object is resolved through the same `ObjectRegistry`
    // TADD/TSET/TDEL check access against, so the room must already be
    // resolved (here, by subscribing) before a write against its table.
    alice.send_up(UpMessage::Sub { path: room_path.clone() }).await;
    let _room_snapshot = alice.recv_down().await;

    alice.send_up(UpMessage::VSub { path: view_path.clone() }).await;

    let msg_id = Uuid::new_v4();
    let body = Value::Record(vec![("text".to_string(), Value::String("hi".to_string()))]);
    bob.send_up(UpMessage::TAdd { path: table_path.clone(), key: msg_id, data: body.clone() }).await;

    let event = alice.recv_down().await;
    match event {
        DownMessage::VSet { path, key, data } => {
            assert_eq!(path, view_path);
            assert_eq!(key, msg_id);
            assert_eq!(data, body);
        }
        other => panic!("expected a VSET pushed from the live TADD, got {other:?}"),
    }

    drop(alice.connection);
    drop(bob.connection);
    drop(server_a.connection);
    drop(server_b.connection);
}

#[tokio::test]
async fn vsub_against_an_unresolvable_view_path_reports_verr() {
    init_tracing();
    let state = server_state();
    let (alice_io, server_io) = pair();
    let mut server = accept_connection(server_io, state);
    let mut alice = spawn_client(alice_io).await;
    let alice_session = next_session(&mut server).await;
    alice_session.authenticate(Uuid::new_v4()).await;

    let path = Path::root().child("rooms").member(Uuid::new_v4()).child("no_such_view");
    alice.send_up(UpMessage::VSub { path: path.clone() }).await;
    let reply = alice.recv_down().await;
    match reply {
        DownMessage::Verr { path: reported, cause } => {
            assert_eq!(reported, path);
            assert!(!cause.is_empty());
        }
        other => panic!("expected VERR, got {other:?}"),
    }

    drop(alice.connection);
    drop(server.connection);
}
