//! The client-side mirror of the server's object registry (§4.7): resolves
//! paths to shared, refcounted object/view handles, and owns the
//! reconnect loop that keeps their subscriptions alive across drops.
//!
//! Grounded on [`conduit_sync::session::Session`]'s dispatch loop and
//! [`conduit_sync::registry::ObjectRegistry`]'s resolve-and-cache pattern,
//! mirrored onto the opposite direction of the same protocol: where a
//! `Session` decodes `UpMessage` and encodes `DownMessage`, `ClientStore`
//! decodes `DownMessage` and encodes `UpMessage`, reusing the very same
//! [`Object`] engine for its local shadow instances.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use conduit::{AllowAllValidator, ChannelSender, ChannelSettings, MultiplexedConnection, Transport};
use conduit_common::codec::{PathInterner, Reader, Value as WireValue, Writer};
use conduit_common::path::Path;
use conduit_reactive::{Listener, MutableMap, Value as Cell};
use conduit_sync::{AuthContext, DownMessage, Object, ObjectState, UpMessage, OBJECT_CHANNEL_TYPE};
use dashmap::DashMap;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::ClientError;
use crate::handle::{ObjectHandle, ViewHandle};
use crate::settings::ReconnectSettings;

/// A freshly-built transport, ready to authenticate and open the
/// object-subscription channel on.
pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<Box<dyn Transport>, ClientError>> + Send>>;

/// Produces one [`ConnectFuture`] per reconnect attempt. Taking a factory
/// rather than a concrete transport keeps `conduit-client` agnostic to
/// `conduit-tcp` or any other [`Transport`] impl.
pub type TransportFactory = Arc<dyn Fn() -> ConnectFuture + Send + Sync>;

/// The store's view of its own connectivity (§4.7 "The store listens to
/// connection state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection has ever succeeded, or a reconnect attempt is in
    /// flight.
    Connecting,
    /// The object-subscription channel is open and every held path has
    /// been (re-)subscribed.
    Connected,
    /// A previously-established connection was lost; held objects have
    /// been flipped to [`ObjectState::Disconnected`].
    Disconnected,
}

struct Resident {
    object: Arc<Object>,
    refcount: AtomicUsize,
}

struct ViewResident {
    map: MutableMap<Uuid, WireValue>,
    refcount: AtomicUsize,
}

/// The mirror of the server's object registry (§4.7). One instance per
/// logical connection to a server; construction spawns the reconnect
/// loop, so a `ClientStore` keeps itself alive and working in the
/// background for as long as any [`Arc`] clone (including its own
/// internal one) survives.
pub struct ClientStore {
    factory: TransportFactory,
    source: String,
    token: String,
    reconnect: ReconnectSettings,
    sender: Mutex<Option<ChannelSender>>,
    /// Every outbound message funnels through this single queue so sends
    /// reach the wire in the same order `send_up` was called in, even
    /// though the underlying [`ChannelSender::send`] is async and would
    /// otherwise race across per-call spawned tasks (§5.1 "within one
    /// channel, delivery order equals send order").
    outbound: tokio_mpsc::UnboundedSender<Vec<u8>>,
    enc_interner: Mutex<PathInterner>,
    dec_interner: Mutex<PathInterner>,
    resident: DashMap<Path, Arc<Resident>>,
    views: DashMap<Path, Arc<ViewResident>>,
    connection_state: Cell<ConnectionState>,
}

impl ClientStore {
    /// Start connecting in the background and return immediately. `source`
    /// and `token` are the credentials sent with every `AUTH` attempt,
    /// including reconnects.
    pub fn connect(
        factory: TransportFactory,
        source: impl Into<String>,
        token: impl Into<String>,
        reconnect: ReconnectSettings,
    ) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = tokio_mpsc::unbounded_channel();
        let store = Arc::new(Self {
            factory,
            source: source.into(),
            token: token.into(),
            reconnect,
            sender: Mutex::new(None),
            outbound: outbound_tx,
            enc_interner: Mutex::new(PathInterner::new()),
            dec_interner: Mutex::new(PathInterner::new()),
            resident: DashMap::new(),
            views: DashMap::new(),
            connection_state: Cell::with_eq(ConnectionState::Connecting, |a, b| a == b),
        });
        let driver = store.clone();
        tokio::spawn(async move { driver.run().await });
        let drainer = store.clone();
        tokio::spawn(async move { drainer.drain_outbound(outbound_rx).await });
        store
    }

    /// Send every queued outbound frame to the current channel sender, one
    /// at a time and strictly in enqueue order. A frame queued while
    /// disconnected is dropped rather than buffered, matching `send_up`'s
    /// fire-and-forget contract — the resubscribe-on-reconnect pass in
    /// [`Self::resubscribe_all`] is what re-establishes state after a gap.
    async fn drain_outbound(self: Arc<Self>, mut rx: tokio_mpsc::UnboundedReceiver<Vec<u8>>) {
        while let Some(bytes) = rx.recv().await {
            let Some(sender) = self.sender.lock().unwrap().clone() else {
                trace!("dropping outbound message, not currently connected");
                continue;
            };
            if let Err(err) = sender.send(bytes).await {
                warn!(%err, "failed to send outbound message");
            }
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state.get()
    }

    pub fn on_connection_state(&self, callback: impl FnMut(&ConnectionState) + Send + 'static) -> Listener {
        self.connection_state.subscribe(callback)
    }

    /// Resolve `path` to an object of Rust type `T`, whose metadata must
    /// already have been registered via `conduit_sync::metadata::register`.
    /// Callers sharing the same path share one underlying [`Object`]; the
    /// first caller to resolve a previously-unheld path triggers `SUB`.
    pub fn resolve<T: 'static>(self: &Arc<Self>, path: Path) -> Result<ObjectHandle, ClientError> {
        let resident = match self.resident.get(&path) {
            Some(existing) => existing.clone(),
            None => {
                let meta = conduit_sync::metadata::lookup::<T>().ok_or(ClientError::UnregisteredType)?;
                let object = Arc::new(Object::new(path.clone(), meta));
                self.attach_forwarding(&object, &path);
                let fresh = Arc::new(Resident {
                    object,
                    refcount: AtomicUsize::new(0),
                });
                self.resident.entry(path.clone()).or_insert(fresh).clone()
            }
        };
        let previously_held = resident.refcount.fetch_add(1, Ordering::SeqCst) > 0;
        if !previously_held {
            self.send_up(UpMessage::Sub { path: path.clone() });
        }
        Ok(ObjectHandle::new(self.clone(), path, resident.object.clone()))
    }

    pub(crate) fn release_object(&self, path: &Path) {
        let last_handle = match self.resident.get(path) {
            Some(resident) => resident.refcount.fetch_sub(1, Ordering::SeqCst) == 1,
            None => return,
        };
        if last_handle {
            self.resident.remove(path);
            self.send_up(UpMessage::Unsub { path: path.clone() });
        }
    }

    /// Resolve `path` as a table view (§4.4 "View"), returning a handle
    /// over a reactive key/value projection rather than a declared object
    /// type.
    pub fn resolve_view(self: &Arc<Self>, path: Path) -> ViewHandle {
        let resident = match self.views.get(&path) {
            Some(existing) => existing.clone(),
            None => {
                let fresh = Arc::new(ViewResident {
                    map: MutableMap::new(),
                    refcount: AtomicUsize::new(0),
                });
                self.views.entry(path.clone()).or_insert(fresh).clone()
            }
        };
        let previously_held = resident.refcount.fetch_add(1, Ordering::SeqCst) > 0;
        if !previously_held {
            self.send_up(UpMessage::VSub { path: path.clone() });
        }
        ViewHandle::new(self.clone(), path, resident.map.clone())
    }

    pub(crate) fn release_view(&self, path: &Path) {
        let last_handle = match self.views.get(path) {
            Some(resident) => resident.refcount.fetch_sub(1, Ordering::SeqCst) == 1,
            None => return,
        };
        if last_handle {
            self.views.remove(path);
            self.send_up(UpMessage::VUnsub { path: path.clone() });
        }
    }

    /// Post `msg` to the queue property at `path`, independent of any
    /// resolved object (queues do not contribute to an object's snapshot
    /// and are not held via a handle, per §4.5).
    pub fn post(&self, path: Path, msg: WireValue) {
        self.send_up(UpMessage::Post { path, msg });
    }

    /// Register a subscriber on `object` that forwards every locally
    /// originated write back to the server as a `SYNC`. Runs once, at
    /// object creation, regardless of how many [`ObjectHandle`]s end up
    /// sharing the instance.
    fn attach_forwarding(self: &Arc<Self>, object: &Arc<Object>, path: &Path) {
        let store = self.clone();
        let path = path.clone();
        object.subscribe(
            AuthContext::system(),
            Arc::new(move |op| {
                store.send_up(UpMessage::Sync { path: path.clone(), op });
            }),
        );
    }

    /// Encode `msg` and enqueue it on the single outbound drain task, which
    /// preserves call order when it reaches the wire. Silently dropped
    /// while disconnected — this is fire-and-forget; a caller that cares
    /// about delivery watches [`Self::connection_state`] instead of an ack
    /// per message.
    fn send_up(&self, msg: UpMessage) {
        let bytes = {
            let mut interner = self.enc_interner.lock().unwrap();
            let mut w = Writer::new();
            if let Err(err) = msg.encode(&mut w, &mut interner) {
                warn!(%err, "failed to encode outbound message");
                return;
            }
            w.into_bytes()
        };
        // The receiver only goes away with the store itself, so this can't fail.
        let _ = self.outbound.send(bytes);
    }

    /// Resubscribe to every currently-held path, run once right after a
    /// (re-)connect (§4.7 "On connected it sends SUB for every
    /// currently-held path").
    fn resubscribe_all(&self) {
        for entry in self.resident.iter() {
            self.send_up(UpMessage::Sub { path: entry.key().clone() });
        }
        for entry in self.views.iter() {
            self.send_up(UpMessage::VSub { path: entry.key().clone() });
        }
    }

    /// Flip every held object to `disconnected` (§4.7 "on closed it flips
    /// object states to disconnected"). View projections are left as-is;
    /// they simply stop receiving updates until resubscribed.
    fn mark_all_disconnected(&self) {
        for entry in self.resident.iter() {
            entry.object.state.set(ObjectState::Disconnected);
        }
    }

    fn handle_down_payload(&self, payload: &[u8]) {
        let msg = {
            let mut reader = Reader::new(payload);
            let mut interner = self.dec_interner.lock().unwrap();
            DownMessage::decode(&mut reader, &mut interner, None)
        };
        match msg {
            Ok(msg) => self.handle_down(msg),
            Err(err) => warn!(%err, "dropping malformed down-message"),
        }
    }

    fn handle_down(&self, msg: DownMessage) {
        match msg {
            DownMessage::Sobj { path, fields } => {
                if let Some(resident) = self.resident.get(&path) {
                    match resident.object.apply_snapshot(fields) {
                        Ok(()) => resident.object.state.set(ObjectState::Active),
                        Err(err) => {
                            warn!(%path, %err, "failed to apply snapshot");
                            resident.object.state.set(ObjectState::Failed { cause: err.to_string() });
                        }
                    }
                }
            }
            DownMessage::Sync { path, op } => {
                if let Some(resident) = self.resident.get(&path) {
                    if let Err(err) = resident.object.apply_sync(op) {
                        warn!(%path, %err, "malformed inbound sync, ignoring");
                    }
                } else {
                    trace!(%path, "sync for a path with no local handle, ignoring");
                }
            }
            DownMessage::Serr { path, cause } => {
                if let Some(resident) = self.resident.get(&path) {
                    resident.object.state.set(ObjectState::Failed { cause });
                }
            }
            DownMessage::VSet { path, key, data } => {
                if let Some(view) = self.views.get(&path) {
                    view.map.set_from_sync(key, data, true);
                }
            }
            DownMessage::VDel { path, key } => {
                if let Some(view) = self.views.get(&path) {
                    view.map.delete_from_sync(&key, true);
                }
            }
            DownMessage::Verr { path, cause } => {
                warn!(%path, %cause, "view resolution failed");
            }
            DownMessage::DecErr { path, reason } => {
                warn!(%path, %reason, "server reported a decode error applying our sync");
            }
        }
    }

    /// One connect-authenticate-open-drain cycle. Returns once the
    /// transport reaches clean EOF or a step fails; the caller is the
    /// reconnect loop in [`Self::run`].
    async fn connect_once(&self) -> Result<(), ClientError> {
        let transport = (self.factory)().await?;
        let connection = MultiplexedConnection::new(transport, ChannelSettings::default(), AllowAllValidator);
        connection.authenticate(self.source.clone(), self.token.clone()).await?;
        let (sender, mut inbound) = connection.open_channel(OBJECT_CHANNEL_TYPE, Path::root()).await?;

        // A fresh channel means the server's interning table starts over
        // too, so ours must reset in lockstep (§4.2).
        *self.enc_interner.lock().unwrap() = PathInterner::new();
        *self.dec_interner.lock().unwrap() = PathInterner::new();
        *self.sender.lock().unwrap() = Some(sender);
        self.connection_state.set(ConnectionState::Connected);
        self.resubscribe_all();
        debug!("object-subscription channel established");

        let runner = connection.clone();
        let run_handle = tokio::spawn(async move { runner.run().await });

        while let Some(payload) = inbound.recv().await {
            self.handle_down_payload(&payload);
        }

        let _ = run_handle.await;
        Ok(())
    }

    /// The reconnect loop (§4.7 "Reconnect uses exponential backoff"):
    /// connect, run until disconnected, mark everything disconnected, wait
    /// out the backoff for this attempt, and try again. Runs for as long
    /// as this `Arc` clone (held by the spawning task itself) exists —
    /// there is no explicit shutdown; dropping every handle the caller
    /// holds simply stops anyone from observing further updates.
    async fn run(self: Arc<Self>) {
        let mut attempt: u32 = 0;
        loop {
            match self.connect_once().await {
                Ok(()) => attempt = 0,
                Err(err) => warn!(%err, "connection attempt failed"),
            }
            *self.sender.lock().unwrap() = None;
            self.connection_state.set(ConnectionState::Disconnected);
            self.mark_all_disconnected();

            let delay = self.reconnect.delay_for(attempt);
            attempt = attempt.saturating_add(1);
            debug!(?delay, attempt, "waiting before reconnect attempt");
            tokio::time::sleep(delay).await;
        }
    }
}
