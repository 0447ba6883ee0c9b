//! Per-connection session dispatch (§4.6): decodes the object-subscription
//! channel's up-messages, enforces access control, drives subscribe/
//! unsubscribe against the [`ObjectRegistry`], and encodes the matching
//! down-messages back to the peer.
//!
//! Up-messages that arrive before the connection's meta-channel `AUTH`
//! completes are held in a bounded queue (§7 "authentication failures")
//! rather than processed against a `None` identity; once authenticated
//! they are drained in arrival order.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use conduit::{ChannelAcceptor, ChannelSender};
use conduit_common::codec::{PathInterner, Reader, Value, Writer};
use conduit_common::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::access::AuthContext;
use crate::datastore::DataStore;
use crate::metadata::Identity;
use crate::protocol::{DownMessage, UpMessage};
use crate::queue::{DContext, QueueDispatcher};
use crate::registry::{ObjectRegistry, TableRegistry, ViewResolver};
use crate::settings::SessionSettings;
use crate::sync::SyncOp;
use crate::table::ViewProjection;

/// Split a queue property's address into its owning object path and the
/// queue's property name (the last `Name` segment).
fn split_queue_path(path: &Path) -> Option<(Path, String)> {
    let parent = path.parent()?;
    match path.segments().last()? {
        conduit_common::PathSegment::Name(name) => Some((parent, name.clone())),
        conduit_common::PathSegment::Key(_) => None,
    }
}

/// One connection's worth of object-subscription state. Constructed once
/// per accepted channel by [`SessionAcceptor`].
pub struct Session {
    identity: Mutex<Option<AuthContext<Identity>>>,
    pending: Mutex<VecDeque<Vec<u8>>>,
    settings: SessionSettings,
    objects: Arc<ObjectRegistry>,
    tables: Arc<TableRegistry>,
    store: Arc<dyn DataStore>,
    dispatcher: Arc<QueueDispatcher>,
    views: Arc<dyn ViewResolver>,
    /// The channel this session's frames actually go out on.
    sender: ChannelSender,
    /// Every outbound frame funnels through this single queue so sends
    /// reach the wire in the order they were produced, even though
    /// `ChannelSender::send` is async and a task spawned per message would
    /// otherwise race against others (§5 "the sequence of sync messages
    /// observed by a given subscriber is the order mutations were applied
    /// in").
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    enc_interner: Arc<Mutex<PathInterner>>,
    dec_interner: Mutex<PathInterner>,
    object_subs: Mutex<HashMap<Path, u64>>,
    view_subs: Mutex<HashMap<Path, (Arc<ViewProjection>, u64)>>,
    post_tx: mpsc::UnboundedSender<(Path, Value)>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: SessionSettings,
        objects: Arc<ObjectRegistry>,
        tables: Arc<TableRegistry>,
        store: Arc<dyn DataStore>,
        dispatcher: Arc<QueueDispatcher>,
        views: Arc<dyn ViewResolver>,
        sender: ChannelSender,
    ) -> Arc<Self> {
        let (post_tx, mut post_rx) = mpsc::unbounded_channel::<(Path, Value)>();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let session = Arc::new(Self {
            identity: Mutex::new(None),
            pending: Mutex::new(VecDeque::new()),
            settings,
            objects,
            tables,
            store,
            dispatcher,
            views,
            sender,
            outbound: outbound_tx,
            enc_interner: Arc::new(Mutex::new(PathInterner::new())),
            dec_interner: Mutex::new(PathInterner::new()),
            object_subs: Mutex::new(HashMap::new()),
            view_subs: Mutex::new(HashMap::new()),
            post_tx,
        });

        // The loopback task: every `post`, including a handler posting to
        // its own queue, is dispatched from here rather than inline, so a
        // handler can never reenter itself synchronously (§9 open
        // question).
        let loopback = session.clone();
        tokio::spawn(async move {
            while let Some((path, msg)) = post_rx.recv().await {
                loopback.dispatch_post(path, msg).await;
            }
        });

        // The drain task: the sole place `sender.send` is actually awaited,
        // so every down-message, sync forward, and view event this session
        // produces reaches the wire in the order it was queued.
        let drain = session.clone();
        tokio::spawn(async move {
            while let Some(bytes) = outbound_rx.recv().await {
                if let Err(err) = drain.sender.send(bytes).await {
                    warn!(%err, "failed to send outbound message");
                }
            }
        });

        session
    }

    fn current_auth(&self) -> AuthContext<Identity> {
        self.identity
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(AuthContext::system)
    }

    /// Mark this session authenticated and drain anything buffered while
    /// it waited. Called by the server's meta-channel glue once `AUTH`
    /// resolves to an identity for this connection.
    pub async fn authenticate(self: &Arc<Self>, identity: Identity) {
        *self.identity.lock().unwrap() = Some(AuthContext::user(identity));
        let queued: Vec<Vec<u8>> = self.pending.lock().unwrap().drain(..).collect();
        for frame in queued {
            self.handle_frame(&frame).await;
        }
    }

    /// Decode and dispatch one inbound frame on the object-subscription
    /// channel, buffering it if authentication has not yet completed.
    pub async fn handle_frame(self: &Arc<Self>, payload: &[u8]) {
        if self.identity.lock().unwrap().is_none() {
            let mut pending = self.pending.lock().unwrap();
            if pending.len() >= self.settings.pending_queue_capacity {
                warn!(capacity = self.settings.pending_queue_capacity, "pending queue full before authentication, dropping session");
                return;
            }
            pending.push_back(payload.to_vec());
            return;
        }

        let msg = {
            let mut r = Reader::new(payload);
            let mut interner = self.dec_interner.lock().unwrap();
            UpMessage::decode(&mut r, &mut interner, None)
        };
        match msg {
            Ok(msg) => self.dispatch(msg).await,
            Err(err) => warn!(%err, "dropping malformed up-message"),
        }
    }

    async fn dispatch(self: &Arc<Self>, msg: UpMessage) {
        let auth = self.current_auth();
        match msg {
            UpMessage::Sync { path, op } => self.handle_sync(&auth, path, op).await,
            UpMessage::Sub { path } => self.handle_sub(&auth, path).await,
            UpMessage::Unsub { path } => self.handle_unsub(&path),
            UpMessage::VSub { path } => self.handle_vsub(&auth, path).await,
            UpMessage::VUnsub { path } => self.handle_vunsub(&path),
            UpMessage::TAdd { path, key, data } => self.handle_tadd(&auth, path, key, data).await,
            UpMessage::TSet { path, key, data, merge } => self.handle_tset(&auth, path, key, data, merge).await,
            UpMessage::TDel { path, key } => self.handle_tdel(&auth, path, key).await,
            UpMessage::Post { path, msg } => self.post_tx.send((path, msg)).unwrap_or_else(|_| {
                warn!("post loopback channel closed, dropping POST");
            }),
        }
    }

    async fn handle_sync(&self, auth: &AuthContext<Identity>, path: Path, op: SyncOp) {
        let Some(object) = self.objects.get(&path) else {
            warn!(%path, "SYNC against an unresolved object, dropping");
            return;
        };
        if !object.meta.access.can_write(&path, op.index(), auth).is_authorized() {
            warn!(%path, index = op.index(), "SYNC denied by can_write");
            return;
        }
        let own_sub_id = self.object_subs.lock().unwrap().get(&path).copied();
        if let Err(err) = object.apply_sync_broadcast(op, own_sub_id) {
            self.send_down(DownMessage::DecErr { path, reason: err.to_string() }).await;
        }
    }

    async fn handle_sub(self: &Arc<Self>, auth: &AuthContext<Identity>, path: Path) {
        let object = match self.objects.resolve(&path).await {
            Ok(object) => object,
            Err(err) => {
                self.send_down(DownMessage::Serr { path, cause: err.to_string() }).await;
                return;
            }
        };
        if !object.meta.access.can_subscribe(&path, auth).is_authorized() {
            self.send_down(DownMessage::Serr { path, cause: "Access denied".to_string() }).await;
            return;
        }

        let fields = object.snapshot(auth);
        self.send_down(DownMessage::Sobj { path: path.clone(), fields }).await;

        let forward_path = path.clone();
        let forward_outbound = self.outbound.clone();
        let forward_interner = self.enc_interner.clone();
        let sub_id = object.subscribe(
            auth.clone(),
            Arc::new(move |op: SyncOp| {
                let msg = DownMessage::Sync { path: forward_path.clone(), op };
                let mut w = Writer::new();
                let mut interner = forward_interner.lock().unwrap();
                if let Err(err) = msg.encode(&mut w, &mut interner) {
                    warn!(%err, "failed to encode sync forward");
                    return;
                }
                drop(interner);
                if forward_outbound.send(w.into_bytes()).is_err() {
                    warn!("outbound queue closed, dropping sync forward");
                }
            }),
        );
        self.object_subs.lock().unwrap().insert(path.clone(), sub_id);
        self.dispatcher.publish_subscribed(path, auth.identity);
    }

    fn handle_unsub(&self, path: &Path) {
        if let Some(sub_id) = self.object_subs.lock().unwrap().remove(path) {
            if let Some(object) = self.objects.get(path) {
                object.unsubscribe(sub_id);
                self.objects.evict_if_unreferenced(path);
            }
            self.dispatcher.publish_unsubscribed(path.clone(), self.current_auth().identity);
        }
    }

    async fn handle_vsub(self: &Arc<Self>, auth: &AuthContext<Identity>, path: Path) {
        let Some((table_path, spec)) = self.resolve_view_spec(&path) else {
            self.send_down(DownMessage::Verr { path, cause: "no view registered at this path".to_string() }).await;
            return;
        };
        let table = self.tables.get_or_create(&table_path);
        match self.store.resolve_view_data(&table_path, &spec).await {
            Ok(rows) => {
                for (key, data) in &rows {
                    table.set(*key, data.clone());
                }
            }
            Err(err) => {
                self.send_down(DownMessage::Verr { path, cause: err.to_string() }).await;
                return;
            }
        }

        let view = ViewProjection::new(table, spec);
        for (key, data) in view.initial_batch() {
            self.send_down(DownMessage::VSet { path: path.clone(), key, data }).await;
        }

        let forward_path = path.clone();
        let forward_outbound = self.outbound.clone();
        let forward_interner = self.enc_interner.clone();
        let forward_path2 = path.clone();
        let forward_outbound2 = self.outbound.clone();
        let forward_interner2 = self.enc_interner.clone();
        let id = view.subscribe(
            Arc::new(move |key, data| {
                Self::send_view_event(
                    DownMessage::VSet { path: forward_path.clone(), key, data },
                    &forward_outbound,
                    &forward_interner,
                );
            }),
            Arc::new(move |key| {
                Self::send_view_event(
                    DownMessage::VDel { path: forward_path2.clone(), key },
                    &forward_outbound2,
                    &forward_interner2,
                );
            }),
        );
        let _ = auth;
        self.view_subs.lock().unwrap().insert(path, (view, id));
    }

    fn send_view_event(msg: DownMessage, outbound: &mpsc::UnboundedSender<Vec<u8>>, interner: &Arc<Mutex<PathInterner>>) {
        let mut w = Writer::new();
        let mut interner = interner.lock().unwrap();
        if let Err(err) = msg.encode(&mut w, &mut interner) {
            warn!(%err, "failed to encode view event");
            return;
        }
        drop(interner);
        if outbound.send(w.into_bytes()).is_err() {
            warn!("outbound queue closed, dropping view event");
        }
    }

    fn handle_vunsub(&self, path: &Path) {
        if let Some((view, id)) = self.view_subs.lock().unwrap().remove(path) {
            view.unsubscribe(id);
        }
    }

    /// Resolve `path` (the view instance being subscribed) to its
    /// backing table path and filter/order spec via the server's
    /// [`ViewResolver`].
    fn resolve_view_spec(&self, path: &Path) -> Option<(Path, crate::table::ViewSpec)> {
        self.views.resolve(path)
    }

    async fn handle_tadd(&self, auth: &AuthContext<Identity>, path: Path, key: Uuid, data: Value) {
        let Some(object) = self.table_owner(&path) else {
            return;
        };
        if !object.meta.access.can_create(&path, 0, auth).is_authorized() {
            warn!(%path, "TADD denied by can_create");
            return;
        }
        let table = self.tables.get_or_create(&path);
        table.add(key, data.clone());
        if let Err(err) = self.store.create_record(&path, key, data).await {
            warn!(%path, %err, "failed to persist created record");
        }
    }

    async fn handle_tset(&self, auth: &AuthContext<Identity>, path: Path, key: Uuid, data: Value, merge: bool) {
        let Some(object) = self.table_owner(&path) else {
            return;
        };
        if !object.meta.access.can_write(&path, 0, auth).is_authorized() {
            warn!(%path, "TSET denied by can_write");
            return;
        }
        let table = self.tables.get_or_create(&path);
        table.set(key, data.clone());
        if let Err(err) = self.store.update_record(&path, key, data, merge).await {
            warn!(%path, %err, "failed to persist updated record");
        }
    }

    async fn handle_tdel(&self, auth: &AuthContext<Identity>, path: Path, key: Uuid) {
        let Some(object) = self.table_owner(&path) else {
            return;
        };
        if !object.meta.access.can_write(&path, 0, auth).is_authorized() {
            warn!(%path, "TDEL denied by can_write");
            return;
        }
        let table = self.tables.get_or_create(&path);
        table.delete(key);
        if let Err(err) = self.store.delete_record(&path, key).await {
            warn!(%path, %err, "failed to persist deleted record");
        }
    }

    /// A table's access control is inherited from the object it hangs
    /// off of (§4.4: "records are opaque to access control beyond the
    /// owning object's permissions").
    fn table_owner(&self, table_path: &Path) -> Option<Arc<crate::object::Object>> {
        let owner_path = table_path.parent()?;
        self.objects.get(&owner_path)
    }

    async fn dispatch_post(self: &Arc<Self>, path: Path, msg: Value) {
        let Some((object_path, queue_name)) = split_queue_path(&path) else {
            warn!(%path, "POST to a malformed queue path");
            return;
        };
        let Some(object) = self.objects.get(&object_path) else {
            warn!(%object_path, "POST to an unresolved object's queue");
            return;
        };
        let Some(prop) = object.meta.property_named(&queue_name) else {
            warn!(%object_path, queue_name, "POST to an undeclared queue property");
            return;
        };
        let auth = self.current_auth();
        if !object.meta.access.can_write(&object_path, prop.index, &auth).is_authorized() {
            warn!(%path, "POST denied by can_write");
            return;
        }
        let ctx = DContext::new(object_path, auth, Arc::new({
            let tx = self.post_tx.clone();
            move |target, msg| {
                let _ = tx.send((target, msg));
            }
        }));
        if let Err(err) = self.dispatcher.dispatch(object.meta.type_name, prop.index, ctx, msg).await {
            debug!(%path, %err, "queue dispatch failed");
        }
    }

    async fn send_down(&self, msg: DownMessage) {
        let mut w = Writer::new();
        {
            let mut interner = self.enc_interner.lock().unwrap();
            if let Err(err) = msg.encode(&mut w, &mut interner) {
                warn!(%err, "failed to encode down-message");
                return;
            }
        }
        if self.outbound.send(w.into_bytes()).is_err() {
            warn!("outbound queue closed, dropping down-message");
        }
    }
}

/// Registers as the multiplexer's [`ChannelAcceptor`] for
/// [`OBJECT_CHANNEL_TYPE`]: one `accept()` call per inbound `OPEN`,
/// spawning a [`Session`] and a task draining its inbound frames.
pub struct SessionAcceptor {
    pub settings: SessionSettings,
    pub objects: Arc<ObjectRegistry>,
    pub tables: Arc<TableRegistry>,
    pub store: Arc<dyn DataStore>,
    pub dispatcher: Arc<QueueDispatcher>,
    pub views: Arc<dyn ViewResolver>,
}

#[async_trait]
impl ChannelAcceptor for SessionAcceptor {
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
        tokio::spawn(async move {
            while let Some(payload) = inbound.recv().await {
                session.handle_frame(&payload).await;
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_queue_path_separates_owner_and_name() {
        let path = Path::root().child("rooms").member(Uuid::nil()).child("chatq");
        let (owner, name) = split_queue_path(&path).unwrap();
        assert_eq!(owner, Path::root().child("rooms").member(Uuid::nil()));
        assert_eq!(name, "chatq");
    }

    #[test]
    fn split_queue_path_rejects_a_keyed_tail() {
        let path = Path::root().child("rooms").member(Uuid::nil());
        assert!(split_queue_path(&path).is_none());
    }
}
