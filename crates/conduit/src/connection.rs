//! The multiplexed connection: owns the meta channel state machine and the
//! local [`ChannelTable`], and routes inbound frames to whichever channel
//! they address (§4.3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use conduit_common::{MetaMessage, Path, Reader, Writer, META_CHANNEL_ID};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::auth::AuthValidator;
use crate::channel::{ChannelState, ChannelTable};
use crate::error::ChannelError;
use crate::settings::ChannelSettings;
use crate::transport::Transport;

/// Identifies one connection for logging purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connection#{}", self.0)
    }
}

static NEXT_CONNECTION_ID: AtomicU32 = AtomicU32::new(1);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Decides whether to accept an inbound `OPEN` for a given channel type,
/// and receives the inbound payload stream if it does. `conduit-sync`
/// registers one of these per channel type it understands (e.g.
/// `"object-subscription"`).
#[async_trait::async_trait]
pub trait ChannelAcceptor: Send + Sync {
    /// Called when the peer sends `OPEN(id, ctype, cpath)` for a `ctype`
    /// this acceptor is registered under. Returning `Ok` accepts the
    /// channel and registers `inbound` as its payload sink; returning
    /// `Err` causes a `FAILED` reply carrying the message as `cause`.
    async fn accept(
        self: Arc<Self>,
        cpath: Path,
        local_id: u16,
        inbound: mpsc::Receiver<Vec<u8>>,
        outbound: ChannelSender,
    ) -> Result<(), String>;
}

/// A handle a channel's owner uses to send payloads; wraps outbound
/// queuing so sends issued while the channel is still `Connecting` are
/// deferred until `READY` (§4.3 "Send gating").
#[derive(Clone)]
pub struct ChannelSender {
    id: u16,
    connection: Arc<ConnectionInner>,
}

impl ChannelSender {
    pub fn id(&self) -> u16 {
        self.id
    }

    pub async fn send(&self, payload: Vec<u8>) -> Result<(), ChannelError> {
        self.connection.send_on_channel(self.id, payload).await
    }

    pub async fn close(&self) -> Result<(), ChannelError> {
        self.connection.close_channel(self.id).await
    }
}

struct PendingOpen {
    reply: oneshot::Sender<Result<u16, ChannelError>>,
}

struct ConnectionState {
    table: ChannelTable,
    inbound_senders: HashMap<u16, mpsc::Sender<Vec<u8>>>,
    pending_opens: HashMap<u16, PendingOpen>,
    pending_sends: HashMap<u16, Vec<Vec<u8>>>,
    authed: bool,
    auth_waiters: Vec<oneshot::Sender<Result<(), ChannelError>>>,
}

/// Shared internals behind an `Arc`, so [`ChannelSender`] handles can
/// outlive the loop that created them.
struct ConnectionInner {
    id: ConnectionId,
    transport: Mutex<Box<dyn Transport>>,
    settings: ChannelSettings,
    state: Mutex<ConnectionState>,
    open_notify: Notify,
}

impl ConnectionInner {
    async fn write_meta(&self, msg: &MetaMessage) -> Result<(), ChannelError> {
        let mut w = Writer::new();
        msg.encode(&mut w)?;
        let frame = conduit_common::messages::write_frame(META_CHANNEL_ID, &w.into_bytes());
        self.transport.lock().await.write_frame(&frame).await
    }

    async fn write_channel(&self, id: u16, payload: &[u8]) -> Result<(), ChannelError> {
        let frame = conduit_common::messages::write_frame(id, payload);
        self.transport.lock().await.write_frame(&frame).await
    }

    async fn send_on_channel(&self, id: u16, payload: Vec<u8>) -> Result<(), ChannelError> {
        let ready = {
            let mut state = self.state.lock().await;
            match state.table.get(id) {
                Some(ChannelState::Open { .. }) => true,
                Some(ChannelState::Connecting) => {
                    state.pending_sends.entry(id).or_default().push(payload.clone());
                    false
                }
                _ => return Err(ChannelError::ChannelNotOpen { id }),
            }
        };
        if ready {
            self.write_channel(id, &payload).await?;
        }
        Ok(())
    }

    async fn close_channel(&self, id: u16) -> Result<(), ChannelError> {
        {
            let mut state = self.state.lock().await;
            state.table.remove(id);
            state.inbound_senders.remove(&id);
            state.pending_sends.remove(&id);
        }
        self.write_meta(&MetaMessage::Close { id }).await
    }

    /// Flush payloads that were queued while `id` was `Connecting`, now
    /// that it has transitioned to `Open`.
    async fn flush_pending(&self, id: u16) -> Result<(), ChannelError> {
        let queued = {
            let mut state = self.state.lock().await;
            state.pending_sends.remove(&id).unwrap_or_default()
        };
        for payload in queued {
            self.write_channel(id, &payload).await?;
        }
        self.open_notify.notify_waiters();
        Ok(())
    }
}

/// The multiplexed connection itself: one instance per transport-level
/// connection, generic over the [`AuthValidator`] used to gate the meta
/// channel's `AUTH` message.
pub struct MultiplexedConnection<V: AuthValidator> {
    inner: Arc<ConnectionInner>,
    validator: Arc<V>,
    acceptors: dashmap::DashMap<String, Arc<dyn ChannelAcceptor>>,
    identity: Mutex<Option<V::Identity>>,
}

impl<V: AuthValidator + 'static> MultiplexedConnection<V> {
    pub fn new(transport: Box<dyn Transport>, settings: ChannelSettings, validator: V) -> Arc<Self> {
        let id = ConnectionId::next();
        let inner = Arc::new(ConnectionInner {
            id,
            transport: Mutex::new(transport),
            state: Mutex::new(ConnectionState {
                table: ChannelTable::new(&settings),
                inbound_senders: HashMap::new(),
                pending_opens: HashMap::new(),
                pending_sends: HashMap::new(),
                authed: false,
                auth_waiters: Vec::new(),
            }),
            settings,
            open_notify: Notify::new(),
        });
        Arc::new(Self {
            inner,
            validator: Arc::new(validator),
            acceptors: dashmap::DashMap::new(),
            identity: Mutex::new(None),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn register_acceptor(&self, ctype: impl Into<String>, acceptor: Arc<dyn ChannelAcceptor>) {
        self.acceptors.insert(ctype.into(), acceptor);
    }

    /// Client-side: send `AUTH` and await the matching `AUTHED` (or a
    /// connection-closed error if the transport drops first).
    pub async fn authenticate(&self, source: impl Into<String>, token: impl Into<String>) -> Result<(), ChannelError> {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock().await;
            state.auth_waiters.push(tx);
        }
        self.inner
            .write_meta(&MetaMessage::Auth {
                source: source.into(),
                id: request_id,
                token: token.into(),
            })
            .await?;
        rx.await
            .map_err(|_| ChannelError::ConnectionClosed { awaited: "AUTHED" })?
    }

    pub async fn is_authed(&self) -> bool {
        self.inner.state.lock().await.authed
    }

    /// Initiator-side `OPEN`: allocate a local id, send `OPEN`, and await
    /// `READY`/`FAILED`. Returns the sender half and a channel to receive
    /// inbound payloads on success.
    pub async fn open_channel(
        &self,
        ctype: impl Into<String>,
        cpath: Path,
    ) -> Result<(ChannelSender, mpsc::Receiver<Vec<u8>>), ChannelError> {
        let ctype = ctype.into();
        let (inbound_tx, inbound_rx) = mpsc::channel(self.inner.settings.pending_send_capacity);
        let id = {
            let mut state = self.inner.state.lock().await;
            if state.table.len() >= self.inner.settings.max_channels {
                return Err(ChannelError::TooManyChannels {
                    max_channels: self.inner.settings.max_channels,
                });
            }
            let id = state.table.allocate()?;
            state.inbound_senders.insert(id, inbound_tx);
            id
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock().await;
            state.pending_opens.insert(id, PendingOpen { reply: reply_tx });
        }

        self.inner
            .write_meta(&MetaMessage::Open { id, ctype, cpath })
            .await?;

        let remote_id = match tokio::time::timeout(self.inner.settings.open_timeout, reply_rx).await {
            Ok(received) => received.map_err(|_| ChannelError::ConnectionClosed { awaited: "READY" })??,
            Err(_) => {
                let mut state = self.inner.state.lock().await;
                state.pending_opens.remove(&id);
                state.table.remove(id);
                state.inbound_senders.remove(&id);
                return Err(ChannelError::OpenTimedOut);
            }
        };
        let _ = remote_id;

        self.inner.flush_pending(id).await?;

        Ok((
            ChannelSender {
                id,
                connection: self.inner.clone(),
            },
            inbound_rx,
        ))
    }

    /// Drive the connection's single cooperative read loop. Returns when
    /// the transport reaches a clean EOF or a read/decode error occurs;
    /// either way every live channel is closed first.
    pub async fn run(self: &Arc<Self>) {
        let span = tracing::info_span!("connection", id = %self.inner.id);
        let _enter = span.enter();
        loop {
            let frame = {
                let mut transport = self.inner.transport.lock().await;
                transport.read_frame().await
            };
            match frame {
                Ok(Some(frame)) => {
                    if let Err(err) = self.dispatch_frame(&frame).await {
                        warn!(%err, "dropping malformed frame");
                    }
                }
                Ok(None) => {
                    debug!("transport reached clean eof");
                    break;
                }
                Err(err) => {
                    warn!(%err, "transport read failed");
                    break;
                }
            }
        }
        self.close_all_channels().await;
    }

    async fn close_all_channels(&self) {
        let (ids, waiters) = {
            let mut state = self.inner.state.lock().await;
            let ids = state.table.close_all();
            state.inbound_senders.clear();
            state.pending_sends.clear();
            state.authed = false;
            (ids, std::mem::take(&mut state.auth_waiters))
        };
        for waiter in waiters {
            let _ = waiter.send(Err(ChannelError::ConnectionClosed { awaited: "AUTHED" }));
        }
        if !ids.is_empty() {
            debug!(count = ids.len(), "closed channels on disconnect");
        }
    }

    async fn dispatch_frame(&self, frame: &[u8]) -> Result<(), ChannelError> {
        let (channel_id, payload) = conduit_common::messages::read_frame(frame)?;
        if channel_id == META_CHANNEL_ID {
            let mut r = Reader::new(payload);
            let msg = MetaMessage::decode(&mut r)?;
            self.handle_meta(msg).await
        } else {
            let sender = {
                let state = self.inner.state.lock().await;
                state.inbound_senders.get(&channel_id).cloned()
            };
            match sender {
                Some(sender) => {
                    if sender.send(payload.to_vec()).await.is_err() {
                        warn!(channel_id, "inbound receiver dropped, ignoring payload");
                    }
                    Ok(())
                }
                None => {
                    trace!(channel_id, "payload for unknown/closed channel, ignoring");
                    Ok(())
                }
            }
        }
    }

    async fn handle_meta(&self, msg: MetaMessage) -> Result<(), ChannelError> {
        match msg {
            MetaMessage::Auth { source, id, token } => {
                match self.validator.validate(&source, &token).await {
                    Some(identity) => {
                        *self.identity.lock().await = Some(identity);
                        {
                            let mut state = self.inner.state.lock().await;
                            state.authed = true;
                        }
                        self.inner.write_meta(&MetaMessage::Authed { id }).await?;
                    }
                    None => {
                        warn!(source = %source, "authentication failed");
                    }
                }
                Ok(())
            }
            MetaMessage::Authed { id: _ } => {
                let mut state = self.inner.state.lock().await;
                state.authed = true;
                for waiter in std::mem::take(&mut state.auth_waiters) {
                    let _ = waiter.send(Ok(()));
                }
                Ok(())
            }
            MetaMessage::Open { id: remote_id, ctype, cpath } => {
                let at_capacity = {
                    let state = self.inner.state.lock().await;
                    state.table.len() >= self.inner.settings.max_channels
                };
                if at_capacity {
                    return self
                        .inner
                        .write_meta(&MetaMessage::Failed {
                            id: remote_id,
                            cause: ChannelError::TooManyChannels {
                                max_channels: self.inner.settings.max_channels,
                            }
                            .to_string(),
                        })
                        .await;
                }
                let acceptor = self.acceptors.get(&ctype).map(|e| e.clone());
                match acceptor {
                    Some(acceptor) => {
                        let (inbound_tx, inbound_rx) = mpsc::channel(self.inner.settings.pending_send_capacity);
                        let local_id = {
                            let mut state = self.inner.state.lock().await;
                            let local_id = state.table.allocate()?;
                            state.table.set_open(local_id, remote_id);
                            state.inbound_senders.insert(local_id, inbound_tx);
                            local_id
                        };
                        let sender = ChannelSender {
                            id: local_id,
                            connection: self.inner.clone(),
                        };
                        self.inner
                            .write_meta(&MetaMessage::Ready {
                                id: remote_id,
                                remote_id: local_id,
                            })
                            .await?;
                        if let Err(cause) = acceptor.accept(cpath, local_id, inbound_rx, sender).await {
                            self.inner
                                .write_meta(&MetaMessage::Failed { id: remote_id, cause })
                                .await?;
                        }
                    }
                    None => {
                        self.inner
                            .write_meta(&MetaMessage::Failed {
                                id: remote_id,
                                cause: format!("unknown channel type {ctype:?}"),
                            })
                            .await?;
                    }
                }
                Ok(())
            }
            MetaMessage::Ready { id, remote_id } => {
                let pending = {
                    let mut state = self.inner.state.lock().await;
                    state.table.set_open(id, remote_id);
                    state.pending_opens.remove(&id)
                };
                if let Some(pending) = pending {
                    let _ = pending.reply.send(Ok(remote_id));
                }
                self.inner.flush_pending(id).await
            }
            MetaMessage::Failed { id, cause } => {
                let pending = {
                    let mut state = self.inner.state.lock().await;
                    state.table.set_failed(id, cause.clone());
                    state.pending_opens.remove(&id)
                };
                if let Some(pending) = pending {
                    let _ = pending.reply.send(Err(ChannelError::ChannelNotOpen { id }));
                } else {
                    warn!(id, %cause, "channel open failed");
                }
                Ok(())
            }
            MetaMessage::Close { id } => {
                let mut state = self.inner.state.lock().await;
                state.table.remove(id);
                state.inbound_senders.remove(&id);
                state.pending_sends.remove(&id);
                Ok(())
            }
        }
    }
}
