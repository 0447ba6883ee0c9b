//! Queue dispatch (§3 GLOSSARY "Queue", §4.6 `POST`): a queue property has
//! no reactive cell of its own (§4.5 "contributes nothing to `SOBJ`") —
//! instead, each posted message is handed to a server-registered handler
//! `(ctx, msg) -> ()`.
//!
//! Handlers are registered per object type and per queue property index
//! in their own dispatch table rather than living on
//! [`crate::metadata::ObjectTypeMeta`] itself, since a handler is
//! application wiring rather than wire-visible schema.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_common::codec::Value;
use conduit_common::path::Path;
use conduit_reactive::{Listener, Stream};
use dashmap::DashMap;

use crate::access::AuthContext;
use crate::error::ObjectError;
use crate::metadata::Identity;

/// The lifecycle events a queue consumer can observe about the object it
/// is attached to (§4.4's `MetaMsg` stream: "created, subscribed,
/// unsubscribed"), independent of any one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaMsg {
    Created { path: Path },
    Subscribed { path: Path, identity: Option<Identity> },
    Unsubscribed { path: Path, identity: Option<Identity> },
}

/// What a handler receives: the authenticated poster, the object's own
/// path, and a `post` callback for posting to any queue — including the
/// one currently being handled. Per the loopback rule (§9 open question:
/// "a queue handler posting to its own queue from within a handler call
/// must not reenter synchronously"), `post` always hands the message to
/// the owning session's inbound loop rather than calling a handler
/// directly.
#[derive(Clone)]
pub struct DContext {
    pub path: Path,
    pub auth: AuthContext<Identity>,
    post: Arc<dyn Fn(Path, Value) + Send + Sync>,
}

impl DContext {
    pub fn new(path: Path, auth: AuthContext<Identity>, post: Arc<dyn Fn(Path, Value) + Send + Sync>) -> Self {
        Self { path, auth, post }
    }

    /// Schedule `msg` to be posted to the queue at `target`. Never
    /// dispatches inline, even when `target == self.path`.
    pub fn post(&self, target: Path, msg: Value) {
        (self.post)(target, msg);
    }
}

/// A queue property's handler, invoked once per `POST` after
/// `can_write` has authorized the poster (§4.4, §4.6).
#[async_trait]
pub trait QueueHandler: Send + Sync {
    async fn handle(&self, ctx: &DContext, msg: Value) -> Result<(), ObjectError>;
}

/// Process-wide table of registered queue handlers plus the shared
/// `MetaMsg` broadcast stream, analogous to [`crate::metadata`]'s
/// type-keyed registry but scoped to dispatch rather than schema.
pub struct QueueDispatcher {
    handlers: DashMap<(&'static str, u16), Arc<dyn QueueHandler>>,
    meta: Stream<MetaMsg>,
}

impl Default for QueueDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            meta: Stream::new(),
        }
    }

    pub fn register(&self, type_name: &'static str, index: u16, handler: Arc<dyn QueueHandler>) {
        self.handlers.insert((type_name, index), handler);
    }

    pub fn is_registered(&self, type_name: &'static str, index: u16) -> bool {
        self.handlers.contains_key(&(type_name, index))
    }

    pub async fn dispatch(&self, type_name: &'static str, index: u16, ctx: DContext, msg: Value) -> Result<(), ObjectError> {
        let handler = self
            .handlers
            .get(&(type_name, index))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ObjectError::NotFound {
                path: ctx.path.to_string(),
                cause: format!("no handler registered for queue property {index} on {type_name}"),
            })?;
        handler.handle(&ctx, msg).await
    }

    pub fn subscribe_meta(&self, callback: impl FnMut(&MetaMsg) + Send + 'static) -> Listener {
        self.meta.on(callback)
    }

    pub fn publish_created(&self, path: Path) {
        self.meta.emit(&MetaMsg::Created { path });
    }

    pub fn publish_subscribed(&self, path: Path, identity: Option<Identity>) {
        self.meta.emit(&MetaMsg::Subscribed { path, identity });
    }

    pub fn publish_unsubscribed(&self, path: Path, identity: Option<Identity>) {
        self.meta.emit(&MetaMsg::Unsubscribed { path, identity });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Echo(Arc<Mutex<Vec<Value>>>);

    #[async_trait]
    impl QueueHandler for Echo {
        async fn handle(&self, _ctx: &DContext, msg: Value) -> Result<(), ObjectError> {
            self.0.lock().unwrap().push(msg);
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_invokes_registered_handler() {
        let dispatcher = QueueDispatcher::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        dispatcher.register("Room", 2, Arc::new(Echo(received.clone())));

        let path = Path::root().child("rooms");
        let ctx = DContext::new(path.clone(), AuthContext::system(), Arc::new(|_, _| {}));
        dispatcher
            .dispatch("Room", 2, ctx, Value::String("hi".into()))
            .await
            .unwrap();

        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dispatch_to_unregistered_queue_is_not_found() {
        let dispatcher = QueueDispatcher::new();
        let ctx = DContext::new(Path::root(), AuthContext::system(), Arc::new(|_, _| {}));
        let err = dispatcher.dispatch("Room", 9, ctx, Value::Bool(true)).await.unwrap_err();
        assert!(matches!(err, ObjectError::NotFound { .. }));
    }

    #[test]
    fn post_never_calls_handler_inline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let ctx = DContext::new(
            Path::root().child("rooms"),
            AuthContext::system(),
            Arc::new(move |_, _| {
                calls2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        ctx.post(Path::root().child("rooms"), Value::Bool(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
