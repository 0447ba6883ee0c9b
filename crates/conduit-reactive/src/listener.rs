//! A `Drop`-based subscription handle.
//!
//! conduit-reactive has no host UI framework to lean on for effect-scope
//! disposal, so `Listener` carries its own teardown thunk and runs it on
//! `Drop` instead.

/// A live subscription on a [`crate::Stream`], [`crate::Value`],
/// [`crate::MutableSet`], or [`crate::MutableMap`]. Dropping it unsubscribes.
/// Call [`Listener::detach`] to keep the subscription alive indefinitely
/// without holding onto the handle.
#[must_use = "dropping a Listener immediately unsubscribes it"]
pub struct Listener {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Listener {
    pub(crate) fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Keep the underlying subscription alive forever, discarding the
    /// ability to unsubscribe via this handle.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener").finish_non_exhaustive()
    }
}
