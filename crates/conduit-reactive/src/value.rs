//! `Value<T>`: a current-value cell plus a change stream, with
//! strict-inequality update semantics and immediate replay on subscribe
//! (§4.1).

use std::sync::{Arc, Mutex};

use crate::listener::Listener;
use crate::stream::Stream;

type EqFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// A reactive cell holding a current value of `T`, notifying subscribers
/// only when a `set` actually changes the value under the configured
/// equality function.
///
/// Two equality modes are available, matching §4.1's note on reference vs.
/// structural equality:
/// - [`Value::new`] (a.k.a. reference_eq): compares via `T::eq`. For a
///   plain value type this is ordinary value equality; for `T = Arc<R>`
///   this is `Arc`'s own `PartialEq`, which is structural through the
///   pointee unless `R` doesn't implement it — use
///   [`Value::new_reference`] when you specifically want pointer identity.
/// - [`Value::new_reference`]: compares `Arc` pointers directly
///   (`Arc::ptr_eq`), ignoring the pointee's contents — cheaper, and the
///   right choice when a record's identity (not its contents) is what
///   "changed" means (e.g. replacing a whole snapshot after a `SOBJ`).
pub struct Value<T: Clone + Send + 'static> {
    current: Arc<Mutex<T>>,
    changes: Stream<T>,
    eq: EqFn<T>,
}

impl<T: Clone + Send + 'static> Clone for Value<T> {
    fn clone(&self) -> Self {
        Self {
            current: self.current.clone(),
            changes: self.changes.clone(),
            eq: self.eq.clone(),
        }
    }
}

impl<T: Clone + PartialEq + Send + 'static> Value<T> {
    /// Create a cell using `T::eq` for change detection.
    pub fn new(initial: T) -> Self {
        Self::with_eq(initial, |a, b| a == b)
    }
}

impl<T: Clone + Send + 'static> Value<Arc<T>> {
    /// Create a cell over an `Arc<T>` that treats a `set` as a change only
    /// when it installs a genuinely different allocation.
    pub fn new_reference(initial: Arc<T>) -> Self {
        Self::with_eq(initial, |a, b| Arc::ptr_eq(a, b))
    }
}

impl<T: Clone + Send + 'static> Value<T> {
    pub fn with_eq(initial: T, eq: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            current: Arc::new(Mutex::new(initial)),
            changes: Stream::new(),
            eq: Arc::new(eq),
        }
    }

    pub fn get(&self) -> T {
        self.current.lock().unwrap().clone()
    }

    /// Replace the current value, emitting a change event only if it
    /// differs from the previous value under this cell's equality
    /// function (strict inequality, per §4.1).
    pub fn set(&self, value: T) {
        let changed = {
            let mut current = self.current.lock().unwrap();
            if (self.eq)(&current, &value) {
                false
            } else {
                *current = value.clone();
                true
            }
        };
        if changed {
            self.changes.emit(&value);
        }
    }

    /// Subscribe to changes. The callback fires immediately with the
    /// current value (replay on subscribe, per §4.1), then again on every
    /// subsequent change.
    pub fn subscribe(&self, mut callback: impl FnMut(&T) + Send + 'static) -> Listener {
        {
            let current = self.current.lock().unwrap();
            callback(&current);
        }
        self.changes.on(callback)
    }

    /// The underlying change stream, for combinators that want raw change
    /// events without the immediate-replay behavior of [`Value::subscribe`].
    pub fn changes(&self) -> &Stream<T> {
        &self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscribe_replays_current_value() {
        let value = Value::new(5);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let last = Arc::new(Mutex::new(0));
        let last2 = last.clone();
        let _listener = value.subscribe(move |v| {
            calls2.fetch_add(1, Ordering::SeqCst);
            *last2.lock().unwrap() = *v;
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*last.lock().unwrap(), 5);
    }

    #[test]
    fn set_is_a_no_op_when_equal() {
        let value = Value::new(5);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let _listener = value.subscribe(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        value.set(5);
        assert_eq!(calls.load(Ordering::SeqCst), 1); // only the replay

        value.set(6);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reference_eq_ignores_pointee_equality() {
        let value = Value::new_reference(Arc::new(String::from("a")));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let _listener = value.subscribe(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        // Same contents, different allocation: this must still be seen as
        // a change under reference equality.
        value.set(Arc::new(String::from("a")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
