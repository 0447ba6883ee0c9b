//! Derived reactive forms built on top of [`crate::Value`]: `map`,
//! `switch_map`, `join`, `when`, `when_once` (§4.1).
//!
//! Each combinator subscribes to its source(s) internally and returns the
//! [`Listener`] for that subscription alongside the derived value, so
//! callers decide how long the derivation stays live — there is no hidden
//! global registry keeping derived values alive forever.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::listener::Listener;
use crate::value::Value;

/// Derive `Value<U>` from `Value<T>` via a pure function, re-running `f`
/// every time the source changes.
pub fn map<T, U>(source: &Value<T>, f: impl Fn(&T) -> U + Send + Sync + 'static) -> (Value<U>, Listener)
where
    T: Clone + Send + 'static,
    U: Clone + PartialEq + Send + 'static,
{
    let derived = Value::new(f(&source.get()));
    let derived_for_cb = derived.clone();
    let listener = source.changes().on(move |v| derived_for_cb.set(f(v)));
    (derived, listener)
}

/// Derive `Value<U>` from `Value<T>` by switching to a new inner
/// `Value<U>` every time the source changes, always tracking whichever
/// inner value is current (flattens a value-of-values).
pub fn switch_map<T, U>(
    source: &Value<T>,
    f: impl Fn(&T) -> Value<U> + Send + Sync + 'static,
) -> (Value<U>, Listener)
where
    T: Clone + Send + 'static,
    U: Clone + PartialEq + Send + 'static,
{
    let inner = f(&source.get());
    let derived = Value::new(inner.get());

    // Holds the listener on whichever inner Value is current, so switching
    // sources doesn't accumulate subscriptions.
    let inner_listener: Arc<std::sync::Mutex<Option<Listener>>> = Arc::new(std::sync::Mutex::new(None));
    let install_inner = {
        let derived = derived.clone();
        let inner_listener = inner_listener.clone();
        move |inner: Value<U>| {
            let derived = derived.clone();
            let listener = inner.subscribe(move |v| derived.set(v.clone()));
            *inner_listener.lock().unwrap() = Some(listener);
        }
    };
    install_inner(inner);

    let outer_listener = source.changes().on(move |v| {
        install_inner(f(v));
    });

    (derived, outer_listener)
}

/// Combine two cells into one emitting `(A, B)` whenever either changes.
pub fn join<A, B>(a: &Value<A>, b: &Value<B>) -> (Value<(A, B)>, (Listener, Listener))
where
    A: Clone + PartialEq + Send + 'static,
    B: Clone + PartialEq + Send + 'static,
{
    let derived = Value::with_eq((a.get(), b.get()), |x: &(A, B), y: &(A, B)| {
        x.0 == y.0 && x.1 == y.1
    });

    let listener_a = {
        let derived = derived.clone();
        let b = b.clone();
        a.changes().on(move |av| derived.set((av.clone(), b.get())))
    };
    let listener_b = {
        let derived = derived.clone();
        let a = a.clone();
        b.changes().on(move |bv| derived.set((a.get(), bv.clone())))
    };

    (derived, (listener_a, listener_b))
}

/// Invoke `callback` every time `source`'s value satisfies `predicate`
/// (including immediately, if it already does).
pub fn when<T: Clone + Send + 'static>(
    source: &Value<T>,
    predicate: impl Fn(&T) -> bool + Send + 'static,
    mut callback: impl FnMut(&T) + Send + 'static,
) -> Listener {
    source.subscribe(move |v| {
        if predicate(v) {
            callback(v);
        }
    })
}

/// Resolve once `source`'s value satisfies `predicate`, then stop
/// listening — the one-shot predicate subscription used throughout the
/// session/object-engine layers to implement suspension points (§5).
pub async fn when_once<T: Clone + Send + 'static>(
    source: &Value<T>,
    predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
) -> T {
    if let Some(value) = {
        let current = source.get();
        predicate(&current).then_some(current)
    } {
        return value;
    }

    let notify = Arc::new(Notify::new());
    let result: Arc<std::sync::Mutex<Option<T>>> = Arc::new(std::sync::Mutex::new(None));

    let listener = {
        let notify = notify.clone();
        let result = result.clone();
        source.changes().on(move |v| {
            if predicate(v) && result.lock().unwrap().is_none() {
                *result.lock().unwrap() = Some(v.clone());
                notify.notify_one();
            }
        })
    };

    loop {
        if let Some(value) = result.lock().unwrap().take() {
            drop(listener);
            return value;
        }
        notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_tracks_source() {
        let source = Value::new(1);
        let (derived, _listener) = map(&source, |v| v * 10);
        assert_eq!(derived.get(), 10);
        source.set(2);
        assert_eq!(derived.get(), 20);
    }

    #[test]
    fn join_combines_both_sources() {
        let a = Value::new(1);
        let b = Value::new("x".to_string());
        let (joined, _listeners) = join(&a, &b);
        assert_eq!(joined.get(), (1, "x".to_string()));
        a.set(2);
        assert_eq!(joined.get(), (2, "x".to_string()));
    }

    #[tokio::test]
    async fn when_once_resolves_on_transition() {
        let source = Value::new(false);
        let source2 = source.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            source2.set(true);
        });
        let value = when_once(&source, |v| *v).await;
        assert!(value);
    }

    #[tokio::test]
    async fn when_once_resolves_immediately_if_already_true() {
        let source = Value::new(true);
        let value = tokio::time::timeout(std::time::Duration::from_millis(50), when_once(&source, |v| *v))
            .await
            .unwrap();
        assert!(value);
    }
}
