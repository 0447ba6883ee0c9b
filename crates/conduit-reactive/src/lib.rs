//! Reactive primitives shared by the object engine and the client store:
//! [`Stream`], [`Value`], [`MutableSet`], [`MutableMap`], and the derived
//! forms in [`derived`] (§4.1).

mod derived;
mod listener;
mod mutable_map;
mod mutable_set;
mod stream;
mod value;

pub use derived::{join, map, switch_map, when, when_once};
pub use listener::Listener;
pub use mutable_map::{MapEvent, MutableMap};
pub use mutable_set::{MutableSet, SetEvent};
pub use stream::Stream;
pub use value::Value;
