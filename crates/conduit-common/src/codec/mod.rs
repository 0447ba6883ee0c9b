//! Wire codec primitives (`Writer`/`Reader`/`Value`) and the path-interning
//! dictionary used to shrink repeated `Path` values on the wire.

mod binary;
mod intern;
mod keyable;

pub use binary::{
    uuid_from_base62, uuid_to_base62, Reader, Timestamp, TypeRegistration, TypeRegistry, TypeTag,
    Value, Writer,
};
pub use intern::PathInterner;
pub use keyable::Keyable;
