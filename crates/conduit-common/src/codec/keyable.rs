//! `Keyable`: an `Eq + Hash` wrapper over [`Value`], used for set elements
//! and map keys (§3: "set of `etype` (keyable scalars only)").
//!
//! `Value` itself only implements `PartialEq` — it carries `f32`/`f64`
//! variants, which have no total equality. Sets and maps, however, are
//! declared over a fixed `etype`/`ktype` restricted to keyable scalars,
//! so a property's own metadata is what actually keeps
//! floats out of a `Keyable`; this wrapper just gives the reactive
//! collections the trait bounds they need without forcing a second,
//! parallel scalar type through the rest of the codec.

use std::hash::{Hash, Hasher};

use super::binary::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Keyable(pub Value);

impl Eq for Keyable {}

impl Hash for Keyable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Bool(v) => {
                0u8.hash(state);
                v.hash(state);
            }
            Value::I8(v) => {
                1u8.hash(state);
                v.hash(state);
            }
            Value::I16(v) => {
                2u8.hash(state);
                v.hash(state);
            }
            Value::I32(v) => {
                3u8.hash(state);
                v.hash(state);
            }
            Value::U8(v) => {
                4u8.hash(state);
                v.hash(state);
            }
            Value::U16(v) => {
                5u8.hash(state);
                v.hash(state);
            }
            Value::U32(v) => {
                6u8.hash(state);
                v.hash(state);
            }
            Value::VarInt(v) => {
                7u8.hash(state);
                v.hash(state);
            }
            Value::VarSize(v) => {
                8u8.hash(state);
                v.hash(state);
            }
            Value::String(v) => {
                9u8.hash(state);
                v.hash(state);
            }
            Value::Uuid(v) => {
                10u8.hash(state);
                v.hash(state);
            }
            other => panic!("{other:?} is not a keyable scalar (etype/ktype must exclude floats, timestamps, and composites)"),
        }
    }
}

impl From<Value> for Keyable {
    fn from(value: Value) -> Self {
        Keyable(value)
    }
}

impl From<Keyable> for Value {
    fn from(key: Keyable) -> Self {
        key.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn equal_values_hash_the_same() {
        let mut set = HashSet::new();
        set.insert(Keyable(Value::String("a".into())));
        assert!(set.contains(&Keyable(Value::String("a".into()))));
        assert!(!set.contains(&Keyable(Value::String("b".into()))));
    }

    #[test]
    #[should_panic(expected = "not a keyable scalar")]
    fn float_values_are_rejected() {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        Keyable(Value::F64(1.0)).hash(&mut hasher);
    }
}
