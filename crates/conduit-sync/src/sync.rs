//! Sync messages: the five typed operations a property mutation emits
//! (§3 GLOSSARY, §4.4). Each carries the stable property index it
//! targets, so the receiving engine can locate the property in its
//! `metas` list without a name lookup.

use conduit_common::codec::{Reader, Value, Writer};
use conduit_common::error::WireError;

/// One mutation against a single property, keyed by its stable index
/// rather than its name (§9 open question: "only the index-keyed variant
/// is specified here").
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOp {
    /// Replace a value property's current scalar.
    ValSet { index: u16, value: Value },
    /// Insert `value` into a set property.
    SetAdd { index: u16, value: Value },
    /// Remove `value` from a set property.
    SetDel { index: u16, value: Value },
    /// Insert or overwrite `key -> value` in a map property.
    MapSet { index: u16, key: Value, value: Value },
    /// Remove `key` from a map property.
    MapDel { index: u16, key: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncOpCode {
    ValSet = 0,
    SetAdd = 1,
    SetDel = 2,
    MapSet = 3,
    MapDel = 4,
}

impl SyncOp {
    pub fn index(&self) -> u16 {
        match self {
            SyncOp::ValSet { index, .. }
            | SyncOp::SetAdd { index, .. }
            | SyncOp::SetDel { index, .. }
            | SyncOp::MapSet { index, .. }
            | SyncOp::MapDel { index, .. } => *index,
        }
    }

    fn opcode(&self) -> SyncOpCode {
        match self {
            SyncOp::ValSet { .. } => SyncOpCode::ValSet,
            SyncOp::SetAdd { .. } => SyncOpCode::SetAdd,
            SyncOp::SetDel { .. } => SyncOpCode::SetDel,
            SyncOp::MapSet { .. } => SyncOpCode::MapSet,
            SyncOp::MapDel { .. } => SyncOpCode::MapDel,
        }
    }

    /// The up/down wire opcode space `0..4` shared by sync ops (§6); control
    /// message types for the object-subscription channel begin at `5`.
    pub fn encode(&self, w: &mut Writer) {
        w.write_u8(self.opcode() as u8);
        w.write_u16(self.index());
        match self {
            SyncOp::ValSet { value, .. } | SyncOp::SetAdd { value, .. } | SyncOp::SetDel { value, .. } => {
                value.encode_tagged(w);
            }
            SyncOp::MapSet { key, value, .. } => {
                key.encode_tagged(w);
                value.encode_tagged(w);
            }
            SyncOp::MapDel { key, .. } => {
                key.encode_tagged(w);
            }
        }
    }

    /// Decode a sync op whose opcode byte has already been consumed by the
    /// caller and found to be in `0..4` (the up/down dispatcher reads the
    /// opcode byte first to decide whether it is looking at a sync op or a
    /// control message).
    pub fn decode_body(opcode: u8, r: &mut Reader<'_>, registry: Option<&conduit_common::codec::TypeRegistry>) -> Result<SyncOp, WireError> {
        let index = r.read_u16()?;
        Ok(match opcode {
            0 => SyncOp::ValSet { index, value: Value::decode_tagged(r, registry)? },
            1 => SyncOp::SetAdd { index, value: Value::decode_tagged(r, registry)? },
            2 => SyncOp::SetDel { index, value: Value::decode_tagged(r, registry)? },
            3 => SyncOp::MapSet {
                index,
                key: Value::decode_tagged(r, registry)?,
                value: Value::decode_tagged(r, registry)?,
            },
            4 => SyncOp::MapDel { index, key: Value::decode_tagged(r, registry)? },
            other => return Err(WireError::UnknownTypeId { id: other as u32 }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(op: SyncOp) {
        let mut w = Writer::new();
        op.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let opcode = r.read_u8().unwrap();
        let decoded = SyncOp::decode_body(opcode, &mut r, None).unwrap();
        assert_eq!(decoded, op);
    }

    #[test]
    fn roundtrip_every_op() {
        roundtrip(SyncOp::ValSet { index: 3, value: Value::String("hi".into()) });
        roundtrip(SyncOp::SetAdd { index: 1, value: Value::Uuid(uuid::Uuid::nil()) });
        roundtrip(SyncOp::SetDel { index: 1, value: Value::Uuid(uuid::Uuid::nil()) });
        roundtrip(SyncOp::MapSet {
            index: 2,
            key: Value::String("k".into()),
            value: Value::VarInt(9),
        });
        roundtrip(SyncOp::MapDel { index: 2, key: Value::String("k".into()) });
    }
}
