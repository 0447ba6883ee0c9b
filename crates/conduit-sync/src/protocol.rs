//! The object-subscription channel's up/down message protocol (§4.4,
//! §4.5, §4.6, §6). Up-types and down-types share the numeric space
//! `0..4` with [`crate::sync::SyncOp`]; each direction's own control
//! types begin at `5`.
//!
//! Every path reference on this channel goes through a per-direction
//! [`PathInterner`] (§4.2): the first mention of a path spells it out in
//! full and assigns it an id; later messages send only the id.

use conduit_common::codec::{PathInterner, Reader, TypeRegistry, Value, Writer};
use conduit_common::error::WireError;
use conduit_common::path::Path;
use uuid::Uuid;

use crate::sync::SyncOp;

/// Channel type string this protocol registers under when opening a
/// channel via the multiplexer (§4.3's `OPEN(id, ctype, cpath)`).
pub const OBJECT_CHANNEL_TYPE: &str = "object-subscription";

/// Snapshot of one property, in the shape §4.5 describes: a value
/// property's current scalar, a set property's current members as an
/// array, or a map property's current entries as pairs. Carried as a
/// single tagged [`Value`] rather than a bespoke per-kind wire shape —
/// the kind is recovered from the property's own metadata at apply time,
/// and a mismatch there is what produces a [`crate::error::ObjectError::MalformedSync`].
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotField {
    pub index: u16,
    pub data: Value,
}

/// The sentinel index terminating a `SOBJ` property stream (§4.5).
pub const SOBJ_SENTINEL: u16 = 255;

fn write_path(w: &mut Writer, interner: &mut PathInterner, path: &Path) -> Result<(), WireError> {
    match interner.id_of(path) {
        Some(id) => {
            w.write_varsize((id as u64) + 1);
        }
        None => {
            let id = interner.intern(path.clone());
            w.write_varsize(0);
            w.write_varsize(id as u64);
            path.write(w)?;
        }
    }
    Ok(())
}

fn read_path(r: &mut Reader<'_>, interner: &mut PathInterner) -> Result<Path, WireError> {
    let marker = r.read_varsize()?;
    if marker == 0 {
        let id = r.read_varsize()? as u32;
        let path = Path::read(r)?;
        interner.insert_at(id, path.clone())?;
        Ok(path)
    } else {
        let id = (marker - 1) as u32;
        interner
            .resolve(id)
            .cloned()
            .ok_or(WireError::UnknownTypeId { id })
    }
}

fn write_snapshot_fields(w: &mut Writer, fields: &[SnapshotField]) {
    for field in fields {
        w.write_u16(field.index);
        field.data.encode_tagged(w);
    }
    w.write_u16(SOBJ_SENTINEL);
}

fn read_snapshot_fields(r: &mut Reader<'_>, registry: Option<&TypeRegistry>) -> Result<Vec<SnapshotField>, WireError> {
    let mut fields = Vec::new();
    loop {
        let index = r.read_u16()?;
        if index == SOBJ_SENTINEL {
            break;
        }
        let data = Value::decode_tagged(r, registry)?;
        fields.push(SnapshotField { index, data });
    }
    Ok(fields)
}

/// Client -> server messages on the object-subscription channel (§4.6).
#[derive(Debug, Clone, PartialEq)]
pub enum UpMessage {
    /// A locally-originated mutation being forwarded for the object at
    /// `path` (opcodes `0..4`).
    Sync { path: Path, op: SyncOp },
    /// Subscribe to the object at `path`.
    Sub { path: Path },
    /// Release this session's subscription to `path`.
    Unsub { path: Path },
    /// Subscribe to the view at `path`.
    VSub { path: Path },
    /// Release this session's subscription to the view at `path`.
    VUnsub { path: Path },
    /// Insert a new record `key` into the table at `path`.
    TAdd { path: Path, key: Uuid, data: Value },
    /// Overwrite (or, if `merge`, patch) record `key` in the table at `path`.
    TSet { path: Path, key: Uuid, data: Value, merge: bool },
    /// Remove record `key` from the table at `path`.
    TDel { path: Path, key: Uuid },
    /// Post `msg` to the queue property at `path`.
    Post { path: Path, msg: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum UpControl {
    Sub = 5,
    Unsub = 6,
    VSub = 7,
    VUnsub = 8,
    TAdd = 9,
    TSet = 10,
    TDel = 11,
    Post = 12,
}

impl UpMessage {
    pub fn encode(&self, w: &mut Writer, interner: &mut PathInterner) -> Result<(), WireError> {
        match self {
            UpMessage::Sync { path, op } => {
                op.encode(w);
                // opcode/index already written by `op.encode`; the path
                // follows so the decoder can read opcode first and only
                // then know whether a path reference trails it.
                write_path(w, interner, path)?;
            }
            UpMessage::Sub { path } => {
                w.write_u8(UpControl::Sub as u8);
                write_path(w, interner, path)?;
            }
            UpMessage::Unsub { path } => {
                w.write_u8(UpControl::Unsub as u8);
                write_path(w, interner, path)?;
            }
            UpMessage::VSub { path } => {
                w.write_u8(UpControl::VSub as u8);
                write_path(w, interner, path)?;
            }
            UpMessage::VUnsub { path } => {
                w.write_u8(UpControl::VUnsub as u8);
                write_path(w, interner, path)?;
            }
            UpMessage::TAdd { path, key, data } => {
                w.write_u8(UpControl::TAdd as u8);
                write_path(w, interner, path)?;
                w.write_uuid(*key);
                data.encode_tagged(w);
            }
            UpMessage::TSet { path, key, data, merge } => {
                w.write_u8(UpControl::TSet as u8);
                write_path(w, interner, path)?;
                w.write_uuid(*key);
                w.write_bool(*merge);
                data.encode_tagged(w);
            }
            UpMessage::TDel { path, key } => {
                w.write_u8(UpControl::TDel as u8);
                write_path(w, interner, path)?;
                w.write_uuid(*key);
            }
            UpMessage::Post { path, msg } => {
                w.write_u8(UpControl::Post as u8);
                write_path(w, interner, path)?;
                msg.encode_tagged(w);
            }
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>, interner: &mut PathInterner, registry: Option<&TypeRegistry>) -> Result<UpMessage, WireError> {
        let opcode = r.read_u8()?;
        if opcode < 5 {
            let op = SyncOp::decode_body(opcode, r, registry)?;
            let path = read_path(r, interner)?;
            return Ok(UpMessage::Sync { path, op });
        }
        Ok(match opcode {
            x if x == UpControl::Sub as u8 => UpMessage::Sub { path: read_path(r, interner)? },
            x if x == UpControl::Unsub as u8 => UpMessage::Unsub { path: read_path(r, interner)? },
            x if x == UpControl::VSub as u8 => UpMessage::VSub { path: read_path(r, interner)? },
            x if x == UpControl::VUnsub as u8 => UpMessage::VUnsub { path: read_path(r, interner)? },
            x if x == UpControl::TAdd as u8 => {
                let path = read_path(r, interner)?;
                let key = r.read_uuid()?;
                let data = Value::decode_tagged(r, registry)?;
                UpMessage::TAdd { path, key, data }
            }
            x if x == UpControl::TSet as u8 => {
                let path = read_path(r, interner)?;
                let key = r.read_uuid()?;
                let merge = r.read_bool()?;
                let data = Value::decode_tagged(r, registry)?;
                UpMessage::TSet { path, key, data, merge }
            }
            x if x == UpControl::TDel as u8 => {
                let path = read_path(r, interner)?;
                let key = r.read_uuid()?;
                UpMessage::TDel { path, key }
            }
            x if x == UpControl::Post as u8 => {
                let path = read_path(r, interner)?;
                let msg = Value::decode_tagged(r, registry)?;
                UpMessage::Post { path, msg }
            }
            other => return Err(WireError::UnknownTypeId { id: other as u32 }),
        })
    }
}

/// Server -> client messages on the object-subscription channel (§4.5,
/// §4.6).
#[derive(Debug, Clone, PartialEq)]
pub enum DownMessage {
    /// A live mutation forwarded to a subscriber for the object at `path`
    /// (opcodes `0..4`).
    Sync { path: Path, op: SyncOp },
    /// The initial snapshot of the object at `path` (§4.5).
    Sobj { path: Path, fields: Vec<SnapshotField> },
    /// Resolution of `path` failed; the object never reaches `active`.
    Serr { path: Path, cause: String },
    /// A view record at `key` was created or updated.
    VSet { path: Path, key: Uuid, data: Value },
    /// A view record at `key` was removed.
    VDel { path: Path, key: Uuid },
    /// View resolution at `path` failed.
    Verr { path: Path, cause: String },
    /// A sync message could not be applied (unknown property index,
    /// mismatched kind) — synthesized by the decoding side rather than
    /// forwarded as a panic (§4.4, §7).
    DecErr { path: Path, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum DownControl {
    Sobj = 5,
    Serr = 6,
    VSet = 7,
    VDel = 8,
    Verr = 9,
    DecErr = 10,
}

impl DownMessage {
    pub fn encode(&self, w: &mut Writer, interner: &mut PathInterner) -> Result<(), WireError> {
        match self {
            DownMessage::Sync { path, op } => {
                op.encode(w);
                write_path(w, interner, path)?;
            }
            DownMessage::Sobj { path, fields } => {
                w.write_u8(DownControl::Sobj as u8);
                write_path(w, interner, path)?;
                write_snapshot_fields(w, fields);
            }
            DownMessage::Serr { path, cause } => {
                w.write_u8(DownControl::Serr as u8);
                write_path(w, interner, path)?;
                w.write_string(cause)?;
            }
            DownMessage::VSet { path, key, data } => {
                w.write_u8(DownControl::VSet as u8);
                write_path(w, interner, path)?;
                w.write_uuid(*key);
                data.encode_tagged(w);
            }
            DownMessage::VDel { path, key } => {
                w.write_u8(DownControl::VDel as u8);
                write_path(w, interner, path)?;
                w.write_uuid(*key);
            }
            DownMessage::Verr { path, cause } => {
                w.write_u8(DownControl::Verr as u8);
                write_path(w, interner, path)?;
                w.write_string(cause)?;
            }
            DownMessage::DecErr { path, reason } => {
                w.write_u8(DownControl::DecErr as u8);
                write_path(w, interner, path)?;
                w.write_string(reason)?;
            }
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>, interner: &mut PathInterner, registry: Option<&TypeRegistry>) -> Result<DownMessage, WireError> {
        let opcode = r.read_u8()?;
        if opcode < 5 {
            let op = SyncOp::decode_body(opcode, r, registry)?;
            let path = read_path(r, interner)?;
            return Ok(DownMessage::Sync { path, op });
        }
        Ok(match opcode {
            x if x == DownControl::Sobj as u8 => {
                let path = read_path(r, interner)?;
                let fields = read_snapshot_fields(r, registry)?;
                DownMessage::Sobj { path, fields }
            }
            x if x == DownControl::Serr as u8 => DownMessage::Serr {
                path: read_path(r, interner)?,
                cause: r.read_string()?,
            },
            x if x == DownControl::VSet as u8 => {
                let path = read_path(r, interner)?;
                let key = r.read_uuid()?;
                let data = Value::decode_tagged(r, registry)?;
                DownMessage::VSet { path, key, data }
            }
            x if x == DownControl::VDel as u8 => {
                let path = read_path(r, interner)?;
                let key = r.read_uuid()?;
                DownMessage::VDel { path, key }
            }
            x if x == DownControl::Verr as u8 => DownMessage::Verr {
                path: read_path(r, interner)?,
                cause: r.read_string()?,
            },
            x if x == DownControl::DecErr as u8 => DownMessage::DecErr {
                path: read_path(r, interner)?,
                reason: r.read_string()?,
            },
            other => return Err(WireError::UnknownTypeId { id: other as u32 }),
        })
    }
}
