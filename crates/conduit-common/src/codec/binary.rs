//! The compact, length-extensible binary encoding used by every wire message
//! in conduit: a byte buffer with a write cursor (`Writer`) and a paired
//! read cursor (`Reader`), plus the type-tagged `Value` form used for
//! polymorphic `data`/`record` fields.
//!
//! All multibyte integers are big-endian, matching spec §6.

use std::fmt;

use uuid::Uuid;

use crate::error::WireError;

/// A timestamp is a float64 count of milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamp(pub f64);

impl Timestamp {
    pub fn from_millis(millis: f64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> f64 {
        self.0
    }
}

/// The 62-glyph alphabet used to render a [`Uuid`] textually (§4.2).
///
/// This is purely a display/debugging convenience; the wire encoding of a
/// `uuid` field is always the 16 raw bytes (see [`Writer::write_uuid`]).
const BASE62_ALPHABET: &[u8; 62] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Render a UUID's 128 bits as a base-62 string using [`BASE62_ALPHABET`].
pub fn uuid_to_base62(id: Uuid) -> String {
    let mut value = u128::from_be_bytes(*id.as_bytes());
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        let digit = (value % 62) as usize;
        digits.push(BASE62_ALPHABET[digit]);
        value /= 62;
    }
    digits.reverse();
    String::from_utf8(digits).expect("base62 alphabet is ASCII")
}

/// Parse a base-62 string produced by [`uuid_to_base62`] back into the
/// 128-bit value it represents, then reinterpret those bits as a [`Uuid`].
pub fn uuid_from_base62(s: &str) -> Option<Uuid> {
    let mut value: u128 = 0;
    for c in s.bytes() {
        let digit = BASE62_ALPHABET.iter().position(|&b| b == c)? as u128;
        value = value.checked_mul(62)?.checked_add(digit)?;
    }
    Some(Uuid::from_bytes(value.to_be_bytes()))
}

/// A length-extensible write cursor over an owned `Vec<u8>`.
///
/// Builds frames out of length-prefixed primitives (`size16`/`size64`
/// prefixes ahead of a payload, §4.2) exposed individually rather than
/// bundled behind a general-purpose serializer like `bincode`.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Reset the cursor to empty. Used by encoders that must drop a
    /// partially-written message on error (§4.8/§7: "encode errors reset
    /// the encoder cursor").
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// `varSize`: LEB128-style unsigned varint, 7 data bits per byte.
    pub fn write_varsize(&mut self, mut v: u64) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                break;
            } else {
                self.buf.push(byte | 0x80);
            }
        }
    }

    /// `varInt`: zigzag-encoded signed varint atop [`Writer::write_varsize`].
    pub fn write_varint(&mut self, v: i64) {
        let zigzag = ((v << 1) ^ (v >> 63)) as u64;
        self.write_varsize(zigzag);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_timestamp(&mut self, ts: Timestamp) {
        self.write_f64(ts.0);
    }

    pub fn write_uuid(&mut self, id: Uuid) {
        self.buf.extend_from_slice(id.as_bytes());
    }

    /// Length-prefixed UTF-8 string, `size16` length prefix, 64 KiB max
    /// per §4.2.
    pub fn write_string(&mut self, s: &str) -> Result<(), WireError> {
        let bytes = s.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(WireError::StringTooLong { len: bytes.len() });
        }
        self.write_u16(bytes.len() as u16);
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Raw byte passthrough, used for embedding already-encoded payloads
    /// (e.g. a `Data` value's body after its type-id prefix).
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

/// A read cursor over a borrowed byte slice.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::UnexpectedEof {
                wanted: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.take(1)?[0] != 0)
    }

    pub fn read_i8(&mut self) -> Result<i8, WireError> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16, WireError> {
        Ok(i16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_varsize(&mut self) -> Result<u64, WireError> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(result)
    }

    pub fn read_varint(&mut self) -> Result<i64, WireError> {
        let zigzag = self.read_varsize()?;
        Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
    }

    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        Ok(f32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_f64(&mut self) -> Result<f64, WireError> {
        Ok(f64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_timestamp(&mut self) -> Result<Timestamp, WireError> {
        Ok(Timestamp(self.read_f64()?))
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, WireError> {
        let bytes: [u8; 16] = self.take(16)?.try_into().unwrap();
        Ok(Uuid::from_bytes(bytes))
    }

    pub fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    pub fn read_raw(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.take(n)
    }
}

/// Stable small integer ids for the built-in scalar and composite types.
/// Ids `< 64` are reserved for this alphabet; `>= 64` is the user-defined
/// range registered via [`TypeRegistry`] (§4.2, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TypeTag {
    Bool = 0,
    I8 = 1,
    I16 = 2,
    I32 = 3,
    U8 = 4,
    U16 = 5,
    U32 = 6,
    VarInt = 7,
    VarSize = 8,
    F32 = 9,
    F64 = 10,
    String = 11,
    Timestamp = 12,
    Uuid = 13,
    Array = 14,
    Set = 15,
    Map = 16,
    Record = 17,
}

impl TypeTag {
    pub const FIRST_USER_ID: u32 = 64;

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Some(match id {
            0 => Self::Bool,
            1 => Self::I8,
            2 => Self::I16,
            3 => Self::I32,
            4 => Self::U8,
            5 => Self::U16,
            6 => Self::U32,
            7 => Self::VarInt,
            8 => Self::VarSize,
            9 => Self::F32,
            10 => Self::F64,
            11 => Self::String,
            12 => Self::Timestamp,
            13 => Self::Uuid,
            14 => Self::Array,
            15 => Self::Set,
            16 => Self::Map,
            17 => Self::Record,
            _ => return None,
        })
    }
}

/// A fully polymorphic, tagged value: the wire representation of a `data`
/// field, and of every array/set/map element when the container is
/// heterogeneous (§4.2).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    U8(u8),
    U16(u16),
    U32(u32),
    VarInt(i64),
    VarSize(u64),
    F32(f32),
    F64(f64),
    String(String),
    Timestamp(Timestamp),
    Uuid(Uuid),
    Array(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Record(Vec<(String, Value)>),
    /// A user-registered scalar, identified by its [`TypeRegistry`] id and
    /// carrying its already-encoded payload.
    Custom(u32, Vec<u8>),
}

/// The shared type id of every element in `items`, or `None` if `items` is
/// empty or mixes types. Backs the compact homogeneous encoding for
/// arrays/sets/maps (§4.2): a single leading type id instead of a tag on
/// every element.
fn homogeneous_tag_iter<'a>(mut items: impl Iterator<Item = &'a Value>) -> Option<u32> {
    let first = items.next()?.tag_id();
    if items.all(|v| v.tag_id() == first) {
        Some(first)
    } else {
        None
    }
}

impl Value {
    fn tag_id(&self) -> u32 {
        match self {
            Value::Bool(_) => TypeTag::Bool.id(),
            Value::I8(_) => TypeTag::I8.id(),
            Value::I16(_) => TypeTag::I16.id(),
            Value::I32(_) => TypeTag::I32.id(),
            Value::U8(_) => TypeTag::U8.id(),
            Value::U16(_) => TypeTag::U16.id(),
            Value::U32(_) => TypeTag::U32.id(),
            Value::VarInt(_) => TypeTag::VarInt.id(),
            Value::VarSize(_) => TypeTag::VarSize.id(),
            Value::F32(_) => TypeTag::F32.id(),
            Value::F64(_) => TypeTag::F64.id(),
            Value::String(_) => TypeTag::String.id(),
            Value::Timestamp(_) => TypeTag::Timestamp.id(),
            Value::Uuid(_) => TypeTag::Uuid.id(),
            Value::Array(_) => TypeTag::Array.id(),
            Value::Set(_) => TypeTag::Set.id(),
            Value::Map(_) => TypeTag::Map.id(),
            Value::Record(_) => TypeTag::Record.id(),
            Value::Custom(id, _) => *id,
        }
    }

    /// Write `self` as a tagged `data` value: a `varSize` type id followed
    /// by the type's own encoding.
    pub fn encode_tagged(&self, w: &mut Writer) {
        w.write_varsize(self.tag_id() as u64);
        self.encode_body(w);
    }

    fn encode_body(&self, w: &mut Writer) {
        match self {
            Value::Bool(v) => w.write_bool(*v),
            Value::I8(v) => w.write_i8(*v),
            Value::I16(v) => w.write_i16(*v),
            Value::I32(v) => w.write_i32(*v),
            Value::U8(v) => w.write_u8(*v),
            Value::U16(v) => w.write_u16(*v),
            Value::U32(v) => w.write_u32(*v),
            Value::VarInt(v) => w.write_varint(*v),
            Value::VarSize(v) => w.write_varsize(*v),
            Value::F32(v) => w.write_f32(*v),
            Value::F64(v) => w.write_f64(*v),
            // Strings inside `data` are not length-limited the way a bare
            // `string` field is elsewhere; failure here would require
            // dropping the whole tagged value, so callers work in bytes.
            Value::String(v) => {
                w.write_varsize(v.len() as u64);
                w.write_raw(v.as_bytes());
            }
            Value::Timestamp(v) => w.write_timestamp(*v),
            Value::Uuid(v) => w.write_uuid(*v),
            Value::Array(items) | Value::Set(items) => {
                w.write_u32(items.len() as u32);
                match homogeneous_tag_iter(items.iter()) {
                    Some(tag_id) => {
                        w.write_bool(true);
                        w.write_varsize(tag_id as u64);
                        for item in items {
                            item.encode_body(w);
                        }
                    }
                    None => {
                        w.write_bool(false);
                        for item in items {
                            item.encode_tagged(w);
                        }
                    }
                }
            }
            Value::Map(pairs) => {
                w.write_u32(pairs.len() as u32);
                let keys = homogeneous_tag_iter(pairs.iter().map(|(k, _)| k));
                let values = homogeneous_tag_iter(pairs.iter().map(|(_, v)| v));
                match (keys, values) {
                    (Some(key_tag), Some(value_tag)) => {
                        w.write_bool(true);
                        w.write_varsize(key_tag as u64);
                        w.write_varsize(value_tag as u64);
                        for (k, v) in pairs {
                            k.encode_body(w);
                            v.encode_body(w);
                        }
                    }
                    _ => {
                        w.write_bool(false);
                        for (k, v) in pairs {
                            k.encode_tagged(w);
                            v.encode_tagged(w);
                        }
                    }
                }
            }
            Value::Record(fields) => {
                w.write_u16(fields.len() as u16);
                for (name, v) in fields {
                    // field-name strings share the `string` length limit
                    w.write_string(name).expect("record field name too long");
                    v.encode_tagged(w);
                }
            }
            Value::Custom(_, bytes) => {
                w.write_varsize(bytes.len() as u64);
                w.write_raw(bytes);
            }
        }
    }

    /// Decode a tagged `data` value previously written by
    /// [`Value::encode_tagged`]. Unknown type ids in the built-in range
    /// are a hard error; ids `>= 64` are looked up in `registry` if given.
    pub fn decode_tagged(
        r: &mut Reader<'_>,
        registry: Option<&TypeRegistry>,
    ) -> Result<Value, WireError> {
        let id = r.read_varsize()? as u32;
        Self::decode_body(id, r, registry)
    }

    fn decode_body(
        id: u32,
        r: &mut Reader<'_>,
        registry: Option<&TypeRegistry>,
    ) -> Result<Value, WireError> {
        let Some(tag) = TypeTag::from_id(id) else {
            if id >= TypeTag::FIRST_USER_ID {
                if let Some(registry) = registry {
                    if let Some(entry) = registry.get(id) {
                        let len = r.read_varsize()? as usize;
                        let bytes = r.read_raw(len)?.to_vec();
                        let _ = entry; // presence check; payload carried verbatim
                        return Ok(Value::Custom(id, bytes));
                    }
                }
            }
            return Err(WireError::UnknownTypeId { id });
        };
        Ok(match tag {
            TypeTag::Bool => Value::Bool(r.read_bool()?),
            TypeTag::I8 => Value::I8(r.read_i8()?),
            TypeTag::I16 => Value::I16(r.read_i16()?),
            TypeTag::I32 => Value::I32(r.read_i32()?),
            TypeTag::U8 => Value::U8(r.read_u8()?),
            TypeTag::U16 => Value::U16(r.read_u16()?),
            TypeTag::U32 => Value::U32(r.read_u32()?),
            TypeTag::VarInt => Value::VarInt(r.read_varint()?),
            TypeTag::VarSize => Value::VarSize(r.read_varsize()?),
            TypeTag::F32 => Value::F32(r.read_f32()?),
            TypeTag::F64 => Value::F64(r.read_f64()?),
            TypeTag::String => {
                let len = r.read_varsize()? as usize;
                let bytes = r.read_raw(len)?;
                Value::String(String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)?)
            }
            TypeTag::Timestamp => Value::Timestamp(r.read_timestamp()?),
            TypeTag::Uuid => Value::Uuid(r.read_uuid()?),
            TypeTag::Array | TypeTag::Set => {
                let len = r.read_u32()? as usize;
                let homogeneous = r.read_bool()?;
                let mut items = Vec::with_capacity(len);
                if homogeneous {
                    let elem_id = r.read_varsize()? as u32;
                    for _ in 0..len {
                        items.push(Value::decode_body(elem_id, r, registry)?);
                    }
                } else {
                    for _ in 0..len {
                        items.push(Value::decode_tagged(r, registry)?);
                    }
                }
                if tag == TypeTag::Array {
                    Value::Array(items)
                } else {
                    Value::Set(items)
                }
            }
            TypeTag::Map => {
                let len = r.read_u32()? as usize;
                let homogeneous = r.read_bool()?;
                let mut pairs = Vec::with_capacity(len);
                if homogeneous {
                    let key_id = r.read_varsize()? as u32;
                    let value_id = r.read_varsize()? as u32;
                    for _ in 0..len {
                        let k = Value::decode_body(key_id, r, registry)?;
                        let v = Value::decode_body(value_id, r, registry)?;
                        pairs.push((k, v));
                    }
                } else {
                    for _ in 0..len {
                        let k = Value::decode_tagged(r, registry)?;
                        let v = Value::decode_tagged(r, registry)?;
                        pairs.push((k, v));
                    }
                }
                Value::Map(pairs)
            }
            TypeTag::Record => {
                let len = r.read_u16()? as usize;
                let mut fields = Vec::with_capacity(len);
                for _ in 0..len {
                    let name = r.read_string()?;
                    let v = Value::decode_tagged(r, registry)?;
                    fields.push((name, v));
                }
                Value::Record(fields)
            }
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A user-defined scalar type registration: a stable id `>= 64` plus a
/// human-readable name for diagnostics. Decoding for custom ids currently
/// carries the payload verbatim as [`Value::Custom`]; applications that
/// need a concrete Rust type on the other end convert from that payload
/// themselves; registration is a table of per-type function pointers
/// rather than a single global `Any` decoder.
#[derive(Debug, Clone)]
pub struct TypeRegistration {
    pub id: u32,
    pub name: &'static str,
}

/// Registry of user-defined scalar types embeddable in `data`/`record`
/// fields, keyed by their small stable id (§4.2, §9 "polymorphic
/// collections driven by string type tags").
#[derive(Debug, Default)]
pub struct TypeRegistry {
    entries: std::collections::HashMap<u32, TypeRegistration>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: u32, name: &'static str) -> Result<(), WireError> {
        if id < TypeTag::FIRST_USER_ID {
            return Err(WireError::DuplicateTypeId {
                id,
                existing: "built-in",
            });
        }
        if let Some(existing) = self.entries.get(&id) {
            return Err(WireError::DuplicateTypeId {
                id,
                existing: existing.name,
            });
        }
        self.entries.insert(id, TypeRegistration { id, name });
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<&TypeRegistration> {
        self.entries.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_primitives() {
        let mut w = Writer::new();
        w.write_bool(true);
        w.write_i8(-27);
        w.write_i16(2342);
        w.write_f64(f64::MAX);
        w.write_string("I \u{2665}\u{fe0e} math.").unwrap();
        let id = Uuid::new_v4();
        w.write_uuid(id);
        let ts = Timestamp(1_700_000_000_000.0);
        w.write_timestamp(ts);

        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_i8().unwrap(), -27);
        assert_eq!(r.read_i16().unwrap(), 2342);
        assert_eq!(r.read_f64().unwrap(), f64::MAX);
        assert_eq!(r.read_string().unwrap(), "I \u{2665}\u{fe0e} math.");
        assert_eq!(r.read_uuid().unwrap(), id);
        assert_eq!(r.read_timestamp().unwrap().0, ts.0);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn varint_roundtrip() {
        for v in [0i64, 1, -1, 127, -128, 300, -300, i64::MAX, i64::MIN] {
            let mut w = Writer::new();
            w.write_varint(v);
            let bytes = w.into_bytes();
            let mut r = Reader::new(&bytes);
            assert_eq!(r.read_varint().unwrap(), v);
        }
    }

    #[test]
    fn varsize_is_compact_for_small_values() {
        let mut w = Writer::new();
        w.write_varsize(5);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn string_over_64kib_is_rejected() {
        let mut w = Writer::new();
        let huge = "a".repeat(u16::MAX as usize + 1);
        assert!(matches!(
            w.write_string(&huge),
            Err(WireError::StringTooLong { .. })
        ));
    }

    #[test]
    fn base62_roundtrip() {
        let id = Uuid::new_v4();
        let s = uuid_to_base62(id);
        assert_eq!(uuid_from_base62(&s), Some(id));
    }

    #[test]
    fn value_tagged_roundtrip() {
        let value = Value::Record(vec![
            ("active".to_string(), Value::Bool(true)),
            ("count".to_string(), Value::VarInt(-42)),
            (
                "tags".to_string(),
                Value::Array(vec![Value::String("a".into()), Value::String("b".into())]),
            ),
        ]);

        let mut w = Writer::new();
        value.encode_tagged(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = Value::decode_tagged(&mut r, None).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn homogeneous_array_roundtrips_through_the_compact_encoding() {
        let value = Value::Array(vec![Value::I32(1), Value::I32(2), Value::I32(3)]);
        let mut w = Writer::new();
        value.encode_tagged(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(Value::decode_tagged(&mut r, None).unwrap(), value);
    }

    #[test]
    fn heterogeneous_array_falls_back_to_per_element_tagging() {
        let value = Value::Array(vec![Value::I32(1), Value::String("x".into())]);
        let mut w = Writer::new();
        value.encode_tagged(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(Value::decode_tagged(&mut r, None).unwrap(), value);
    }

    #[test]
    fn homogeneous_map_roundtrips_through_the_compact_encoding() {
        let value = Value::Map(vec![
            (Value::String("a".into()), Value::U32(1)),
            (Value::String("b".into()), Value::U32(2)),
        ]);
        let mut w = Writer::new();
        value.encode_tagged(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(Value::decode_tagged(&mut r, None).unwrap(), value);
    }

    #[test]
    fn heterogeneous_map_falls_back_to_per_pair_tagging() {
        let value = Value::Map(vec![
            (Value::String("a".into()), Value::U32(1)),
            (Value::U32(7), Value::Bool(true)),
        ]);
        let mut w = Writer::new();
        value.encode_tagged(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(Value::decode_tagged(&mut r, None).unwrap(), value);
    }

    #[test]
    fn unknown_type_id_errors() {
        let mut w = Writer::new();
        w.write_varsize(999);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            Value::decode_tagged(&mut r, None),
            Err(WireError::UnknownTypeId { id: 999 })
        ));
    }
}
