use thiserror::Error;

/// Errors raised by the wire codec (`crate::codec`) and path machinery.
///
/// Decode errors on an inbound message are never propagated as a panic or a
/// bubbled exception through the session loop; callers that need the
/// `DECERR` sentinel behavior from spec §4.4/§7 construct it explicitly from
/// a `WireError` rather than unwinding.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WireError {
    /// Ran out of bytes while decoding a fixed-width or length-prefixed value.
    #[error("unexpected end of buffer: wanted {wanted} bytes, had {available}")]
    UnexpectedEof { wanted: usize, available: usize },

    /// A `string` field exceeded the 64 KiB wire limit (§4.2).
    #[error("string too long: {len} bytes exceeds the 64 KiB wire limit")]
    StringTooLong { len: usize },

    /// The UTF-8 decoding of a length-prefixed string failed.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    /// A type id read off the wire does not match any built-in or
    /// registered user type.
    #[error("unknown type id {id}")]
    UnknownTypeId { id: u32 },

    /// A type id was used in a context expecting a different kind of value
    /// (e.g. a `map` type id used where an `array` type id was expected).
    #[error("type mismatch: expected {expected}, found type id {found}")]
    TypeMismatch { expected: &'static str, found: u32 },

    /// A `path` field's length-prefix exceeded what a `size8` can express.
    #[error("path too long: {len} segments exceeds the 255-segment limit")]
    PathTooLong { len: usize },

    /// Re-registration of a type id already claimed by another type.
    #[error("type id {id} is already registered to {existing}")]
    DuplicateTypeId { id: u32, existing: &'static str },

    /// A peer introduced a path-interning id out of order: ids must be
    /// assigned in the increasing sequence the sender used when it first
    /// interned each path.
    #[error("peer introduced path id {id} out of order, expected {expected}")]
    OutOfOrderIntern { id: u32, expected: u32 },
}
