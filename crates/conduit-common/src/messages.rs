//! Meta-channel (channel id `0`) message union and the outer frame format
//! shared by every channel (§6).

use uuid::Uuid;

use crate::codec::{Reader, Writer};
use crate::error::WireError;
use crate::path::Path;

/// Channel id `0` is reserved for the meta channel; every other channel id
/// is assigned from `1..65534` by a [`crate::path`]-agnostic table owned by
/// `conduit`.
pub const META_CHANNEL_ID: u16 = 0;

/// The meta channel's fixed message union (§6). Unlike application
/// channels, the meta channel never goes through the generic `data`/path
/// interning machinery — its codec is these eight fields, always.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaMessage {
    /// `source → server`: request authentication with a pluggable
    /// validator keyed by `source`, presenting `token` and a
    /// caller-chosen `id` that the server echoes back on [`MetaMessage::Authed`].
    Auth { source: String, id: Uuid, token: String },
    /// `server → client`: authentication succeeded for request `id`.
    Authed { id: Uuid },
    /// `initiator → peer`: open a new application channel of type `ctype`
    /// at `cpath`, using `id` as the initiator's local channel id.
    Open { id: u16, ctype: String, cpath: Path },
    /// `peer → initiator`: channel `id` is open; `remote_id` is the peer's
    /// own local id for the same channel.
    Ready { id: u16, remote_id: u16 },
    /// `peer → initiator`: channel `id` could not be opened; `cause`
    /// is a human-readable diagnostic, not a structured error.
    Failed { id: u16, cause: String },
    /// either direction: channel `id` is closing.
    Close { id: u16 },
}

/// The one-byte discriminant prefixing every meta-channel payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
enum MetaType {
    Auth = 0,
    Authed = 1,
    Open = 2,
    Ready = 3,
    Failed = 4,
    Close = 5,
}

impl MetaMessage {
    fn meta_type(&self) -> MetaType {
        match self {
            MetaMessage::Auth { .. } => MetaType::Auth,
            MetaMessage::Authed { .. } => MetaType::Authed,
            MetaMessage::Open { .. } => MetaType::Open,
            MetaMessage::Ready { .. } => MetaType::Ready,
            MetaMessage::Failed { .. } => MetaType::Failed,
            MetaMessage::Close { .. } => MetaType::Close,
        }
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        w.write_i8(self.meta_type() as i8);
        match self {
            MetaMessage::Auth { source, id, token } => {
                w.write_string(source)?;
                w.write_uuid(*id);
                w.write_string(token)?;
            }
            MetaMessage::Authed { id } => {
                w.write_uuid(*id);
            }
            MetaMessage::Open { id, ctype, cpath } => {
                w.write_u16(*id);
                w.write_string(ctype)?;
                cpath.write(w)?;
            }
            MetaMessage::Ready { id, remote_id } => {
                w.write_u16(*id);
                w.write_u16(*remote_id);
            }
            MetaMessage::Failed { id, cause } => {
                w.write_u16(*id);
                w.write_string(cause)?;
            }
            MetaMessage::Close { id } => {
                w.write_u16(*id);
            }
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<MetaMessage, WireError> {
        let raw = r.read_i8()?;
        Ok(match raw {
            x if x == MetaType::Auth as i8 => MetaMessage::Auth {
                source: r.read_string()?,
                id: r.read_uuid()?,
                token: r.read_string()?,
            },
            x if x == MetaType::Authed as i8 => MetaMessage::Authed { id: r.read_uuid()? },
            x if x == MetaType::Open as i8 => MetaMessage::Open {
                id: r.read_u16()?,
                ctype: r.read_string()?,
                cpath: Path::read(r)?,
            },
            x if x == MetaType::Ready as i8 => MetaMessage::Ready {
                id: r.read_u16()?,
                remote_id: r.read_u16()?,
            },
            x if x == MetaType::Failed as i8 => MetaMessage::Failed {
                id: r.read_u16()?,
                cause: r.read_string()?,
            },
            x if x == MetaType::Close as i8 => MetaMessage::Close { id: r.read_u16()? },
            other => {
                return Err(WireError::UnknownTypeId { id: other as u32 });
            }
        })
    }
}

/// Wrap an already-encoded channel payload in the outer frame format:
/// `size16 channelId | payload`. `conduit-tcp` (or any other [`crate`]
/// transport) is responsible only for delivering each call to
/// [`write_frame`]'s output as one opaque blob — it does not need to know
/// about channel ids itself.
pub fn write_frame(channel_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut w = Writer::with_capacity(2 + payload.len());
    w.write_u16(channel_id);
    w.write_raw(payload);
    w.into_bytes()
}

/// Split a frame produced by [`write_frame`] back into its channel id and
/// payload slice.
pub fn read_frame(frame: &[u8]) -> Result<(u16, &[u8]), WireError> {
    let mut r = Reader::new(frame);
    let channel_id = r.read_u16()?;
    let payload = r.read_raw(r.remaining())?;
    Ok((channel_id, payload))
}
