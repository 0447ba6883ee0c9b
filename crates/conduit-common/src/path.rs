//! Object paths: alternating `Name`/`Key` segments addressing a location in
//! the distributed object tree (spec §3).

use uuid::Uuid;

use crate::codec::{Reader, Writer};
use crate::error::WireError;

/// One element of a [`Path`]. Construction alternates `Name`/`Key` so that
/// a `Path`'s type already encodes "singleton vs. keyed collection member"
/// rather than leaving callers to track parity by convention.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// A named child: a property name, table name, or collection name.
    Name(String),
    /// A keyed member of a collection or table, identified by its row id.
    Key(Uuid),
}

/// An object path: `Name` and `Key` segments alternating from the root,
/// always starting with a `Name`. `["room", key, "messages"]` addresses
/// the `messages` queue of the room identified by `key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    segments: Vec<PathSegment>,
}

impl Path {
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    /// Append a named segment. Panics in debug builds if the path does not
    /// currently end on a `Key` or is empty (i.e. if this would produce two
    /// consecutive `Name`s) — callers build paths programmatically from
    /// fixed call sites, so a parity violation is a bug, not user input.
    pub fn child(mut self, name: impl Into<String>) -> Self {
        debug_assert!(
            matches!(self.segments.last(), None | Some(PathSegment::Key(_))),
            "Path::child called on a path that does not end on a Key or root"
        );
        self.segments.push(PathSegment::Name(name.into()));
        self
    }

    /// Descend into a keyed member of the collection/table named by the
    /// last segment.
    pub fn member(mut self, key: Uuid) -> Self {
        debug_assert!(
            matches!(self.segments.last(), Some(PathSegment::Name(_))),
            "Path::member called on a path that does not end on a Name"
        );
        self.segments.push(PathSegment::Key(key));
        self
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// A path is a singleton reference (addresses exactly one object,
    /// rather than a collection) when it ends on a `Key` segment or is the
    /// root. Odd-length paths that end on a `Name` address a
    /// collection/table/queue, not a single object.
    pub fn is_singleton(&self) -> bool {
        matches!(self.segments.last(), None | Some(PathSegment::Key(_)))
    }

    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Path {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn write(&self, w: &mut Writer) -> Result<(), WireError> {
        if self.segments.len() > u8::MAX as usize {
            return Err(WireError::PathTooLong {
                len: self.segments.len(),
            });
        }
        w.write_u8(self.segments.len() as u8);
        // Name/Key alternate by construction (see `child`/`member`), so the
        // wire form carries no per-segment tag: even indices are always
        // `Name`, odd indices are always `Key`.
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Name(name) => {
                    debug_assert_eq!(i % 2, 0, "Name segment at odd index");
                    w.write_string(name)?;
                }
                PathSegment::Key(key) => {
                    debug_assert_eq!(i % 2, 1, "Key segment at even index");
                    w.write_uuid(*key);
                }
            }
        }
        Ok(())
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Path, WireError> {
        let len = r.read_u8()? as usize;
        let mut segments = Vec::with_capacity(len);
        for i in 0..len {
            segments.push(if i % 2 == 0 {
                PathSegment::Name(r.read_string()?)
            } else {
                PathSegment::Key(r.read_uuid()?)
            });
        }
        Ok(Path { segments })
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            match segment {
                PathSegment::Name(name) => write!(f, "{name}")?,
                PathSegment::Key(key) => write!(f, "{}", crate::codec::uuid_to_base62(*key))?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_and_member_alternate() {
        let key = Uuid::new_v4();
        let path = Path::root().child("rooms").member(key).child("messages");
        assert_eq!(path.len(), 3);
        assert!(!path.is_singleton());

        let singleton = Path::root().child("rooms").member(key);
        assert!(singleton.is_singleton());
    }

    #[test]
    fn roundtrip_through_wire() {
        let key = Uuid::new_v4();
        let path = Path::root().child("rooms").member(key).child("messages");

        let mut w = Writer::new();
        path.write(&mut w).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = Path::read(&mut r).unwrap();
        assert_eq!(decoded, path);
    }

    #[test]
    fn parent_strips_last_segment() {
        let key = Uuid::new_v4();
        let path = Path::root().child("rooms").member(key);
        let parent = path.parent().unwrap();
        assert_eq!(parent, Path::root().child("rooms"));
    }
}
