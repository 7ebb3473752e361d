//! Directory entries and their persisted form.
//!
//! A [`DirEntry`] is the metadata record for one visible name in a user
//! tree. Entries are persisted as self-describing JSON blobs; unmarshaling
//! validates the structural invariants (parseable name, contiguous block
//! offsets, no blocks on directories or links) and rejects anything else.

use std::time::{SystemTime, UNIX_EPOCH};

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::endpoint::Location;
use crate::errors::{Error, Kind, Result};
use crate::path::{self, Parsed, UserName};

const OP_MARSHAL: &str = "entry.marshal";
const OP_UNMARSHAL: &str = "entry.unmarshal";

/// Sequence number of a directory entry. Advances by one on every
/// successful Put of the path.
pub type Sequence = i64;

/// Put precondition: the path must not exist.
pub const SEQ_NOT_EXIST: Sequence = -1;

/// Put precondition: accept any current sequence.
pub const SEQ_IGNORE: Sequence = 0;

/// The sequence assigned to a freshly created path.
pub const SEQ_BASE: Sequence = 1;

/// What kind of item an entry describes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Attr {
    /// A plain file.
    None = 0,
    /// A directory. Directories carry no blocks.
    Directory = 1,
    /// A link. Links carry only a destination path and no blocks.
    Link = 2,
    /// An entry whose blocks and packdata were withheld from a caller
    /// holding only the List right.
    Incomplete = 3,
}

/// Tag selecting the content encoder that produced an entry's blocks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Packing {
    /// Bytes stored as written, no integrity data.
    Plain = 0,
    /// Bytes stored as written with a per-block checksum. Required for
    /// Access and Group files.
    Integrity = 1,
    /// Bytes encrypted by an external packer.
    Cipher = 2,
}

/// Seconds since the Unix epoch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Time(pub i64);

impl Time {
    /// The current wall-clock time.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        Self(secs)
    }
}

/// One contiguous span of an entry's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Byte offset of this block within the file.
    pub offset: i64,
    /// Number of plaintext bytes the block covers.
    pub size: i64,
    /// Where the (possibly encoded) block bytes live.
    pub location: Location,
    /// Per-block checksum or packer data.
    pub packdata: Vec<u8>,
}

/// The metadata record for one visible name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Canonical path of the entry.
    pub name: String,
    /// Canonical path at signing time; preserved as received, it may
    /// differ from `name` after a rename.
    pub signed_name: String,
    #[serde(with = "tag")]
    pub attr: Attr,
    #[serde(with = "tag")]
    pub packing: Packing,
    pub sequence: Sequence,
    pub time: Time,
    /// User who last wrote the entry.
    pub writer: String,
    /// Ordered block list; empty for directories and links.
    pub blocks: Vec<Block>,
    /// Opaque per-entry bytes produced by the packer.
    pub packdata: Vec<u8>,
    /// Destination path when `attr` is [`Attr::Link`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl DirEntry {
    /// A fresh directory entry for `path`, written by `writer`.
    pub fn directory(path: &Parsed, writer: &UserName) -> Self {
        Self {
            name: path.path().to_string(),
            signed_name: path.path().to_string(),
            attr: Attr::Directory,
            packing: Packing::Plain,
            sequence: SEQ_IGNORE,
            time: Time::now(),
            writer: writer.as_str().to_string(),
            blocks: Vec::new(),
            packdata: Vec::new(),
            link: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.attr == Attr::Directory
    }

    pub fn is_link(&self) -> bool {
        self.attr == Attr::Link
    }

    pub fn is_incomplete(&self) -> bool {
        self.attr == Attr::Incomplete
    }

    /// Total size in bytes. Zero for directories; an error for entries
    /// whose block offsets are not contiguous from zero.
    pub fn size(&self) -> Result<i64> {
        let mut offset = 0;
        for block in &self.blocks {
            if block.offset != offset || block.size < 0 {
                return Err(Error::new("entry.size", Kind::Invalid)
                    .path(&self.name)
                    .detail("blocks are not contiguous"));
            }
            offset += block.size;
        }
        Ok(offset)
    }

    /// Serializes the entry for persistence.
    pub fn marshal(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| Error::new(OP_MARSHAL, Kind::IO).path(&self.name).detail(e.to_string()))
    }

    /// Deserializes and validates a persisted entry.
    ///
    /// Rejects blobs whose name fails to parse, whose block offsets are
    /// not contiguous from zero, or whose attribute and block list
    /// disagree.
    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let entry: DirEntry = serde_json::from_slice(data)
            .map_err(|e| Error::new(OP_UNMARSHAL, Kind::IO).detail(e.to_string()))?;
        entry.validate(OP_UNMARSHAL)?;
        Ok(entry)
    }

    /// Checks the structural invariants of the entry.
    pub fn validate(&self, op: &'static str) -> Result<()> {
        path::parse(&self.name)
            .map_err(|e| Error::new(op, Kind::Invalid).path(&self.name).cause(e))?;
        match self.attr {
            Attr::Directory | Attr::Link => {
                if !self.blocks.is_empty() {
                    return Err(Error::new(op, Kind::Invalid)
                        .path(&self.name)
                        .detail("directories and links carry no blocks"));
                }
            }
            Attr::None | Attr::Incomplete => {}
        }
        if self.attr == Attr::Link && self.link.is_none() {
            return Err(Error::new(op, Kind::Invalid)
                .path(&self.name)
                .detail("link entry without a destination"));
        }
        if self.attr != Attr::Link && self.link.is_some() {
            return Err(Error::new(op, Kind::Invalid)
                .path(&self.name)
                .detail("non-link entry with a destination"));
        }
        self.size().map_err(|e| Error::new(op, Kind::Invalid).path(&self.name).cause(e))?;
        Ok(())
    }

    /// A copy with block locations and packdata withheld, for callers
    /// holding only the List right. Plain files are marked
    /// [`Attr::Incomplete`]; directories and links keep their attribute.
    pub fn incomplete_copy(&self) -> Self {
        let mut stripped = self.clone();
        for block in &mut stripped.blocks {
            block.location = Location::unassigned();
            block.packdata.clear();
        }
        stripped.packdata.clear();
        if stripped.attr == Attr::None {
            stripped.attr = Attr::Incomplete;
        }
        stripped
    }
}

/// Serde adapter storing small tag enums as their integer discriminant.
pub(crate) mod tag {
    use num_traits::{FromPrimitive, ToPrimitive};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T: ToPrimitive, S: Serializer>(v: &T, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(v.to_u8().unwrap())
    }

    pub fn deserialize<'de, T: FromPrimitive, D: Deserializer<'de>>(d: D) -> Result<T, D::Error> {
        let n = u8::deserialize(d)?;
        T::from_u8(n).ok_or_else(|| D::Error::custom(format!("unknown tag {n}")))
    }
}

#[cfg(test)]
mod tests;
