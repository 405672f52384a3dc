//! Entity types held by a metadata partition
//!
//! The snapshot layer treats these as opaque records: it only needs an
//! encoded form to frame and, for inodes, the numeric identifier.

use crate::error::{Error, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Inode ID
pub type InodeId = u64;

/// The entity classes persisted by a partition snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    Inode,
    Dentry,
    Extend,
    Multipart,
}

impl EntityType {
    pub const ALL: [Self; 4] = [Self::Inode, Self::Dentry, Self::Extend, Self::Multipart];

    /// File name inside a snapshot directory
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Inode => "inode",
            Self::Dentry => "dentry",
            Self::Extend => "extend",
            Self::Multipart => "multipart",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Binary codec shared by all snapshot entities
pub trait SnapshotEntity: Sized {
    const TYPE: EntityType;

    /// Encode to the snapshot record form
    fn to_bytes(&self) -> Result<Vec<u8>>;

    /// Decode from the snapshot record form
    fn from_bytes(data: &[u8]) -> Result<Self>;
}

/// Fixed-width little-endian encoding, the same bytes `bincode::serialize`
/// produces. Decoding must consume the whole record.
fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

macro_rules! bincode_entity {
    ($ty:ty, $kind:expr) => {
        impl SnapshotEntity for $ty {
            const TYPE: EntityType = $kind;

            fn to_bytes(&self) -> Result<Vec<u8>> {
                codec().serialize(self).map_err(|e| {
                    Error::Serialization(format!("{}: {}", Self::TYPE, e))
                })
            }

            fn from_bytes(data: &[u8]) -> Result<Self> {
                codec().deserialize(data).map_err(|e| {
                    Error::Deserialization(format!("{}: {}", Self::TYPE, e))
                })
            }
        }
    };
}

/// Inode flag: the inode was unlinked and waits in the free list
pub const DELETE_MARK_FLAG: u32 = 1 << 0;

/// Filesystem inode
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    pub inode: InodeId,
    /// File type and permission bits
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub generation: u64,
    pub create_time: i64,
    pub access_time: i64,
    pub modify_time: i64,
    /// Symlink target
    pub link_target: Vec<u8>,
    pub nlink: u32,
    pub flag: u32,
}

impl Inode {
    pub fn new(inode: InodeId, mode: u32) -> Self {
        Self {
            inode,
            mode,
            nlink: 1,
            generation: 1,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn is_marked_delete(&self) -> bool {
        self.flag & DELETE_MARK_FLAG != 0
    }

    pub fn set_delete_mark(&mut self) {
        self.flag |= DELETE_MARK_FLAG;
    }
}

bincode_entity!(Inode, EntityType::Inode);

/// Directory entry: `name` under `parent_id` points to `inode`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dentry {
    pub parent_id: InodeId,
    pub name: String,
    pub inode: InodeId,
    pub file_type: u32,
}

impl Dentry {
    pub fn new(parent_id: InodeId, name: impl Into<String>, inode: InodeId, file_type: u32) -> Self {
        Self {
            parent_id,
            name: name.into(),
            inode,
            file_type,
        }
    }

    /// Key identifying this dentry within the partition
    #[must_use]
    pub fn key(&self) -> (InodeId, &str) {
        (self.parent_id, &self.name)
    }
}

bincode_entity!(Dentry, EntityType::Dentry);

/// Extended attributes of one inode
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extend {
    pub inode: InodeId,
    pub attrs: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Extend {
    pub fn new(inode: InodeId) -> Self {
        Self {
            inode,
            attrs: BTreeMap::new(),
        }
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.attrs.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.attrs.get(key).map(Vec::as_slice)
    }
}

bincode_entity!(Extend, EntityType::Extend);

/// One uploaded part of a multipart session
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub id: u16,
    pub upload_time: i64,
    pub md5: String,
    pub size: u64,
    pub inode: InodeId,
}

/// In-progress multipart upload session
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Multipart {
    pub id: String,
    pub key: String,
    pub init_time: i64,
    pub parts: Vec<Part>,
}

impl Multipart {
    pub fn new(id: impl Into<String>, key: impl Into<String>, init_time: i64) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            init_time,
            parts: Vec::new(),
        }
    }
}

bincode_entity!(Multipart, EntityType::Multipart);
