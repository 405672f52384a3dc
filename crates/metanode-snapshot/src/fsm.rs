//! Collaborator interfaces of the snapshot layer
//!
//! The partition's in-memory state machine is the replay target on load, and
//! a point-in-time [`SnapshotSource`] is what gets serialized on store. Both
//! are owned by the state-machine layer.

use metanode_common::{Dentry, EntityType, Extend, Inode, Multipart, Result};
use std::fmt;

/// Result status of a state machine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Ok,
    Exists,
    NotExist,
    ArgMismatch,
    Internal,
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::Exists => "exists",
            Self::NotExist => "not exist",
            Self::ArgMismatch => "argument mismatch",
            Self::Internal => "internal error",
        };
        f.write_str(name)
    }
}

/// Replay target for snapshot loads
pub trait PartitionFsm {
    /// Insert an inode
    fn create_inode(&mut self, inode: Inode);

    /// Track the inode in free-list bookkeeping if it is marked deleted.
    /// Called after `create_inode` for the same inode.
    fn check_and_insert_free_list(&mut self, inode: &Inode);

    /// Insert a dentry. With `replay` set, an existing entry under the same
    /// key is overwritten instead of reported as a conflict.
    fn create_dentry(&mut self, dentry: Dentry, replay: bool) -> OpStatus;

    /// Replace the extended attributes of an inode
    fn set_xattr(&mut self, extend: Extend) -> Result<()>;

    /// Insert or overwrite a multipart session by ID
    fn create_multipart(&mut self, multipart: Multipart);
}

/// Point-in-time view of a partition handed to the store path.
///
/// The view must not change while it is iterated. Iteration over one entity
/// type is sequential within a call; implementations that allow concurrent
/// iteration over different types must say so.
pub trait SnapshotSource {
    /// Visit every encoded entity of `ty` in the source's order. Iteration
    /// stops early when `visit` returns `Ok(false)`; a `visit` error is
    /// returned as is.
    fn range(&self, ty: EntityType, visit: &mut dyn FnMut(&[u8]) -> Result<bool>) -> Result<()>;

    /// Number of entities of `ty`
    fn count(&self, ty: EntityType) -> Result<u64>;
}
