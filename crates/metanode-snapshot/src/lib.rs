//! Metanode Snapshot - on-disk persistence of metadata partitions
//!
//! A metadata partition owns a range of inode IDs and keeps its namespace in
//! memory. This crate writes that state to disk and restores it on restart:
//!
//! - `meta`: the partition identity, replaced atomically
//! - `snapshot/`: one generation of entity files (inodes, dentries, extended
//!   attributes, multipart sessions) plus the apply position
//!
//! Loading replays a generation into a [`PartitionFsm`] in a fixed order;
//! storing serializes a point-in-time [`SnapshotSource`] and reports a CRC-32
//! per entity file. See [`layout`] for the directory structure and
//! [`framing`] for the record formats.

pub mod apply;
mod dentry;
mod extend;
pub mod framing;
pub mod fsm;
mod inode;
pub mod layout;
pub mod memory;
mod meta;
mod multipart;
pub mod partition;
pub mod source;
pub mod store;

pub use apply::ApplyState;
pub use fsm::{OpStatus, PartitionFsm, SnapshotSource};
pub use inode::InodeLoad;
pub use memory::{MemoryPartition, MemorySnapshot};
pub use partition::{LoadStats, LoadedPartition};
pub use store::{LoadOutcome, PartitionStore, StoreOutcome};
