//! Configuration types for the metanode partition store
//!
//! [`MetaPartitionConfig`] is the persisted identity of one partition.
//! [`SnapshotOptions`] tunes how snapshot files are read and written and is
//! usually loaded from the node's TOML configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A replica of a metadata partition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Node ID of the replica
    pub id: u64,
    /// Address the replica listens on
    pub addr: String,
}

/// Identity and topology of one metadata partition.
///
/// Only the identity fields are serialized; `root_dir` belongs to the local
/// process and is supplied by whoever opens the partition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaPartitionConfig {
    /// Partition ID (at least 1)
    pub partition_id: u64,
    /// Volume this partition belongs to
    pub vol_name: String,
    /// Minimal inode ID owned by this partition
    pub start: u64,
    /// Maximal inode ID owned by this partition (inclusive)
    pub end: u64,
    /// Replicas of this partition
    #[serde(default)]
    pub peers: Vec<Peer>,
    /// Directory holding every persisted file of this partition
    #[serde(skip)]
    pub root_dir: PathBuf,
}

impl MetaPartitionConfig {
    /// Create a config for a new partition
    pub fn new(
        partition_id: u64,
        vol_name: impl Into<String>,
        start: u64,
        end: u64,
        root_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            partition_id,
            vol_name: vol_name.into(),
            start,
            end,
            peers: Vec::new(),
            root_dir: root_dir.into(),
        }
    }

    /// Add a peer
    #[must_use]
    pub fn with_peer(mut self, id: u64, addr: impl Into<String>) -> Self {
        self.peers.push(Peer {
            id,
            addr: addr.into(),
        });
        self
    }

    /// Check the invariants every persisted or loaded config must hold
    pub fn check(&self) -> Result<()> {
        if self.partition_id == 0 {
            return Err(Error::invalid_config("partition id must be at least 1"));
        }
        if self.vol_name.is_empty() {
            return Err(Error::invalid_config(format!(
                "partition {}: empty volume name",
                self.partition_id
            )));
        }
        if self.start > self.end {
            return Err(Error::invalid_config(format!(
                "partition {}: start {} > end {}",
                self.partition_id, self.start, self.end
            )));
        }
        if self.root_dir.as_os_str().is_empty() {
            return Err(Error::invalid_config(format!(
                "partition {}: empty root dir",
                self.partition_id
            )));
        }
        Ok(())
    }

    /// Check whether an inode ID lies in this partition's range
    #[must_use]
    pub fn contains(&self, ino: u64) -> bool {
        (self.start..=self.end).contains(&ino)
    }

    /// Serialize the identity fields
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parse identity fields, attaching a process-local root directory
    pub fn from_json(data: &[u8], root_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut config: Self =
            serde_json::from_slice(data).map_err(|e| Error::Deserialization(e.to_string()))?;
        config.root_dir = root_dir.into();
        Ok(config)
    }
}

/// How a snapshot file is read back
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadStrategy {
    /// Sequential reads through a buffer
    Buffered,
    /// Read-only memory mapping of the whole file
    Mapped,
}

/// Which entity count leads the multipart file.
///
/// Older metanodes wrote the extend count in front of the multipart records.
/// `Extend` reproduces that byte stream for compatibility with such nodes;
/// `Multipart` writes the actual number of multipart records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultipartCountSource {
    Extend,
    #[default]
    Multipart,
}

/// Snapshot read/write tuning
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotOptions {
    /// Buffer size for buffered reads
    pub read_buffer_size: usize,
    /// Buffer size for writes
    pub write_buffer_size: usize,
    /// Read strategy for the inode file
    pub inode_read: ReadStrategy,
    /// Read strategy for the dentry file
    pub dentry_read: ReadStrategy,
    /// Read strategy for the extend file
    pub extend_read: ReadStrategy,
    /// Read strategy for the multipart file
    pub multipart_read: ReadStrategy,
    /// Compare read-side checksums with the `.sign` file on load
    pub verify_checksums: bool,
    /// Count written in front of the multipart records
    pub multipart_count_source: MultipartCountSource,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: 4 * 1024 * 1024,  // 4 MB
            write_buffer_size: 4 * 1024 * 1024, // 4 MB
            inode_read: ReadStrategy::Buffered,
            dentry_read: ReadStrategy::Buffered,
            extend_read: ReadStrategy::Mapped,
            multipart_read: ReadStrategy::Mapped,
            verify_checksums: true,
            multipart_count_source: MultipartCountSource::Multipart,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetaPartitionConfig {
        MetaPartitionConfig::new(1, "vol", 1, 1 << 24, "/var/lib/metanode/partition_1")
            .with_peer(1, "10.0.0.1:17210")
            .with_peer(2, "10.0.0.2:17210")
    }

    #[test]
    fn test_check_accepts_valid() {
        assert!(sample().check().is_ok());

        let mut single = sample();
        single.end = single.start;
        assert!(single.check().is_ok());
    }

    #[test]
    fn test_check_rejects_invalid() {
        let mut c = sample();
        c.partition_id = 0;
        assert!(c.check().is_err());

        let mut c = sample();
        c.vol_name.clear();
        assert!(c.check().is_err());

        let mut c = sample();
        c.start = 10;
        c.end = 9;
        assert!(c.check().is_err());

        let mut c = sample();
        c.root_dir = PathBuf::new();
        assert!(c.check().is_err());
    }

    #[test]
    fn test_json_skips_root_dir() {
        let config = sample();
        let json = String::from_utf8(config.to_json().unwrap()).unwrap();
        assert!(json.contains("\"partition_id\":1"));
        assert!(json.contains("\"vol_name\":\"vol\""));
        assert!(json.contains("\"peers\":[{\"id\":1,\"addr\":\"10.0.0.1:17210\"}"));
        assert!(!json.contains("root_dir"));

        let parsed = MetaPartitionConfig::from_json(json.as_bytes(), "/other").unwrap();
        assert_eq!(parsed.root_dir, PathBuf::from("/other"));
        assert_eq!(parsed.peers, config.peers);
        assert_eq!(parsed.end, config.end);
    }

    #[test]
    fn test_contains() {
        let c = MetaPartitionConfig::new(3, "vol", 100, 200, "/tmp/p3");
        assert!(c.contains(100));
        assert!(c.contains(200));
        assert!(!c.contains(99));
        assert!(!c.contains(201));
    }

    #[test]
    fn test_default_options() {
        let opts = SnapshotOptions::default();
        assert_eq!(opts.extend_read, ReadStrategy::Mapped);
        assert_eq!(opts.inode_read, ReadStrategy::Buffered);
        assert_eq!(opts.multipart_count_source, MultipartCountSource::Multipart);
        assert!(opts.verify_checksums);
    }

    #[test]
    fn test_options_partial_json() {
        let opts: SnapshotOptions =
            serde_json::from_str(r#"{"multipart_count_source":"extend","inode_read":"mapped"}"#)
                .unwrap();
        assert_eq!(opts.multipart_count_source, MultipartCountSource::Extend);
        assert_eq!(opts.inode_read, ReadStrategy::Mapped);
        assert_eq!(opts.read_buffer_size, 4 * 1024 * 1024);
    }
}
