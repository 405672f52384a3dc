//! Partition store handle and the shared load/store loops
//!
//! Entity-specific code lives in `inode`, `dentry`, `extend` and `multipart`;
//! each drives one of the two framings through the helpers below.

use crate::framing::{FramedReader, FramedWriter, HeaderCodec};
use crate::fsm::SnapshotSource;
use crate::layout::{self, SNAPSHOT_DIR};
use crate::source::FileSource;
use metanode_common::{
    EntityType, MetaPartitionConfig, OpContext, ReadStrategy, Result, SnapshotOptions,
};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::error;

/// Outcome of loading one entity file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Whether the file existed
    pub present: bool,
    /// Records applied
    pub records: u64,
    /// CRC-32 of every byte read
    pub checksum: u32,
}

/// Outcome of storing one entity file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOutcome {
    /// Records written
    pub records: u64,
    /// Records the source reported for this entity type
    pub expected: u64,
    /// Count written at the head of a counted file
    pub count: Option<u64>,
    /// CRC-32 of every byte written
    pub checksum: u32,
}

impl StoreOutcome {
    /// The source stopped before handing over every record it reported
    #[must_use]
    pub const fn truncated(&self) -> bool {
        self.records < self.expected
    }

    /// Every reported record was written and a leading count, if any,
    /// matches what follows it. Only a complete file loads back as written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.records == self.expected && self.count.is_none_or(|count| count == self.records)
    }
}

/// Snapshot persistence for one metadata partition
#[derive(Debug, Clone)]
pub struct PartitionStore {
    config: MetaPartitionConfig,
    options: SnapshotOptions,
}

impl PartitionStore {
    /// Create a store for a validated config
    pub fn new(config: MetaPartitionConfig, options: SnapshotOptions) -> Result<Self> {
        let ctx = OpContext::new("openPartition", config.partition_id);
        config.check().map_err(|e| ctx.wrap(e))?;
        Ok(Self { config, options })
    }

    pub fn config(&self) -> &MetaPartitionConfig {
        &self.config
    }

    pub fn options(&self) -> &SnapshotOptions {
        &self.options
    }

    pub fn partition_id(&self) -> u64 {
        self.config.partition_id
    }

    pub fn root_dir(&self) -> &Path {
        &self.config.root_dir
    }

    /// Directory of the current snapshot generation
    pub fn snapshot_dir(&self) -> PathBuf {
        self.config.root_dir.join(SNAPSHOT_DIR)
    }

    /// Swap in a freshly loaded or updated config
    pub fn replace_config(&mut self, config: MetaPartitionConfig) -> Result<()> {
        let ctx = OpContext::new("replaceConfig", config.partition_id);
        config.check().map_err(|e| ctx.wrap(e))?;
        self.config = config;
        Ok(())
    }

    pub(crate) fn ctx(&self, op: &'static str) -> OpContext {
        OpContext::new(op, self.config.partition_id)
    }

    pub(crate) fn read_strategy(&self, ty: EntityType) -> ReadStrategy {
        match ty {
            EntityType::Inode => self.options.inode_read,
            EntityType::Dentry => self.options.dentry_read,
            EntityType::Extend => self.options.extend_read,
            EntityType::Multipart => self.options.multipart_read,
        }
    }

    fn open_entity(&self, ctx: OpContext, path: &Path, ty: EntityType) -> Result<Option<FileSource>> {
        FileSource::open(path, self.read_strategy(ty), self.options.read_buffer_size)
            .map_err(|e| ctx.io(format!("open {}", path.display()), e))
    }

    /// Load a length-prefixed stream file, handing each record to `apply`.
    /// A missing file loads nothing.
    pub(crate) fn load_stream<H: HeaderCodec>(
        &self,
        ctx: OpContext,
        dir: &Path,
        ty: EntityType,
        mut apply: impl FnMut(&[u8]) -> Result<()>,
    ) -> Result<LoadOutcome> {
        let path = layout::entity_path(dir, ty);
        let Some(source) = self.open_entity(ctx, &path, ty)? else {
            return Ok(LoadOutcome::default());
        };
        let mut reader = FramedReader::<_, H>::new(source);
        loop {
            let at = reader.position();
            let record = reader
                .next_record()
                .map_err(|e| ctx.read(format!("read record at offset {}", at), e))?;
            let Some(record) = record else { break };
            apply(record)?;
        }
        Ok(LoadOutcome {
            present: true,
            records: reader.records(),
            checksum: reader.checksum(),
        })
    }

    /// Load a varint-counted file, handing each record to `apply`.
    /// A missing file loads nothing; an empty one is truncated.
    pub(crate) fn load_counted<H: HeaderCodec>(
        &self,
        ctx: OpContext,
        dir: &Path,
        ty: EntityType,
        mut apply: impl FnMut(&[u8]) -> Result<()>,
    ) -> Result<LoadOutcome> {
        let path = layout::entity_path(dir, ty);
        let Some(source) = self.open_entity(ctx, &path, ty)? else {
            return Ok(LoadOutcome::default());
        };
        let mut reader = FramedReader::<_, H>::new(source);
        let count = reader
            .read_count()
            .map_err(|e| ctx.read("read record count", e))?;
        for i in 0..count {
            let record = reader
                .read_record()
                .map_err(|e| ctx.read(format!("read record {} of {}", i, count), e))?;
            apply(record)?;
        }
        Ok(LoadOutcome {
            present: true,
            records: reader.records(),
            checksum: reader.checksum(),
        })
    }

    /// Store every entity of `ty` from `source` into `dir`.
    ///
    /// `count` is written first for counted framings. `write` frames one
    /// source record. The file is flushed and synced before the checksum is
    /// returned. A source that stops early still yields `Ok`; the outcome
    /// records how many entries it promised.
    pub(crate) fn store_records<H, S>(
        &self,
        ctx: OpContext,
        dir: &Path,
        ty: EntityType,
        source: &S,
        count: Option<u64>,
        mut write: impl FnMut(&mut FramedWriter<BufWriter<File>, H>, &[u8]) -> Result<()>,
    ) -> Result<StoreOutcome>
    where
        H: HeaderCodec,
        S: SnapshotSource + ?Sized,
    {
        let expected = source.count(ty).map_err(|e| ctx.wrap(e))?;
        let path = layout::entity_path(dir, ty);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| ctx.io(format!("create {}", path.display()), e))?;
        let mut writer =
            FramedWriter::<_, H>::new(BufWriter::with_capacity(self.options.write_buffer_size, file));

        if let Some(count) = count {
            writer
                .write_count(count)
                .map_err(|e| ctx.io("write record count", e))?;
        }

        if let Err(e) = source.range(ty, &mut |data: &[u8]| {
            write(&mut writer, data)?;
            Ok(true)
        }) {
            error!(
                "range {} has err: partition({}) volume({}) err({})",
                ty, self.config.partition_id, self.config.vol_name, e
            );
            return Err(ctx.wrap(e));
        }

        let records = writer.records();
        let (buffered, checksum) = writer.into_parts();
        let file = buffered
            .into_inner()
            .map_err(|e| ctx.io(format!("flush {}", path.display()), e.into_error()))?;
        file.sync_all()
            .map_err(|e| ctx.io(format!("sync {}", path.display()), e))?;

        Ok(StoreOutcome {
            records,
            expected,
            count,
            checksum,
        })
    }

    /// Write a small file in full: create or truncate, write, flush, sync
    pub(crate) fn write_small_file(&self, ctx: OpContext, path: &Path, data: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| ctx.io(format!("create {}", path.display()), e))?;
        file.write_all(data)
            .map_err(|e| ctx.io(format!("write {}", path.display()), e))?;
        file.sync_all()
            .map_err(|e| ctx.io(format!("sync {}", path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metanode_common::ErrorKind;

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = MetaPartitionConfig::new(0, "vol", 1, 100, "/tmp/p0");
        let err = PartitionStore::new(config, SnapshotOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn test_store_outcome_completeness() {
        let full = StoreOutcome {
            records: 3,
            expected: 3,
            count: Some(3),
            checksum: 0,
        };
        assert!(full.is_complete());
        assert!(!full.truncated());

        let short = StoreOutcome { records: 2, ..full };
        assert!(short.truncated());
        assert!(!short.is_complete());

        let miscounted = StoreOutcome { count: Some(5), ..full };
        assert!(!miscounted.truncated());
        assert!(!miscounted.is_complete());

        let stream = StoreOutcome { count: None, ..full };
        assert!(stream.is_complete());
    }

    #[test]
    fn test_snapshot_dir() {
        let config = MetaPartitionConfig::new(9, "vol", 1, 100, "/data/partition_9");
        let store = PartitionStore::new(config, SnapshotOptions::default()).unwrap();
        assert_eq!(store.snapshot_dir(), PathBuf::from("/data/partition_9/snapshot"));
        assert_eq!(store.read_strategy(EntityType::Extend), ReadStrategy::Mapped);
        assert_eq!(store.read_strategy(EntityType::Dentry), ReadStrategy::Buffered);
    }

    #[test]
    fn test_replace_config_validates() {
        let config = MetaPartitionConfig::new(9, "vol", 1, 100, "/data/partition_9");
        let mut store = PartitionStore::new(config.clone(), SnapshotOptions::default()).unwrap();

        let mut bad = config.clone();
        bad.start = 200;
        assert!(store.replace_config(bad).is_err());
        assert_eq!(store.config().start, 1);

        let mut grown = config;
        grown.end = 1000;
        store.replace_config(grown).unwrap();
        assert_eq!(store.config().end, 1000);
    }
}
