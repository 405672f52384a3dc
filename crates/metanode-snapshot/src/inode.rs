//! Inode snapshot file (length-prefixed stream)

use crate::framing::FixedBe32;
use crate::fsm::{PartitionFsm, SnapshotSource};
use crate::store::{LoadOutcome, PartitionStore, StoreOutcome};
use metanode_common::{EntityType, Inode, Result, SnapshotEntity};
use std::path::Path;
use tracing::info;

/// Result of replaying the inode file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeLoad {
    pub outcome: LoadOutcome,
    /// Cursor advanced past the largest inode ID seen
    pub cursor: u64,
}

impl PartitionStore {
    /// Replay the inode file in `dir` into `fsm`.
    ///
    /// The returned cursor is the larger of `cursor` and every inode ID in the
    /// file.
    pub fn load_inode<F>(&self, dir: &Path, fsm: &mut F, cursor: u64) -> Result<InodeLoad>
    where
        F: PartitionFsm + ?Sized,
    {
        let ctx = self.ctx("loadInode");
        let config = self.config();
        let mut cursor = cursor;
        let outcome = self.load_stream::<FixedBe32>(ctx, dir, EntityType::Inode, |data| {
            let ino = Inode::from_bytes(data).map_err(|e| ctx.corrupt(e.to_string()))?;
            if !config.contains(ino.inode) {
                return Err(ctx.corrupt(format!(
                    "inode {} outside partition range [{}, {}]",
                    ino.inode, config.start, config.end
                )));
            }
            if ino.inode > cursor {
                cursor = ino.inode;
            }
            fsm.create_inode(ino.clone());
            fsm.check_and_insert_free_list(&ino);
            Ok(())
        })?;

        if outcome.present {
            info!(
                "loadInode: load complete: partitionID({}) volume({}) numInodes({}) cursor({})",
                config.partition_id, config.vol_name, outcome.records, cursor
            );
        }
        Ok(InodeLoad { outcome, cursor })
    }

    /// Write every inode of `source` into `dir` and return the file checksum.
    ///
    /// Each inode is decoded and re-encoded, so the file always carries the
    /// current codec form.
    pub fn store_inode<S>(&self, dir: &Path, source: &S) -> Result<StoreOutcome>
    where
        S: SnapshotSource + ?Sized,
    {
        let ctx = self.ctx("storeInode");
        let outcome = self.store_records::<FixedBe32, _>(
            ctx,
            dir,
            EntityType::Inode,
            source,
            None,
            |writer, data| {
                let ino = Inode::from_bytes(data).map_err(|e| ctx.wrap(e))?;
                let encoded = ino.to_bytes().map_err(|e| ctx.wrap(e))?;
                writer
                    .write_record(&encoded)
                    .map_err(|e| ctx.write(format!("write inode {}", ino.inode), e))
            },
        )?;

        info!(
            "storeInode: store complete: partitionID({}) volume({}) numInodes({}) crc({})",
            self.partition_id(),
            self.config().vol_name,
            outcome.records,
            outcome.checksum
        );
        Ok(outcome)
    }
}
