//! Extended attribute snapshot file (varint-counted)

use crate::framing::Varint;
use crate::fsm::{PartitionFsm, SnapshotSource};
use crate::store::{LoadOutcome, PartitionStore, StoreOutcome};
use metanode_common::{EntityType, Extend, Result, SnapshotEntity};
use std::path::Path;
use tracing::{debug, info};

impl PartitionStore {
    /// Replay the extend file in `dir` into `fsm`. Each record replaces the
    /// attributes of its inode, so the last record for an inode wins.
    pub fn load_extend<F>(&self, dir: &Path, fsm: &mut F) -> Result<LoadOutcome>
    where
        F: PartitionFsm + ?Sized,
    {
        let ctx = self.ctx("loadExtend");
        let config = self.config();
        let outcome = self.load_counted::<Varint>(ctx, dir, EntityType::Extend, |data| {
            let extend = Extend::from_bytes(data).map_err(|e| ctx.corrupt(e.to_string()))?;
            debug!(
                "loadExtend: new extend from bytes: partitionID({}) volume({}) inode({})",
                config.partition_id, config.vol_name, extend.inode
            );
            let inode = extend.inode;
            fsm.set_xattr(extend)
                .map_err(|e| ctx.replay_rejected(format!("set xattr inode({}): {}", inode, e)))
        })?;

        if outcome.present {
            info!(
                "loadExtend: load complete: partitionID({}) volume({}) numExtends({}) filename({})",
                config.partition_id,
                config.vol_name,
                outcome.records,
                crate::layout::entity_path(dir, EntityType::Extend).display()
            );
        }
        Ok(outcome)
    }

    /// Write every extend of `source` into `dir`, led by its extend count
    pub fn store_extend<S>(&self, dir: &Path, source: &S) -> Result<StoreOutcome>
    where
        S: SnapshotSource + ?Sized,
    {
        let ctx = self.ctx("storeExtend");
        let count = source.count(EntityType::Extend).map_err(|e| ctx.wrap(e))?;
        let outcome = self.store_records::<Varint, _>(
            ctx,
            dir,
            EntityType::Extend,
            source,
            Some(count),
            |writer, data| writer.write_record(data).map_err(|e| ctx.write("write extend", e)),
        )?;

        info!(
            "storeExtend: store complete: partitionID({}) volume({}) numExtends({}) crc({})",
            self.partition_id(),
            self.config().vol_name,
            outcome.records,
            outcome.checksum
        );
        Ok(outcome)
    }
}
