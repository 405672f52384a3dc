//! Dentry snapshot file (length-prefixed stream)

use crate::framing::FixedBe32;
use crate::fsm::{OpStatus, PartitionFsm, SnapshotSource};
use crate::store::{LoadOutcome, PartitionStore, StoreOutcome};
use metanode_common::{Dentry, EntityType, Result, SnapshotEntity};
use std::path::Path;
use tracing::info;

impl PartitionStore {
    /// Replay the dentry file in `dir` into `fsm` in replay mode.
    ///
    /// Duplicates of entries already present are accepted; any other non-ok
    /// status aborts the load.
    pub fn load_dentry<F>(&self, dir: &Path, fsm: &mut F) -> Result<LoadOutcome>
    where
        F: PartitionFsm + ?Sized,
    {
        let ctx = self.ctx("loadDentry");
        let outcome = self.load_stream::<FixedBe32>(ctx, dir, EntityType::Dentry, |data| {
            let dentry = Dentry::from_bytes(data).map_err(|e| ctx.corrupt(e.to_string()))?;
            let (parent_id, name, inode) = (dentry.parent_id, dentry.name.clone(), dentry.inode);
            match fsm.create_dentry(dentry, true) {
                OpStatus::Ok => Ok(()),
                status => Err(ctx.replay_rejected(format!(
                    "create dentry parent({}) name({}) inode({}): {}",
                    parent_id, name, inode, status
                ))),
            }
        })?;

        if outcome.present {
            info!(
                "loadDentry: load complete: partitionID({}) volume({}) numDentries({})",
                self.partition_id(),
                self.config().vol_name,
                outcome.records
            );
        }
        Ok(outcome)
    }

    /// Write every dentry of `source` into `dir` and return the file checksum
    pub fn store_dentry<S>(&self, dir: &Path, source: &S) -> Result<StoreOutcome>
    where
        S: SnapshotSource + ?Sized,
    {
        let ctx = self.ctx("storeDentry");
        let outcome = self.store_records::<FixedBe32, _>(
            ctx,
            dir,
            EntityType::Dentry,
            source,
            None,
            |writer, data| {
                writer
                    .write_record(data)
                    .map_err(|e| ctx.write("write dentry", e))
            },
        )?;

        info!(
            "storeDentry: store complete: partitionID({}) volume({}) numDentries({}) crc({})",
            self.partition_id(),
            self.config().vol_name,
            outcome.records,
            outcome.checksum
        );
        Ok(outcome)
    }
}
