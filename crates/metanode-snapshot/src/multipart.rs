//! Multipart session snapshot file (varint-counted)
//!
//! Older writers led this file with the number of *extend* entries instead of
//! the number of multipart sessions. [`MultipartCountSource`] selects which
//! count is written; `Extend` reproduces that byte stream exactly, and a file
//! written that way only loads correctly when both counts agree. A generation
//! store refuses to commit a file whose count disagrees with its records.

use crate::framing::Varint;
use crate::fsm::{PartitionFsm, SnapshotSource};
use crate::layout;
use crate::store::{LoadOutcome, PartitionStore, StoreOutcome};
use metanode_common::{EntityType, Multipart, MultipartCountSource, Result, SnapshotEntity};
use std::path::Path;
use tracing::{debug, info};

impl PartitionStore {
    /// Replay the multipart file in `dir` into `fsm`
    pub fn load_multipart<F>(&self, dir: &Path, fsm: &mut F) -> Result<LoadOutcome>
    where
        F: PartitionFsm + ?Sized,
    {
        let ctx = self.ctx("loadMultipart");
        let partition_id = self.partition_id();
        let outcome = self.load_counted::<Varint>(ctx, dir, EntityType::Multipart, |data| {
            let multipart = Multipart::from_bytes(data).map_err(|e| ctx.corrupt(e.to_string()))?;
            debug!(
                "loadMultipart: create multipart from bytes: partitionID({}) multipartID({})",
                partition_id, multipart.id
            );
            fsm.create_multipart(multipart);
            Ok(())
        })?;

        if outcome.present {
            info!(
                "loadMultipart: load complete: partitionID({}) numMultiparts({}) filename({})",
                partition_id,
                outcome.records,
                layout::entity_path(dir, EntityType::Multipart).display()
            );
        }
        Ok(outcome)
    }

    /// Write every multipart session of `source` into `dir`
    pub fn store_multipart<S>(&self, dir: &Path, source: &S) -> Result<StoreOutcome>
    where
        S: SnapshotSource + ?Sized,
    {
        let ctx = self.ctx("storeMultipart");
        let counted = match self.options().multipart_count_source {
            MultipartCountSource::Multipart => EntityType::Multipart,
            MultipartCountSource::Extend => EntityType::Extend,
        };
        let count = source.count(counted).map_err(|e| ctx.wrap(e))?;
        let outcome = self.store_records::<Varint, _>(
            ctx,
            dir,
            EntityType::Multipart,
            source,
            Some(count),
            |writer, data| {
                writer
                    .write_record(data)
                    .map_err(|e| ctx.write("write multipart", e))
            },
        )?;

        info!(
            "storeMultipart: store complete: partitionID({}) volume({}) count({}) numMultiparts({}) crc({})",
            self.partition_id(),
            self.config().vol_name,
            count,
            outcome.records,
            outcome.checksum
        );
        Ok(outcome)
    }
}
