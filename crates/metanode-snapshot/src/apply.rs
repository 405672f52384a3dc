//! Apply position tracker
//!
//! The `apply` file records the last replicated-log index reflected in the
//! snapshot together with the inode allocation cursor, as `"<applyID>|<cursor>"`.
//! Files written before the cursor was tracked hold only `"<applyID>"`.

use crate::layout::APPLY_ID_FILE;
use crate::store::PartitionStore;
use metanode_common::Result;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

/// Apply index and inode cursor of a partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyState {
    pub apply_id: u64,
    pub cursor: u64,
}

impl ApplyState {
    pub const fn new(apply_id: u64, cursor: u64) -> Self {
        Self { apply_id, cursor }
    }

    /// Parse the contents of an apply file. Returns the apply ID and the
    /// stored cursor, if the file carries one.
    pub fn parse(data: &str) -> Option<(u64, Option<u64>)> {
        let data = data.trim_ascii();
        match data.split_once('|') {
            Some((apply_id, cursor)) => {
                let apply_id = apply_id.trim_ascii().parse().ok()?;
                let cursor = cursor.trim_ascii().parse().ok()?;
                Some((apply_id, Some(cursor)))
            }
            None => data.parse().ok().map(|apply_id| (apply_id, None)),
        }
    }
}

impl fmt::Display for ApplyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.apply_id, self.cursor)
    }
}

impl PartitionStore {
    /// Load the apply file in `dir` and reconcile its cursor with `cursor`.
    ///
    /// The cursor never moves backwards: the result carries the larger of the
    /// two, and the reconciled pair is written back before returning. A
    /// missing file yields apply ID 0 and writes nothing.
    pub fn load_apply_id(&self, dir: &Path, cursor: u64) -> Result<ApplyState> {
        let ctx = self.ctx("loadApplyID");
        let path = dir.join(APPLY_ID_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(ApplyState::new(0, cursor));
            }
            Err(e) => return Err(ctx.io(format!("read {}", path.display()), e)),
        };
        if data.is_empty() {
            return Err(ctx.corrupt("apply ID is empty"));
        }

        let text = std::str::from_utf8(&data)
            .map_err(|e| ctx.corrupt(format!("apply file is not text: {}", e)))?;
        let (apply_id, stored) = ApplyState::parse(text)
            .ok_or_else(|| ctx.corrupt(format!("cannot parse apply file {:?}", text)))?;

        let state = ApplyState::new(apply_id, stored.map_or(cursor, |c| c.max(cursor)));
        self.store_apply_id(dir, state)?;

        info!(
            "loadApplyID: load complete: partitionID({}) volume({}) applyID({}) cursor({}) filename({})",
            self.partition_id(),
            self.config().vol_name,
            state.apply_id,
            state.cursor,
            path.display()
        );
        Ok(state)
    }

    /// Write `state` to the apply file in `dir`, replacing any previous content
    pub fn store_apply_id(&self, dir: &Path, state: ApplyState) -> Result<()> {
        let ctx = self.ctx("storeApplyID");
        let path = dir.join(APPLY_ID_FILE);
        self.write_small_file(ctx, &path, state.to_string().as_bytes())?;

        info!(
            "storeApplyID: store complete: partitionID({}) volume({}) applyID({}) cursor({})",
            self.partition_id(),
            self.config().vol_name,
            state.apply_id,
            state.cursor
        );
        Ok(())
    }
}
