//! Partition identity file
//!
//! `meta` is replaced atomically: the new content goes to `.meta`, is synced,
//! and is renamed over `meta`. A crash at any point leaves either the old or
//! the new file in place, never a partial one.

use crate::layout::{METADATA_FILE, METADATA_FILE_TMP};
use crate::store::PartitionStore;
use metanode_common::{MetaPartitionConfig, OpContext, Result, SnapshotOptions};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::{info, warn};

impl PartitionStore {
    /// Open the partition persisted under `root_dir`.
    ///
    /// Fails with a not-found error when `root_dir` holds no `meta` file.
    pub fn open(root_dir: impl AsRef<Path>, options: SnapshotOptions) -> Result<Self> {
        let config = Self::load_metadata(root_dir.as_ref())?;
        Self::new(config, options)
    }

    /// Read the partition identity from `root_dir/meta`.
    ///
    /// Returns a fresh config rooted at `root_dir`; callers swap it in with
    /// [`PartitionStore::replace_config`]. The inode cursor of a freshly
    /// loaded partition starts at `config.start`.
    pub fn load_metadata(root_dir: &Path) -> Result<MetaPartitionConfig> {
        let ctx = OpContext::new("loadMetadata", 0);
        let path = root_dir.join(METADATA_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ctx.not_found(path.display().to_string()));
            }
            Err(e) => return Err(ctx.io(format!("read {}", path.display()), e)),
        };
        if data.is_empty() {
            return Err(ctx.corrupt(format!("{} is empty", path.display())));
        }

        let config = MetaPartitionConfig::from_json(&data, root_dir)
            .map_err(|e| ctx.corrupt(format!("unmarshal {}: {}", path.display(), e)))?;
        let ctx = OpContext::new(ctx.op, config.partition_id);
        config.check().map_err(|e| ctx.corrupt(e.to_string()))?;

        info!(
            "loadMetadata: load complete: partitionID({}) volume({}) range({},{}) cursor({})",
            config.partition_id, config.vol_name, config.start, config.end, config.start
        );
        Ok(config)
    }

    /// Atomically replace `meta` with the current config
    pub fn persist_metadata(&self) -> Result<()> {
        let ctx = self.ctx("persistMetadata");
        let config = self.config();
        config.check().map_err(|e| ctx.wrap(e))?;

        let root = self.root_dir();
        fs::create_dir_all(root).map_err(|e| ctx.io(format!("create {}", root.display()), e))?;

        let tmp = root.join(METADATA_FILE_TMP);
        let target = root.join(METADATA_FILE);
        let result = Self::write_and_rename(ctx, config, &tmp, &target);

        if let Err(e) = fs::remove_file(&tmp) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    "persistMetadata: remove {} failed: partitionID({}) err({})",
                    tmp.display(),
                    config.partition_id,
                    e
                );
            }
        }
        result?;

        if let Err(e) = File::open(root).and_then(|dir| dir.sync_all()) {
            warn!(
                "persistMetadata: sync dir {} failed: partitionID({}) err({})",
                root.display(),
                config.partition_id,
                e
            );
        }

        info!(
            "persistMetadata: persist complete: partitionID({}) volume({}) range({},{})",
            config.partition_id, config.vol_name, config.start, config.end
        );
        Ok(())
    }

    fn write_and_rename(
        ctx: OpContext,
        config: &MetaPartitionConfig,
        tmp: &Path,
        target: &Path,
    ) -> Result<()> {
        let data = config.to_json().map_err(|e| ctx.wrap(e))?;
        fs::write(tmp, &data).map_err(|e| ctx.io(format!("write {}", tmp.display()), e))?;
        File::open(tmp)
            .and_then(|f| f.sync_all())
            .map_err(|e| ctx.io(format!("sync {}", tmp.display()), e))?;
        fs::rename(tmp, target).map_err(|e| {
            ctx.io(
                format!("rename {} to {}", tmp.display(), target.display()),
                e,
            )
        })
    }
}
