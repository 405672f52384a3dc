//! Snapshot generations
//!
//! A new generation is written into `.snapshot` and swapped in by renames:
//! `snapshot` moves to `.snapshot_backup`, `.snapshot` moves to `snapshot`,
//! and the backup is removed. If the process dies between the two renames the
//! next load moves the backup back into place.

use crate::apply::ApplyState;
use crate::framing::{FixedBe32, Varint};
use crate::fsm::{PartitionFsm, SnapshotSource};
use crate::layout::{SNAPSHOT_BACKUP, SNAPSHOT_DIR, SNAPSHOT_DIR_TMP, SNAPSHOT_SIGN};
use crate::store::{PartitionStore, StoreOutcome};
use metanode_common::{
    Dentry, EntityType, Error, Extend, Inode, MetaPartitionConfig, Multipart, OpContext, Result,
    SnapshotEntity, SnapshotSigns,
};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::{info, warn};

/// Per-entity results of loading one generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub inodes: u64,
    pub dentries: u64,
    pub extends: u64,
    pub multiparts: u64,
    /// Checksums of the files as read
    pub signs: SnapshotSigns,
    /// Whether `signs` was compared against a `.sign` file
    pub verified: bool,
}

/// A partition restored from disk
#[derive(Debug, Clone)]
pub struct LoadedPartition {
    pub config: MetaPartitionConfig,
    pub state: ApplyState,
    pub stats: LoadStats,
}

impl PartitionStore {
    /// Restore the partition under this store's root directory into `fsm`.
    ///
    /// Reloads the identity from `meta` first, then replays the current
    /// generation in fixed order: inodes, dentries, extends, multiparts and
    /// the apply position. A missing generation yields an empty partition.
    /// The `.sign` comparison runs before the apply file is rewritten, so a
    /// generation that fails it is left as found.
    pub fn load<F>(&mut self, fsm: &mut F) -> Result<LoadedPartition>
    where
        F: PartitionFsm + ?Sized,
    {
        let config = Self::load_metadata(self.root_dir())?;
        self.replace_config(config)?;
        self.recover_generation()?;

        let dir = self.snapshot_dir();
        let inode = self.load_inode(&dir, fsm, self.config().start)?;
        let dentry = self.load_dentry(&dir, fsm)?;
        let extend = self.load_extend(&dir, fsm)?;
        let multipart = self.load_multipart(&dir, fsm)?;

        let signs = SnapshotSigns {
            inode: inode.outcome.checksum,
            dentry: dentry.checksum,
            extend: extend.checksum,
            multipart: multipart.checksum,
        };
        let verified = if self.options().verify_checksums {
            self.check_signs(self.ctx("loadSnapshot"), &dir, &signs)?
        } else {
            false
        };
        let state = self.load_apply_id(&dir, inode.cursor)?;

        let stats = LoadStats {
            inodes: inode.outcome.records,
            dentries: dentry.records,
            extends: extend.records,
            multiparts: multipart.records,
            signs,
            verified,
        };
        info!(
            "loadSnapshot: load complete: partitionID({}) volume({}) applyID({}) cursor({}) verified({})",
            self.partition_id(),
            self.config().vol_name,
            state.apply_id,
            state.cursor,
            verified
        );
        Ok(LoadedPartition {
            config: self.config().clone(),
            state,
            stats,
        })
    }

    /// Write a new generation from `source` and swap it in.
    ///
    /// On failure before the swap the staging directory is removed and the
    /// current generation is left untouched. A source that stops before
    /// handing over every entity it reported counts as a failure.
    pub fn store_snapshot<S>(
        &self,
        source: &S,
        apply_index: u64,
        cursor: u64,
    ) -> Result<SnapshotSigns>
    where
        S: SnapshotSource + ?Sized,
    {
        let ctx = self.ctx("storeSnapshot");
        let root = self.root_dir();
        let staging = root.join(SNAPSHOT_DIR_TMP);

        remove_dir_if_exists(&staging)
            .map_err(|e| ctx.io(format!("remove stale {}", staging.display()), e))?;
        fs::create_dir_all(&staging)
            .map_err(|e| ctx.io(format!("create {}", staging.display()), e))?;

        let state = ApplyState::new(apply_index, cursor);
        let signs = match self.write_generation(ctx, &staging, source, state) {
            Ok(signs) => signs,
            Err(e) => {
                if let Err(rm) = fs::remove_dir_all(&staging) {
                    warn!(
                        "storeSnapshot: remove {} failed: partitionID({}) err({})",
                        staging.display(),
                        self.partition_id(),
                        rm
                    );
                }
                return Err(e);
            }
        };

        self.swap_generation(ctx)?;
        info!(
            "storeSnapshot: store complete: partitionID({}) volume({}) applyID({}) cursor({}) sign({})",
            self.partition_id(),
            self.config().vol_name,
            apply_index,
            cursor,
            signs.to_sign_string()
        );
        Ok(signs)
    }

    /// Recompute the checksums of the current generation and compare them
    /// with its `.sign` file. Every record is decoded; nothing is replayed.
    pub fn verify(&self) -> Result<SnapshotSigns> {
        let ctx = self.ctx("verifySnapshot");
        let dir = self.snapshot_dir();
        if !dir.is_dir() {
            return Err(ctx.not_found(dir.display().to_string()));
        }

        let signs = SnapshotSigns {
            inode: self.scan::<Inode>(ctx, &dir)?,
            dentry: self.scan::<Dentry>(ctx, &dir)?,
            extend: self.scan::<Extend>(ctx, &dir)?,
            multipart: self.scan::<Multipart>(ctx, &dir)?,
        };

        if !self.check_signs(ctx, &dir, &signs)? {
            return Err(ctx.not_found(dir.join(SNAPSHOT_SIGN).display().to_string()));
        }
        info!(
            "verifySnapshot: verify complete: partitionID({}) sign({})",
            self.partition_id(),
            signs.to_sign_string()
        );
        Ok(signs)
    }

    /// Decode every record of one entity file and return its checksum
    fn scan<T: SnapshotEntity>(&self, ctx: OpContext, dir: &Path) -> Result<u32> {
        let check = |data: &[u8]| {
            T::from_bytes(data)
                .map(drop)
                .map_err(|e| ctx.corrupt(e.to_string()))
        };
        let outcome = match T::TYPE {
            EntityType::Inode | EntityType::Dentry => {
                self.load_stream::<FixedBe32>(ctx, dir, T::TYPE, check)?
            }
            EntityType::Extend | EntityType::Multipart => {
                self.load_counted::<Varint>(ctx, dir, T::TYPE, check)?
            }
        };
        Ok(outcome.checksum)
    }

    fn write_generation<S>(
        &self,
        ctx: OpContext,
        dir: &Path,
        source: &S,
        state: ApplyState,
    ) -> Result<SnapshotSigns>
    where
        S: SnapshotSource + ?Sized,
    {
        let mut signs = SnapshotSigns::default();
        for ty in EntityType::ALL {
            let outcome = match ty {
                EntityType::Inode => self.store_inode(dir, source)?,
                EntityType::Dentry => self.store_dentry(dir, source)?,
                EntityType::Extend => self.store_extend(dir, source)?,
                EntityType::Multipart => self.store_multipart(dir, source)?,
            };
            check_complete(ctx, ty, &outcome)?;
            signs.set(ty, outcome.checksum);
        }
        self.store_apply_id(dir, state)?;
        self.write_small_file(ctx, &dir.join(SNAPSHOT_SIGN), signs.to_sign_string().as_bytes())?;
        if let Err(e) = sync_dir(dir) {
            warn!(
                "storeSnapshot: sync {} failed: partitionID({}) err({})",
                dir.display(),
                self.partition_id(),
                e
            );
        }
        Ok(signs)
    }

    fn swap_generation(&self, ctx: OpContext) -> Result<()> {
        let root = self.root_dir();
        let current = root.join(SNAPSHOT_DIR);
        let staging = root.join(SNAPSHOT_DIR_TMP);
        let backup = root.join(SNAPSHOT_BACKUP);

        remove_dir_if_exists(&backup)
            .map_err(|e| ctx.io(format!("remove stale {}", backup.display()), e))?;

        let had_current = current.is_dir();
        if had_current {
            fs::rename(&current, &backup).map_err(|e| {
                ctx.io(
                    format!("rename {} to {}", current.display(), backup.display()),
                    e,
                )
            })?;
        }

        if let Err(e) = fs::rename(&staging, &current) {
            if had_current {
                if let Err(restore) = fs::rename(&backup, &current) {
                    warn!(
                        "storeSnapshot: restore {} failed: partitionID({}) err({})",
                        backup.display(),
                        self.partition_id(),
                        restore
                    );
                }
            }
            return Err(ctx.io(
                format!("rename {} to {}", staging.display(), current.display()),
                e,
            ));
        }

        if let Err(e) = sync_dir(root) {
            warn!(
                "storeSnapshot: sync {} failed: partitionID({}) err({})",
                root.display(),
                self.partition_id(),
                e
            );
        }
        if let Err(e) = remove_dir_if_exists(&backup) {
            warn!(
                "storeSnapshot: remove {} failed: partitionID({}) err({})",
                backup.display(),
                self.partition_id(),
                e
            );
        }
        Ok(())
    }

    /// Finish a swap interrupted between its two renames
    pub fn recover_generation(&self) -> Result<()> {
        let ctx = self.ctx("recoverSnapshot");
        let current = self.snapshot_dir();
        let backup = self.root_dir().join(SNAPSHOT_BACKUP);
        if !backup.is_dir() {
            return Ok(());
        }

        if current.is_dir() {
            // The swap completed; only the backup removal was lost.
            if let Err(e) = fs::remove_dir_all(&backup) {
                warn!(
                    "recoverSnapshot: remove {} failed: partitionID({}) err({})",
                    backup.display(),
                    self.partition_id(),
                    e
                );
            }
            return Ok(());
        }

        fs::rename(&backup, &current).map_err(|e| {
            ctx.io(
                format!("rename {} to {}", backup.display(), current.display()),
                e,
            )
        })?;
        warn!(
            "recoverSnapshot: restored previous generation: partitionID({}) volume({})",
            self.partition_id(),
            self.config().vol_name
        );
        Ok(())
    }

    /// Compare `signs` with the `.sign` file in `dir`. Returns `false` when
    /// there is no `.sign` file to compare with.
    fn check_signs(&self, ctx: OpContext, dir: &Path, signs: &SnapshotSigns) -> Result<bool> {
        let path = dir.join(SNAPSHOT_SIGN);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(ctx.read(format!("read {}", path.display()), e)),
        };
        let expected = SnapshotSigns::parse(&text)
            .ok_or_else(|| ctx.corrupt(format!("cannot parse {} {:?}", path.display(), text)))?;

        for ty in EntityType::ALL {
            if expected.get(ty) != signs.get(ty) {
                return Err(ctx.checksum_mismatch(ty.file_name(), expected.get(ty), signs.get(ty)));
            }
        }
        Ok(true)
    }
}

/// Reject an entity file that would not load back as the source described it
fn check_complete(ctx: OpContext, ty: EntityType, outcome: &StoreOutcome) -> Result<()> {
    if outcome.truncated() {
        return Err(ctx.wrap(Error::snapshot_source(format!(
            "range {} stopped after {} of {} records",
            ty, outcome.records, outcome.expected
        ))));
    }
    if !outcome.is_complete() {
        return Err(ctx.corrupt(format!(
            "{} file counts {} records but holds {} of {} reported",
            ty,
            outcome.count.unwrap_or(outcome.records),
            outcome.records,
            outcome.expected
        )));
    }
    Ok(())
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn sync_dir(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}
