//! Whole-partition snapshots: config file, generation swap, sign checks

use metanode_common::{
    Dentry, EntityType, Error, ErrorKind, Extend, Inode, MetaPartitionConfig, Multipart,
    MultipartCountSource, Result, SnapshotOptions,
};
use metanode_snapshot::layout::{
    APPLY_ID_FILE, METADATA_FILE, METADATA_FILE_TMP, SNAPSHOT_BACKUP, SNAPSHOT_DIR, SNAPSHOT_DIR_TMP,
    SNAPSHOT_SIGN,
};
use metanode_snapshot::{
    ApplyState, MemoryPartition, MemorySnapshot, OpStatus, PartitionFsm, PartitionStore,
    SnapshotSource,
};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn create_partition(root: &Path) -> PartitionStore {
    let config = MetaPartitionConfig::new(7, "ltptest", 1, 1 << 24, root)
        .with_peer(1, "192.168.0.11:17210")
        .with_peer(2, "192.168.0.12:17210");
    let store = PartitionStore::new(config, SnapshotOptions::default()).unwrap();
    store.persist_metadata().unwrap();
    store
}

fn sample_partition(files: u64) -> MemoryPartition {
    let mut mp = MemoryPartition::new();
    mp.create_inode(Inode::new(1, 0o40755));
    for ino in 2..2 + files {
        mp.create_inode(Inode::new(ino, 0o100644));
        assert_eq!(
            mp.create_dentry(Dentry::new(1, format!("file-{}", ino), ino, 1), false),
            OpStatus::Ok
        );
    }
    let mut ext = Extend::new(2);
    ext.put("user.owner", "ltp");
    mp.set_xattr(ext).unwrap();
    mp.create_multipart(Multipart::new("upload-1", "bucket/object", 1_700_000_000));
    mp
}

struct FailingSource;

impl SnapshotSource for FailingSource {
    fn range(&self, ty: EntityType, _visit: &mut dyn FnMut(&[u8]) -> Result<bool>) -> Result<()> {
        Err(Error::snapshot_source(format!("range {} failed", ty)))
    }

    fn count(&self, _ty: EntityType) -> Result<u64> {
        Ok(0)
    }
}

#[test]
fn test_store_then_load_generation() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("partition_7");
    let store = create_partition(&root);

    let original = sample_partition(10);
    let source = MemorySnapshot::capture(&original).unwrap();
    let signs = store.store_snapshot(&source, 42, 118).unwrap();

    let snapshot = root.join(SNAPSHOT_DIR);
    for ty in EntityType::ALL {
        assert!(snapshot.join(ty.file_name()).is_file(), "{}", ty);
    }
    assert_eq!(
        fs::read_to_string(snapshot.join(SNAPSHOT_SIGN)).unwrap(),
        signs.to_sign_string()
    );
    assert!(!root.join(SNAPSHOT_DIR_TMP).exists());
    assert!(!root.join(SNAPSHOT_BACKUP).exists());

    let mut reopened = PartitionStore::open(&root, SnapshotOptions::default()).unwrap();
    let mut restored = MemoryPartition::new();
    let loaded = reopened.load(&mut restored).unwrap();

    assert_eq!(loaded.config, *store.config());
    assert_eq!(loaded.state, ApplyState::new(42, 118));
    assert_eq!(loaded.stats.inodes, 11);
    assert_eq!(loaded.stats.dentries, 10);
    assert_eq!(loaded.stats.extends, 1);
    assert_eq!(loaded.stats.multiparts, 1);
    assert_eq!(loaded.stats.signs, signs);
    assert!(loaded.stats.verified);
    assert!(original.inodes().eq(restored.inodes()));
    assert!(original.dentries().eq(restored.dentries()));
}

#[test]
fn test_loaded_cursor_covers_stored_inodes() {
    let dir = tempdir().unwrap();
    let mut store = create_partition(dir.path());

    let source = MemorySnapshot::capture(&sample_partition(300)).unwrap();
    store.store_snapshot(&source, 5, 10).unwrap();

    let loaded = store.load(&mut MemoryPartition::new()).unwrap();
    assert_eq!(loaded.state.apply_id, 5);
    assert_eq!(loaded.state.cursor, 301);
    assert_eq!(
        fs::read_to_string(dir.path().join(SNAPSHOT_DIR).join("apply")).unwrap(),
        "5|301"
    );
}

#[test]
fn test_new_generation_replaces_old() {
    let dir = tempdir().unwrap();
    let mut store = create_partition(dir.path());

    store
        .store_snapshot(&MemorySnapshot::capture(&sample_partition(3)).unwrap(), 10, 4)
        .unwrap();
    store
        .store_snapshot(&MemorySnapshot::capture(&sample_partition(6)).unwrap(), 20, 7)
        .unwrap();

    let mut restored = MemoryPartition::new();
    let loaded = store.load(&mut restored).unwrap();
    assert_eq!(loaded.state, ApplyState::new(20, 7));
    assert_eq!(restored.len(EntityType::Dentry), 6);
}

#[test]
fn test_failed_store_keeps_current_generation() {
    let dir = tempdir().unwrap();
    let mut store = create_partition(dir.path());
    let good = store
        .store_snapshot(&MemorySnapshot::capture(&sample_partition(4)).unwrap(), 10, 5)
        .unwrap();

    let err = store.store_snapshot(&FailingSource, 11, 5).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Other);
    assert!(!dir.path().join(SNAPSHOT_DIR_TMP).exists());

    let loaded = store.load(&mut MemoryPartition::new()).unwrap();
    assert_eq!(loaded.state.apply_id, 10);
    assert_eq!(loaded.stats.signs, good);
}

/// Reports full counts but hands over at most `limit` records per type
struct StoppingSource {
    inner: MemorySnapshot,
    limit: usize,
}

impl SnapshotSource for StoppingSource {
    fn range(&self, ty: EntityType, visit: &mut dyn FnMut(&[u8]) -> Result<bool>) -> Result<()> {
        let mut seen = 0;
        self.inner.range(ty, &mut |data: &[u8]| {
            seen += 1;
            if seen > self.limit {
                return Ok(false);
            }
            visit(data)
        })
    }

    fn count(&self, ty: EntityType) -> Result<u64> {
        self.inner.count(ty)
    }
}

#[test]
fn test_early_stop_keeps_current_generation() {
    let dir = tempdir().unwrap();
    let mut store = create_partition(dir.path());
    let original = sample_partition(4);
    let good = store
        .store_snapshot(&MemorySnapshot::capture(&original).unwrap(), 10, 5)
        .unwrap();

    let stopping = StoppingSource {
        inner: MemorySnapshot::capture(&sample_partition(6)).unwrap(),
        limit: 2,
    };
    let err = store.store_snapshot(&stopping, 11, 7).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("storeSnapshot"), "{}", msg);
    assert!(msg.contains("stopped after 2 of 7"), "{}", msg);
    assert!(!dir.path().join(SNAPSHOT_DIR_TMP).exists());
    assert!(!dir.path().join(SNAPSHOT_BACKUP).exists());

    let mut restored = MemoryPartition::new();
    let loaded = store.load(&mut restored).unwrap();
    assert_eq!(loaded.state.apply_id, 10);
    assert_eq!(loaded.stats.signs, good);
    assert!(original.inodes().eq(restored.inodes()));
}

#[test]
fn test_legacy_miscount_is_not_committed() {
    let dir = tempdir().unwrap();
    let config = MetaPartitionConfig::new(7, "ltptest", 1, 1 << 24, dir.path());
    let legacy = SnapshotOptions {
        multipart_count_source: MultipartCountSource::Extend,
        ..SnapshotOptions::default()
    };
    let mut store = PartitionStore::new(config, legacy).unwrap();
    store.persist_metadata().unwrap();

    let mut partition = sample_partition(2);
    store
        .store_snapshot(&MemorySnapshot::capture(&partition).unwrap(), 3, 3)
        .unwrap();

    // One extend, two sessions: the legacy count would drop a session.
    partition.create_multipart(Multipart::new("upload-2", "bucket/other", 1_700_000_100));
    let err = store
        .store_snapshot(&MemorySnapshot::capture(&partition).unwrap(), 4, 3)
        .unwrap_err();
    assert!(err.is_corruption());

    let loaded = store.load(&mut MemoryPartition::new()).unwrap();
    assert_eq!(loaded.state.apply_id, 3);
    assert_eq!(loaded.stats.multiparts, 1);
}

#[test]
fn test_stale_staging_dir_is_replaced() {
    let dir = tempdir().unwrap();
    let store = create_partition(dir.path());
    let staging = dir.path().join(SNAPSHOT_DIR_TMP);
    fs::create_dir_all(&staging).unwrap();
    fs::write(staging.join("inode"), b"left over from a crash").unwrap();

    store
        .store_snapshot(&MemorySnapshot::capture(&sample_partition(2)).unwrap(), 1, 3)
        .unwrap();
    assert!(!staging.exists());
    store.verify().unwrap();
}

#[test]
fn test_interrupted_swap_is_recovered() {
    let dir = tempdir().unwrap();
    let mut store = create_partition(dir.path());
    store
        .store_snapshot(&MemorySnapshot::capture(&sample_partition(5)).unwrap(), 30, 6)
        .unwrap();

    // Crash after moving the current generation aside, before the new one
    // took its place.
    fs::rename(dir.path().join(SNAPSHOT_DIR), dir.path().join(SNAPSHOT_BACKUP)).unwrap();

    let mut restored = MemoryPartition::new();
    let loaded = store.load(&mut restored).unwrap();
    assert_eq!(loaded.state.apply_id, 30);
    assert_eq!(restored.len(EntityType::Dentry), 5);
    assert!(dir.path().join(SNAPSHOT_DIR).is_dir());
    assert!(!dir.path().join(SNAPSHOT_BACKUP).exists());
}

#[test]
fn test_leftover_backup_is_discarded() {
    let dir = tempdir().unwrap();
    let mut store = create_partition(dir.path());
    store
        .store_snapshot(&MemorySnapshot::capture(&sample_partition(2)).unwrap(), 8, 3)
        .unwrap();

    // Crash after the swap, before the backup was removed.
    let backup = dir.path().join(SNAPSHOT_BACKUP);
    fs::create_dir_all(&backup).unwrap();
    fs::write(backup.join("apply"), "1|1").unwrap();

    let loaded = store.load(&mut MemoryPartition::new()).unwrap();
    assert_eq!(loaded.state.apply_id, 8);
    assert!(!backup.exists());
}

#[test]
fn test_sign_mismatch_fails_load() {
    let dir = tempdir().unwrap();
    let mut store = create_partition(dir.path());
    // Cursor below the largest inode, so a completed load would rewrite `apply`.
    let signs = store
        .store_snapshot(&MemorySnapshot::capture(&sample_partition(3)).unwrap(), 1, 2)
        .unwrap();

    let sign_path = dir.path().join(SNAPSHOT_DIR).join(SNAPSHOT_SIGN);
    let mut wrong = signs;
    wrong.extend = wrong.extend.wrapping_add(1);
    fs::write(&sign_path, wrong.to_sign_string()).unwrap();

    let err = store.load(&mut MemoryPartition::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corrupt);
    assert!(err.to_string().contains("extend"));
    assert_eq!(
        fs::read_to_string(dir.path().join(SNAPSHOT_DIR).join(APPLY_ID_FILE)).unwrap(),
        "1|2"
    );
    assert!(store.verify().is_err());

    let mut lenient = PartitionStore::open(
        dir.path(),
        SnapshotOptions {
            verify_checksums: false,
            ..SnapshotOptions::default()
        },
    )
    .unwrap();
    let loaded = lenient.load(&mut MemoryPartition::new()).unwrap();
    assert!(!loaded.stats.verified);
    assert_eq!(loaded.stats.signs, signs);
}

#[test]
fn test_verify_detects_tampered_file() {
    let dir = tempdir().unwrap();
    let store = create_partition(dir.path());
    let signs = store
        .store_snapshot(&MemorySnapshot::capture(&sample_partition(3)).unwrap(), 1, 4)
        .unwrap();
    assert_eq!(store.verify().unwrap(), signs);

    // The last byte of the dentry file is the high byte of a file type, so
    // the record still decodes after the flip.
    let path = dir.path().join(SNAPSHOT_DIR).join("dentry");
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x40;
    fs::write(&path, &bytes).unwrap();

    match store.verify().unwrap_err() {
        Error::ChecksumMismatch { file, expected, .. } => {
            assert_eq!(file, "dentry");
            assert_eq!(expected, signs.dentry);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_verify_without_generation_or_sign() {
    let dir = tempdir().unwrap();
    let store = create_partition(dir.path());
    assert!(store.verify().unwrap_err().is_not_found());

    store
        .store_snapshot(&MemorySnapshot::capture(&sample_partition(1)).unwrap(), 1, 2)
        .unwrap();
    fs::remove_file(dir.path().join(SNAPSHOT_DIR).join(SNAPSHOT_SIGN)).unwrap();
    assert!(store.verify().unwrap_err().is_not_found());
}

#[test]
fn test_fresh_partition_loads_empty() {
    let dir = tempdir().unwrap();
    let mut store = create_partition(dir.path());

    let mut restored = MemoryPartition::new();
    let loaded = store.load(&mut restored).unwrap();
    assert!(restored.is_empty());
    assert_eq!(loaded.state, ApplyState::new(0, 1));
    assert!(!loaded.stats.verified);
}

#[test]
fn test_open_without_meta_is_not_found() {
    let dir = tempdir().unwrap();
    let err = PartitionStore::open(dir.path(), SnapshotOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_config_survives_crash_before_rename() {
    let dir = tempdir().unwrap();
    let mut store = create_partition(dir.path());
    let before = store.config().clone();

    // A crash mid-write leaves a partial staging file behind.
    fs::write(dir.path().join(METADATA_FILE_TMP), b"{\"partition_id\":7,\"vol").unwrap();
    let loaded = PartitionStore::load_metadata(dir.path()).unwrap();
    assert_eq!(loaded, before);

    let mut grown = before.clone();
    grown.end = 1 << 25;
    grown.peers.truncate(1);
    store.replace_config(grown.clone()).unwrap();
    store.persist_metadata().unwrap();

    assert!(!dir.path().join(METADATA_FILE_TMP).exists());
    assert_eq!(PartitionStore::load_metadata(dir.path()).unwrap(), grown);
    let raw = fs::read_to_string(dir.path().join(METADATA_FILE)).unwrap();
    assert!(!raw.contains("root_dir"));
}

#[test]
fn test_crash_before_first_persist_leaves_no_config() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join(METADATA_FILE_TMP), b"{\"partition_id\":7").unwrap();

    let err = PartitionStore::load_metadata(dir.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_load_picks_up_persisted_config() {
    let dir = tempdir().unwrap();
    let mut store = create_partition(dir.path());

    let mut other = PartitionStore::open(dir.path(), SnapshotOptions::default()).unwrap();
    let mut grown = other.config().clone();
    grown.end = 1 << 26;
    other.replace_config(grown).unwrap();
    other.persist_metadata().unwrap();

    let loaded = store.load(&mut MemoryPartition::new()).unwrap();
    assert_eq!(loaded.config.end, 1 << 26);
    assert_eq!(store.config().end, 1 << 26);
}
