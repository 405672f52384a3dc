//! On-disk layout of a metadata partition
//!
//! ```text
//! <root_dir>/
//! ├── meta                  partition identity (JSON)
//! ├── .meta                 staging file for `meta`
//! ├── snapshot/             current snapshot generation
//! │   ├── inode             [u32 BE len][inode] ...
//! │   ├── dentry            [u32 BE len][dentry] ...
//! │   ├── extend            [varint count]([varint len][extend]) ...
//! │   ├── multipart         [varint count]([varint len][multipart]) ...
//! │   ├── apply             "<applyID>|<cursor>"
//! │   └── .sign             "<inode> <dentry> <extend> <multipart>" CRC-32s
//! ├── .snapshot/            generation being written
//! └── .snapshot_backup/     previous generation while swapping
//! ```

use metanode_common::EntityType;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_DIR: &str = "snapshot";
pub const SNAPSHOT_DIR_TMP: &str = ".snapshot";
pub const SNAPSHOT_BACKUP: &str = ".snapshot_backup";
pub const SNAPSHOT_SIGN: &str = ".sign";
pub const METADATA_FILE: &str = "meta";
pub const METADATA_FILE_TMP: &str = ".meta";
pub const APPLY_ID_FILE: &str = "apply";

/// Path of an entity file inside a snapshot directory
pub fn entity_path(dir: &Path, ty: EntityType) -> PathBuf {
    dir.join(ty.file_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_path() {
        let dir = Path::new("/data/mp_1/snapshot");
        assert_eq!(
            entity_path(dir, EntityType::Multipart),
            PathBuf::from("/data/mp_1/snapshot/multipart")
        );
    }
}
