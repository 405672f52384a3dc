//! In-memory partition state and snapshot source
//!
//! [`MemoryPartition`] is a minimal state machine that snapshot loads can
//! replay into, used by the CLI and by tests. [`MemorySnapshot`] is a frozen,
//! already-encoded copy of such a state that the store path can serialize.

use crate::fsm::{OpStatus, PartitionFsm, SnapshotSource};
use metanode_common::{
    Dentry, EntityType, Extend, Inode, InodeId, Multipart, Result, SnapshotEntity,
};
use std::collections::BTreeMap;

/// Partition state held in ordered maps
#[derive(Debug, Clone, Default)]
pub struct MemoryPartition {
    inodes: BTreeMap<InodeId, Inode>,
    dentries: BTreeMap<(InodeId, String), Dentry>,
    extends: BTreeMap<InodeId, Extend>,
    multiparts: BTreeMap<String, Multipart>,
    free_list: Vec<InodeId>,
}

impl MemoryPartition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inode(&self, ino: InodeId) -> Option<&Inode> {
        self.inodes.get(&ino)
    }

    pub fn dentry(&self, parent_id: InodeId, name: &str) -> Option<&Dentry> {
        self.dentries.get(&(parent_id, name.to_string()))
    }

    pub fn extend(&self, ino: InodeId) -> Option<&Extend> {
        self.extends.get(&ino)
    }

    pub fn multipart(&self, id: &str) -> Option<&Multipart> {
        self.multiparts.get(id)
    }

    /// Inodes marked deleted, in load order
    pub fn free_list(&self) -> &[InodeId] {
        &self.free_list
    }

    pub fn inodes(&self) -> impl Iterator<Item = &Inode> {
        self.inodes.values()
    }

    pub fn dentries(&self) -> impl Iterator<Item = &Dentry> {
        self.dentries.values()
    }

    pub fn extends(&self) -> impl Iterator<Item = &Extend> {
        self.extends.values()
    }

    pub fn multiparts(&self) -> impl Iterator<Item = &Multipart> {
        self.multiparts.values()
    }

    /// Number of entities of `ty`
    pub fn len(&self, ty: EntityType) -> usize {
        match ty {
            EntityType::Inode => self.inodes.len(),
            EntityType::Dentry => self.dentries.len(),
            EntityType::Extend => self.extends.len(),
            EntityType::Multipart => self.multiparts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        EntityType::ALL.into_iter().all(|ty| self.len(ty) == 0)
    }
}

impl PartitionFsm for MemoryPartition {
    fn create_inode(&mut self, inode: Inode) {
        self.inodes.insert(inode.inode, inode);
    }

    fn check_and_insert_free_list(&mut self, inode: &Inode) {
        if inode.is_marked_delete() {
            self.free_list.push(inode.inode);
        }
    }

    fn create_dentry(&mut self, dentry: Dentry, replay: bool) -> OpStatus {
        let key = (dentry.parent_id, dentry.name.clone());
        if !replay {
            if !self.inodes.contains_key(&dentry.parent_id) {
                return OpStatus::NotExist;
            }
            if self.dentries.contains_key(&key) {
                return OpStatus::Exists;
            }
        }
        self.dentries.insert(key, dentry);
        OpStatus::Ok
    }

    fn set_xattr(&mut self, extend: Extend) -> Result<()> {
        self.extends.insert(extend.inode, extend);
        Ok(())
    }

    fn create_multipart(&mut self, multipart: Multipart) {
        self.multiparts.insert(multipart.id.clone(), multipart);
    }
}

/// Frozen, encoded partition contents
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    records: BTreeMap<EntityType, Vec<Vec<u8>>>,
}

impl MemorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode every entity of `partition` in key order
    pub fn capture(partition: &MemoryPartition) -> Result<Self> {
        let mut snapshot = Self::new();
        for inode in partition.inodes() {
            snapshot.push(inode)?;
        }
        for dentry in partition.dentries() {
            snapshot.push(dentry)?;
        }
        for extend in partition.extends() {
            snapshot.push(extend)?;
        }
        for multipart in partition.multiparts() {
            snapshot.push(multipart)?;
        }
        Ok(snapshot)
    }

    /// Append one entity after the ones already present
    pub fn push<T: SnapshotEntity>(&mut self, entity: &T) -> Result<()> {
        let data = entity.to_bytes()?;
        self.push_raw(T::TYPE, data);
        Ok(())
    }

    /// Append pre-encoded bytes as an entity of `ty`
    pub fn push_raw(&mut self, ty: EntityType, data: Vec<u8>) {
        self.records.entry(ty).or_default().push(data);
    }

    fn records(&self, ty: EntityType) -> &[Vec<u8>] {
        self.records.get(&ty).map(Vec::as_slice).unwrap_or_default()
    }
}

impl SnapshotSource for MemorySnapshot {
    fn range(&self, ty: EntityType, visit: &mut dyn FnMut(&[u8]) -> Result<bool>) -> Result<()> {
        for data in self.records(ty) {
            if !visit(data)? {
                break;
            }
        }
        Ok(())
    }

    fn count(&self, ty: EntityType) -> Result<u64> {
        Ok(self.records(ty).len() as u64)
    }
}
