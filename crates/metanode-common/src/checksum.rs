//! Checksum utilities for snapshot files
//!
//! Snapshot files are signed with CRC-32 (IEEE polynomial). The signature is
//! computed over every byte written to the file, length and count prefixes
//! included, and handed back to the caller instead of being embedded in the
//! file itself.

use crate::types::EntityType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Streaming CRC-32 calculator
#[derive(Clone, Default)]
pub struct ChecksumCalculator {
    hasher: crc32fast::Hasher,
    bytes: u64,
}

impl ChecksumCalculator {
    /// Create a new calculator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the calculator with more data
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }

    /// Current checksum value, without consuming the calculator
    #[must_use]
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Number of bytes fed so far
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Finalize and return the computed checksum
    #[must_use]
    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }

    /// Reset the calculator for reuse
    pub fn reset(&mut self) {
        self.hasher.reset();
        self.bytes = 0;
    }
}

impl io::Write for ChecksumCalculator {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for ChecksumCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumCalculator")
            .field("value", &self.value())
            .field("bytes", &self.bytes)
            .finish()
    }
}

/// Quick CRC-32 computation
#[inline]
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Checksums of the four entity files of one snapshot generation.
///
/// Persisted as the `.sign` file: four decimal numbers separated by single
/// spaces, in the order inode, dentry, extend, multipart.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSigns {
    pub inode: u32,
    pub dentry: u32,
    pub extend: u32,
    pub multipart: u32,
}

impl SnapshotSigns {
    /// Render in the `.sign` file format
    #[must_use]
    pub fn to_sign_string(&self) -> String {
        format!(
            "{} {} {} {}",
            self.inode, self.dentry, self.extend, self.multipart
        )
    }

    /// Parse the `.sign` file format
    pub fn parse(data: &str) -> Option<Self> {
        let mut fields = data.split_ascii_whitespace().map(str::parse::<u32>);
        let signs = Self {
            inode: fields.next()?.ok()?,
            dentry: fields.next()?.ok()?,
            extend: fields.next()?.ok()?,
            multipart: fields.next()?.ok()?,
        };
        if fields.next().is_some() {
            return None;
        }
        Some(signs)
    }

    /// Checksum of one entity file
    #[must_use]
    pub const fn get(&self, ty: EntityType) -> u32 {
        match ty {
            EntityType::Inode => self.inode,
            EntityType::Dentry => self.dentry,
            EntityType::Extend => self.extend,
            EntityType::Multipart => self.multipart,
        }
    }

    pub fn set(&mut self, ty: EntityType, crc: u32) {
        match ty {
            EntityType::Inode => self.inode = crc,
            EntityType::Dentry => self.dentry = crc,
            EntityType::Extend => self.extend = crc,
            EntityType::Multipart => self.multipart = crc,
        }
    }
}
