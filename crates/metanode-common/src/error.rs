//! Error types for the metanode partition store
//!
//! Every persistence error carries the name of the operation that produced
//! it (`loadInode`, `storeApplyID`, ...) and the partition it belongs to, so a
//! failed startup or snapshot can be traced back without extra logging.

use thiserror::Error;

/// Common result type for metanode operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for metanode operations
#[derive(Debug, Error)]
pub enum Error {
    /// An optional file is absent. Load paths treat this as an empty state.
    #[error("[{op}] partition {partition_id}: {path} not found")]
    NotFound {
        op: &'static str,
        partition_id: u64,
        path: String,
    },

    /// Structurally invalid or truncated data
    #[error("[{op}] partition {partition_id}: corrupt data: {reason}")]
    Corrupt {
        op: &'static str,
        partition_id: u64,
        reason: String,
    },

    /// Open/read/write/sync/rename failure from the underlying storage
    #[error("[{op}] partition {partition_id}: {context}: {source}")]
    Io {
        op: &'static str,
        partition_id: u64,
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The state machine refused a replayed entity
    #[error("[{op}] partition {partition_id}: replay rejected: {reason}")]
    ReplayRejected {
        op: &'static str,
        partition_id: u64,
        reason: String,
    },

    #[error("[{op}] partition {partition_id}: checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        op: &'static str,
        partition_id: u64,
        file: String,
        expected: u32,
        actual: u32,
    },

    #[error("invalid partition config: {0}")]
    InvalidConfig(String),

    /// Error reported by a snapshot source while iterating
    #[error("snapshot source error: {0}")]
    Source(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A context-free error raised inside a persistence operation
    #[error("[{op}] partition {partition_id}: {source}")]
    Op {
        op: &'static str,
        partition_id: u64,
        #[source]
        source: Box<Error>,
    },
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Corrupt,
    IoFailure,
    ReplayRejected,
    Other,
}

impl Error {
    /// Create a snapshot source error
    pub fn snapshot_source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Corrupt { .. }
            | Self::ChecksumMismatch { .. }
            | Self::InvalidConfig(_)
            | Self::Deserialization(_) => ErrorKind::Corrupt,
            Self::Io { .. } => ErrorKind::IoFailure,
            Self::ReplayRejected { .. } => ErrorKind::ReplayRejected,
            Self::Source(_) | Self::Serialization(_) => ErrorKind::Other,
            Self::Op { source, .. } => source.kind(),
        }
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Check if this error means the on-disk state cannot be trusted.
    /// A rejected replay counts: the log and the snapshot disagree.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self.kind(), ErrorKind::Corrupt | ErrorKind::ReplayRejected)
    }
}

/// Operation name and partition identity attached to every persistence error.
#[derive(Debug, Clone, Copy)]
pub struct OpContext {
    pub op: &'static str,
    pub partition_id: u64,
}

impl OpContext {
    pub const fn new(op: &'static str, partition_id: u64) -> Self {
        Self { op, partition_id }
    }

    pub fn not_found(&self, path: impl Into<String>) -> Error {
        Error::NotFound {
            op: self.op,
            partition_id: self.partition_id,
            path: path.into(),
        }
    }

    pub fn corrupt(&self, reason: impl Into<String>) -> Error {
        Error::Corrupt {
            op: self.op,
            partition_id: self.partition_id,
            reason: reason.into(),
        }
    }

    pub fn io(&self, context: impl Into<String>, source: std::io::Error) -> Error {
        Error::Io {
            op: self.op,
            partition_id: self.partition_id,
            context: context.into(),
            source,
        }
    }

    /// Map an I/O error from a read path. A short read means a header
    /// promised bytes the file does not have, which is corruption.
    pub fn read(&self, context: impl Into<String>, source: std::io::Error) -> Error {
        match source.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                self.corrupt(format!("{}: truncated file", context.into()))
            }
            std::io::ErrorKind::InvalidData => {
                self.corrupt(format!("{}: {}", context.into(), source))
            }
            _ => self.io(context, source),
        }
    }

    /// Map an I/O error from a write path. A record the framing cannot
    /// express is rejected as corrupt input rather than a storage failure.
    pub fn write(&self, context: impl Into<String>, source: std::io::Error) -> Error {
        match source.kind() {
            std::io::ErrorKind::InvalidInput => {
                self.corrupt(format!("{}: {}", context.into(), source))
            }
            _ => self.io(context, source),
        }
    }

    /// Attach this operation to an error raised without one. Errors that
    /// already name their operation pass through unchanged.
    pub fn wrap(&self, err: Error) -> Error {
        match err {
            Error::InvalidConfig(_)
            | Error::Source(_)
            | Error::Serialization(_)
            | Error::Deserialization(_) => Error::Op {
                op: self.op,
                partition_id: self.partition_id,
                source: Box::new(err),
            },
            other => other,
        }
    }

    pub fn replay_rejected(&self, reason: impl Into<String>) -> Error {
        Error::ReplayRejected {
            op: self.op,
            partition_id: self.partition_id,
            reason: reason.into(),
        }
    }

    pub fn checksum_mismatch(&self, file: impl Into<String>, expected: u32, actual: u32) -> Error {
        Error::ChecksumMismatch {
            op: self.op,
            partition_id: self.partition_id,
            file: file.into(),
            expected,
            actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_kind() {
        let ctx = OpContext::new("loadInode", 7);
        assert_eq!(ctx.not_found("inode").kind(), ErrorKind::NotFound);
        assert_eq!(ctx.corrupt("bad").kind(), ErrorKind::Corrupt);
        assert_eq!(
            ctx.io("open", io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
                .kind(),
            ErrorKind::IoFailure
        );
        assert_eq!(ctx.replay_rejected("exists").kind(), ErrorKind::ReplayRejected);
        assert_eq!(Error::snapshot_source("boom").kind(), ErrorKind::Other);
    }

    #[test]
    fn test_short_read_is_corruption() {
        let ctx = OpContext::new("loadDentry", 3);
        let err = ctx.read("read body", io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(err.is_corruption());

        let err = ctx.read("read header", io::Error::new(io::ErrorKind::InvalidData, "bad varint"));
        assert_eq!(err.kind(), ErrorKind::Corrupt);

        let err = ctx.read("read body", io::Error::from(io::ErrorKind::Interrupted));
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn test_oversized_write_is_corruption() {
        let ctx = OpContext::new("storeInode", 3);
        let err = ctx.write("write inode", io::Error::from(io::ErrorKind::InvalidInput));
        assert_eq!(err.kind(), ErrorKind::Corrupt);

        let err = ctx.write("write inode", io::Error::from(io::ErrorKind::StorageFull));
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn test_error_display_carries_context() {
        let err = OpContext::new("storeApplyID", 42).corrupt("empty file");
        let msg = err.to_string();
        assert!(msg.contains("storeApplyID"));
        assert!(msg.contains("42"));
        assert!(msg.contains("empty file"));
    }

    #[test]
    fn test_wrap_names_operation() {
        let ctx = OpContext::new("storeInode", 9);
        let err = ctx.wrap(Error::snapshot_source("boom"));
        let msg = err.to_string();
        assert!(msg.contains("storeInode"));
        assert!(msg.contains("partition 9"));
        assert!(msg.contains("boom"));
        assert_eq!(err.kind(), ErrorKind::Other);

        let err = ctx.wrap(Error::Deserialization("inode: eof".into()));
        assert_eq!(err.kind(), ErrorKind::Corrupt);

        // Already attributed errors keep their original operation.
        let err = ctx.wrap(OpContext::new("loadInode", 9).corrupt("bad"));
        assert!(err.to_string().starts_with("[loadInode]"));
    }

    #[test]
    fn test_replay_rejected_counts_as_corruption() {
        let err = OpContext::new("loadDentry", 1).replay_rejected("status Exists");
        assert!(err.is_corruption());
        assert!(!err.is_not_found());
    }
}
