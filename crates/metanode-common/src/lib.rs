//! Metanode Common - Shared types and utilities
//!
//! Error definitions, snapshot checksums, partition configuration and the
//! entity types persisted by the metanode partition store.

pub mod checksum;
pub mod config;
pub mod error;
pub mod types;

pub use checksum::{ChecksumCalculator, SnapshotSigns};
pub use config::{MetaPartitionConfig, MultipartCountSource, Peer, ReadStrategy, SnapshotOptions};
pub use error::{Error, ErrorKind, OpContext, Result};
pub use types::*;
