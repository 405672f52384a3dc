//! Metanode Snapshot - partition snapshot inspection tool
//!
//! Loads, verifies and dumps the on-disk state of a metadata partition.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metanode_common::{EntityType, SnapshotOptions, SnapshotSigns};
use metanode_snapshot::layout::APPLY_ID_FILE;
use metanode_snapshot::{ApplyState, MemoryPartition, PartitionStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "metanode-snapshot")]
#[command(about = "Inspect metanode partition snapshots")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Skip the `.sign` comparison on load
    #[arg(long)]
    no_verify: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a partition and summarize it
    Inspect {
        /// Partition root directory (holds `meta` and `snapshot/`)
        root: PathBuf,
    },
    /// Recompute snapshot checksums and compare them with `.sign`
    Verify {
        /// Partition root directory
        root: PathBuf,
    },
    /// Print the apply file of a snapshot directory
    DumpApply {
        /// Snapshot directory
        dir: PathBuf,
    },
}

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct Config {
    #[serde(default)]
    snapshot: SnapshotOptions,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Default)]
struct LoggingConfig {
    #[serde(default)]
    level: Option<String>,
}

#[derive(Debug, Serialize)]
struct InspectReport {
    partition_id: u64,
    volume: String,
    start: u64,
    end: u64,
    peers: usize,
    apply_id: u64,
    cursor: u64,
    inodes: u64,
    dentries: u64,
    extends: u64,
    multiparts: u64,
    free_inodes: usize,
    signs: SnapshotSigns,
    verified: bool,
}

#[derive(Debug, Serialize)]
struct ApplyReport {
    apply_id: u64,
    cursor: Option<u64>,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    toml::from_str(&config_str).with_context(|| format!("parse config {}", path.display()))
}

fn inspect(root: &Path, options: SnapshotOptions) -> Result<InspectReport> {
    let mut store = PartitionStore::open(root, options)
        .with_context(|| format!("open partition at {}", root.display()))?;
    let mut partition = MemoryPartition::new();
    let loaded = store.load(&mut partition)?;
    debug!(
        "loaded {} inodes, {} dentries into memory",
        partition.len(EntityType::Inode),
        partition.len(EntityType::Dentry)
    );

    Ok(InspectReport {
        partition_id: loaded.config.partition_id,
        volume: loaded.config.vol_name.clone(),
        start: loaded.config.start,
        end: loaded.config.end,
        peers: loaded.config.peers.len(),
        apply_id: loaded.state.apply_id,
        cursor: loaded.state.cursor,
        inodes: loaded.stats.inodes,
        dentries: loaded.stats.dentries,
        extends: loaded.stats.extends,
        multiparts: loaded.stats.multiparts,
        free_inodes: partition.free_list().len(),
        signs: loaded.stats.signs,
        verified: loaded.stats.verified,
    })
}

fn dump_apply(dir: &Path) -> Result<ApplyReport> {
    let path = dir.join(APPLY_ID_FILE);
    let data = std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let (apply_id, cursor) = ApplyState::parse(&data)
        .with_context(|| format!("cannot parse {}: {:?}", path.display(), data))?;
    Ok(ApplyReport { apply_id, cursor })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    let log_level = if args.log_level != "warn" {
        args.log_level.clone()
    } else {
        config.logging.level.clone().unwrap_or(args.log_level.clone())
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut options = config.snapshot;
    if args.no_verify {
        options.verify_checksums = false;
    }
    if let Some(path) = &args.config {
        info!("Config file: {}", path.display());
    }

    match args.command {
        Commands::Inspect { root } => {
            let report = inspect(&root, options)?;
            if args.json {
                return print_json(&report);
            }
            println!("Partition {}", report.partition_id);
            println!("=============");
            println!("Volume:      {}", report.volume);
            println!("Range:       [{}, {}]", report.start, report.end);
            println!("Peers:       {}", report.peers);
            println!("Apply ID:    {}", report.apply_id);
            println!("Cursor:      {}", report.cursor);
            println!();
            println!("{:<12} {:>12} {:>12}", "FILE", "RECORDS", "CRC32");
            for (ty, records) in [
                (EntityType::Inode, report.inodes),
                (EntityType::Dentry, report.dentries),
                (EntityType::Extend, report.extends),
                (EntityType::Multipart, report.multiparts),
            ] {
                println!("{:<12} {:>12} {:>12}", ty, records, report.signs.get(ty));
            }
            println!();
            println!("Free inodes: {}", report.free_inodes);
            println!(
                "Sign:        {}",
                if report.verified { "verified" } else { "not checked" }
            );
        }
        Commands::Verify { root } => {
            let store = PartitionStore::open(&root, options)
                .with_context(|| format!("open partition at {}", root.display()))?;
            let signs = store.verify()?;
            if args.json {
                return print_json(&signs);
            }
            println!("OK {}", signs.to_sign_string());
        }
        Commands::DumpApply { dir } => {
            let report = dump_apply(&dir)?;
            if args.json {
                return print_json(&report);
            }
            match report.cursor {
                Some(cursor) => println!("applyID={} cursor={}", report.apply_id, cursor),
                None => println!("applyID={} (no cursor)", report.apply_id),
            }
        }
    }

    Ok(())
}
