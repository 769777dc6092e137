//! Configuration settings for treesync
//!
//! Defines the run configuration consumed by the engine, the CLI arguments
//! that build it, and JSON profiles for persisting preferred settings.

use crate::error::{IoResultExt, Result, SyncError};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default chunk size for a single transfer step (16 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Default capacity of the worker pool queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default grace period granted to in-flight work on abort
pub const DEFAULT_ABORT_GRACE_SECS: u64 = 10;

/// treesync - mirror a directory tree, copying only what changed
#[derive(Parser, Debug, Clone)]
#[command(name = "treesync")]
#[command(author = "treesync contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Concurrent directory-tree synchronization")]
#[command(long_about = r#"
treesync mirrors a source directory tree into a destination directory,
copying only the files that the selected strategies consider changed.

Strategies (combined with OR, none selected = always copy):
  mtime      modification time differs
  size       byte length differs
  head-tail  first/last 4 KiB differ (cheap, approximate)
  hash       256-bit digests differ
  content    full byte-by-byte comparison
  always     copy unconditionally

Examples:
  treesync /data /backup -s size               # Copy new or resized files
  treesync /data /backup -s size -s hash -w 4  # Size or digest change, 4 workers
  treesync hash file.bin --algorithm blake3    # Print a file digest
"#)]
pub struct CliArgs {
    /// Source directory (or single file)
    #[arg(value_name = "SOURCE")]
    pub source: Option<PathBuf>,

    /// Destination directory
    #[arg(value_name = "DESTINATION")]
    pub destination: Option<PathBuf>,

    /// Mirror the source directory itself instead of only its contents
    #[arg(long)]
    pub include_root: bool,

    /// Change detection strategy (repeatable)
    #[arg(short = 's', long = "strategy", value_enum, value_name = "STRATEGY")]
    pub strategies: Vec<StrategyKind>,

    /// Digest used by the hash strategy
    #[arg(long, value_enum, value_name = "ALGO")]
    pub hash_algorithm: Option<HashAlgorithm>,

    /// Number of concurrent workers (including the orchestrating thread)
    #[arg(short = 'w', long, value_name = "NUM")]
    pub workers: Option<usize>,

    /// Transfer chunk size (e.g., 16M, 512K)
    #[arg(long, value_name = "SIZE")]
    pub chunk_size: Option<String>,

    /// Load settings from a JSON profile
    #[arg(long, value_name = "PATH")]
    pub profile: Option<PathBuf>,

    /// Save the effective settings to a JSON profile
    #[arg(long, value_name = "PATH")]
    pub save_profile: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (no progress bars)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Print the digest of one or more files
    #[command(name = "hash")]
    Hash {
        /// Files to hash
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Hash algorithm
        #[arg(long, value_enum, default_value = "sha256")]
        algorithm: HashAlgorithm,
    },

    /// Check whether two files are byte-for-byte identical
    #[command(name = "compare")]
    Compare {
        /// First file
        first: PathBuf,
        /// Second file
        second: PathBuf,
    },
}

/// Change detection strategy selectable by the host
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Modification timestamps differ
    #[value(name = "mtime")]
    ModTime,
    /// Byte lengths differ
    #[value(name = "size")]
    Size,
    /// First or last 4 KiB differ
    #[value(name = "head-tail")]
    HeadTail,
    /// Cryptographic digests differ
    #[value(name = "hash")]
    Hash,
    /// Full content differs
    #[value(name = "content")]
    Content,
    /// Always copy
    #[value(name = "always")]
    Always,
}

impl StrategyKind {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::ModTime => "modification time",
            Self::Size => "size",
            Self::HeadTail => "head and tail",
            Self::Hash => "hash",
            Self::Content => "content",
            Self::Always => "always",
        }
    }
}

/// Hash algorithm for digests
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// XXHash3 - Ultra fast, non-cryptographic (128-bit)
    #[value(name = "xxhash3")]
    XXHash3,
    /// XXHash64 - Fast, non-cryptographic (64-bit)
    #[value(name = "xxhash64")]
    XXHash64,
    /// BLAKE3 - Fast and cryptographically secure
    #[value(name = "blake3")]
    Blake3,
    /// SHA-256 - Standard cryptographic hash
    #[default]
    #[value(name = "sha256")]
    Sha256,
}

impl HashAlgorithm {
    /// Get the output size in bytes
    pub fn output_size(&self) -> usize {
        match self {
            Self::XXHash3 => 16,
            Self::XXHash64 => 8,
            Self::Blake3 => 32,
            Self::Sha256 => 32,
        }
    }

    /// Whether the digest is a 256-bit cryptographic hash
    pub fn is_cryptographic(&self) -> bool {
        matches!(self, Self::Blake3 | Self::Sha256)
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::XXHash3 => "XXHash3",
            Self::XXHash64 => "XXHash64",
            Self::Blake3 => "BLAKE3",
            Self::Sha256 => "SHA-256",
        }
    }
}

/// Run configuration for the sync engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Source root
    pub source: PathBuf,
    /// Destination root
    pub destination: PathBuf,
    /// Mirror the source root itself, not just its children
    pub include_root: bool,
    /// Selected strategies, combined with OR
    pub strategies: Vec<StrategyKind>,
    /// Digest used by the hash strategy
    pub hash_algorithm: HashAlgorithm,
    /// Worker count, the orchestrating thread included
    pub workers: usize,
    /// Bytes per transfer chunk
    pub chunk_size: usize,
    /// Capacity of the pool queue before the submitter runs work itself
    pub queue_capacity: usize,
    /// Seconds granted to outstanding work when a run aborts
    pub abort_grace_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            destination: PathBuf::new(),
            include_root: false,
            strategies: Vec::new(),
            hash_algorithm: HashAlgorithm::Sha256,
            workers: default_workers(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            abort_grace_secs: DEFAULT_ABORT_GRACE_SECS,
        }
    }
}

/// Default worker count: two, or fewer on single-core machines
pub fn default_workers() -> usize {
    num_cpus::get().clamp(1, 2)
}

impl SyncConfig {
    /// Grace period as a duration
    pub fn abort_grace(&self) -> Duration {
        Duration::from_secs(self.abort_grace_secs)
    }

    /// Check the configuration before a run starts
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(SyncError::config("worker count must be at least 1"));
        }
        if self.chunk_size == 0 {
            return Err(SyncError::config("chunk size must be greater than zero"));
        }
        if self.queue_capacity == 0 {
            return Err(SyncError::config("queue capacity must be greater than zero"));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(SyncError::config("destination path required"));
        }
        if !self.source.exists() {
            return Err(SyncError::NotFound(self.source.clone()));
        }
        if self.strategies.contains(&StrategyKind::Hash) && !self.hash_algorithm.is_cryptographic() {
            return Err(SyncError::UnsupportedHashAlgorithm(format!(
                "{} is not a 256-bit cryptographic digest",
                self.hash_algorithm.name()
            )));
        }
        Ok(())
    }

    /// Load a profile from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).with_path(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Save this configuration as a JSON profile
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_path(path)?;
        Ok(())
    }

    /// Create config from CLI arguments, layered over an optional profile
    pub fn from_cli(args: &CliArgs) -> std::result::Result<Self, String> {
        let mut config = match &args.profile {
            Some(path) => Self::load(path).map_err(|e| format!("Invalid profile: {}", e))?,
            None => Self::default(),
        };

        if let Some(source) = &args.source {
            config.source = source.clone();
        }
        if let Some(destination) = &args.destination {
            config.destination = destination.clone();
        }
        if config.source.as_os_str().is_empty() {
            return Err("Source path required".to_string());
        }
        if config.destination.as_os_str().is_empty() {
            return Err("Destination path required".to_string());
        }

        config.include_root |= args.include_root;
        if !args.strategies.is_empty() {
            config.strategies = args.strategies.clone();
        }
        if let Some(algorithm) = args.hash_algorithm {
            config.hash_algorithm = algorithm;
        }
        if let Some(workers) = args.workers {
            config.workers = workers;
        }
        if let Some(chunk) = &args.chunk_size {
            config.chunk_size = parse_size(chunk).map_err(|e| format!("Invalid chunk size: {}", e))? as usize;
        }

        Ok(config)
    }
}

/// Parse human-readable size string to bytes
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let (num_str, multiplier) = if size.ends_with("TB") || size.ends_with('T') {
        (size.trim_end_matches(|c| c == 'T' || c == 'B'), 1024u64 * 1024 * 1024 * 1024)
    } else if size.ends_with("GB") || size.ends_with('G') {
        (size.trim_end_matches(|c| c == 'G' || c == 'B'), 1024u64 * 1024 * 1024)
    } else if size.ends_with("MB") || size.ends_with('M') {
        (size.trim_end_matches(|c| c == 'M' || c == 'B'), 1024u64 * 1024)
    } else if size.ends_with("KB") || size.ends_with('K') {
        (size.trim_end_matches(|c| c == 'K' || c == 'B'), 1024u64)
    } else if size.ends_with('B') {
        (size.trim_end_matches('B'), 1u64)
    } else {
        // Assume bytes if no suffix
        (size.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;

    Ok((num * multiplier as f64) as u64)
}
