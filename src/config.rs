//! Configuration types for peregrine
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Batch sizing derived from the probed table

use crate::error::ConfigError;
use clap::{Parser, ValueEnum};
use parquet::basic::ZstdLevel;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Maximum reasonable partition count
pub const MAX_PARALLELISM: usize = 1024;

/// Maximum pool size
pub const MAX_POOL_SIZE: usize = 4096;

/// Batch size limits
pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 10_000_000;

/// Prefetch queue limits, in batches
pub const DEFAULT_QUEUE_DEPTH: usize = 8;
const MIN_QUEUE_DEPTH: usize = 1;
const MAX_QUEUE_DEPTH: usize = 1024;

/// ZSTD level used when compression is on
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Smallest batch the automatic sizing will pick
const MIN_AUTO_BATCH_SIZE: usize = 100_000;

/// Identifiers are interpolated into SQL, so only plain names are accepted
static IDENTIFIER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]{0,62}$").expect("Invalid identifier regex")
});

/// Source database driver
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Driver {
    /// SQLite database file
    #[default]
    Sqlite,
    /// Firebird database (requires the `firebird` feature)
    Firebird,
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Driver::Sqlite => f.write_str("sqlite"),
            Driver::Firebird => f.write_str("firebird"),
        }
    }
}

/// Credential that never shows up in Debug output or logs
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Parallel table-to-Parquet extractor
#[derive(Parser, Debug, Clone)]
#[command(
    name = "peregrine",
    version,
    about = "Parallel relational table to Parquet extractor",
    long_about = "Extracts every row of a table into a single Parquet file.\n\n\
                  The table's integer key domain is split into contiguous ranges, each \
                  range is scanned by its own worker over a pooled connection, written to \
                  a temporary segment, and the segments are merged into the final file.",
    after_help = "EXAMPLES:\n    \
        peregrine --database data.db --table orders --out-dir ./out\n    \
        peregrine --database data.db --table orders --out-dir ./out --parallelism 16 --use-compression\n    \
        peregrine --driver firebird --database server:/data/erp.fdb --table ORDERS --out-dir ./out"
)]
pub struct CliArgs {
    /// Source connection target (SQLite file path, Firebird path/DSN)
    #[arg(long, value_name = "TARGET")]
    pub database: String,

    /// Destination directory for the merged Parquet file
    #[arg(long, value_name = "DIR")]
    pub out_dir: PathBuf,

    /// Table to extract
    #[arg(long, value_name = "NAME")]
    pub table: String,

    /// Number of partitions (one worker and one writer each)
    #[arg(short = 'p', long, default_value_t = default_parallelism(), value_name = "NUM")]
    pub parallelism: usize,

    /// Maximum concurrent source connections (default: parallelism x 2)
    #[arg(long, value_name = "NUM")]
    pub pool_size: Option<usize>,

    /// Source user
    #[arg(short = 'u', long, default_value = "SYSDBA", value_name = "USER")]
    pub user: String,

    /// Source password
    #[arg(
        long,
        default_value = "masterkey",
        env = "PEREGRINE_PASSWORD",
        hide_env_values = true,
        hide_default_value = true,
        value_name = "PASSWORD"
    )]
    pub password: String,

    /// Write ZSTD-compressed Parquet
    #[arg(long)]
    pub use_compression: bool,

    /// Source driver
    #[arg(long, value_enum, default_value_t = Driver::Sqlite)]
    pub driver: Driver,

    /// Force the partitioning key column (must be an integer column)
    #[arg(long, value_name = "COLUMN")]
    pub key_column: Option<String>,

    /// Rows per batch (default: sized from the table's row count)
    #[arg(short = 'b', long, value_name = "NUM")]
    pub batch_size: Option<usize>,

    /// Prefetch queue capacity in batches
    #[arg(long, default_value_t = DEFAULT_QUEUE_DEPTH, value_name = "NUM")]
    pub queue_depth: usize,

    /// ZSTD compression level (1-22), used with --use-compression
    #[arg(long, default_value_t = DEFAULT_COMPRESSION_LEVEL, value_name = "LEVEL")]
    pub compression_level: i32,

    /// Fail the job if a partition runs longer than this many seconds
    #[arg(long, value_name = "SECS")]
    pub partition_timeout: Option<u64>,

    /// Directory for temporary segments (default: <out-dir>/.<table>.segments)
    #[arg(long, value_name = "DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Write a JSON extraction report to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn default_parallelism() -> usize {
    // Scans are I/O bound on the source side
    num_cpus::get() * 2
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Source driver
    pub driver: Driver,

    /// Source connection target
    pub database: String,

    /// Source credentials
    pub user: String,
    pub password: Secret,

    /// Table to extract
    pub table: String,

    /// Forced partitioning key
    pub key_column: Option<String>,

    /// Destination directory
    pub out_dir: PathBuf,

    /// Explicit segment directory
    pub scratch_dir: Option<PathBuf>,

    /// Partition / worker count
    pub parallelism: usize,

    /// Explicit pool size
    pub pool_size: Option<usize>,

    /// Explicit rows per batch
    pub batch_size: Option<usize>,

    /// Prefetch queue capacity in batches
    pub queue_depth: usize,

    /// Compressed output
    pub use_compression: bool,
    pub compression_level: i32,

    /// Per-partition deadline
    pub partition_timeout: Option<Duration>,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,

    /// JSON report destination
    pub report_path: Option<PathBuf>,
}

impl ExtractConfig {
    /// Configuration with defaults for everything but the target
    pub fn new(database: impl Into<String>, table: impl Into<String>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            driver: Driver::Sqlite,
            database: database.into(),
            user: "SYSDBA".into(),
            password: Secret::new("masterkey"),
            table: table.into(),
            key_column: None,
            out_dir: out_dir.into(),
            scratch_dir: None,
            parallelism: default_parallelism(),
            pool_size: None,
            batch_size: None,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            use_compression: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            partition_timeout: None,
            show_progress: false,
            verbose: false,
            report_path: None,
        }
    }

    pub fn with_driver(mut self, driver: Driver) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = Secret::new(password);
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_compression(mut self, level: i32) -> Self {
        self.use_compression = true;
        self.compression_level = level;
        self
    }

    pub fn with_key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = Some(column.into());
        self
    }

    pub fn with_partition_timeout(mut self, timeout: Duration) -> Self {
        self.partition_timeout = Some(timeout);
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let config = Self {
            driver: args.driver,
            database: args.database,
            user: args.user,
            password: Secret::new(args.password),
            table: args.table,
            key_column: args.key_column,
            out_dir: args.out_dir,
            scratch_dir: args.scratch_dir,
            parallelism: args.parallelism,
            pool_size: args.pool_size,
            batch_size: args.batch_size,
            queue_depth: args.queue_depth,
            use_compression: args.use_compression,
            compression_level: args.compression_level,
            partition_timeout: args.partition_timeout.map(Duration::from_secs),
            show_progress: !args.quiet,
            verbose: args.verbose,
            report_path: args.report,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every setting; the pipeline assumes a validated config
    pub fn validate(&self) -> Result<(), ConfigError> {
        #[cfg(not(feature = "firebird"))]
        if self.driver == Driver::Firebird {
            return Err(ConfigError::UnsupportedDriver {
                driver: self.driver.to_string(),
                reason: "built without the `firebird` feature".into(),
            });
        }

        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(ConfigError::InvalidParallelism {
                count: self.parallelism,
                max: MAX_PARALLELISM,
            });
        }

        let pool_size = self.effective_pool_size();
        if pool_size == 0 || pool_size > MAX_POOL_SIZE {
            return Err(ConfigError::InvalidPoolSize {
                size: pool_size,
                max: MAX_POOL_SIZE,
            });
        }

        if let Some(size) = self.batch_size {
            if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&size) {
                return Err(ConfigError::InvalidBatchSize {
                    size,
                    min: MIN_BATCH_SIZE,
                    max: MAX_BATCH_SIZE,
                });
            }
        }

        if !(MIN_QUEUE_DEPTH..=MAX_QUEUE_DEPTH).contains(&self.queue_depth) {
            return Err(ConfigError::InvalidQueueDepth {
                depth: self.queue_depth,
                min: MIN_QUEUE_DEPTH,
                max: MAX_QUEUE_DEPTH,
            });
        }

        ZstdLevel::try_new(self.compression_level).map_err(|e| {
            ConfigError::InvalidCompressionLevel {
                level: self.compression_level,
                reason: e.to_string(),
            }
        })?;

        if matches!(self.partition_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::InvalidTimeout);
        }

        validate_identifier(&self.table)?;
        if let Some(ref key) = self.key_column {
            validate_identifier(key)?;
        }

        validate_out_dir(&self.out_dir)?;
        if let Some(ref scratch) = self.scratch_dir {
            validate_out_dir(scratch)?;
        }

        Ok(())
    }

    /// Pool capacity; twice the worker count unless set explicitly
    pub fn effective_pool_size(&self) -> usize {
        self.pool_size.unwrap_or(self.parallelism.saturating_mul(2))
    }

    /// Batch size for a probed table
    pub fn effective_batch_size(&self, row_count: u64, has_blob: bool) -> usize {
        self.batch_size
            .unwrap_or_else(|| auto_batch_size(row_count, has_blob))
    }

    /// File name of the merged artifact
    pub fn output_file_name(&self) -> String {
        format!("{}.parquet", self.table.to_lowercase())
    }

    /// Destination path of the merged artifact
    pub fn output_path(&self) -> PathBuf {
        self.out_dir.join(self.output_file_name())
    }

    /// Staging path the merger writes before the final rename
    pub fn partial_path(&self) -> PathBuf {
        self.out_dir.join(format!(".{}.partial", self.output_file_name()))
    }

    /// Directory holding the temporary segments
    pub fn scratch_path(&self) -> PathBuf {
        match self.scratch_dir {
            Some(ref dir) => dir.clone(),
            None => self
                .out_dir
                .join(format!(".{}.segments", self.table.to_lowercase())),
        }
    }

    /// Path of one partition's temporary segment
    pub fn segment_path(&self, partition_id: usize) -> PathBuf {
        self.scratch_path().join(format!(
            "{}_part_{}.parquet",
            self.table.to_lowercase(),
            partition_id
        ))
    }
}

/// Rows per batch scaled by table size; tables with blob columns get a third less
pub fn auto_batch_size(row_count: u64, has_blob: bool) -> usize {
    let base = if row_count < 200_000 {
        250_000
    } else if row_count < 10_000_000 {
        500_000
    } else if row_count < 50_000_000 {
        750_000
    } else {
        1_000_000
    };

    let batch = if has_blob { base * 2 / 3 } else { base };
    batch.max(MIN_AUTO_BATCH_SIZE)
}

fn validate_identifier(name: &str) -> Result<(), ConfigError> {
    if IDENTIFIER_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier {
            name: name.to_string(),
            reason: "expected letters, digits, '_' or '$', not starting with a digit".into(),
        })
    }
}

fn validate_out_dir(dir: &Path) -> Result<(), ConfigError> {
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ConfigError::InvalidOutputPath {
                path: dir.to_path_buf(),
                reason: "exists and is not a directory".into(),
            });
        }
        return Ok(());
    }

    if let Some(parent) = dir.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(ConfigError::InvalidOutputPath {
                path: dir.to_path_buf(),
                reason: format!("Parent directory '{}' does not exist", parent.display()),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn base_config(out: &Path) -> ExtractConfig {
        ExtractConfig::new("source.db", "ORDERS", out).with_parallelism(4)
    }

    #[test]
    fn test_defaults() {
        let dir = tempdir().unwrap();
        let config = base_config(dir.path());

        assert!(config.validate().is_ok());
        assert_eq!(config.effective_pool_size(), 8);
        assert_eq!(config.queue_depth, DEFAULT_QUEUE_DEPTH);
        assert!(!config.use_compression);
        assert_eq!(config.output_path(), dir.path().join("orders.parquet"));
        assert_eq!(config.partial_path(), dir.path().join(".orders.parquet.partial"));
        assert_eq!(
            config.segment_path(3),
            dir.path().join(".orders.segments").join("orders_part_3.parquet")
        );
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let dir = tempdir().unwrap();
        let config = base_config(dir.path()).with_parallelism(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParallelism { count: 0, .. })
        ));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let dir = tempdir().unwrap();

        let config = base_config(dir.path()).with_pool_size(0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPoolSize { .. })));

        let config = base_config(dir.path()).with_batch_size(0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBatchSize { .. })));

        let config = base_config(dir.path()).with_queue_depth(0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidQueueDepth { .. })));

        let config = base_config(dir.path()).with_compression(99);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCompressionLevel { level: 99, .. })
        ));

        let config = base_config(dir.path()).with_partition_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTimeout)));
    }

    #[test]
    fn test_identifier_validation() {
        let dir = tempdir().unwrap();

        let config = ExtractConfig::new("source.db", "orders; DROP TABLE x", dir.path());
        assert!(matches!(config.validate(), Err(ConfigError::InvalidIdentifier { .. })));

        let config = base_config(dir.path()).with_key_column("1id");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidIdentifier { .. })));

        let config = ExtractConfig::new("source.db", "RDB$LOG_2024", dir.path());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_out_dir_parent() {
        let dir = tempdir().unwrap();
        let config = base_config(&dir.path().join("missing").join("out"));
        assert!(matches!(config.validate(), Err(ConfigError::InvalidOutputPath { .. })));

        // Out dir itself may be missing; it is created at run time
        let config = base_config(&dir.path().join("out"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auto_batch_size() {
        assert_eq!(auto_batch_size(1_000, false), 250_000);
        assert_eq!(auto_batch_size(1_000_000, false), 500_000);
        assert_eq!(auto_batch_size(20_000_000, false), 750_000);
        assert_eq!(auto_batch_size(100_000_000, false), 1_000_000);
        assert_eq!(auto_batch_size(1_000, true), 166_666);
        assert_eq!(auto_batch_size(100_000_000, true), 666_666);
    }

    #[test]
    fn test_explicit_batch_size_wins() {
        let dir = tempdir().unwrap();
        let config = base_config(dir.path()).with_batch_size(64);
        assert_eq!(config.effective_batch_size(100_000_000, true), 64);
    }

    #[test]
    fn test_secret_redacted() {
        let config = ExtractConfig::new("db", "T", "/tmp").with_credentials("SYSDBA", "hunter2");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert_eq!(config.password.expose(), "hunter2");
    }

    #[test]
    fn test_cli_parsing() {
        let dir = tempdir().unwrap();
        let out = dir.path().to_str().unwrap();
        let args = CliArgs::try_parse_from([
            "peregrine",
            "--database",
            "source.db",
            "--table",
            "orders",
            "--out-dir",
            out,
            "--parallelism",
            "3",
            "--use-compression",
            "--partition-timeout",
            "30",
        ])
        .unwrap();

        let config = ExtractConfig::from_args(args).unwrap();
        assert_eq!(config.parallelism, 3);
        assert_eq!(config.effective_pool_size(), 6);
        assert!(config.use_compression);
        assert_eq!(config.compression_level, DEFAULT_COMPRESSION_LEVEL);
        assert_eq!(config.partition_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.driver, Driver::Sqlite);
        assert_eq!(config.user, "SYSDBA");
    }
}
