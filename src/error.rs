//! Error types for peregrine
//!
//! This module defines the error hierarchy for an extraction run:
//! - Source driver errors (connect, query, decode)
//! - Schema discovery errors raised by the prober
//! - Segment write and merge errors
//! - Configuration and worker thread errors
//!
//! Library code returns these typed errors. The binary wraps them in
//! `anyhow` for context and prints the full chain.

use crate::extract::JobState;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for an extraction job
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Table or key could not be resolved
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Source driver failure outside of a partition scan
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Connection pool failure outside of a partition scan
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// A partition scan failed
    #[error("Partition {partition_id} extraction failed: {cause}")]
    PartitionExtraction {
        partition_id: usize,
        #[source]
        cause: SourceError,
    },

    /// A segment writer failed
    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    /// Segments disagree on their schema
    #[error("Segment '{segment}' has schema {found}, expected {expected}")]
    SchemaMismatch {
        segment: PathBuf,
        expected: String,
        found: String,
    },

    /// The merged destination could not be written
    #[error("Failed to write merged output '{path}': {cause}")]
    MergeIo {
        path: PathBuf,
        #[source]
        cause: FormatError,
    },

    /// A partition did not reach a terminal state before its deadline
    #[error("Partition {partition_id} did not finish within {deadline:?}")]
    PartitionTimeout { partition_id: usize, deadline: Duration },

    /// The job was aborted before every partition finished
    #[error("Extraction aborted: {finished} of {total} partitions finished")]
    Aborted { finished: usize, total: usize },

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors outside of segment and merge files (scratch dir, report)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// The pipeline stage this error naturally belongs to
    pub fn stage(&self) -> JobState {
        match self {
            ExtractError::Config(_) => JobState::Init,
            ExtractError::Schema(_) | ExtractError::Source(_) => JobState::Probing,
            ExtractError::Pool(_)
            | ExtractError::PartitionExtraction { .. }
            | ExtractError::Write(_)
            | ExtractError::PartitionTimeout { .. }
            | ExtractError::Aborted { .. }
            | ExtractError::Worker(_) => JobState::Extracting,
            ExtractError::SchemaMismatch { .. } | ExtractError::MergeIo { .. } => {
                JobState::Merging
            }
            ExtractError::Io(_) => JobState::Cleanup,
        }
    }

    /// Partition that raised this error, if any
    pub fn partition_id(&self) -> Option<usize> {
        match self {
            ExtractError::PartitionExtraction { partition_id, .. }
            | ExtractError::PartitionTimeout { partition_id, .. } => Some(*partition_id),
            ExtractError::Write(e) => Some(e.partition_id),
            _ => None,
        }
    }
}

/// Source driver errors
#[derive(Error, Debug)]
pub enum SourceError {
    /// Could not open a connection
    #[error("Failed to connect to '{target}': {reason}")]
    Connect { target: String, reason: String },

    /// A query failed
    #[error("Query failed: {reason}")]
    Query { reason: String },

    /// A value or batch could not be decoded into the column layout
    #[error("Failed to decode row data: {0}")]
    Decode(String),

    /// The driver cannot serve this request
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Firebird error
    #[cfg(feature = "firebird")]
    #[error("Firebird error: {0}")]
    Firebird(#[from] rsfbclient::FbError),
}

impl From<arrow::error::ArrowError> for SourceError {
    fn from(e: arrow::error::ArrowError) -> Self {
        SourceError::Decode(e.to_string())
    }
}

/// Table and key discovery errors
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Table does not exist in the source
    #[error("Table '{table}' not found")]
    TableNotFound { table: String },

    /// Table exists but reports no columns
    #[error("Table '{table}' has no columns")]
    NoColumns { table: String },

    /// Requested key column does not exist
    #[error("Key column '{column}' not found in table '{table}'")]
    KeyColumnNotFound { table: String, column: String },

    /// Requested key column cannot be range-partitioned
    #[error("Key column '{column}' of table '{table}' has type {found}; only integer keys can be partitioned")]
    KeyColumnNotInteger {
        table: String,
        column: String,
        found: String,
    },

    /// Catalog query failed
    #[error("Catalog query failed: {0}")]
    Source(#[from] SourceError),
}

/// Connection pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    /// A fresh connection could not be opened
    #[error("Failed to open pooled connection: {0}")]
    Connect(#[from] SourceError),

    /// No connection became free before the deadline
    #[error("No connection available after waiting {waited:?}")]
    DeadlineExceeded { waited: Duration },
}

/// Columnar encoding / file errors shared by segment writers and the merger
#[derive(Error, Debug)]
pub enum FormatError {
    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet writer/reader error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A segment writer could not produce its segment
#[derive(Error, Debug)]
#[error("Failed to write segment '{path}' for partition {partition_id}: {cause}")]
pub struct WriteError {
    pub partition_id: usize,
    pub path: PathBuf,
    #[source]
    pub cause: FormatError,
}

impl WriteError {
    pub fn new(partition_id: usize, path: impl Into<PathBuf>, cause: impl Into<FormatError>) -> Self {
        Self {
            partition_id,
            path: path.into(),
            cause: cause.into(),
        }
    }
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid partition count
    #[error("Invalid parallelism {count}: must be between 1 and {max}")]
    InvalidParallelism { count: usize, max: usize },

    /// Invalid pool size
    #[error("Invalid pool size {size}: must be between 1 and {max}")]
    InvalidPoolSize { size: usize, max: usize },

    /// Invalid batch size
    #[error("Invalid batch size {size}: must be between {min} and {max}")]
    InvalidBatchSize { size: usize, min: usize, max: usize },

    /// Invalid queue depth
    #[error("Invalid queue depth {depth}: must be between {min} and {max}")]
    InvalidQueueDepth { depth: usize, min: usize, max: usize },

    /// Invalid compression level
    #[error("Invalid compression level {level}: {reason}")]
    InvalidCompressionLevel { level: i32, reason: String },

    /// Invalid partition deadline
    #[error("Invalid partition timeout: must be at least one second")]
    InvalidTimeout,

    /// Table or column name that cannot be used as an identifier
    #[error("Invalid identifier '{name}': {reason}")]
    InvalidIdentifier { name: String, reason: String },

    /// Output path error
    #[error("Invalid output path '{path}': {reason}")]
    InvalidOutputPath { path: PathBuf, reason: String },

    /// Driver not known or not compiled in
    #[error("Unsupported driver '{driver}': {reason}")]
    UnsupportedDriver { driver: String, reason: String },
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked
    #[error("{role} thread for partition {id} panicked: {message}")]
    Panicked {
        role: &'static str,
        id: usize,
        message: String,
    },

    /// Thread could not be spawned
    #[error("Failed to spawn {role} thread for partition {id}: {reason}")]
    SpawnFailed {
        role: &'static str,
        id: usize,
        reason: String,
    },
}

/// Result type alias for ExtractError
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Result type alias for SourceError
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Result type alias for SchemaError
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_stage() {
        let err = ExtractError::PartitionExtraction {
            partition_id: 2,
            cause: SourceError::Query {
                reason: "connection reset".into(),
            },
        };
        assert_eq!(err.stage(), JobState::Extracting);
        assert_eq!(err.partition_id(), Some(2));

        let err: ExtractError = SchemaError::TableNotFound {
            table: "ORDERS".into(),
        }
        .into();
        assert_eq!(err.stage(), JobState::Probing);
        assert_eq!(err.partition_id(), None);

        let err = ExtractError::MergeIo {
            path: PathBuf::from("/out/orders.parquet"),
            cause: std::io::Error::other("disk full").into(),
        };
        assert_eq!(err.stage(), JobState::Merging);
    }

    #[test]
    fn test_write_error_conversion() {
        let write = WriteError::new(
            1,
            "/tmp/orders_part_1.parquet",
            std::io::Error::other("no space left on device"),
        );
        let err: ExtractError = write.into();
        assert!(matches!(err, ExtractError::Write(_)));
        assert_eq!(err.partition_id(), Some(1));
        assert!(err.to_string().contains("orders_part_1.parquet"));
    }

    #[test]
    fn test_arrow_error_maps_to_decode() {
        let err: SourceError =
            arrow::error::ArrowError::InvalidArgumentError("bad column".into()).into();
        assert!(matches!(err, SourceError::Decode(_)));
    }
}
