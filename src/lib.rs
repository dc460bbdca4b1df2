//! peregrine - Parallel Table-to-Parquet Extractor
//!
//! Reads one relational table with many concurrent range scans and writes it
//! as a single Parquet file.
//!
//! # Features
//!
//! - **Key-space Partitioning**: The integer key domain is split into equal
//!   key spans, one per worker, using only MIN/MAX/COUNT probes.
//!
//! - **Bounded Everything**: A fixed-size connection pool and one bounded
//!   prefetch queue per partition keep connections and memory in check.
//!
//! - **Atomic Output**: Per-partition segments are merged into a sibling
//!   file that is fsynced and renamed into place.
//!
//! - **Fail-fast**: The first failing partition aborts the whole job; the
//!   failing stage is reported and segments are kept for diagnosis.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Source database (SQLite / Firebird)              │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ WHERE key >= a AND key < b
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Worker Threads                              │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐         ┌─────────┐     │
//! │  │Worker 0 │  │Worker 1 │  │Worker 2 │  ...    │Worker N │     │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘     │
//! │       │ queue      │ queue      │ queue              │ queue    │
//! │  ┌────▼────┐  ┌────▼────┐  ┌────▼────┐         ┌────▼────┐     │
//! │  │Writer 0 │  │Writer 1 │  │Writer 2 │  ...    │Writer N │     │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘     │
//! └───────┼────────────┼────────────┼───────────────────┼──────────┘
//!         ▼            ▼            ▼                   ▼
//!    part_0.parquet part_1.parquet part_2.parquet   part_N.parquet
//!         └────────────┴──────┬─────┴───────────────────┘
//!                             ▼ merge, fsync, rename
//!                    ┌──────────────────┐
//!                    │ <table>.parquet  │
//!                    └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Extract a table with 16 workers
//! peregrine --database shop.db --table orders --out-dir ./export -p 16
//!
//! # Compressed output, explicit key
//! peregrine --database shop.db --table events --key-column event_id \
//!     --out-dir ./export --use-compression
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod parquet;
pub mod plan;
pub mod progress;
pub mod source;

pub use config::{CliArgs, Driver, ExtractConfig};
pub use error::{ExtractError, Result};
pub use extract::{ExtractionCoordinator, ExtractionReport, JobFailure, JobState};
