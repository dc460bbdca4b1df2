//! Table probing and partition planning
//!
//! The prober turns a table name into an immutable [`TableSpec`] using only
//! catalog and aggregate queries. The planner splits the spec's key domain
//! into contiguous [`Partition`]s, one per worker.

pub mod partition;
pub mod probe;

use crate::source::{ColumnSpec, ScanRange, ScanRequest};

pub use partition::plan_partitions;
pub use probe::probe_table;

/// Bounds of a non-empty integer key domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDomain {
    pub min: i64,
    pub max: i64,

    /// Every distinct key, ascending; only fetched for tiny tables
    pub distinct: Option<Vec<i64>>,
}

impl KeyDomain {
    /// Number of integer values in `[min, max]`
    pub fn span(&self) -> u128 {
        (self.max as i128 - self.min as i128 + 1) as u128
    }
}

/// The integer column partitions are cut on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumn {
    pub name: String,

    /// `None` when the table is empty or every key is NULL
    pub domain: Option<KeyDomain>,
}

/// Everything the pipeline needs to know about the source table
#[derive(Debug, Clone)]
pub struct TableSpec {
    /// Table name as stored in the source catalog
    pub name: String,

    /// Output column layout
    pub columns: Vec<ColumnSpec>,

    /// Partitioning key; `None` falls back to a single full scan
    pub key: Option<KeyColumn>,

    /// Row count estimate taken at probe time
    pub row_count: u64,
}

impl TableSpec {
    /// Whether any column is stored as a blob
    pub fn has_blob(&self) -> bool {
        self.columns.iter().any(|c| c.is_blob)
    }

    pub fn key_name(&self) -> Option<&str> {
        self.key.as_ref().map(|k| k.name.as_str())
    }

    /// Scan request for one partition of this table
    pub fn scan_request(&self, partition: &Partition) -> ScanRequest<'_> {
        ScanRequest {
            table: &self.name,
            columns: &self.columns,
            key: match partition.range {
                ScanRange::Full => None,
                ScanRange::Keys { .. } => self.key_name(),
            },
            range: partition.range,
        }
    }
}

/// A contiguous sub-range of the key domain, owned by one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub id: usize,
    pub range: ScanRange,
}

impl Partition {
    /// The whole table as one partition
    pub fn full(id: usize) -> Self {
        Self {
            id,
            range: ScanRange::Full,
        }
    }
}
