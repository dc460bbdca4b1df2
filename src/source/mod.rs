//! Source database access
//!
//! Drivers sit behind two traits: a [`SourceConnector`] that opens
//! connections, and a [`SourceConnection`] that answers catalog queries and
//! streams ranged scans. Workers never see a concrete driver.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  ConnectionPool                      │
//! │  - Bounded, lazily filled                           │
//! │  - RAII return on drop, discard on failure          │
//! └──────────────────────────┬──────────────────────────┘
//!                            │ connect()
//!                            ▼
//! ┌─────────────────────────────────────────────────────┐
//! │           SourceConnector / SourceConnection         │
//! │  sqlite (rusqlite, bundled)  │  firebird (rsfbclient)│
//! └─────────────────────────────────────────────────────┘
//! ```

#[cfg(feature = "firebird")]
pub mod firebird;
#[cfg(test)]
pub(crate) mod memory;
pub mod pool;
pub mod sqlite;
pub mod types;

use crate::config::{Driver, ExtractConfig};
use crate::error::SourceResult;
use std::ops::ControlFlow;
use std::sync::Arc;

pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use types::{ColumnSpec, KeyStats, LogicalType, Row, ScanRange, ScanRequest, TableLayout, Value};

/// Opens connections to one source database
pub trait SourceConnector: Send + Sync {
    /// Connection target for display and error messages
    fn target(&self) -> &str;

    /// Open a fresh connection
    fn connect(&self) -> SourceResult<Box<dyn SourceConnection>>;
}

/// One open connection to the source database
pub trait SourceConnection: Send {
    /// Column layout and key candidates; `None` when the table does not exist
    fn describe_table(&mut self, table: &str) -> SourceResult<Option<TableLayout>>;

    /// MIN/MAX of the key column plus the table's row count
    fn key_stats(&mut self, table: &str, key: &str) -> SourceResult<KeyStats>;

    /// Up to `limit` smallest distinct non-NULL key values, ascending
    fn distinct_keys(&mut self, table: &str, key: &str, limit: usize) -> SourceResult<Vec<i64>>;

    /// Row count of a table without a usable key
    fn row_count(&mut self, table: &str) -> SourceResult<u64>;

    /// Stream every row of the requested range to `sink`, in arrival order
    ///
    /// The scan stops early when `sink` returns `ControlFlow::Break`.
    /// Returns the number of rows handed to `sink`.
    fn scan(
        &mut self,
        request: &ScanRequest<'_>,
        sink: &mut dyn FnMut(Row) -> ControlFlow<()>,
    ) -> SourceResult<u64>;
}

/// Build the connector selected by the configuration
pub fn connector_for(config: &ExtractConfig) -> SourceResult<Arc<dyn SourceConnector>> {
    match config.driver {
        Driver::Sqlite => Ok(Arc::new(sqlite::SqliteConnector::new(&config.database))),
        #[cfg(feature = "firebird")]
        Driver::Firebird => Ok(Arc::new(firebird::FirebirdConnector::new(
            &config.database,
            &config.user,
            config.password.clone(),
        ))),
        #[cfg(not(feature = "firebird"))]
        Driver::Firebird => Err(crate::error::SourceError::Unsupported(
            "firebird driver requires the `firebird` feature".into(),
        )),
    }
}
