//! SQLite source driver
//!
//! Opens the database file read-only. Column types follow SQLite's
//! declared-type affinity rules; tables without an integer primary key can
//! still be range-partitioned on their implicit `rowid`.

use crate::error::{SourceError, SourceResult};
use crate::source::types::{ColumnSpec, KeyStats, LogicalType, Row, ScanRequest, TableLayout, Value};
use crate::source::{SourceConnection, SourceConnector};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::debug;

/// How long a reader waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Implicit integer row identifier of rowid tables
const ROWID: &str = "rowid";

/// Opens read-only connections to a SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: String,
}

impl SqliteConnector {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl SourceConnector for SqliteConnector {
    fn target(&self) -> &str {
        &self.path
    }

    fn connect(&self) -> SourceResult<Box<dyn SourceConnection>> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;

        let conn = Connection::open_with_flags(&self.path, flags).map_err(|e| SourceError::Connect {
            target: self.path.clone(),
            reason: e.to_string(),
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        debug!(database = %self.path, "SQLite connection opened");
        Ok(Box::new(SqliteConnection { conn }))
    }
}

/// One read-only SQLite connection
pub struct SqliteConnection {
    conn: Connection,
}

impl SqliteConnection {
    /// Canonical name of a table or view, matched case-insensitively
    fn canonical_name(&self, table: &str) -> SourceResult<Option<String>> {
        let name = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master \
                 WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE",
                params![table],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(name)
    }

    fn has_rowid(&self, table: &str) -> bool {
        let sql = format!("SELECT {} FROM {} LIMIT 0", ROWID, quote_ident(table));
        self.conn.prepare(&sql).is_ok()
    }
}

impl SourceConnection for SqliteConnection {
    fn describe_table(&mut self, table: &str) -> SourceResult<Option<TableLayout>> {
        let Some(name) = self.canonical_name(table)? else {
            return Ok(None);
        };

        let sql = format!("PRAGMA table_info({})", quote_ident(&name));
        let mut stmt = self.conn.prepare(&sql)?;
        let fields = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut columns = Vec::with_capacity(fields.len());
        let mut primary_key = Vec::new();
        for (column, declared, pk_position) in fields {
            let (logical_type, is_blob) = logical_type_for(&declared);
            columns.push(ColumnSpec {
                name: column.clone(),
                logical_type,
                is_blob,
            });
            if pk_position > 0 {
                primary_key.push((pk_position, column));
            }
        }
        primary_key.sort_by_key(|(position, _)| *position);

        let implicit_key = self.has_rowid(&name).then(|| ROWID.to_string());

        Ok(Some(TableLayout {
            name,
            columns,
            primary_key: primary_key.into_iter().map(|(_, c)| c).collect(),
            implicit_key,
        }))
    }

    fn key_stats(&mut self, table: &str, key: &str) -> SourceResult<KeyStats> {
        let k = quote_ident(key);
        let sql = format!("SELECT MIN({k}), MAX({k}), COUNT(*) FROM {}", quote_ident(table));
        let (min, max, rows) = self.conn.query_row(&sql, [], |row| {
            Ok((
                row.get::<_, Option<i64>>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        Ok(KeyStats {
            min,
            max,
            rows: rows.max(0) as u64,
        })
    }

    fn distinct_keys(&mut self, table: &str, key: &str, limit: usize) -> SourceResult<Vec<i64>> {
        let k = quote_ident(key);
        let sql = format!(
            "SELECT DISTINCT {k} FROM {} WHERE {k} IS NOT NULL ORDER BY {k} LIMIT ?1",
            quote_ident(table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let keys = stmt
            .query_map(params![limit as i64], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn row_count(&mut self, table: &str) -> SourceResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let rows: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(rows.max(0) as u64)
    }

    fn scan(
        &mut self,
        request: &ScanRequest<'_>,
        sink: &mut dyn FnMut(Row) -> ControlFlow<()>,
    ) -> SourceResult<u64> {
        let sql = request.select_sql(quote_ident, |c| quote_ident(&c.name));
        debug!(sql = %sql, "Starting scan");

        let mut stmt = self.conn.prepare(&sql)?;
        let width = request.columns.len();
        let mut rows = stmt.query([])?;
        let mut count = 0u64;

        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(convert_value(row.get_ref(i)?));
            }
            count += 1;
            if sink(values).is_break() {
                break;
            }
        }

        Ok(count)
    }
}

/// Double-quote an identifier
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Map a declared column type using SQLite's affinity rules
fn logical_type_for(declared: &str) -> (LogicalType, bool) {
    let upper = declared.to_ascii_uppercase();
    if upper.contains("INT") {
        (LogicalType::Int64, false)
    } else if upper.contains("BOOL") {
        (LogicalType::Boolean, false)
    } else if upper.contains("CLOB") {
        (LogicalType::Utf8, true)
    } else if upper.contains("CHAR") || upper.contains("TEXT") {
        (LogicalType::Utf8, false)
    } else if upper.contains("BLOB") || upper.contains("BINARY") {
        (LogicalType::Binary, true)
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        (LogicalType::Float64, false)
    } else {
        (LogicalType::Utf8, false)
    }
}

fn convert_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}
