//! Row values, column layouts and scan requests
//!
//! These types are the driver-neutral vocabulary between source drivers,
//! the prober and the extraction workers.

use std::fmt;

/// Logical column type of the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    /// SMALLINT / INTEGER / BIGINT
    Int64,
    /// FLOAT / DOUBLE / scaled NUMERIC
    Float64,
    /// CHAR / VARCHAR / text blobs and anything without a better mapping
    Utf8,
    /// Binary blobs
    Binary,
    /// BOOLEAN
    Boolean,
}

impl LogicalType {
    pub fn is_integer(self) -> bool {
        matches!(self, LogicalType::Int64)
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogicalType::Int64 => "int64",
            LogicalType::Float64 => "float64",
            LogicalType::Utf8 => "utf8",
            LogicalType::Binary => "binary",
            LogicalType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// One column of a table as the output sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name as reported by the source
    pub name: String,

    /// Output type
    pub logical_type: LogicalType,

    /// Stored as a blob in the source (text or binary)
    pub is_blob: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            is_blob: false,
        }
    }

    pub fn blob(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            is_blob: true,
        }
    }
}

/// Catalog description of a table
#[derive(Debug, Clone)]
pub struct TableLayout {
    /// Canonical table name as stored in the catalog
    pub name: String,

    /// Columns in declaration order
    pub columns: Vec<ColumnSpec>,

    /// Primary key columns in key order (may be empty)
    pub primary_key: Vec<String>,

    /// Integer row identifier the driver can range-scan when there is no
    /// usable primary key (SQLite `rowid`)
    pub implicit_key: Option<String>,
}

impl TableLayout {
    /// Find a column by name, ignoring ASCII case
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Bounds and row count of a key column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyStats {
    /// MIN(key); `None` when the table is empty or every key is NULL
    pub min: Option<i64>,

    /// MAX(key)
    pub max: Option<i64>,

    /// COUNT(*) of the table
    pub rows: u64,
}

/// A single field value as read from the source
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Bool(bool),
}

/// One source row, in column layout order
pub type Row = Vec<Value>;

/// Key range a scan is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanRange {
    /// Every row of the table
    Full,

    /// `start <= key < end`, or `start <= key <= end` when `end_inclusive`.
    /// The inclusive (last) range also picks up rows whose key is NULL.
    Keys {
        start: i64,
        end: i64,
        end_inclusive: bool,
    },
}

impl fmt::Display for ScanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanRange::Full => f.write_str("full"),
            ScanRange::Keys {
                start,
                end,
                end_inclusive: false,
            } => write!(f, "[{}, {})", start, end),
            ScanRange::Keys {
                start,
                end,
                end_inclusive: true,
            } => write!(f, "[{}, {}]", start, end),
        }
    }
}

/// Everything a driver needs to stream one partition
#[derive(Debug, Clone)]
pub struct ScanRequest<'a> {
    pub table: &'a str,
    pub columns: &'a [ColumnSpec],
    pub key: Option<&'a str>,
    pub range: ScanRange,
}

impl ScanRequest<'_> {
    /// WHERE clause body for this request, with identifiers passed through `quote`
    ///
    /// Returns `None` for a full scan. Key bounds are integers and are
    /// rendered as literals.
    pub fn predicate(&self, quote: impl Fn(&str) -> String) -> Option<String> {
        let (key, start, end, end_inclusive) = match (self.key, self.range) {
            (
                Some(key),
                ScanRange::Keys {
                    start,
                    end,
                    end_inclusive,
                },
            ) => (quote(key), start, end, end_inclusive),
            _ => return None,
        };

        if end_inclusive {
            Some(format!(
                "({k} >= {start} AND {k} <= {end}) OR {k} IS NULL",
                k = key
            ))
        } else {
            Some(format!("{k} >= {start} AND {k} < {end}", k = key))
        }
    }

    /// SELECT statement for this request; no ORDER BY
    pub fn select_sql(&self, quote: impl Fn(&str) -> String, column_expr: impl Fn(&ColumnSpec) -> String) -> String {
        let columns = self
            .columns
            .iter()
            .map(column_expr)
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {} FROM {}", columns, quote(self.table));
        if let Some(predicate) = self.predicate(&quote) {
            sql.push_str(" WHERE ");
            sql.push_str(&predicate);
        }
        sql
    }
}
