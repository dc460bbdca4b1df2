//! Firebird source driver
//!
//! Uses the native client library loaded at runtime. Catalog lookups go
//! through the `RDB$` system tables; names are stored upper-case and padded,
//! so every catalog string is trimmed.

use crate::config::Secret;
use crate::error::{SourceError, SourceResult};
use crate::source::types::{ColumnSpec, KeyStats, LogicalType, Row, ScanRequest, TableLayout, Value};
use crate::source::{SourceConnection, SourceConnector};
use rsfbclient::{charset, Queryable, SimpleConnection, SqlType};
use std::collections::HashSet;
use std::ops::ControlFlow;
use tracing::debug;

/// Firebird field type codes from `RDB$FIELDS.RDB$FIELD_TYPE`
mod field_type {
    pub const SMALLINT: i16 = 7;
    pub const INTEGER: i16 = 8;
    pub const FLOAT: i16 = 10;
    pub const DATE: i16 = 12;
    pub const TIME: i16 = 13;
    pub const CHAR: i16 = 14;
    pub const BIGINT: i16 = 16;
    pub const BOOLEAN: i16 = 23;
    pub const DOUBLE: i16 = 27;
    pub const TIMESTAMP: i16 = 35;
    pub const VARCHAR: i16 = 37;
    pub const BLOB: i16 = 261;
}

/// Blob sub-type holding text
const BLOB_SUB_TYPE_TEXT: i16 = 1;

const COLUMNS_SQL: &str = "\
    SELECT rf.RDB$FIELD_NAME, f.RDB$FIELD_TYPE, f.RDB$FIELD_SUB_TYPE, f.RDB$FIELD_SCALE \
    FROM RDB$RELATION_FIELDS rf \
    JOIN RDB$FIELDS f ON f.RDB$FIELD_NAME = rf.RDB$FIELD_SOURCE \
    WHERE rf.RDB$RELATION_NAME = ? \
    ORDER BY rf.RDB$FIELD_POSITION";

const TEMPORAL_COLUMNS_SQL: &str = "\
    SELECT rf.RDB$FIELD_NAME \
    FROM RDB$RELATION_FIELDS rf \
    JOIN RDB$FIELDS f ON f.RDB$FIELD_NAME = rf.RDB$FIELD_SOURCE \
    WHERE rf.RDB$RELATION_NAME = ? AND f.RDB$FIELD_TYPE IN (12, 13, 35)";

const PRIMARY_KEY_SQL: &str = "\
    SELECT s.RDB$FIELD_NAME \
    FROM RDB$RELATION_CONSTRAINTS rc \
    JOIN RDB$INDEX_SEGMENTS s ON s.RDB$INDEX_NAME = rc.RDB$INDEX_NAME \
    WHERE rc.RDB$RELATION_NAME = ? AND rc.RDB$CONSTRAINT_TYPE = 'PRIMARY KEY' \
    ORDER BY s.RDB$FIELD_POSITION";

/// Opens connections to a Firebird database
pub struct FirebirdConnector {
    target: String,
    user: String,
    password: Secret,
}

impl FirebirdConnector {
    pub fn new(target: impl Into<String>, user: impl Into<String>, password: Secret) -> Self {
        Self {
            target: target.into(),
            user: user.into(),
            password,
        }
    }
}

impl SourceConnector for FirebirdConnector {
    fn target(&self) -> &str {
        &self.target
    }

    fn connect(&self) -> SourceResult<Box<dyn SourceConnection>> {
        let mut builder = rsfbclient::builder_native().with_dyn_link().with_remote();
        builder
            .db_name(&self.target)
            .user(&self.user)
            .pass(self.password.expose())
            .charset(charset::ISO_8859_1);

        let conn: SimpleConnection = builder
            .connect()
            .map_err(|e| SourceError::Connect {
                target: self.target.clone(),
                reason: e.to_string(),
            })?
            .into();

        debug!(database = %self.target, "Firebird connection opened");
        Ok(Box::new(FirebirdConnection { conn }))
    }
}

/// One Firebird connection
pub struct FirebirdConnection {
    conn: SimpleConnection,
}

impl FirebirdConnection {
    /// DATE / TIME / TIMESTAMP columns, selected as text
    fn temporal_columns(&mut self, table: &str) -> SourceResult<HashSet<String>> {
        let names: Vec<(String,)> = self.conn.query(TEMPORAL_COLUMNS_SQL, (table.to_uppercase(),))?;
        Ok(names.into_iter().map(|(n,)| n.trim().to_string()).collect())
    }
}

impl SourceConnection for FirebirdConnection {
    fn describe_table(&mut self, table: &str) -> SourceResult<Option<TableLayout>> {
        let name = table.to_uppercase();
        let fields: Vec<(String, i16, Option<i16>, Option<i16>)> =
            self.conn.query(COLUMNS_SQL, (name.clone(),))?;
        if fields.is_empty() {
            return Ok(None);
        }

        let columns = fields
            .into_iter()
            .map(|(field, fb_type, sub_type, scale)| {
                let (logical_type, is_blob) =
                    logical_type_for(fb_type, sub_type.unwrap_or(0), scale.unwrap_or(0));
                ColumnSpec {
                    name: field.trim().to_string(),
                    logical_type,
                    is_blob,
                }
            })
            .collect();

        let primary_key: Vec<(String,)> = self.conn.query(PRIMARY_KEY_SQL, (name.clone(),))?;

        Ok(Some(TableLayout {
            name,
            columns,
            primary_key: primary_key
                .into_iter()
                .map(|(c,)| c.trim().to_string())
                .collect(),
            implicit_key: None,
        }))
    }

    fn key_stats(&mut self, table: &str, key: &str) -> SourceResult<KeyStats> {
        let k = quote_ident(key);
        let sql = format!("SELECT MIN({k}), MAX({k}), COUNT(*) FROM {}", quote_ident(table));
        let stats: Vec<(Option<i64>, Option<i64>, i64)> = self.conn.query(&sql, ())?;
        let (min, max, rows) = stats.into_iter().next().unwrap_or((None, None, 0));

        Ok(KeyStats {
            min,
            max,
            rows: rows.max(0) as u64,
        })
    }

    fn distinct_keys(&mut self, table: &str, key: &str, limit: usize) -> SourceResult<Vec<i64>> {
        let k = quote_ident(key);
        let sql = format!(
            "SELECT DISTINCT {k} FROM {} WHERE {k} IS NOT NULL ORDER BY {k} ROWS {}",
            quote_ident(table),
            limit.max(1)
        );
        let keys: Vec<(i64,)> = self.conn.query(&sql, ())?;
        Ok(keys.into_iter().map(|(k,)| k).collect())
    }

    fn row_count(&mut self, table: &str) -> SourceResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let counts: Vec<(i64,)> = self.conn.query(&sql, ())?;
        Ok(counts.first().map(|c| c.0.max(0) as u64).unwrap_or(0))
    }

    fn scan(
        &mut self,
        request: &ScanRequest<'_>,
        sink: &mut dyn FnMut(Row) -> ControlFlow<()>,
    ) -> SourceResult<u64> {
        let temporal = self.temporal_columns(request.table)?;
        let sql = request.select_sql(quote_ident, |c| {
            if temporal.contains(&c.name) {
                format!("CAST({} AS VARCHAR(32))", quote_ident(&c.name))
            } else {
                quote_ident(&c.name)
            }
        });
        debug!(sql = %sql, "Starting scan");

        let width = request.columns.len();
        let mut count = 0u64;
        let rows = self.conn.query_iter(&sql, ())?;

        for row in rows {
            let row: rsfbclient::Row = row?;
            let mut values = Vec::with_capacity(width);
            for col in row.cols.into_iter().take(width) {
                values.push(convert_value(col.value));
            }
            count += 1;
            if sink(values).is_break() {
                break;
            }
        }

        Ok(count)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn logical_type_for(fb_type: i16, sub_type: i16, scale: i16) -> (LogicalType, bool) {
    use field_type::*;

    match fb_type {
        SMALLINT | INTEGER | BIGINT if scale < 0 => (LogicalType::Float64, false),
        SMALLINT | INTEGER | BIGINT => (LogicalType::Int64, false),
        FLOAT | DOUBLE => (LogicalType::Float64, false),
        BOOLEAN => (LogicalType::Boolean, false),
        CHAR | VARCHAR => (LogicalType::Utf8, false),
        BLOB if sub_type == BLOB_SUB_TYPE_TEXT => (LogicalType::Utf8, true),
        BLOB => (LogicalType::Binary, true),
        DATE | TIME | TIMESTAMP => (LogicalType::Utf8, false),
        _ => (LogicalType::Utf8, false),
    }
}

fn convert_value(value: SqlType) -> Value {
    match value {
        SqlType::Null => Value::Null,
        SqlType::Integer(i) => Value::Int(i),
        SqlType::Floating(f) => Value::Float(f),
        // CHAR columns come back blank-padded
        SqlType::Text(s) => {
            let trimmed = s.trim_end();
            if trimmed.len() == s.len() {
                Value::Text(s)
            } else {
                Value::Text(trimmed.to_string())
            }
        }
        SqlType::Binary(b) => Value::Bytes(b),
        SqlType::Boolean(b) => Value::Bool(b),
        #[allow(unreachable_patterns)]
        other => Value::Text(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mapping() {
        assert_eq!(logical_type_for(8, 0, 0), (LogicalType::Int64, false));
        assert_eq!(logical_type_for(16, 1, -2), (LogicalType::Float64, false));
        assert_eq!(logical_type_for(27, 0, 0), (LogicalType::Float64, false));
        assert_eq!(logical_type_for(23, 0, 0), (LogicalType::Boolean, false));
        assert_eq!(logical_type_for(261, 1, 0), (LogicalType::Utf8, true));
        assert_eq!(logical_type_for(261, 0, 0), (LogicalType::Binary, true));
        assert_eq!(logical_type_for(35, 0, 0), (LogicalType::Utf8, false));
    }

    #[test]
    fn test_char_padding_trimmed() {
        assert_eq!(
            convert_value(SqlType::Text("ABC   ".into())),
            Value::Text("ABC".into())
        );
        assert_eq!(convert_value(SqlType::Integer(7)), Value::Int(7));
    }
}
