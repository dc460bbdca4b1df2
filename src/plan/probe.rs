//! Metadata prober
//!
//! Resolves the table, its column layout and a partitioning key using only
//! catalog lookups and MIN/MAX/COUNT aggregates. Key selection order:
//! an explicitly requested column, then the first column of an all-integer
//! primary key, then the driver's implicit row id, then none.

use crate::error::{SchemaError, SchemaResult};
use crate::plan::{KeyColumn, KeyDomain, TableSpec};
use crate::source::{SourceConnection, TableLayout};
use tracing::{debug, info};

/// Probe `table` and build its immutable spec
///
/// When the key has at most `parallelism` distinct values they are fetched
/// as well so the planner can emit one partition per key. For a unique key
/// that is only checked when the table holds at most `parallelism` rows.
pub fn probe_table(
    conn: &mut dyn SourceConnection,
    table: &str,
    key_override: Option<&str>,
    parallelism: usize,
) -> SchemaResult<TableSpec> {
    let layout = conn
        .describe_table(table)?
        .ok_or_else(|| SchemaError::TableNotFound {
            table: table.to_string(),
        })?;

    if layout.columns.is_empty() {
        return Err(SchemaError::NoColumns { table: layout.name });
    }

    let key_name = resolve_key(&layout, key_override)?;

    let (key, row_count) = match key_name {
        Some(name) => {
            let stats = conn.key_stats(&layout.name, &name)?;
            let domain = match (stats.min, stats.max) {
                (Some(min), Some(max)) => {
                    let distinct = if key_is_unique(&layout, &name) {
                        if stats.rows <= parallelism as u64 {
                            Some(conn.distinct_keys(&layout.name, &name, parallelism)?)
                        } else {
                            None
                        }
                    } else {
                        // Cardinality unknown; one extra key shows whether it exceeds P
                        let keys = conn.distinct_keys(&layout.name, &name, parallelism + 1)?;
                        (keys.len() <= parallelism).then_some(keys)
                    };
                    Some(KeyDomain { min, max, distinct })
                }
                _ => None,
            };
            (Some(KeyColumn { name, domain }), stats.rows)
        }
        None => (None, conn.row_count(&layout.name)?),
    };

    match key {
        Some(ref k) => info!(
            table = %layout.name,
            columns = layout.columns.len(),
            key = %k.name,
            min = ?k.domain.as_ref().map(|d| d.min),
            max = ?k.domain.as_ref().map(|d| d.max),
            rows = row_count,
            "Table probed"
        ),
        None => info!(
            table = %layout.name,
            columns = layout.columns.len(),
            rows = row_count,
            "Table probed; no integer key, extraction will not be partitioned"
        ),
    }

    Ok(TableSpec {
        name: layout.name,
        columns: layout.columns,
        key,
        row_count,
    })
}

/// Pick the partitioning key, returning its canonical name
fn resolve_key(layout: &TableLayout, key_override: Option<&str>) -> SchemaResult<Option<String>> {
    if let Some(requested) = key_override {
        if let Some(column) = layout.column(requested) {
            if !column.logical_type.is_integer() {
                return Err(SchemaError::KeyColumnNotInteger {
                    table: layout.name.clone(),
                    column: column.name.clone(),
                    found: column.logical_type.to_string(),
                });
            }
            return Ok(Some(column.name.clone()));
        }

        return match layout.implicit_key {
            Some(ref implicit) if implicit.eq_ignore_ascii_case(requested) => Ok(Some(implicit.clone())),
            _ => Err(SchemaError::KeyColumnNotFound {
                table: layout.name.clone(),
                column: requested.to_string(),
            }),
        };
    }

    let integer_pk = !layout.primary_key.is_empty()
        && layout.primary_key.iter().all(|pk| {
            layout
                .column(pk)
                .is_some_and(|c| c.logical_type.is_integer())
        });

    if integer_pk {
        return Ok(layout.primary_key.first().cloned());
    }

    if let Some(ref implicit) = layout.implicit_key {
        debug!(table = %layout.name, key = %implicit, "No integer primary key, using implicit row id");
        return Ok(Some(implicit.clone()));
    }

    Ok(None)
}

/// Whether `key` identifies rows: a single-column primary key or the row id
fn key_is_unique(layout: &TableLayout, key: &str) -> bool {
    layout.implicit_key.as_deref() == Some(key)
        || matches!(layout.primary_key.as_slice(), [pk] if pk == key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::MemoryConnector;
    use crate::source::{ColumnSpec, LogicalType, SourceConnector, Value};

    #[test]
    fn test_probe_picks_primary_key() {
        let connector = MemoryConnector::with_rows(1000);
        let mut conn = connector.connect().unwrap();

        let spec = probe_table(conn.as_mut(), "items", None, 4).unwrap();
        assert_eq!(spec.name, "ITEMS");
        assert_eq!(spec.row_count, 1000);
        let key = spec.key.unwrap();
        assert_eq!(key.name, "ID");
        assert_eq!(
            key.domain,
            Some(KeyDomain {
                min: 1,
                max: 1000,
                distinct: None
            })
        );
    }

    #[test]
    fn test_probe_tiny_table_fetches_distinct_keys() {
        let connector = MemoryConnector::with_rows(3);
        let mut conn = connector.connect().unwrap();

        let spec = probe_table(conn.as_mut(), "ITEMS", None, 8).unwrap();
        let domain = spec.key.unwrap().domain.unwrap();
        assert_eq!(domain.distinct, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_key_uniqueness() {
        let layout = TableLayout {
            name: "EVENTS".into(),
            columns: vec![
                ColumnSpec::new("ID", LogicalType::Int64),
                ColumnSpec::new("GRP", LogicalType::Int64),
            ],
            primary_key: vec!["ID".into()],
            implicit_key: Some("rowid".into()),
        };
        assert!(key_is_unique(&layout, "ID"));
        assert!(key_is_unique(&layout, "rowid"));
        assert!(!key_is_unique(&layout, "GRP"));

        let composite = TableLayout {
            primary_key: vec!["ID".into(), "GRP".into()],
            implicit_key: None,
            ..layout
        };
        assert!(!key_is_unique(&composite, "ID"));
    }

    #[test]
    fn test_probe_missing_table() {
        let connector = MemoryConnector::with_rows(3);
        let mut conn = connector.connect().unwrap();

        let err = probe_table(conn.as_mut(), "NOPE", None, 8).unwrap_err();
        assert!(matches!(err, SchemaError::TableNotFound { .. }));
    }

    #[test]
    fn test_probe_empty_table_has_no_domain() {
        let connector = MemoryConnector::with_rows(0);
        let mut conn = connector.connect().unwrap();

        let spec = probe_table(conn.as_mut(), "ITEMS", None, 8).unwrap();
        assert_eq!(spec.row_count, 0);
        assert!(spec.key.unwrap().domain.is_none());
    }

    #[test]
    fn test_probe_key_override() {
        let connector = MemoryConnector::with_rows(10);
        let mut conn = connector.connect().unwrap();

        let spec = probe_table(conn.as_mut(), "ITEMS", Some("id"), 2).unwrap();
        assert_eq!(spec.key_name(), Some("ID"));

        let err = probe_table(conn.as_mut(), "ITEMS", Some("NAME"), 2).unwrap_err();
        assert!(matches!(err, SchemaError::KeyColumnNotInteger { .. }));

        let err = probe_table(conn.as_mut(), "ITEMS", Some("MISSING"), 2).unwrap_err();
        assert!(matches!(err, SchemaError::KeyColumnNotFound { .. }));
    }

    #[test]
    fn test_probe_no_integer_key() {
        let connector = MemoryConnector::new(
            vec![ColumnSpec::new("CODE", LogicalType::Utf8)],
            vec![vec![Value::Text("a".into())], vec![Value::Text("b".into())]],
        );
        let mut conn = connector.connect().unwrap();

        let spec = probe_table(conn.as_mut(), "ITEMS", None, 4).unwrap();
        assert!(spec.key.is_none());
        assert_eq!(spec.row_count, 2);
    }

    #[test]
    fn test_probe_no_columns() {
        let connector = MemoryConnector::new(Vec::new(), Vec::new());
        let mut conn = connector.connect().unwrap();

        let err = probe_table(conn.as_mut(), "ITEMS", None, 4).unwrap_err();
        assert!(matches!(err, SchemaError::NoColumns { .. }));
    }
}
