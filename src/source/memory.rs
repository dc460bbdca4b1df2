//! In-memory source used by unit tests

use crate::error::{SourceError, SourceResult};
use crate::source::types::{ColumnSpec, KeyStats, LogicalType, Row, ScanRange, ScanRequest, TableLayout, Value};
use crate::source::{SourceConnection, SourceConnector};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// One table held in memory, keyed on its first column
pub struct MemoryConnector {
    table: String,
    columns: Vec<ColumnSpec>,
    rows: Arc<Vec<Row>>,
    /// Scans whose range contains this key fail after delivering their rows
    fail_on_key: Option<i64>,
    /// Every scan sleeps this long before returning rows
    scan_delay: Option<Duration>,
    /// Number of upcoming connect() calls that fail
    connect_failures: AtomicUsize,
    opened: Arc<AtomicUsize>,
}

impl MemoryConnector {
    /// `ID INTEGER PRIMARY KEY, NAME VARCHAR` with ids `1..=rows`
    pub fn with_rows(rows: i64) -> Self {
        let data = (1..=rows)
            .map(|i| vec![Value::Int(i), Value::Text(format!("row-{}", i))])
            .collect();
        Self::new(
            vec![
                ColumnSpec::new("ID", LogicalType::Int64),
                ColumnSpec::new("NAME", LogicalType::Utf8),
            ],
            data,
        )
    }

    pub fn new(columns: Vec<ColumnSpec>, rows: Vec<Row>) -> Self {
        Self {
            table: "ITEMS".into(),
            columns,
            rows: Arc::new(rows),
            fail_on_key: None,
            scan_delay: None,
            connect_failures: AtomicUsize::new(0),
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_on_key(mut self, key: i64) -> Self {
        self.fail_on_key = Some(key);
        self
    }

    pub fn scan_delay(mut self, delay: Duration) -> Self {
        self.scan_delay = Some(delay);
        self
    }

    pub fn fail_connects(self, count: usize) -> Self {
        self.connect_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Connections opened so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl SourceConnector for MemoryConnector {
    fn target(&self) -> &str {
        "memory"
    }

    fn connect(&self) -> SourceResult<Box<dyn SourceConnection>> {
        let pending = self.connect_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.connect_failures.store(pending - 1, Ordering::SeqCst);
            return Err(SourceError::Connect {
                target: "memory".into(),
                reason: "refused".into(),
            });
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            table: self.table.clone(),
            columns: self.columns.clone(),
            rows: Arc::clone(&self.rows),
            fail_on_key: self.fail_on_key,
            scan_delay: self.scan_delay,
        }))
    }
}

struct MemoryConnection {
    table: String,
    columns: Vec<ColumnSpec>,
    rows: Arc<Vec<Row>>,
    fail_on_key: Option<i64>,
    scan_delay: Option<Duration>,
}

impl MemoryConnection {
    fn keys(&self) -> impl Iterator<Item = i64> + '_ {
        self.rows.iter().filter_map(|r| match r.first() {
            Some(Value::Int(k)) => Some(*k),
            _ => None,
        })
    }
}

fn in_range(range: ScanRange, key: &Value) -> bool {
    match (range, key) {
        (ScanRange::Full, _) => true,
        (ScanRange::Keys { end_inclusive, .. }, Value::Null) => end_inclusive,
        (
            ScanRange::Keys {
                start,
                end,
                end_inclusive,
            },
            Value::Int(k),
        ) => *k >= start && (*k < end || (end_inclusive && *k == end)),
        _ => false,
    }
}

impl SourceConnection for MemoryConnection {
    fn describe_table(&mut self, table: &str) -> SourceResult<Option<TableLayout>> {
        if !table.eq_ignore_ascii_case(&self.table) {
            return Ok(None);
        }
        Ok(Some(TableLayout {
            name: self.table.clone(),
            columns: self.columns.clone(),
            primary_key: self
                .columns
                .first()
                .map(|c| vec![c.name.clone()])
                .unwrap_or_default(),
            implicit_key: None,
        }))
    }

    fn key_stats(&mut self, _table: &str, _key: &str) -> SourceResult<KeyStats> {
        Ok(KeyStats {
            min: self.keys().min(),
            max: self.keys().max(),
            rows: self.rows.len() as u64,
        })
    }

    fn distinct_keys(&mut self, _table: &str, _key: &str, limit: usize) -> SourceResult<Vec<i64>> {
        let mut keys: Vec<i64> = self.keys().collect();
        keys.sort_unstable();
        keys.dedup();
        keys.truncate(limit);
        Ok(keys)
    }

    fn row_count(&mut self, _table: &str) -> SourceResult<u64> {
        Ok(self.rows.len() as u64)
    }

    fn scan(
        &mut self,
        request: &ScanRequest<'_>,
        sink: &mut dyn FnMut(Row) -> ControlFlow<()>,
    ) -> SourceResult<u64> {
        if let Some(delay) = self.scan_delay {
            thread::sleep(delay);
        }

        let mut count = 0;
        for row in self.rows.iter() {
            if !in_range(request.range, &row[0]) {
                continue;
            }
            count += 1;
            if sink(row.clone()).is_break() {
                return Ok(count);
            }
        }

        if let Some(bad) = self.fail_on_key {
            if in_range(request.range, &Value::Int(bad)) {
                return Err(SourceError::Query {
                    reason: format!("simulated read failure near key {}", bad),
                });
            }
        }

        Ok(count)
    }
}
