//! Shared fixtures for integration tests
//!
//! Builds SQLite source databases in a temp directory and reads Parquet
//! output back.

#![allow(dead_code)]

use arrow::array::{Array, AsArray};
use arrow::datatypes::{Int64Type, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rusqlite::{params, Connection};
use std::fs::File;
use std::path::{Path, PathBuf};

/// `items(id INTEGER PRIMARY KEY, name TEXT, price REAL, payload BLOB)`
/// with ids `1..=rows`
pub fn items_db(dir: &Path, rows: i64) -> PathBuf {
    let ids: Vec<i64> = (1..=rows).collect();
    items_db_with_ids(dir, &ids)
}

/// Same layout as [`items_db`] with explicit ids
pub fn items_db_with_ids(dir: &Path, ids: &[i64]) -> PathBuf {
    let path = dir.join("source.db");
    let mut conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE items (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            price REAL,
            payload BLOB
        );",
    )
    .unwrap();

    let tx = conn.transaction().unwrap();
    {
        let mut stmt = tx
            .prepare("INSERT INTO items (id, name, price, payload) VALUES (?1, ?2, ?3, ?4)")
            .unwrap();
        for &id in ids {
            let price = if id % 10 == 0 { None } else { Some(id as f64 * 1.5) };
            stmt.execute(params![id, format!("item-{}", id), price, id.to_le_bytes().to_vec()])
                .unwrap();
        }
    }
    tx.commit().unwrap();
    path
}

/// Run arbitrary SQL against a fresh database file
pub fn custom_db(dir: &Path, sql: &str) -> PathBuf {
    let path = dir.join("source.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(sql).unwrap();
    path
}

/// All batches of a Parquet file with its schema
pub fn read_parquet(path: &Path) -> (SchemaRef, Vec<RecordBatch>) {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap()).unwrap();
    let schema = builder.schema().clone();
    let batches = builder
        .build()
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    (schema, batches)
}

/// Values of an Int64 column in file order; NULLs are skipped
pub fn int_column(path: &Path, column: &str) -> Vec<i64> {
    let (schema, batches) = read_parquet(path);
    let index = schema.index_of(column).unwrap();
    let mut values = Vec::new();
    for batch in &batches {
        let array = batch.column(index).as_primitive::<Int64Type>();
        for i in 0..array.len() {
            if array.is_valid(i) {
                values.push(array.value(i));
            }
        }
    }
    values
}

/// Total row count from the file footer
pub fn row_count(path: &Path) -> i64 {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap()).unwrap();
    builder.metadata().file_metadata().num_rows()
}

pub fn sorted(mut values: Vec<i64>) -> Vec<i64> {
    values.sort_unstable();
    values
}
