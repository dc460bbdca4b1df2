//! Row-to-column batch building
//!
//! Workers append source rows to a [`BatchBuilder`] until it holds the
//! configured number of rows, then flush it into an Arrow `RecordBatch`.
//! Values are coerced into the column's logical type on append so drivers
//! with loose typing (SQLite affinity) still produce a fixed schema.

use crate::error::{SourceError, SourceResult};
use crate::source::{ColumnSpec, LogicalType, Row, Value};
use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

/// Average bytes reserved per variable-width value
const VALUE_BYTES_HINT: usize = 32;

/// Upper bound on rows preallocated per builder
const MAX_PREALLOCATED_ROWS: usize = 65_536;

enum ColumnBuilder {
    Int(Int64Builder),
    Float(Float64Builder),
    Text(StringBuilder),
    Bytes(BinaryBuilder),
    Bool(BooleanBuilder),
}

impl ColumnBuilder {
    fn new(logical_type: LogicalType, rows: usize) -> Self {
        match logical_type {
            LogicalType::Int64 => ColumnBuilder::Int(Int64Builder::with_capacity(rows)),
            LogicalType::Float64 => ColumnBuilder::Float(Float64Builder::with_capacity(rows)),
            LogicalType::Utf8 => {
                ColumnBuilder::Text(StringBuilder::with_capacity(rows, rows * VALUE_BYTES_HINT))
            }
            LogicalType::Binary => {
                ColumnBuilder::Bytes(BinaryBuilder::with_capacity(rows, rows * VALUE_BYTES_HINT))
            }
            LogicalType::Boolean => ColumnBuilder::Bool(BooleanBuilder::with_capacity(rows)),
        }
    }

    fn append(&mut self, value: Value) -> Result<(), String> {
        match (self, value) {
            (ColumnBuilder::Int(b), Value::Null) => b.append_null(),
            (ColumnBuilder::Float(b), Value::Null) => b.append_null(),
            (ColumnBuilder::Text(b), Value::Null) => b.append_null(),
            (ColumnBuilder::Bytes(b), Value::Null) => b.append_null(),
            (ColumnBuilder::Bool(b), Value::Null) => b.append_null(),

            (ColumnBuilder::Int(b), Value::Int(i)) => b.append_value(i),
            (ColumnBuilder::Int(b), Value::Float(f)) => match exact_int(f) {
                Some(i) => b.append_value(i),
                None => return Err(format!("{} is not an integer", f)),
            },
            (ColumnBuilder::Int(b), Value::Bool(v)) => b.append_value(v as i64),
            (ColumnBuilder::Int(b), Value::Text(s)) => match s.trim().parse::<i64>() {
                Ok(i) => b.append_value(i),
                Err(_) => return Err(format!("'{}' is not an integer", s)),
            },

            (ColumnBuilder::Float(b), Value::Float(f)) => b.append_value(f),
            (ColumnBuilder::Float(b), Value::Int(i)) => b.append_value(i as f64),
            (ColumnBuilder::Float(b), Value::Text(s)) => match s.trim().parse::<f64>() {
                Ok(f) => b.append_value(f),
                Err(_) => return Err(format!("'{}' is not a number", s)),
            },

            (ColumnBuilder::Text(b), Value::Text(s)) => b.append_value(s),
            (ColumnBuilder::Text(b), Value::Int(i)) => b.append_value(i.to_string()),
            (ColumnBuilder::Text(b), Value::Float(f)) => b.append_value(f.to_string()),
            (ColumnBuilder::Text(b), Value::Bool(v)) => b.append_value(v.to_string()),
            (ColumnBuilder::Text(b), Value::Bytes(bytes)) => {
                b.append_value(String::from_utf8_lossy(&bytes))
            }

            (ColumnBuilder::Bytes(b), Value::Bytes(bytes)) => b.append_value(bytes),
            (ColumnBuilder::Bytes(b), Value::Text(s)) => b.append_value(s.as_bytes()),

            (ColumnBuilder::Bool(b), Value::Bool(v)) => b.append_value(v),
            (ColumnBuilder::Bool(b), Value::Int(i)) => b.append_value(i != 0),
            (ColumnBuilder::Bool(b), Value::Text(s)) => match s.trim() {
                "1" | "true" | "TRUE" | "t" | "T" => b.append_value(true),
                "0" | "false" | "FALSE" | "f" | "F" => b.append_value(false),
                _ => return Err(format!("'{}' is not a boolean", s)),
            },

            (_, other) => return Err(format!("cannot store {:?}", other)),
        }
        Ok(())
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Int(b) => Arc::new(b.finish()),
            ColumnBuilder::Float(b) => Arc::new(b.finish()),
            ColumnBuilder::Text(b) => Arc::new(b.finish()),
            ColumnBuilder::Bytes(b) => Arc::new(b.finish()),
            ColumnBuilder::Bool(b) => Arc::new(b.finish()),
        }
    }
}

/// `f` as an i64 when it is a whole number within range
fn exact_int(f: f64) -> Option<i64> {
    // 2^63, exactly representable
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f)).then_some(f as i64)
}

/// Accumulates rows into column builders for one `RecordBatch` at a time
pub struct BatchBuilder {
    schema: SchemaRef,
    names: Vec<String>,
    builders: Vec<ColumnBuilder>,
    rows: usize,
    target_rows: usize,
}

impl BatchBuilder {
    /// `schema` must be the schema built from `columns`
    pub fn new(schema: SchemaRef, columns: &[ColumnSpec], target_rows: usize) -> Self {
        let target_rows = target_rows.max(1);
        let prealloc = target_rows.min(MAX_PREALLOCATED_ROWS);
        Self {
            schema,
            names: columns.iter().map(|c| c.name.clone()).collect(),
            builders: columns
                .iter()
                .map(|c| ColumnBuilder::new(c.logical_type, prealloc))
                .collect(),
            rows: 0,
            target_rows,
        }
    }

    /// Append one row in column layout order
    pub fn push_row(&mut self, row: Row) -> SourceResult<()> {
        if row.len() != self.builders.len() {
            return Err(SourceError::Decode(format!(
                "row has {} values, expected {}",
                row.len(),
                self.builders.len()
            )));
        }

        for ((builder, value), name) in self.builders.iter_mut().zip(row).zip(&self.names) {
            builder
                .append(value)
                .map_err(|reason| SourceError::Decode(format!("column {}: {}", name, reason)))?;
        }
        self.rows += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Whether the batch reached its target size
    pub fn is_full(&self) -> bool {
        self.rows >= self.target_rows
    }

    /// Flush buffered rows into a batch and reset the builder
    pub fn finish(&mut self) -> SourceResult<RecordBatch> {
        let columns: Vec<ArrayRef> = self.builders.iter_mut().map(|b| b.finish()).collect();
        self.rows = 0;
        Ok(RecordBatch::try_new(Arc::clone(&self.schema), columns)?)
    }
}
