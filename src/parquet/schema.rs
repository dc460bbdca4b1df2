//! Arrow schema and Parquet writer settings
//!
//! The column layout fixed at probe time is the single source of truth for
//! every batch, segment and the merged file. All fields are nullable since
//! source catalogs do not reliably report NOT NULL across drivers.

use crate::source::{ColumnSpec, LogicalType};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use parquet::basic::{Compression, ZstdLevel};
use parquet::errors::Result as ParquetResult;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::format::KeyValue;
use std::sync::Arc;

/// Rows per Parquet row group in segments and the merged file
pub const ROW_GROUP_SIZE: usize = 1_000_000;

/// Metadata keys stamped into the merged file footer
pub mod meta_keys {
    pub const TABLE: &str = "peregrine.table";
    pub const EXTRACTED_AT: &str = "peregrine.extracted_at";
    pub const CONSISTENCY: &str = "peregrine.consistency";
}

/// Arrow data type used for a logical column type
pub fn arrow_type(logical_type: LogicalType) -> DataType {
    match logical_type {
        LogicalType::Int64 => DataType::Int64,
        LogicalType::Float64 => DataType::Float64,
        LogicalType::Utf8 => DataType::Utf8,
        LogicalType::Binary => DataType::Binary,
        LogicalType::Boolean => DataType::Boolean,
    }
}

/// Build the Arrow schema for a column layout
pub fn table_schema(columns: &[ColumnSpec]) -> SchemaRef {
    Arc::new(Schema::new(
        columns
            .iter()
            .map(|c| Field::new(&c.name, arrow_type(c.logical_type), true))
            .collect::<Vec<_>>(),
    ))
}

/// Writer properties shared by segment writers and the merger
///
/// Dictionary encoding is off; compression is ZSTD at `level` when enabled,
/// otherwise pages are stored uncompressed.
pub fn writer_properties(
    use_compression: bool,
    level: i32,
    metadata: Option<Vec<KeyValue>>,
) -> ParquetResult<WriterProperties> {
    let compression = if use_compression {
        Compression::ZSTD(ZstdLevel::try_new(level)?)
    } else {
        Compression::UNCOMPRESSED
    };

    Ok(WriterProperties::builder()
        .set_compression(compression)
        .set_dictionary_enabled(false)
        .set_statistics_enabled(EnabledStatistics::Chunk)
        .set_max_row_group_size(ROW_GROUP_SIZE)
        .set_key_value_metadata(metadata)
        .build())
}

/// Footer metadata for the merged file
pub fn output_metadata(table: &str) -> Vec<KeyValue> {
    vec![
        KeyValue::new(meta_keys::TABLE.to_string(), table.to_string()),
        KeyValue::new(
            meta_keys::EXTRACTED_AT.to_string(),
            chrono::Utc::now().to_rfc3339(),
        ),
        KeyValue::new(meta_keys::CONSISTENCY.to_string(), "best-effort".to_string()),
    ]
}

/// Compare two schemas on field names and types only
///
/// Segment files may carry different footer metadata, which is ignored.
pub fn same_layout(a: &Schema, b: &Schema) -> bool {
    a.fields().len() == b.fields().len()
        && a.fields()
            .iter()
            .zip(b.fields().iter())
            .all(|(x, y)| x.name() == y.name() && x.data_type() == y.data_type())
}

/// Short `name:type, ...` rendering used in mismatch diagnostics
pub fn describe_layout(schema: &Schema) -> String {
    schema
        .fields()
        .iter()
        .map(|f| format!("{}:{}", f.name(), f.data_type()))
        .collect::<Vec<_>>()
        .join(", ")
}
