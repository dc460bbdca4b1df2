//! Segment merger
//!
//! Concatenates per-partition segment files into the destination artifact.
//!
//! ```text
//! scratch/<table>_part_0.parquet ─┐
//! scratch/<table>_part_1.parquet ─┼─► out/.<table>.parquet.partial ─fsync─► rename ─► out/<table>.parquet
//! scratch/<table>_part_N.parquet ─┘
//! ```
//!
//! Every segment's layout is checked before anything is written. The
//! destination path only ever sees a complete, synced file; a single
//! segment is promoted with a plain rename.

use crate::error::{ExtractError, FormatError, Result};
use crate::parquet::schema::{describe_layout, same_layout};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Rows per batch when streaming segments back in
const MERGE_READ_BATCH: usize = 65_536;

/// Where the merged file goes
pub struct MergeTarget<'a> {
    /// Final destination
    pub output: &'a Path,

    /// Sibling file written first and renamed into place
    pub partial: &'a Path,

    /// Layout every segment must match
    pub schema: SchemaRef,

    pub properties: WriterProperties,
}

/// Result of a successful merge
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub output_path: PathBuf,
    pub rows: u64,
    pub bytes: u64,
    pub segments: usize,
}

fn merge_io(path: &Path, cause: impl Into<FormatError>) -> ExtractError {
    ExtractError::MergeIo {
        path: path.to_path_buf(),
        cause: cause.into(),
    }
}

/// Merge `segments`, in order, into `target.output`
///
/// On failure the partial file is removed and the segments are left in
/// place. Segments are never deleted here; see [`remove_segments`].
pub fn merge_segments(segments: &[PathBuf], target: MergeTarget<'_>) -> Result<MergeOutcome> {
    let start = Instant::now();
    let rows = verify_segments(segments, &target.schema)?;

    let result = if segments.len() == 1 {
        promote_single(&segments[0], &target)
    } else {
        concatenate(segments, &target)
    };

    if let Err(e) = result {
        if target.partial.exists() {
            if let Err(rm) = fs::remove_file(target.partial) {
                warn!(path = %target.partial.display(), error = %rm, "Failed to remove partial output");
            }
        }
        return Err(e);
    }

    sync_parent(target.output);

    let bytes = fs::metadata(target.output)
        .map_err(|e| merge_io(target.output, e))?
        .len();

    info!(
        output = %target.output.display(),
        segments = segments.len(),
        rows,
        bytes,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Segments merged"
    );

    Ok(MergeOutcome {
        output_path: target.output.to_path_buf(),
        rows,
        bytes,
        segments: segments.len(),
    })
}

/// Check every segment's layout against `schema`; returns the total row count
fn verify_segments(segments: &[PathBuf], schema: &SchemaRef) -> Result<u64> {
    let mut rows = 0u64;
    for segment in segments {
        let file = File::open(segment).map_err(|e| merge_io(segment, e))?;
        let builder =
            ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| merge_io(segment, e))?;

        if !same_layout(schema, builder.schema()) {
            return Err(ExtractError::SchemaMismatch {
                segment: segment.clone(),
                expected: describe_layout(schema),
                found: describe_layout(builder.schema()),
            });
        }

        let segment_rows = builder.metadata().file_metadata().num_rows().max(0) as u64;
        debug!(segment = %segment.display(), rows = segment_rows, "Segment verified");
        rows += segment_rows;
    }
    Ok(rows)
}

fn promote_single(segment: &Path, target: &MergeTarget<'_>) -> Result<()> {
    match fs::rename(segment, target.output) {
        Ok(()) => {
            debug!(segment = %segment.display(), "Single segment promoted by rename");
            Ok(())
        }
        Err(e) => {
            // Scratch directory on another filesystem
            debug!(error = %e, "Rename failed, copying segment instead");
            fs::copy(segment, target.partial).map_err(|e| merge_io(target.partial, e))?;
            File::open(target.partial)
                .and_then(|f| f.sync_all())
                .map_err(|e| merge_io(target.partial, e))?;
            fs::rename(target.partial, target.output).map_err(|e| merge_io(target.output, e))
        }
    }
}

fn concatenate(segments: &[PathBuf], target: &MergeTarget<'_>) -> Result<()> {
    let partial = target.partial;
    let file = File::create(partial).map_err(|e| merge_io(partial, e))?;
    let mut writer = ArrowWriter::try_new(
        file,
        target.schema.clone(),
        Some(target.properties.clone()),
    )
    .map_err(|e| merge_io(partial, e))?;

    for segment in segments {
        let file = File::open(segment).map_err(|e| merge_io(segment, e))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .and_then(|b| b.with_batch_size(MERGE_READ_BATCH).build())
            .map_err(|e| merge_io(segment, e))?;

        for batch in reader {
            let batch = batch.map_err(|e| merge_io(segment, e))?;
            // Segment schemas may carry their own metadata
            let batch = RecordBatch::try_new(target.schema.clone(), batch.columns().to_vec())
                .map_err(|e| merge_io(segment, e))?;
            writer.write(&batch).map_err(|e| merge_io(partial, e))?;
        }
    }

    let file = writer.into_inner().map_err(|e| merge_io(partial, e))?;
    file.sync_all().map_err(|e| merge_io(partial, e))?;
    drop(file);

    fs::rename(partial, target.output).map_err(|e| merge_io(target.output, e))
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(e) = File::open(parent).and_then(|d| d.sync_all()) {
            debug!(dir = %parent.display(), error = %e, "Failed to sync output directory");
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}

/// Delete merged segments, then `owned_dir` once it is empty
///
/// Pass `None` for a scratch directory the run did not create; it is left
/// in place. Failures are logged, not returned: the output is already in
/// place.
pub fn remove_segments(segments: &[PathBuf], owned_dir: Option<&Path>) -> usize {
    let mut removed = 0;
    for segment in segments {
        match fs::remove_file(segment) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(segment = %segment.display(), error = %e, "Failed to remove segment"),
        }
    }

    let Some(scratch_dir) = owned_dir else {
        return removed;
    };
    let empty = fs::read_dir(scratch_dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if empty {
        if let Err(e) = fs::remove_dir(scratch_dir) {
            warn!(dir = %scratch_dir.display(), error = %e, "Failed to remove scratch directory");
        }
    }

    removed
}
