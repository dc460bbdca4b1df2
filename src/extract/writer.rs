//! Segment writer
//!
//! One thread per partition. Drains the partition's prefetch queue into a
//! Parquet segment and fsyncs it once the queue is closed and empty. When
//! the job is aborted the writer stops where it is and leaves the partial
//! segment on disk for diagnosis.

use crate::error::{ExtractError, FormatError, WorkerError, WriteError};
use crate::extract::job::ProgressEvent;
use crate::extract::join_thread;
use crate::extract::queue::BatchReceiver;
use arrow::datatypes::SchemaRef;
use crossbeam_channel::{RecvTimeoutError, Sender};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace};

/// Buffer in front of each segment file
const WRITE_BUFFER_BYTES: usize = 8 * 1024 * 1024;

/// How often an idle writer re-checks the abort flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Settings shared by all segment writers
#[derive(Clone)]
pub struct WriterContext {
    pub schema: SchemaRef,
    pub properties: WriterProperties,
    pub abort: Arc<AtomicBool>,
    pub events: Sender<ProgressEvent>,
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Finished { rows: u64, bytes: u64 },
    Stopped,
}

/// A writer thread producing one segment
pub struct SegmentWriter {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl SegmentWriter {
    /// Spawn the writer for partition `id`, writing to `path`
    pub fn spawn(
        id: usize,
        path: PathBuf,
        ctx: WriterContext,
        queue: BatchReceiver,
    ) -> Result<Self, WorkerError> {
        let handle = thread::Builder::new()
            .name(format!("writer-{}", id))
            .spawn(move || writer_main(id, path, ctx, queue))
            .map_err(|e| WorkerError::SpawnFailed {
                role: "writer",
                id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Wait for the writer to finish
    pub fn join(mut self) -> Result<(), WorkerError> {
        match self.handle.take() {
            Some(handle) => join_thread("writer", self.id, handle),
            None => Ok(()),
        }
    }
}

fn writer_main(id: usize, path: PathBuf, ctx: WriterContext, queue: BatchReceiver) {
    match write_segment(id, &path, &ctx, &queue) {
        Ok(Outcome::Finished { rows, bytes }) => {
            debug!(partition = id, rows, bytes, segment = %path.display(), "Segment finalized");
            let _ = ctx.events.send(ProgressEvent::WriterFinished {
                partition: id,
                rows,
                bytes,
            });
        }
        Ok(Outcome::Stopped) => {
            debug!(partition = id, segment = %path.display(), "Writer stopped by abort, segment left in place");
            let _ = ctx.events.send(ProgressEvent::WriterStopped { partition: id });
        }
        Err(e) => {
            error!(partition = id, error = %e, "Segment write failed");
            ctx.abort.store(true, Ordering::SeqCst);
            let _ = ctx.events.send(ProgressEvent::WriterFailed {
                partition: id,
                error: ExtractError::Write(e),
            });
        }
    }
    // Dropping the receiver here unblocks a worker parked on a full queue
    drop(queue);
}

fn write_segment(
    id: usize,
    path: &Path,
    ctx: &WriterContext,
    queue: &BatchReceiver,
) -> Result<Outcome, WriteError> {
    let fail = |cause: FormatError| WriteError::new(id, path, cause);

    let file = File::create(path).map_err(|e| fail(e.into()))?;
    let buffered = BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);
    let mut writer = ArrowWriter::try_new(buffered, ctx.schema.clone(), Some(ctx.properties.clone()))
        .map_err(|e| fail(e.into()))?;

    let mut rows = 0u64;
    loop {
        if ctx.abort.load(Ordering::Relaxed) {
            return Ok(Outcome::Stopped);
        }

        match queue.recv_timeout(POLL_INTERVAL) {
            Ok(batch) => {
                writer.write(&batch.data).map_err(|e| fail(e.into()))?;
                let n = batch.num_rows();
                rows += n as u64;
                trace!(partition = id, seq = batch.seq, rows = n, "Batch written");
                let _ = ctx.events.send(ProgressEvent::BatchWritten {
                    partition: id,
                    rows: n,
                });
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // A failed worker sets abort before closing the queue
    if ctx.abort.load(Ordering::Relaxed) {
        return Ok(Outcome::Stopped);
    }

    let buffered = writer.into_inner().map_err(|e| fail(e.into()))?;
    let file = buffered
        .into_inner()
        .map_err(|e| fail(e.into_error().into()))?;
    file.sync_all().map_err(|e| fail(e.into()))?;
    let bytes = file.metadata().map_err(|e| fail(e.into()))?.len();

    Ok(Outcome::Finished { rows, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::queue::{prefetch_queue, RowBatch};
    use crate::parquet::{table_schema, writer_properties};
    use crate::source::{ColumnSpec, LogicalType};
    use arrow::array::Int64Array;
    use arrow::record_batch::RecordBatch;
    use crossbeam_channel::{unbounded, Receiver};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::tempdir;

    fn context() -> (WriterContext, Receiver<ProgressEvent>) {
        let (events, rx) = unbounded();
        let ctx = WriterContext {
            schema: table_schema(&[ColumnSpec::new("ID", LogicalType::Int64)]),
            properties: writer_properties(false, 3, None).unwrap(),
            abort: Arc::new(AtomicBool::new(false)),
            events,
        };
        (ctx, rx)
    }

    fn batch(ctx: &WriterContext, seq: u64, ids: Vec<i64>) -> RowBatch {
        RowBatch {
            partition_id: 0,
            seq,
            data: RecordBatch::try_new(ctx.schema.clone(), vec![Arc::new(Int64Array::from(ids))])
                .unwrap(),
        }
    }

    #[test]
    fn test_writer_finalizes_segment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t_part_0.parquet");
        let (ctx, events) = context();
        let (tx, rx) = prefetch_queue(0, 4);

        let writer = SegmentWriter::spawn(0, path.clone(), ctx.clone(), rx).unwrap();
        tx.send(batch(&ctx, 0, vec![1, 2, 3])).unwrap();
        tx.send(batch(&ctx, 1, vec![4])).unwrap();
        drop(tx);
        writer.join().unwrap();

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path).unwrap()).unwrap();
        assert_eq!(reader.metadata().file_metadata().num_rows(), 4);

        drop(ctx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::WriterFinished { rows: 4, .. })));
    }

    #[test]
    fn test_empty_queue_gives_empty_segment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t_part_0.parquet");
        let (ctx, _events) = context();
        let (tx, rx) = prefetch_queue(0, 4);
        drop(tx);

        SegmentWriter::spawn(0, path.clone(), ctx, rx)
            .unwrap()
            .join()
            .unwrap();

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path).unwrap()).unwrap();
        assert_eq!(reader.metadata().file_metadata().num_rows(), 0);
        assert_eq!(reader.schema().field(0).name(), "ID");
    }

    #[test]
    fn test_unwritable_segment_fails_and_aborts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t_part_0.parquet");
        std::fs::create_dir(&path).unwrap();
        let (ctx, events) = context();
        let (tx, rx) = prefetch_queue(0, 4);

        SegmentWriter::spawn(0, path, ctx.clone(), rx)
            .unwrap()
            .join()
            .unwrap();

        assert!(ctx.abort.load(Ordering::SeqCst));
        // Receiver dropped, so the producer sees the queue closed
        assert!(tx.send(batch(&ctx, 0, vec![1])).is_err());

        drop(ctx);
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::WriterFailed {
                partition: 0,
                error: ExtractError::Write(_)
            }
        )));
    }

    #[test]
    fn test_abort_leaves_partial_segment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t_part_0.parquet");
        let (ctx, events) = context();
        let (tx, rx) = prefetch_queue(0, 4);

        let writer = SegmentWriter::spawn(0, path.clone(), ctx.clone(), rx).unwrap();
        tx.send(batch(&ctx, 0, vec![1])).unwrap();
        ctx.abort.store(true, Ordering::SeqCst);
        drop(tx);
        writer.join().unwrap();

        assert!(path.exists());
        assert!(ParquetRecordBatchReaderBuilder::try_new(File::open(&path).unwrap()).is_err());

        drop(ctx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::WriterStopped { partition: 0 })));
    }
}
