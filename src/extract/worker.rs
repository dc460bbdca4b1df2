//! Extraction worker
//!
//! One thread per partition. The worker borrows a pooled connection, runs an
//! unordered range scan and cuts the row stream into fixed-size batches
//! which it pushes onto the partition's prefetch queue.
//!
//! ```text
//! acquire ──► scan(range) ──► BatchBuilder ──full──► queue.send ──► writer
//!                 │                                      │
//!                 └── abort flag checked on every row ───┘ (blocks while full)
//! ```
//!
//! On success the connection goes back to the pool before the queue is
//! closed. A failed scan discards its connection instead.

use crate::error::{ExtractError, PoolError, SourceError, WorkerError};
use crate::extract::job::ProgressEvent;
use crate::extract::join_thread;
use crate::extract::queue::{BatchSender, RowBatch};
use crate::parquet::BatchBuilder;
use crate::plan::{Partition, TableSpec};
use crate::source::{ConnectionPool, Row};
use arrow::datatypes::SchemaRef;
use crossbeam_channel::Sender;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Everything a worker shares with its siblings
#[derive(Clone)]
pub struct WorkerContext {
    pub spec: Arc<TableSpec>,
    pub schema: SchemaRef,
    pub pool: Arc<ConnectionPool>,
    pub batch_size: usize,
    /// Optional bound on how long the partition may take
    pub deadline: Option<Duration>,
    pub abort: Arc<AtomicBool>,
    pub events: Sender<ProgressEvent>,
}

/// How a worker that did not fail ended
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Finished(u64),
    Stopped,
}

/// A worker thread extracting one partition
pub struct ExtractionWorker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl ExtractionWorker {
    /// Spawn the worker for `partition`, feeding `queue`
    pub fn spawn(
        partition: Partition,
        ctx: WorkerContext,
        queue: BatchSender,
    ) -> Result<Self, WorkerError> {
        let id = partition.id;
        let handle = thread::Builder::new()
            .name(format!("worker-{}", id))
            .spawn(move || worker_main(partition, ctx, queue))
            .map_err(|e| WorkerError::SpawnFailed {
                role: "worker",
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

    /// Wait for the worker to finish
    pub fn join(mut self) -> Result<(), WorkerError> {
        match self.handle.take() {
            Some(handle) => join_thread("worker", self.id, handle),
            None => Ok(()),
        }
    }
}

fn worker_main(partition: Partition, ctx: WorkerContext, queue: BatchSender) {
    let id = partition.id;
    let _ = ctx.events.send(ProgressEvent::WorkerStarted { partition: id });

    match extract_partition(partition, &ctx, &queue) {
        Ok(Outcome::Finished(rows)) => {
            drop(queue);
            let _ = ctx.events.send(ProgressEvent::WorkerFinished { partition: id, rows });
        }
        Ok(Outcome::Stopped) => {
            debug!(partition = id, "Worker stopped by abort");
            drop(queue);
            let _ = ctx.events.send(ProgressEvent::WorkerStopped { partition: id });
        }
        Err(e) => {
            error!(partition = id, error = %e, "Partition extraction failed");
            // Abort before closing the queue so the writer does not finalize
            ctx.abort.store(true, Ordering::SeqCst);
            let _ = ctx.events.send(ProgressEvent::WorkerFailed {
                partition: id,
                error: e,
            });
            drop(queue);
        }
    }
}

fn extract_partition(
    partition: Partition,
    ctx: &WorkerContext,
    queue: &BatchSender,
) -> Result<Outcome, ExtractError> {
    let id = partition.id;
    let start = Instant::now();

    let acquired = match ctx.deadline {
        Some(deadline) => ctx.pool.acquire_until(start + deadline),
        None => ctx.pool.acquire(),
    };
    let mut conn = acquired.map_err(|e| match e {
        PoolError::DeadlineExceeded { .. } => ExtractError::PartitionTimeout {
            partition_id: id,
            deadline: ctx.deadline.unwrap_or_default(),
        },
        PoolError::Connect(cause) => ExtractError::PartitionExtraction {
            partition_id: id,
            cause,
        },
    })?;

    if ctx.abort.load(Ordering::Relaxed) {
        return Ok(Outcome::Stopped);
    }

    debug!(partition = id, range = %partition.range, "Worker scanning");

    let request = ctx.spec.scan_request(&partition);
    let mut sink = BatchSink {
        partition_id: id,
        builder: BatchBuilder::new(ctx.schema.clone(), &ctx.spec.columns, ctx.batch_size),
        queue,
        events: &ctx.events,
        abort: &ctx.abort,
        seq: 0,
        rows: 0,
        halt: None,
    };

    let scanned = conn.scan(&request, &mut |row| sink.accept(row));

    let failed = |cause: SourceError| ExtractError::PartitionExtraction {
        partition_id: id,
        cause,
    };

    if let Err(cause) = scanned {
        conn.discard();
        return Err(failed(cause));
    }

    match sink.halt.take() {
        Some(Halt::Stopped) => return Ok(Outcome::Stopped),
        Some(Halt::Failed(cause)) => return Err(failed(cause)),
        None => {}
    }

    // Cursor is exhausted; hand the connection back before the last flush
    drop(conn);

    match sink.flush() {
        Ok(()) => {}
        Err(Halt::Stopped) => return Ok(Outcome::Stopped),
        Err(Halt::Failed(cause)) => return Err(failed(cause)),
    }

    debug!(
        partition = id,
        rows = sink.rows,
        batches = sink.seq,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Worker finished"
    );
    Ok(Outcome::Finished(sink.rows))
}

/// Why a scan was cut short
#[derive(Debug)]
enum Halt {
    /// Job aborted or the writer went away
    Stopped,
    /// A row could not be converted
    Failed(SourceError),
}

/// Scan callback state: batches rows and pushes full batches downstream
struct BatchSink<'a> {
    partition_id: usize,
    builder: BatchBuilder,
    queue: &'a BatchSender,
    events: &'a Sender<ProgressEvent>,
    abort: &'a AtomicBool,
    seq: u64,
    rows: u64,
    halt: Option<Halt>,
}

impl BatchSink<'_> {
    fn accept(&mut self, row: Row) -> ControlFlow<()> {
        if self.abort.load(Ordering::Relaxed) {
            self.halt = Some(Halt::Stopped);
            return ControlFlow::Break(());
        }

        if let Err(e) = self.builder.push_row(row) {
            self.halt = Some(Halt::Failed(e));
            return ControlFlow::Break(());
        }

        if self.builder.is_full() {
            if let Err(halt) = self.flush() {
                self.halt = Some(halt);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Push buffered rows as one batch; no-op when empty
    fn flush(&mut self) -> Result<(), Halt> {
        if self.builder.is_empty() {
            return Ok(());
        }

        let data = self.builder.finish().map_err(Halt::Failed)?;
        let rows = data.num_rows();
        let batch = RowBatch {
            partition_id: self.partition_id,
            seq: self.seq,
            data,
        };

        if self.queue.send(batch).is_err() {
            // Writer gone; it reports its own failure
            return Err(Halt::Stopped);
        }

        trace!(partition = self.partition_id, seq = self.seq, rows, "Batch queued");
        self.seq += 1;
        self.rows += rows as u64;
        let _ = self.events.send(ProgressEvent::BatchFetched {
            partition: self.partition_id,
            rows,
        });
        Ok(())
    }
}
