//! Extraction coordinator - drives the job through its stages
//!
//! The coordinator is responsible for:
//! - Validating configuration and opening the connection pool
//! - Probing the table and planning partitions
//! - Spawning one worker and one writer per partition
//! - Folding progress events into the job, enforcing the partition deadline
//! - Joining every thread before the merge, then cleaning up

use crate::config::ExtractConfig;
use crate::error::{ExtractError, WriteError};
use crate::extract::job::{
    ExtractionJob, ExtractionReport, JobFailure, JobProgress, JobState, PartitionReport,
    ProgressEvent,
};
use crate::extract::queue::prefetch_queue;
use crate::extract::worker::{ExtractionWorker, WorkerContext};
use crate::extract::writer::{SegmentWriter, WriterContext};
use crate::parquet::{
    merge_segments, output_metadata, remove_segments, table_schema, writer_properties,
    MergeTarget,
};
use crate::plan::{plan_partitions, probe_table, Partition};
use crate::source::{connector_for, ConnectionPool, SourceConnector};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often the coordinator wakes up without events
const TICK: Duration = Duration::from_millis(100);

/// Progress callback type
pub type ProgressCallback = Box<dyn FnMut(&JobProgress) + Send>;

/// Runs one extraction job to completion
pub struct ExtractionCoordinator {
    config: Arc<ExtractConfig>,
    connector: Option<Arc<dyn SourceConnector>>,
    abort: Arc<AtomicBool>,
    progress: Option<ProgressCallback>,
}

/// Threads spawned for the Extracting stage
struct Pipeline {
    workers: Vec<ExtractionWorker>,
    writers: Vec<SegmentWriter>,
}

impl Pipeline {
    /// Join every thread; returns the first join failure
    fn join(self) -> Result<(), ExtractError> {
        let mut first = None;
        for worker in self.workers {
            let id = worker.id();
            if let Err(e) = worker.join() {
                warn!(partition = id, error = %e, "Worker failed to join cleanly");
                if first.is_none() {
                    first = Some(e);
                }
            }
        }
        for writer in self.writers {
            let id = writer.id();
            if let Err(e) = writer.join() {
                warn!(partition = id, error = %e, "Writer failed to join cleanly");
                if first.is_none() {
                    first = Some(e);
                }
            }
        }
        match first {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl ExtractionCoordinator {
    /// Coordinator for the driver selected in `config`
    pub fn new(config: ExtractConfig) -> Self {
        Self {
            config: Arc::new(config),
            connector: None,
            abort: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    /// Coordinator reading through an already built connector
    pub fn with_connector(config: ExtractConfig, connector: Arc<dyn SourceConnector>) -> Self {
        Self {
            connector: Some(connector),
            ..Self::new(config)
        }
    }

    /// Get a clone of the abort flag
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Receive a progress snapshot on every coordinator tick
    pub fn on_progress(mut self, callback: impl FnMut(&JobProgress) + Send + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Run the job; `Err` carries the stage the job failed in
    pub fn run(mut self) -> Result<ExtractionReport, JobFailure> {
        let mut job = ExtractionJob::new();

        info!(
            database = %self.config.database,
            table = %self.config.table,
            driver = %self.config.driver,
            parallelism = self.config.parallelism,
            "Starting extraction"
        );

        match self.execute(&mut job) {
            Ok(report) => {
                job.transition(JobState::Done);
                Ok(report)
            }
            Err(error) => {
                let stage = job.state();
                job.transition(JobState::Failed);
                error!(stage = %stage, error = %error, "Extraction failed");
                if stage == JobState::Extracting || stage == JobState::Merging {
                    warn!(
                        scratch = %self.config.scratch_path().display(),
                        "Temporary segments left in place for diagnosis"
                    );
                }
                Err(JobFailure { stage, error })
            }
        }
    }

    fn execute(&mut self, job: &mut ExtractionJob) -> Result<ExtractionReport, ExtractError> {
        let config = Arc::clone(&self.config);
        config.validate()?;

        let connector = match self.connector.take() {
            Some(c) => c,
            None => connector_for(&config)?,
        };
        let pool = ConnectionPool::new(connector, config.effective_pool_size());

        job.transition(JobState::Probing);
        let spec = {
            let mut conn = pool.acquire()?;
            probe_table(
                &mut *conn,
                &config.table,
                config.key_column.as_deref(),
                config.parallelism,
            )?
        };
        let spec = Arc::new(spec);

        job.transition(JobState::Planning);
        let partitions = plan_partitions(&spec, config.parallelism);
        let batch_size = config.effective_batch_size(spec.row_count, spec.has_blob());
        info!(
            partitions = partitions.len(),
            batch_size,
            pool_size = pool.capacity(),
            queue_depth = config.queue_depth,
            "Extraction planned"
        );
        job.set_partitions(&partitions);
        let owns_scratch = prepare_dirs(&config)?;

        job.transition(JobState::Extracting);
        if partitions.len() > 1 {
            warn!(
                partitions = partitions.len(),
                "Partitions are read concurrently without a shared snapshot; consistency is best-effort"
            );
        }

        let schema = table_schema(&spec.columns);
        let properties = writer_properties(
            config.use_compression,
            config.compression_level,
            Some(output_metadata(&spec.name)),
        )
        .map_err(|e| WriteError::new(0, config.output_path(), e))?;

        let (events, events_rx) = unbounded();
        let worker_ctx = WorkerContext {
            spec: Arc::clone(&spec),
            schema: schema.clone(),
            pool: Arc::clone(&pool),
            batch_size,
            deadline: config.partition_timeout,
            abort: Arc::clone(&self.abort),
            events: events.clone(),
        };
        let writer_ctx = WriterContext {
            schema: schema.clone(),
            properties: properties.clone(),
            abort: Arc::clone(&self.abort),
            events,
        };

        let mut pipeline = Pipeline {
            workers: Vec::with_capacity(partitions.len()),
            writers: Vec::with_capacity(partitions.len()),
        };
        let spawned = spawn_partitions(&config, &partitions, worker_ctx, writer_ctx, job, &mut pipeline);
        if let Err(e) = spawned {
            self.abort.store(true, Ordering::SeqCst);
            let _ = pipeline.join();
            return Err(e);
        }
        info!(count = partitions.len(), "Workers and writers spawned");

        if let Some(e) = self.supervise(job, &events_rx) {
            if matches!(e, ExtractError::PartitionTimeout { .. }) {
                // A stuck scan may never return; do not wait on it
                return Err(e);
            }
            let _ = pipeline.join();
            return Err(e);
        }
        pipeline.join()?;

        // An external abort stops threads without a failure event
        let finished = job.finished_count();
        if finished < partitions.len() {
            warn!(finished, total = partitions.len(), "Partitions did not all finish");
            return Err(ExtractError::Aborted {
                finished,
                total: partitions.len(),
            });
        }

        let pool_stats = pool.stats();
        drop(pool);

        job.transition(JobState::Merging);
        let segments: Vec<PathBuf> = partitions
            .iter()
            .map(|p| config.segment_path(p.id))
            .collect();
        let output = config.output_path();
        let partial = config.partial_path();
        let outcome = merge_segments(
            &segments,
            MergeTarget {
                output: &output,
                partial: &partial,
                schema,
                properties,
            },
        )?;

        let written: u64 = job.partitions().iter().map(|p| p.rows_written).sum();
        if written != outcome.rows {
            warn!(written, merged = outcome.rows, "Merged row count differs from rows written");
        }

        job.transition(JobState::Cleanup);
        let scratch = config.scratch_path();
        let removed = remove_segments(&segments, owns_scratch.then_some(scratch.as_path()));
        debug!(removed, "Temporary segments removed");

        let duration = job.elapsed();
        let secs = duration.as_secs_f64();
        let report = ExtractionReport {
            table: spec.name.clone(),
            key_column: spec.key_name().map(str::to_string),
            output_path: outcome.output_path,
            rows: outcome.rows,
            bytes: outcome.bytes,
            partitions: partition_reports(job),
            duration_secs: secs,
            rows_per_second: if secs > 0.0 { outcome.rows as f64 / secs } else { 0.0 },
            compression: config.use_compression,
            consistency: "best-effort",
            connections_opened: pool_stats.created,
            peak_connections: pool_stats.peak_in_use,
            backpressure_events: job.backpressure_events(),
        };

        info!(
            rows = report.rows,
            bytes = report.bytes,
            output = %report.output_path.display(),
            duration_ms = duration.as_millis() as u64,
            "Extraction complete"
        );
        Ok(report)
    }

    /// Fold events until every thread has hung up; returns the first failure
    fn supervise(
        &mut self,
        job: &mut ExtractionJob,
        events: &Receiver<ProgressEvent>,
    ) -> Option<ExtractError> {
        let deadline = self.config.partition_timeout;
        let mut failure: Option<ExtractError> = None;
        let mut last_report = Instant::now();

        loop {
            match events.recv_timeout(TICK) {
                Ok(event) => {
                    if let Some(e) = job.apply(event) {
                        if failure.is_none() {
                            self.abort.store(true, Ordering::SeqCst);
                            failure = Some(e);
                        } else {
                            debug!(error = %e, "Further partition failure after abort");
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if failure.is_none() {
                if let Some(limit) = deadline {
                    if let Some(id) = job.overdue(limit) {
                        self.abort.store(true, Ordering::SeqCst);
                        warn!(partition = id, deadline_secs = limit.as_secs(), "Partition exceeded its deadline");
                        return Some(ExtractError::PartitionTimeout {
                            partition_id: id,
                            deadline: limit,
                        });
                    }
                }
            }

            if last_report.elapsed() >= TICK {
                if let Some(ref mut callback) = self.progress {
                    callback(&job.snapshot());
                }
                last_report = Instant::now();
            }
        }

        if let Some(ref mut callback) = self.progress {
            callback(&job.snapshot());
        }
        failure
    }
}

/// Create the output and scratch directories
///
/// Returns whether the scratch directory belongs to the run: the default
/// one always does, a `--scratch-dir` only when this run created it.
fn prepare_dirs(config: &ExtractConfig) -> Result<bool, ExtractError> {
    fs::create_dir_all(&config.out_dir)?;

    let scratch = config.scratch_path();
    let owned = config.scratch_dir.is_none() || !scratch.exists();
    fs::create_dir_all(&scratch)?;
    let stale = fs::read_dir(&scratch)?.count();
    if stale > 0 {
        warn!(
            scratch = %scratch.display(),
            entries = stale,
            "Scratch directory is not empty; segments from an earlier run will be overwritten"
        );
    }
    Ok(owned)
}

fn spawn_partitions(
    config: &ExtractConfig,
    partitions: &[Partition],
    worker_ctx: WorkerContext,
    writer_ctx: WriterContext,
    job: &mut ExtractionJob,
    pipeline: &mut Pipeline,
) -> Result<(), ExtractError> {
    for partition in partitions {
        let (tx, rx) = prefetch_queue(partition.id, config.queue_depth);
        job.attach_queue(tx.stats());

        pipeline.writers.push(SegmentWriter::spawn(
            partition.id,
            config.segment_path(partition.id),
            writer_ctx.clone(),
            rx,
        )?);
        pipeline
            .workers
            .push(ExtractionWorker::spawn(*partition, worker_ctx.clone(), tx)?);
    }
    Ok(())
}

fn partition_reports(job: &ExtractionJob) -> Vec<PartitionReport> {
    job.partitions()
        .iter()
        .map(|p| PartitionReport {
            id: p.partition.id,
            range: p.partition.range.to_string(),
            rows: p.rows_written,
            segment_bytes: p.segment_bytes,
        })
        .collect()
}
