//! Run-wide job state
//!
//! [`ExtractionJob`] is owned by the coordinator thread and only changes
//! through [`ProgressEvent`]s sent by workers and writers, so no progress
//! counter is shared between threads.

use crate::error::ExtractError;
use crate::extract::queue::QueueStats;
use crate::plan::Partition;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Init,
    Probing,
    Planning,
    Extracting,
    Merging,
    Cleanup,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Init => "init",
            JobState::Probing => "probing",
            JobState::Planning => "planning",
            JobState::Extracting => "extracting",
            JobState::Merging => "merging",
            JobState::Cleanup => "cleanup",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Status of one partition's worker/writer pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStatus {
    Pending,
    Extracting,
    Finished,
    Failed,
    Cancelled,
}

impl PartitionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PartitionStatus::Finished | PartitionStatus::Failed | PartitionStatus::Cancelled
        )
    }
}

/// Messages from worker and writer threads to the coordinator
#[derive(Debug)]
pub enum ProgressEvent {
    WorkerStarted { partition: usize },
    BatchFetched { partition: usize, rows: usize },
    WorkerFinished { partition: usize, rows: u64 },
    /// Worker saw the abort flag and stopped early
    WorkerStopped { partition: usize },
    WorkerFailed { partition: usize, error: ExtractError },
    BatchWritten { partition: usize, rows: usize },
    WriterFinished { partition: usize, rows: u64, bytes: u64 },
    /// Writer saw the abort flag and left its segment behind
    WriterStopped { partition: usize },
    WriterFailed { partition: usize, error: ExtractError },
}

impl ProgressEvent {
    pub fn partition(&self) -> usize {
        match *self {
            ProgressEvent::WorkerStarted { partition }
            | ProgressEvent::BatchFetched { partition, .. }
            | ProgressEvent::WorkerFinished { partition, .. }
            | ProgressEvent::WorkerStopped { partition }
            | ProgressEvent::WorkerFailed { partition, .. }
            | ProgressEvent::BatchWritten { partition, .. }
            | ProgressEvent::WriterFinished { partition, .. }
            | ProgressEvent::WriterStopped { partition }
            | ProgressEvent::WriterFailed { partition, .. } => partition,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Running,
    Finished,
    Stopped,
    Failed,
}

/// Progress of one partition
#[derive(Debug, Clone)]
pub struct PartitionProgress {
    pub partition: Partition,
    pub rows_fetched: u64,
    pub rows_written: u64,
    pub batches_written: u64,
    pub segment_bytes: u64,
    started: bool,
    worker: Side,
    writer: Side,
}

impl PartitionProgress {
    fn new(partition: Partition) -> Self {
        Self {
            partition,
            rows_fetched: 0,
            rows_written: 0,
            batches_written: 0,
            segment_bytes: 0,
            started: false,
            worker: Side::Running,
            writer: Side::Running,
        }
    }

    pub fn status(&self) -> PartitionStatus {
        match (self.worker, self.writer) {
            (Side::Failed, _) | (_, Side::Failed) => PartitionStatus::Failed,
            (Side::Finished, Side::Finished) => PartitionStatus::Finished,
            (Side::Running, _) | (_, Side::Running) if self.started => PartitionStatus::Extracting,
            (Side::Running, _) | (_, Side::Running) => PartitionStatus::Pending,
            _ => PartitionStatus::Cancelled,
        }
    }
}

/// Point-in-time view of the job, for the progress display
#[derive(Debug, Clone)]
pub struct JobProgress {
    pub state: JobState,
    pub partitions_total: usize,
    pub partitions_done: usize,
    pub rows_fetched: u64,
    pub rows_written: u64,
    pub queued_batches: u64,
    pub elapsed: Duration,
}

impl JobProgress {
    /// Rows written per second since the start of the run
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.rows_written as f64 / secs
        } else {
            0.0
        }
    }
}

/// Run-wide state owned by the coordinator
#[derive(Debug)]
pub struct ExtractionJob {
    state: JobState,
    started: Instant,
    extract_started: Option<Instant>,
    partitions: Vec<PartitionProgress>,
    queues: Vec<Arc<QueueStats>>,
}

impl ExtractionJob {
    pub fn new() -> Self {
        Self {
            state: JobState::Init,
            started: Instant::now(),
            extract_started: None,
            partitions: Vec::new(),
            queues: Vec::new(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Move to `next`, logging the transition
    pub fn transition(&mut self, next: JobState) {
        info!(from = %self.state, to = %next, elapsed_ms = self.elapsed().as_millis() as u64, "Job state changed");
        if next == JobState::Extracting {
            self.extract_started = Some(Instant::now());
        }
        self.state = next;
    }

    /// Register the planned partitions
    pub fn set_partitions(&mut self, partitions: &[Partition]) {
        self.partitions = partitions.iter().copied().map(PartitionProgress::new).collect();
    }

    /// Track a partition's queue for the progress display
    pub fn attach_queue(&mut self, stats: Arc<QueueStats>) {
        self.queues.push(stats);
    }

    pub fn partitions(&self) -> &[PartitionProgress] {
        &self.partitions
    }

    /// Fold one event into the job; returns the error of a failure event
    pub fn apply(&mut self, event: ProgressEvent) -> Option<ExtractError> {
        let Some(p) = self.partitions.get_mut(event.partition()) else {
            return match event {
                ProgressEvent::WorkerFailed { error, .. } | ProgressEvent::WriterFailed { error, .. } => {
                    Some(error)
                }
                _ => None,
            };
        };

        match event {
            ProgressEvent::WorkerStarted { .. } => p.started = true,
            ProgressEvent::BatchFetched { rows, .. } => p.rows_fetched += rows as u64,
            ProgressEvent::WorkerFinished { rows, .. } => {
                p.rows_fetched = rows;
                p.worker = Side::Finished;
            }
            ProgressEvent::WorkerStopped { .. } => p.worker = Side::Stopped,
            ProgressEvent::WorkerFailed { error, .. } => {
                p.worker = Side::Failed;
                return Some(error);
            }
            ProgressEvent::BatchWritten { rows, .. } => {
                p.rows_written += rows as u64;
                p.batches_written += 1;
            }
            ProgressEvent::WriterFinished { rows, bytes, .. } => {
                p.rows_written = rows;
                p.segment_bytes = bytes;
                p.writer = Side::Finished;
            }
            ProgressEvent::WriterStopped { .. } => p.writer = Side::Stopped,
            ProgressEvent::WriterFailed { error, .. } => {
                p.writer = Side::Failed;
                return Some(error);
            }
        }
        None
    }

    /// Partitions whose worker and writer both finished
    pub fn finished_count(&self) -> usize {
        self.partitions
            .iter()
            .filter(|p| p.status() == PartitionStatus::Finished)
            .count()
    }

    /// First partition still running after `deadline` of extraction
    pub fn overdue(&self, deadline: Duration) -> Option<usize> {
        let started = self.extract_started?;
        if started.elapsed() < deadline {
            return None;
        }
        self.partitions
            .iter()
            .find(|p| !p.status().is_terminal())
            .map(|p| p.partition.id)
    }

    pub fn snapshot(&self) -> JobProgress {
        JobProgress {
            state: self.state,
            partitions_total: self.partitions.len(),
            partitions_done: self.finished_count(),
            rows_fetched: self.partitions.iter().map(|p| p.rows_fetched).sum(),
            rows_written: self.partitions.iter().map(|p| p.rows_written).sum(),
            queued_batches: self.queues.iter().map(|q| q.queued()).sum(),
            elapsed: self.elapsed(),
        }
    }

    /// Total pushes that hit a full prefetch queue
    pub fn backpressure_events(&self) -> u64 {
        self.queues.iter().map(|q| q.backpressure_count()).sum()
    }
}

impl Default for ExtractionJob {
    fn default() -> Self {
        Self::new()
    }
}

/// A run that ended in `Failed`
#[derive(Debug)]
pub struct JobFailure {
    /// Stage the job was in when it failed
    pub stage: JobState,
    pub error: ExtractError,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "extraction failed during {}: {}", self.stage, self.error)
    }
}

impl std::error::Error for JobFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Per-partition line of the final report
#[derive(Debug, Clone, Serialize)]
pub struct PartitionReport {
    pub id: usize,
    pub range: String,
    pub rows: u64,
    pub segment_bytes: u64,
}

/// Final result of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub table: String,
    pub key_column: Option<String>,
    pub output_path: PathBuf,
    pub rows: u64,
    pub bytes: u64,
    pub partitions: Vec<PartitionReport>,
    pub duration_secs: f64,
    pub rows_per_second: f64,
    pub compression: bool,
    /// Partitions are read concurrently without a shared snapshot
    pub consistency: &'static str,
    pub connections_opened: u64,
    pub peak_connections: usize,
    pub backpressure_events: u64,
}

impl ExtractionReport {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs)
    }
}
