//! Parallel extraction pipeline
//!
//! # Architecture
//!
//! ```text
//!                       ┌──────────────────────────┐
//!                       │  ExtractionCoordinator   │
//!                       │  Init → Probing →        │
//!                       │  Planning → Extracting → │◄──── ProgressEvent ────┐
//!                       │  Merging → Cleanup → Done│                        │
//!                       └────────────┬─────────────┘                        │
//!                                    │ one pair per partition               │
//!              ┌─────────────────────┼─────────────────────┐                │
//!              ▼                     ▼                     ▼                │
//!        ┌──────────┐          ┌──────────┐          ┌──────────┐           │
//!        │ worker-0 │          │ worker-1 │   ...    │ worker-N │ ──────────┤
//!        └────┬─────┘          └────┬─────┘          └────┬─────┘           │
//!             │ bounded queue       │                     │                 │
//!             ▼                     ▼                     ▼                 │
//!        ┌──────────┐          ┌──────────┐          ┌──────────┐           │
//!        │ writer-0 │          │ writer-1 │   ...    │ writer-N │ ──────────┘
//!        └────┬─────┘          └────┬─────┘          └────┬─────┘
//!             ▼                     ▼                     ▼
//!        part_0.parquet        part_1.parquet        part_N.parquet ──► merge
//! ```
//!
//! Workers share one bounded [`ConnectionPool`](crate::source::ConnectionPool).
//! The first failure sets a shared abort flag; everything else stops at its
//! next row or batch boundary.

pub mod coordinator;
pub mod job;
pub mod queue;
pub mod worker;
pub mod writer;

use crate::error::WorkerError;
use std::any::Any;
use std::thread::JoinHandle;

pub use coordinator::ExtractionCoordinator;
pub use job::{
    ExtractionJob, ExtractionReport, JobFailure, JobProgress, JobState, PartitionReport,
    PartitionStatus, ProgressEvent,
};
pub use queue::{prefetch_queue, BatchReceiver, BatchSender, QueueStats, RowBatch};
pub use worker::{ExtractionWorker, WorkerContext};
pub use writer::{SegmentWriter, WriterContext};

/// Join a pipeline thread, turning a panic into a [`WorkerError`]
pub(crate) fn join_thread(
    role: &'static str,
    id: usize,
    handle: JoinHandle<()>,
) -> Result<(), WorkerError> {
    handle.join().map_err(|payload| WorkerError::Panicked {
        role,
        id,
        message: panic_message(payload.as_ref()),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "thread panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_join_reports_panic_message() {
        let handle = thread::spawn(|| panic!("segment exploded"));
        match join_thread("writer", 3, handle) {
            Err(WorkerError::Panicked { role, id, message }) => {
                assert_eq!(role, "writer");
                assert_eq!(id, 3);
                assert_eq!(message, "segment exploded");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_join_ok() {
        let handle = thread::spawn(|| {});
        assert!(join_thread("worker", 0, handle).is_ok());
    }
}
