//! Prefetch queue with backpressure
//!
//! One bounded channel per partition sits between the worker that fetches
//! rows and the writer that serializes them. A full queue blocks the
//! worker, so a partition holds at most `capacity + 2` batches: `capacity`
//! queued, one being built or pushed by the worker and one being encoded
//! by the writer. Dropping the [`BatchSender`] closes the queue; the writer
//! drains what is left and then sees the disconnect.

use arrow::record_batch::RecordBatch;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A chunk of rows fetched by one worker
#[derive(Debug, Clone)]
pub struct RowBatch {
    /// Producing partition
    pub partition_id: usize,

    /// Position of this batch within its partition, from 0
    pub seq: u64,

    pub data: RecordBatch,
}

impl RowBatch {
    pub fn num_rows(&self) -> usize {
        self.data.num_rows()
    }
}

/// Statistics for one prefetch queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Batches pushed by the worker
    pub pushed_batches: AtomicU64,

    /// Rows pushed by the worker
    pub pushed_rows: AtomicU64,

    /// Batches popped by the writer
    pub popped_batches: AtomicU64,

    /// Rows popped by the writer
    pub popped_rows: AtomicU64,

    /// Pushes that found the queue full and had to wait
    pub backpressure_events: AtomicU64,

    /// Most batches queued at once
    pub high_water: AtomicU64,
}

impl QueueStats {
    /// Batches currently queued
    pub fn queued(&self) -> u64 {
        self.pushed_batches
            .load(Ordering::Relaxed)
            .saturating_sub(self.popped_batches.load(Ordering::Relaxed))
    }

    /// Get backpressure event count
    pub fn backpressure_count(&self) -> u64 {
        self.backpressure_events.load(Ordering::Relaxed)
    }

    pub fn high_water_mark(&self) -> u64 {
        self.high_water.load(Ordering::Relaxed)
    }
}

/// Create the queue for one partition
pub fn prefetch_queue(partition_id: usize, capacity: usize) -> (BatchSender, BatchReceiver) {
    let (sender, receiver) = bounded(capacity.max(1));
    let stats = Arc::new(QueueStats::default());

    (
        BatchSender {
            partition_id,
            sender,
            stats: Arc::clone(&stats),
        },
        BatchReceiver {
            partition_id,
            receiver,
            stats,
        },
    )
}

/// Producer end, owned by the worker
pub struct BatchSender {
    partition_id: usize,
    sender: Sender<RowBatch>,
    stats: Arc<QueueStats>,
}

impl BatchSender {
    pub fn partition_id(&self) -> usize {
        self.partition_id
    }

    /// Push a batch, blocking while the queue is full
    ///
    /// Fails only when the writer has gone away; the batch is handed back.
    pub fn send(&self, batch: RowBatch) -> Result<(), SendError<RowBatch>> {
        let rows = batch.num_rows() as u64;

        let result = match self.sender.try_send(batch) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(batch)) => {
                self.stats.backpressure_events.fetch_add(1, Ordering::Relaxed);
                self.sender.send(batch)
            }
            Err(TrySendError::Disconnected(batch)) => Err(SendError(batch)),
        };

        if result.is_ok() {
            self.stats.pushed_batches.fetch_add(1, Ordering::Relaxed);
            self.stats.pushed_rows.fetch_add(rows, Ordering::Relaxed);
            self.stats
                .high_water
                .fetch_max(self.sender.len() as u64, Ordering::Relaxed);
        }
        result
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}

/// Consumer end, owned by the writer
pub struct BatchReceiver {
    partition_id: usize,
    receiver: Receiver<RowBatch>,
    stats: Arc<QueueStats>,
}

impl BatchReceiver {
    pub fn partition_id(&self) -> usize {
        self.partition_id
    }

    /// Pop the next batch, waiting at most `timeout`
    ///
    /// `Disconnected` is only returned once the queue is closed and drained.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<RowBatch, RecvTimeoutError> {
        let batch = self.receiver.recv_timeout(timeout)?;
        self.stats.popped_batches.fetch_add(1, Ordering::Relaxed);
        self.stats
            .popped_rows
            .fetch_add(batch.num_rows() as u64, Ordering::Relaxed);
        Ok(batch)
    }

    /// Batches currently queued
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.receiver.capacity().unwrap_or(0)
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::thread;

    fn batch(seq: u64, rows: i64) -> RowBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("ID", DataType::Int64, true)]));
        let data = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from_iter_values(0..rows))],
        )
        .unwrap();
        RowBatch {
            partition_id: 0,
            seq,
            data,
        }
    }

    #[test]
    fn test_queue_delivers_in_order_then_disconnects() {
        let (tx, rx) = prefetch_queue(3, 4);
        assert_eq!(tx.partition_id(), 3);
        assert_eq!(rx.capacity(), 4);

        tx.send(batch(0, 10)).unwrap();
        tx.send(batch(1, 5)).unwrap();
        drop(tx);

        let timeout = Duration::from_millis(100);
        assert_eq!(rx.recv_timeout(timeout).unwrap().seq, 0);
        assert_eq!(rx.recv_timeout(timeout).unwrap().seq, 1);
        assert_eq!(
            rx.recv_timeout(timeout).unwrap_err(),
            RecvTimeoutError::Disconnected
        );

        let stats = rx.stats();
        assert_eq!(stats.pushed_rows.load(Ordering::Relaxed), 15);
        assert_eq!(stats.popped_rows.load(Ordering::Relaxed), 15);
        assert_eq!(stats.queued(), 0);
        assert_eq!(stats.high_water_mark(), 2);
    }

    #[test]
    fn test_full_queue_blocks_producer() {
        let (tx, rx) = prefetch_queue(0, 1);
        let stats = tx.stats();

        let producer = thread::spawn(move || {
            for seq in 0..5 {
                tx.send(batch(seq, 1)).unwrap();
            }
        });

        thread::sleep(Duration::from_millis(50));
        // One queued, the producer is parked on the second
        assert_eq!(rx.len(), 1);

        let mut seen = Vec::new();
        while let Ok(b) = rx.recv_timeout(Duration::from_secs(2)) {
            seen.push(b.seq);
        }
        producer.join().unwrap();

        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(stats.backpressure_count() >= 1);
        assert!(stats.high_water_mark() <= 1);
    }

    #[test]
    fn test_send_fails_when_writer_gone() {
        let (tx, rx) = prefetch_queue(0, 2);
        drop(rx);
        let err = tx.send(batch(7, 1)).unwrap_err();
        assert_eq!(err.0.seq, 7);
        assert_eq!(tx.stats().pushed_batches.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_recv_times_out_while_open() {
        let (_tx, rx) = prefetch_queue(0, 2);
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(10)).unwrap_err(),
            RecvTimeoutError::Timeout
        );
        assert!(rx.is_empty());
    }
}
