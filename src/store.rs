//! Current snapshot store
//!
//! The producer side keeps exactly one raw snapshot. The store owns it, is the
//! only writer, and publishes every merged record to subscribers so the push
//! layer never touches the record directly.

use futures_util::future::BoxFuture;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::error::VitalsError;
use crate::schema::{IngestBatch, RawSnapshot};

/// Number of records buffered per subscriber before it starts lagging.
///
/// A lagging subscriber skips to the newest records. Every record is a full
/// snapshot, so nothing is lost from the board, but a field that changes and
/// changes back within the skipped records is never flashed.
pub const UPDATE_CHANNEL_CAPACITY: usize = 16;

/// Result of one accepted ingestion
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    /// Identifier assigned to the batch, for log correlation
    pub batch_id: Uuid,
    /// Full record after the merge
    pub snapshot: RawSnapshot,
}

/// Storage for the current raw snapshot
pub trait SnapshotStore: Send + Sync {
    /// The current full record
    fn current(&self) -> BoxFuture<'_, RawSnapshot>;

    /// Validate and merge a batch, then publish the merged record
    fn ingest(&self, batch: IngestBatch) -> BoxFuture<'_, Result<IngestReceipt, VitalsError>>;

    /// Receive every record published after this call
    fn subscribe(&self) -> broadcast::Receiver<RawSnapshot>;
}

/// In-process store guarded by a read/write lock
pub struct InMemorySnapshotStore {
    record: RwLock<RawSnapshot>,
    updates: broadcast::Sender<RawSnapshot>,
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new(RawSnapshot::seeded())
    }
}

impl InMemorySnapshotStore {
    pub fn new(initial: RawSnapshot) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            record: RwLock::new(initial),
            updates,
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.updates.receiver_count()
    }

    async fn merge(&self, batch: IngestBatch) -> Result<IngestReceipt, VitalsError> {
        let batch_id = Uuid::new_v4();
        let snapshot = {
            let mut record = self.record.write().await;
            batch.merge_into(&mut record)?;
            record.clone()
        };

        log::info!(
            "batch {} merged: {} attribute(s), {} measurement(s)",
            batch_id,
            batch.attributes.len(),
            batch.measurements.len()
        );

        // No subscribers is not an error
        let delivered = self.updates.send(snapshot.clone()).unwrap_or(0);
        log::debug!("batch {} published to {} subscriber(s)", batch_id, delivered);

        Ok(IngestReceipt { batch_id, snapshot })
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn current(&self) -> BoxFuture<'_, RawSnapshot> {
        Box::pin(async move { self.record.read().await.clone() })
    }

    fn ingest(&self, batch: IngestBatch) -> BoxFuture<'_, Result<IngestReceipt, VitalsError>> {
        Box::pin(self.merge(batch))
    }

    fn subscribe(&self) -> broadcast::Receiver<RawSnapshot> {
        self.updates.subscribe()
    }
}
