//! Checkpointing for partition processors
//!
//! A checkpoint captures everything a processor needs to resume a
//! partition after a failure: the last processed offset, the partition
//! watermark, and an opaque state snapshot (the deduplication set).
//! Stores are append-only per partition with strictly increasing
//! offsets; restore always reads the latest entry.

use crate::error::CheckpointError;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// A durable snapshot of one partition's processing state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last offset fully processed before this checkpoint was taken
    pub offset: i64,
    /// Partition watermark at checkpoint time
    pub watermark: i64,
    /// Opaque operator state, keyed by state name
    pub state_snapshot: HashMap<String, String>,
    /// Wall-clock creation time, milliseconds since epoch
    pub created_at: i64,
}

impl Checkpoint {
    /// Create a checkpoint stamped with the current wall-clock time
    pub fn new(offset: i64, watermark: i64, state_snapshot: HashMap<String, String>) -> Self {
        Self {
            offset,
            watermark,
            state_snapshot,
            created_at: Utc::now().timestamp_millis(),
        }
    }
}

/// Storage backend for checkpoints.
///
/// Implementations must reject appends whose offset does not strictly
/// exceed the latest stored offset for that partition.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint for a partition
    async fn append(&self, partition_id: u32, checkpoint: Checkpoint)
        -> Result<(), CheckpointError>;

    /// The most recent checkpoint for a partition, if any
    async fn latest(&self, partition_id: u32) -> Result<Option<Checkpoint>, CheckpointError>;
}

/// In-memory checkpoint store backed by a concurrent map.
///
/// Suitable for tests and single-process deployments; entries are held
/// in append order per partition.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: DashMap<u32, Vec<Checkpoint>>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpoints stored for a partition
    pub fn count(&self, partition_id: u32) -> usize {
        self.entries
            .get(&partition_id)
            .map(|e| e.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn append(
        &self,
        partition_id: u32,
        checkpoint: Checkpoint,
    ) -> Result<(), CheckpointError> {
        let mut entry = self.entries.entry(partition_id).or_default();
        if let Some(last) = entry.last() {
            if checkpoint.offset <= last.offset {
                return Err(CheckpointError::NonMonotonicOffset {
                    partition_id,
                    latest: last.offset,
                    attempted: checkpoint.offset,
                });
            }
        }
        debug!(
            partition_id,
            offset = checkpoint.offset,
            watermark = checkpoint.watermark,
            "checkpoint appended"
        );
        entry.push(checkpoint);
        Ok(())
    }

    async fn latest(&self, partition_id: u32) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self
            .entries
            .get(&partition_id)
            .and_then(|e| e.last().cloned()))
    }
}
