//! Per-partition record processing
//!
//! Each partition gets one [`PartitionProcessor`] owning that
//! partition's windows, watermarks, deduplication set, and checkpoint
//! schedule. Records enter through a bounded queue; a single worker task
//! drains it, so per-partition processing is strictly ordered. Records
//! accumulate in windows; when a window completes its aggregate flows
//! through the operator topology and, if not filtered, reaches the sink.
//! Failures during processing flip the processor into `Failed`, restore
//! from the latest checkpoint, and resume; replayed offsets are
//! suppressed by the deduplication set under exactly-once semantics
//! while their window contributions survive in the restored state.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::{EngineConfig, ProcessingSemantics};
use crate::error::{CheckpointError, ProcessError, Result};
use crate::record::{OutputSink, Record, TimeSource};
use crate::topology::OperatorTopology;
use crate::watermark::KeyedWatermarks;
use crate::window::{Window, WindowManager};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Sentinel meaning no offset has been processed or checkpointed yet
const NO_OFFSET: i64 = i64::MIN;

/// How long the worker waits on an empty queue before re-checking the
/// stop flag
const RECV_POLL: Duration = Duration::from_millis(50);

/// Lifecycle state of a partition processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Not yet running, or cleanly stopped
    Idle,
    /// Worker loop is consuming records
    Processing,
    /// A checkpoint is being written
    Committing,
    /// A record failed; restore is in progress
    Failed,
}

/// Summary emitted for every completed window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowAggregate {
    /// Partition key the window belongs to
    pub key: String,
    /// Window start (inclusive), ms since epoch
    pub window_start: i64,
    /// Window end (exclusive)
    pub window_end: i64,
    /// Number of records the window collected
    pub record_count: u64,
    /// Maximum event time among collected records
    pub max_event_time: i64,
}

/// Counters maintained by a processor, cheap to read concurrently
#[derive(Debug, Default)]
pub struct ProcessorStats {
    pub records_processed: AtomicU64,
    pub records_dropped: AtomicU64,
    pub records_deduped: AtomicU64,
    pub windows_completed: AtomicU64,
    pub checkpoints_taken: AtomicU64,
    pub restores: AtomicU64,
}

/// Point-in-time copy of [`ProcessorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub records_processed: u64,
    pub records_dropped: u64,
    pub records_deduped: u64,
    pub windows_completed: u64,
    pub checkpoints_taken: u64,
    pub restores: u64,
}

impl ProcessorStats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records_processed: self.records_processed.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            records_deduped: self.records_deduped.load(Ordering::Relaxed),
            windows_completed: self.windows_completed.load(Ordering::Relaxed),
            checkpoints_taken: self.checkpoints_taken.load(Ordering::Relaxed),
            restores: self.restores.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot key under which the deduplication set is checkpointed
const DEDUPE_STATE_KEY: &str = "dedupe_offsets";

/// Snapshot key for the open windows per key
const WINDOWS_STATE_KEY: &str = "open_windows";

/// Snapshot key for the per-key watermark state
const WATERMARKS_STATE_KEY: &str = "watermarks";

fn encode_state<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| {
            CheckpointError::SnapshotCodec {
                reason: e.to_string(),
            }
            .into()
        })
}

fn decode_state<T: for<'de> Deserialize<'de>>(encoded: &str) -> Result<T> {
    serde_json::from_str(encoded)
        .map_err(|e| {
            CheckpointError::SnapshotCodec {
                reason: e.to_string(),
            }
            .into()
        })
}

/// Single-partition worker
pub struct PartitionProcessor {
    partition_id: u32,
    checkpoint_interval: u64,
    semantics: ProcessingSemantics,

    tx: mpsc::Sender<Record>,
    rx: std::sync::Mutex<Option<mpsc::Receiver<Record>>>,

    seen_offsets: DashSet<i64>,
    offset_floor: AtomicI64,
    last_offset: AtomicI64,
    since_checkpoint: AtomicU64,
    partition_watermark: AtomicI64,

    windows: tokio::sync::Mutex<WindowManager>,
    watermarks: tokio::sync::Mutex<KeyedWatermarks>,

    state: std::sync::Mutex<ProcessorState>,
    stopped: AtomicBool,
    blocked_submitters: AtomicU64,

    store: Arc<dyn CheckpointStore>,
    topology: Arc<OperatorTopology>,
    plan: Vec<String>,
    clock: Arc<dyn TimeSource>,
    stats: ProcessorStats,
}

impl PartitionProcessor {
    /// Create a processor for one partition
    pub fn new(
        partition_id: u32,
        config: &EngineConfig,
        store: Arc<dyn CheckpointStore>,
        topology: Arc<OperatorTopology>,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        topology.validate()?;
        let plan = topology.execution_order()?;
        let manager = WindowManager::new(config.window, config.allowed_lateness_ms)?;
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        Ok(Self {
            partition_id,
            checkpoint_interval: config.checkpoint_interval,
            semantics: config.semantics,
            tx,
            rx: std::sync::Mutex::new(Some(rx)),
            seen_offsets: DashSet::new(),
            offset_floor: AtomicI64::new(NO_OFFSET),
            last_offset: AtomicI64::new(NO_OFFSET),
            since_checkpoint: AtomicU64::new(0),
            partition_watermark: AtomicI64::new(i64::MIN),
            windows: tokio::sync::Mutex::new(manager),
            watermarks: tokio::sync::Mutex::new(KeyedWatermarks::new()),
            state: std::sync::Mutex::new(ProcessorState::Idle),
            stopped: AtomicBool::new(false),
            blocked_submitters: AtomicU64::new(0),
            store,
            topology,
            plan,
            clock,
            stats: ProcessorStats::default(),
        })
    }

    /// The partition this processor owns
    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True while at least one submit is waiting on a full queue
    pub fn is_backpressured(&self) -> bool {
        self.blocked_submitters.load(Ordering::SeqCst) > 0
    }

    /// Highest fully processed offset, if any
    pub fn last_offset(&self) -> Option<i64> {
        match self.last_offset.load(Ordering::SeqCst) {
            NO_OFFSET => None,
            offset => Some(offset),
        }
    }

    /// Maximum watermark observed on this partition
    pub fn partition_watermark(&self) -> i64 {
        self.partition_watermark.load(Ordering::SeqCst)
    }

    /// Copy of the processor's counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Enqueue a record, waiting if the queue is full.
    ///
    /// Under exactly-once semantics an already-seen offset is dropped
    /// here without error. Each waiting submitter is counted, so the
    /// backpressure signal stays up until the last one is accepted.
    pub async fn submit(&self, record: Record) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ProcessError::Stopped {
                partition_id: self.partition_id,
            }
            .into());
        }
        if self.is_duplicate(record.offset) {
            self.stats.records_deduped.fetch_add(1, Ordering::Relaxed);
            debug!(
                partition_id = self.partition_id,
                offset = record.offset,
                "duplicate offset dropped at submit"
            );
            return Ok(());
        }
        match self.tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(record)) => {
                self.blocked_submitters.fetch_add(1, Ordering::SeqCst);
                let sent = self.tx.send(record).await;
                self.blocked_submitters.fetch_sub(1, Ordering::SeqCst);
                sent.map_err(|_| {
                    ProcessError::Stopped {
                        partition_id: self.partition_id,
                    }
                    .into()
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ProcessError::Stopped {
                partition_id: self.partition_id,
            }
            .into()),
        }
    }

    /// Enqueue a record, waiting at most `deadline` on a full queue.
    ///
    /// On timeout the record is not enqueued and the caller may retry.
    pub async fn submit_with_deadline(&self, record: Record, deadline: Duration) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ProcessError::Stopped {
                partition_id: self.partition_id,
            }
            .into());
        }
        if self.is_duplicate(record.offset) {
            self.stats.records_deduped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        match self.tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(record)) => {
                self.blocked_submitters.fetch_add(1, Ordering::SeqCst);
                let sent = timeout(deadline, self.tx.send(record)).await;
                self.blocked_submitters.fetch_sub(1, Ordering::SeqCst);
                match sent {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(ProcessError::Stopped {
                        partition_id: self.partition_id,
                    }
                    .into()),
                    Err(_) => Err(ProcessError::BackpressureTimeout {
                        partition_id: self.partition_id,
                        waited_ms: deadline.as_millis() as u64,
                    }
                    .into()),
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ProcessError::Stopped {
                partition_id: self.partition_id,
            }
            .into()),
        }
    }

    /// Worker loop: drain the queue until stopped.
    ///
    /// A record failure triggers restore from the latest checkpoint and
    /// processing resumes. If restore itself fails the processor stops.
    pub async fn run(self: Arc<Self>, output: OutputSink) {
        let rx = {
            let mut slot = self.rx.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        let Some(mut rx) = rx else {
            warn!(partition_id = self.partition_id, "worker already started");
            return;
        };
        self.set_state(ProcessorState::Processing);
        info!(partition_id = self.partition_id, "partition worker started");

        while !self.stopped.load(Ordering::SeqCst) {
            match timeout(RECV_POLL, rx.recv()).await {
                Ok(Some(record)) => {
                    if let Err(err) = self.process_record(record, &output).await {
                        error!(
                            partition_id = self.partition_id,
                            error = %err,
                            "record processing failed, restoring from checkpoint"
                        );
                        self.set_state(ProcessorState::Failed);
                        if let Err(restore_err) = self.restore_from_checkpoint().await {
                            error!(
                                partition_id = self.partition_id,
                                error = %restore_err,
                                "restore failed, stopping worker"
                            );
                            self.stopped.store(true, Ordering::SeqCst);
                            break;
                        }
                        self.set_state(ProcessorState::Processing);
                    }
                }
                Ok(None) => break,
                Err(_) => {} // queue empty, re-check the stop flag
            }
        }
        self.set_state(ProcessorState::Idle);
        info!(partition_id = self.partition_id, "partition worker stopped");
    }

    /// Request the worker to stop after the record in flight
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Process one record end to end.
    ///
    /// Order: dedupe, watermark observation, window assignment, window
    /// completion, aggregate post-processing through the topology,
    /// checkpoint schedule. Aggregates the topology filters out still
    /// advance the offset and watermark.
    async fn process_record(&self, record: Record, output: &OutputSink) -> Result<()> {
        if self.is_duplicate(record.offset) {
            self.stats.records_deduped.fetch_add(1, Ordering::Relaxed);
            debug!(
                partition_id = self.partition_id,
                offset = record.offset,
                "duplicate offset dropped"
            );
            return Ok(());
        }

        let offset = record.offset;
        let key = record.key.clone();

        let effective = {
            let mut marks = self.watermarks.lock().await;
            marks.observe(&key, record.ingest_watermark)
        };
        let high = effective.timestamp.max(self.partition_watermark.load(Ordering::SeqCst));
        self.partition_watermark.store(high, Ordering::SeqCst);

        let drained = {
            let mut windows = self.windows.lock().await;
            windows.assign(&record)?;
            windows.drain_completed(&key, effective.timestamp)
        };

        for window in &drained {
            self.emit_aggregate(&key, window, offset, output)?;
        }
        self.stats
            .windows_completed
            .fetch_add(drained.len() as u64, Ordering::Relaxed);

        if self.semantics == ProcessingSemantics::ExactlyOnce {
            self.seen_offsets.insert(offset);
        }
        self.last_offset.fetch_max(offset, Ordering::SeqCst);
        self.stats.records_processed.fetch_add(1, Ordering::Relaxed);

        let pending = self.since_checkpoint.fetch_add(1, Ordering::SeqCst) + 1;
        if pending >= self.checkpoint_interval {
            self.set_state(ProcessorState::Committing);
            self.checkpoint().await?;
            self.set_state(ProcessorState::Processing);
            self.since_checkpoint.store(0, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Summarize a drained window and run the aggregate through the
    /// topology. A filtered aggregate is counted as dropped and never
    /// reaches the sink.
    fn emit_aggregate(
        &self,
        key: &str,
        window: &Window,
        offset: i64,
        output: &OutputSink,
    ) -> Result<()> {
        let aggregate = WindowAggregate {
            key: key.to_string(),
            window_start: window.start,
            window_end: window.end,
            record_count: window.records.len() as u64,
            max_event_time: window.max_event_time,
        };
        let payload = bincode::serialize(&aggregate)?;
        let record = Record::new(
            key,
            payload,
            window.max_event_time,
            self.partition_id,
            offset,
            self.partition_watermark.load(Ordering::SeqCst),
        );
        match self.topology.run_ordered(&self.plan, record)? {
            Some(out) => output(out),
            None => {
                self.stats.records_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    partition_id = self.partition_id,
                    key,
                    window_start = window.start,
                    "aggregate filtered by topology"
                );
            }
        }
        Ok(())
    }

    /// Write a checkpoint for the current position
    async fn checkpoint(&self) -> Result<()> {
        let offset = self.last_offset.load(Ordering::SeqCst);
        if offset == NO_OFFSET {
            return Ok(());
        }
        let mut offsets: Vec<i64> = self.seen_offsets.iter().map(|o| *o).collect();
        offsets.sort_unstable();
        let mut snapshot = HashMap::new();
        snapshot.insert(DEDUPE_STATE_KEY.to_string(), encode_state(&offsets)?);
        {
            let windows = self.windows.lock().await;
            snapshot.insert(
                WINDOWS_STATE_KEY.to_string(),
                encode_state(windows.open_state())?,
            );
        }
        {
            let marks = self.watermarks.lock().await;
            snapshot.insert(WATERMARKS_STATE_KEY.to_string(), encode_state(&*marks)?);
        }

        let checkpoint = Checkpoint {
            offset,
            watermark: self.partition_watermark.load(Ordering::SeqCst),
            state_snapshot: snapshot,
            created_at: self.clock.now(),
        };
        self.store.append(self.partition_id, checkpoint).await?;
        self.stats.checkpoints_taken.fetch_add(1, Ordering::Relaxed);
        debug!(
            partition_id = self.partition_id,
            offset, "checkpoint written"
        );
        Ok(())
    }

    /// Reset to the latest checkpoint.
    ///
    /// Open windows, per-key watermarks, and the dedupe set are all
    /// rebuilt from the snapshot, so a replayed offset is suppressed
    /// while its window contribution stays counted. The checkpoint
    /// offset becomes a floor below which every offset is treated as
    /// already seen.
    pub async fn restore_from_checkpoint(&self) -> Result<()> {
        let latest = self.store.latest(self.partition_id).await?;
        self.seen_offsets.clear();
        self.since_checkpoint.store(0, Ordering::SeqCst);
        self.stats.restores.fetch_add(1, Ordering::Relaxed);

        let mut windows = self.windows.lock().await;
        let mut marks = self.watermarks.lock().await;
        match latest {
            Some(cp) => {
                if let Some(encoded) = cp.state_snapshot.get(DEDUPE_STATE_KEY) {
                    let offsets: Vec<i64> = decode_state(encoded)?;
                    for offset in offsets {
                        self.seen_offsets.insert(offset);
                    }
                }
                match cp.state_snapshot.get(WINDOWS_STATE_KEY) {
                    Some(encoded) => windows.restore_state(decode_state(encoded)?),
                    None => windows.clear(),
                }
                match cp.state_snapshot.get(WATERMARKS_STATE_KEY) {
                    Some(encoded) => *marks = decode_state(encoded)?,
                    None => marks.reset_to(cp.watermark),
                }
                self.offset_floor.store(cp.offset, Ordering::SeqCst);
                self.last_offset.store(cp.offset, Ordering::SeqCst);
                self.partition_watermark.store(cp.watermark, Ordering::SeqCst);
                info!(
                    partition_id = self.partition_id,
                    offset = cp.offset,
                    watermark = cp.watermark,
                    "restored from checkpoint"
                );
            }
            None => {
                windows.clear();
                self.offset_floor.store(NO_OFFSET, Ordering::SeqCst);
                self.last_offset.store(NO_OFFSET, Ordering::SeqCst);
                self.partition_watermark.store(i64::MIN, Ordering::SeqCst);
                marks.reset_to(i64::MIN);
                info!(
                    partition_id = self.partition_id,
                    "no checkpoint found, reset to initial state"
                );
            }
        }
        Ok(())
    }

    /// Drain every remaining completable window to the sink, used at
    /// shutdown
    pub async fn flush(&self, output: &OutputSink) -> Result<()> {
        let watermark = self.partition_watermark.load(Ordering::SeqCst);
        let offset = self.last_offset.load(Ordering::SeqCst);
        let drained = {
            let mut windows = self.windows.lock().await;
            windows.drain_all(watermark)
        };
        for window in &drained {
            let key = window
                .records
                .first()
                .map(|r| r.key.clone())
                .unwrap_or_default();
            self.emit_aggregate(&key, window, offset, output)?;
        }
        self.stats
            .windows_completed
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn is_duplicate(&self, offset: i64) -> bool {
        if self.semantics != ProcessingSemantics::ExactlyOnce {
            return false;
        }
        let floor = self.offset_floor.load(Ordering::SeqCst);
        (floor != NO_OFFSET && offset <= floor) || self.seen_offsets.contains(&offset)
    }

    fn set_state(&self, next: ProcessorState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = next;
    }
}

impl std::fmt::Debug for PartitionProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionProcessor")
            .field("partition_id", &self.partition_id)
            .field("state", &self.state())
            .finish()
    }
}
