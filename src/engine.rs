//! Engine orchestration
//!
//! The [`StreamEngine`] wires the pieces together: it joins the
//! consumer group, spins up one [`PartitionProcessor`] per owned
//! partition, routes incoming records, and shuts everything down in
//! order. Build one with [`StreamEngineBuilder`].

use crate::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use crate::config::EngineConfig;
use crate::coordinator::ConsumerGroupCoordinator;
use crate::error::{CoordinatorError, EngineError, Result};
use crate::processor::PartitionProcessor;
use crate::record::{OutputSink, Record, SystemClock, TimeSource};
use crate::topology::OperatorTopology;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Aggregated counters across all partition processors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub partitions: usize,
    pub generation: u64,
    pub records_processed: u64,
    pub records_dropped: u64,
    pub records_deduped: u64,
    pub windows_completed: u64,
    pub checkpoints_taken: u64,
    pub restores: u64,
}

/// Orchestrator owning the coordinator and partition workers
pub struct StreamEngine {
    config: EngineConfig,
    member_id: String,
    coordinator: Arc<ConsumerGroupCoordinator>,
    store: Arc<dyn CheckpointStore>,
    topology: Arc<OperatorTopology>,
    sink: OutputSink,
    clock: Arc<dyn TimeSource>,
    processors: DashMap<u32, Arc<PartitionProcessor>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl StreamEngine {
    /// Start a builder
    pub fn builder() -> StreamEngineBuilder {
        StreamEngineBuilder::new()
    }

    /// This instance's member id within the consumer group
    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    /// The group coordinator, shared with other engine instances
    pub fn coordinator(&self) -> Arc<ConsumerGroupCoordinator> {
        self.coordinator.clone()
    }

    /// Join the group and spawn one worker per owned partition.
    ///
    /// Partitions with an existing checkpoint resume from it before the
    /// worker starts accepting records.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(member = %self.member_id, "engine already started");
            return Ok(());
        }
        for partition in &self.config.partitions {
            self.coordinator.add_partition(*partition);
        }
        self.coordinator.add_member(&self.member_id)?;

        let owned = self.coordinator.partitions_for(&self.member_id);
        info!(
            group = self.coordinator.group_id(),
            member = %self.member_id,
            partitions = ?owned,
            generation = self.coordinator.generation(),
            "engine joined group"
        );

        for partition in owned {
            let processor = Arc::new(PartitionProcessor::new(
                partition,
                &self.config,
                self.store.clone(),
                self.topology.clone(),
                self.clock.clone(),
            )?);
            if self.store.latest(partition).await?.is_some() {
                processor.restore_from_checkpoint().await?;
            }
            let task = tokio::spawn(processor.clone().run(self.sink.clone()));
            self.tasks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(task);
            self.processors.insert(partition, processor);
        }
        Ok(())
    }

    /// Route a record to its partition's worker, waiting if that
    /// partition's queue is full
    pub async fn deliver(&self, record: Record) -> Result<()> {
        let processor = self.processor_for(record.partition_id)?;
        processor.submit(record).await
    }

    /// Route a record, waiting at most `deadline` on a full queue
    pub async fn deliver_with_deadline(&self, record: Record, deadline: Duration) -> Result<()> {
        let processor = self.processor_for(record.partition_id)?;
        processor.submit_with_deadline(record, deadline).await
    }

    /// Force-drain a partition's completable windows at its current
    /// watermark
    pub async fn flush(&self, partition_id: u32) -> Result<()> {
        let processor = self.processor_for(partition_id)?;
        processor.flush(&self.sink).await
    }

    /// Stop all workers, flush completable windows, and leave the group
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        for entry in self.processors.iter() {
            entry.value().stop();
        }
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "partition worker panicked");
            }
        }
        for entry in self.processors.iter() {
            entry.value().flush(&self.sink).await?;
        }
        self.coordinator.remove_member(&self.member_id)?;
        info!(member = %self.member_id, "engine stopped");
        Ok(())
    }

    /// Aggregated counters across all owned partitions
    pub fn stats(&self) -> EngineStats {
        let mut stats = EngineStats {
            partitions: self.processors.len(),
            generation: self.coordinator.generation(),
            ..Default::default()
        };
        for entry in self.processors.iter() {
            let s = entry.value().stats();
            stats.records_processed += s.records_processed;
            stats.records_dropped += s.records_dropped;
            stats.records_deduped += s.records_deduped;
            stats.windows_completed += s.windows_completed;
            stats.checkpoints_taken += s.checkpoints_taken;
            stats.restores += s.restores;
        }
        stats
    }

    /// The worker for a partition this engine owns, if any
    pub fn processor(&self, partition_id: u32) -> Option<Arc<PartitionProcessor>> {
        self.processors.get(&partition_id).map(|p| p.clone())
    }

    fn processor_for(&self, partition_id: u32) -> Result<Arc<PartitionProcessor>> {
        self.processor(partition_id)
            .ok_or_else(|| CoordinatorError::UnknownPartition { partition_id }.into())
    }
}

impl std::fmt::Debug for StreamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEngine")
            .field("member_id", &self.member_id)
            .field("group_id", &self.config.group_id)
            .field("partitions", &self.processors.len())
            .finish()
    }
}

/// Builder for [`StreamEngine`]
pub struct StreamEngineBuilder {
    config: EngineConfig,
    coordinator: Option<Arc<ConsumerGroupCoordinator>>,
    store: Option<Arc<dyn CheckpointStore>>,
    topology: Option<Arc<OperatorTopology>>,
    sink: Option<OutputSink>,
    member_id: Option<String>,
    clock: Option<Arc<dyn TimeSource>>,
}

impl StreamEngineBuilder {
    /// Builder with default configuration
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            coordinator: None,
            store: None,
            topology: None,
            sink: None,
            member_id: None,
            clock: None,
        }
    }

    /// Set the engine configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a coordinator with other engine instances in the group
    pub fn with_coordinator(mut self, coordinator: Arc<ConsumerGroupCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Set the checkpoint store; defaults to in-memory
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the operator topology; defaults to a pass-through pipeline
    pub fn with_topology(mut self, topology: OperatorTopology) -> Self {
        self.topology = Some(Arc::new(topology));
        self
    }

    /// Set the output sink. Required.
    pub fn with_sink(mut self, sink: OutputSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Override the generated member id
    pub fn with_member_id<S: Into<String>>(mut self, member_id: S) -> Self {
        self.member_id = Some(member_id.into());
        self
    }

    /// Substitute the wall clock, used for deterministic tests
    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate everything and build the engine
    pub fn build(self) -> Result<StreamEngine> {
        self.config.validate()?;
        let topology = self
            .topology
            .unwrap_or_else(|| Arc::new(crate::topology::passthrough()));
        topology.validate()?;
        let sink = self.sink.ok_or_else(|| EngineError::Configuration {
            reason: "an output sink is required".to_string(),
        })?;
        let coordinator = self
            .coordinator
            .unwrap_or_else(|| Arc::new(ConsumerGroupCoordinator::new(self.config.group_id.clone())));
        Ok(StreamEngine {
            member_id: self
                .member_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            coordinator,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryCheckpointStore::new())),
            topology,
            sink,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            processors: DashMap::new(),
            tasks: std::sync::Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            config: self.config,
        })
    }
}

impl Default for StreamEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowSpec;
    use std::sync::Mutex;

    fn collecting_sink() -> (OutputSink, Arc<Mutex<Vec<Record>>>) {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let inner = collected.clone();
        let sink: OutputSink = Arc::new(move |rec| {
            inner.lock().unwrap().push(rec);
        });
        (sink, collected)
    }

    #[test]
    fn build_requires_a_sink() {
        let err = StreamEngine::builder().build().unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let (sink, _) = collecting_sink();
        let config = EngineConfig {
            partitions: vec![],
            ..Default::default()
        };
        assert!(StreamEngine::builder()
            .with_config(config)
            .with_sink(sink)
            .build()
            .is_err());
    }

    #[tokio::test]
    async fn lifecycle_processes_and_stops() {
        let (sink, collected) = collecting_sink();
        let config = EngineConfig {
            group_id: "g".to_string(),
            partitions: vec![0, 1],
            window: WindowSpec::Tumbling { size_ms: 10_000 },
            ..Default::default()
        };
        let engine = StreamEngine::builder()
            .with_config(config)
            .with_member_id("m-a")
            .with_sink(sink)
            .build()
            .unwrap();
        engine.start().await.unwrap();
        assert_eq!(engine.stats().partitions, 2);

        engine
            .deliver(Record::new("k", b"v".to_vec(), 1_000, 0, 0, 1_000))
            .await
            .unwrap();
        engine
            .deliver(Record::new("k", b"v".to_vec(), 2_000, 1, 0, 12_000))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.stop().await.unwrap();

        assert_eq!(engine.stats().records_processed, 2);
        // Partition 1's watermark completed its [0, 10000) window;
        // partition 0's stayed open past shutdown
        assert_eq!(engine.stats().windows_completed, 1);
        assert_eq!(collected.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deliver_to_unowned_partition_fails() {
        let (sink, _) = collecting_sink();
        let engine = StreamEngine::builder()
            .with_member_id("m-a")
            .with_sink(sink)
            .build()
            .unwrap();
        engine.start().await.unwrap();

        let err = engine
            .deliver(Record::new("k", vec![], 0, 42, 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Coordinator(CoordinatorError::UnknownPartition { partition_id: 42 })
        ));
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn two_members_split_partitions() {
        let coordinator = Arc::new(ConsumerGroupCoordinator::new("shared"));
        let config = EngineConfig {
            group_id: "shared".to_string(),
            partitions: vec![0, 1, 2, 3],
            ..Default::default()
        };
        let (sink_a, _) = collecting_sink();
        let (sink_b, _) = collecting_sink();

        let a = StreamEngine::builder()
            .with_config(config.clone())
            .with_coordinator(coordinator.clone())
            .with_member_id("m-a")
            .with_sink(sink_a)
            .build()
            .unwrap();
        a.start().await.unwrap();
        assert_eq!(a.stats().partitions, 4);

        let b = StreamEngine::builder()
            .with_config(config)
            .with_coordinator(coordinator.clone())
            .with_member_id("m-b")
            .with_sink(sink_b)
            .build()
            .unwrap();
        b.start().await.unwrap();

        // The coordinator reassigned partitions 2 and 3 to m-b
        assert_eq!(coordinator.partitions_for("m-a").len(), 2);
        assert_eq!(coordinator.partitions_for("m-b").len(), 2);

        a.stop().await.unwrap();
        b.stop().await.unwrap();
    }
}
