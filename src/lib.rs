//! Rillflow: a windowed stream-processing engine
//!
//! Rillflow ingests keyed, partitioned records and produces per-window
//! aggregates driven by event-time watermarks. Partitions are divided
//! among consumer-group members by a range-assignment coordinator; each
//! owned partition is processed by an isolated worker with its own
//! windows, deduplication set, and checkpoint schedule, so a failure in
//! one partition never stalls another.
//!
//! # Quick start
//!
//! ```no_run
//! use rillflow::config::EngineConfig;
//! use rillflow::engine::StreamEngine;
//! use rillflow::record::Record;
//! use rillflow::window::WindowSpec;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> rillflow::error::Result<()> {
//! let config = EngineConfig {
//!     group_id: "orders".to_string(),
//!     partitions: vec![0, 1],
//!     window: WindowSpec::tumbling(60_000)?,
//!     ..Default::default()
//! };
//! let engine = StreamEngine::builder()
//!     .with_config(config)
//!     .with_sink(Arc::new(|record| println!("{record}")))
//!     .build()?;
//! engine.start().await?;
//! engine
//!     .deliver(Record::new("user-1", b"click".to_vec(), 1_000, 0, 0, 1_000))
//!     .await?;
//! engine.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod processor;
pub mod record;
pub mod topology;
pub mod watermark;
pub mod window;

pub use checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};
pub use config::{EngineConfig, ProcessingSemantics};
pub use coordinator::ConsumerGroupCoordinator;
pub use engine::{EngineStats, StreamEngine, StreamEngineBuilder};
pub use error::{EngineError, Result};
pub use processor::{PartitionProcessor, ProcessorState, WindowAggregate};
pub use record::{OutputSink, Record, SystemClock, TimeSource};
pub use topology::{NodeKind, OperatorTopology};
pub use watermark::{KeyedWatermarks, Watermark};
pub use window::{Window, WindowManager, WindowSpec};
