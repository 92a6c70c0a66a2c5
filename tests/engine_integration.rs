//! End-to-end engine tests: records in, window aggregates out.
//!
//! The sink only ever sees completed-window aggregates that survived
//! the operator topology; raw inputs never reach it.

use anyhow::Result;
use rillflow::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use rillflow::config::{EngineConfig, ProcessingSemantics};
use rillflow::engine::StreamEngine;
use rillflow::processor::WindowAggregate;
use rillflow::record::{OutputSink, Record};
use rillflow::topology::{NodeKind, OperatorTopology};
use rillflow::window::WindowSpec;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn collecting_sink() -> (OutputSink, Arc<Mutex<Vec<Record>>>) {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let inner = collected.clone();
    let sink: OutputSink = Arc::new(move |rec| {
        inner.lock().unwrap().push(rec);
    });
    (sink, collected)
}

fn decode_aggregates(collected: &Arc<Mutex<Vec<Record>>>) -> Vec<WindowAggregate> {
    collected
        .lock()
        .unwrap()
        .iter()
        .map(|rec| bincode::deserialize(&rec.payload).unwrap())
        .collect()
}

fn input(key: &str, event_time: i64, partition: u32, offset: i64) -> Record {
    // ingest watermark rides along with event time in these tests
    Record::new(key, vec![], event_time, partition, offset, event_time)
}

#[tokio::test]
async fn tumbling_windows_across_partitions() -> Result<()> {
    init_tracing();
    let (sink, collected) = collecting_sink();
    let config = EngineConfig {
        group_id: "it-tumbling".to_string(),
        partitions: vec![0, 1],
        window: WindowSpec::tumbling(10_000)?,
        ..Default::default()
    };
    let engine = StreamEngine::builder()
        .with_config(config)
        .with_member_id("m-a")
        .with_sink(sink)
        .build()?;
    engine.start().await?;

    engine.deliver(input("a", 1_000, 0, 0)).await?;
    engine.deliver(input("a", 3_000, 0, 1)).await?;
    engine.deliver(input("a", 12_000, 0, 2)).await?;

    engine.deliver(input("b", 5_000, 1, 0)).await?;
    engine.deliver(input("b", 15_000, 1, 1)).await?;

    tokio::time::sleep(Duration::from_millis(300)).await;
    engine.stop().await?;

    let aggregates = decode_aggregates(&collected);
    assert_eq!(aggregates.len(), 2);

    let a = aggregates.iter().find(|w| w.key == "a").unwrap();
    assert_eq!((a.window_start, a.window_end), (0, 10_000));
    assert_eq!(a.record_count, 2);
    assert_eq!(a.max_event_time, 3_000);

    let b = aggregates.iter().find(|w| w.key == "b").unwrap();
    assert_eq!((b.window_start, b.window_end), (0, 10_000));
    assert_eq!(b.record_count, 1);

    let stats = engine.stats();
    assert_eq!(stats.records_processed, 5);
    assert_eq!(stats.windows_completed, 2);
    Ok(())
}

#[tokio::test]
async fn session_window_merges_then_splits() -> Result<()> {
    init_tracing();
    let (sink, collected) = collecting_sink();
    let config = EngineConfig {
        group_id: "it-session".to_string(),
        partitions: vec![0],
        window: WindowSpec::session(30_000)?,
        ..Default::default()
    };
    let engine = StreamEngine::builder()
        .with_config(config)
        .with_member_id("m-a")
        .with_sink(sink)
        .build()?;
    engine.start().await?;

    // Two events within the gap merge into one session; the third,
    // past the gap, seals it and opens a new one.
    engine.deliver(input("s", 2_000, 0, 0)).await?;
    engine.deliver(input("s", 22_000, 0, 1)).await?;
    engine.deliver(input("s", 100_000, 0, 2)).await?;

    tokio::time::sleep(Duration::from_millis(300)).await;
    engine.stop().await?;

    let aggregates = decode_aggregates(&collected);
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0].window_start, 2_000);
    assert_eq!(aggregates[0].window_end, 52_000);
    assert_eq!(aggregates[0].record_count, 2);
    Ok(())
}

#[tokio::test]
async fn topology_post_processes_window_aggregates() -> Result<()> {
    init_tracing();
    // The aggregate record's event time is the window's max event time,
    // so this filter keeps only windows with recent activity; the map
    // re-tags the key for downstream routing.
    let mut topo = OperatorTopology::new();
    topo.add_source("src")?;
    topo.add_operator("flt", NodeKind::Filter, &["src"])?;
    topo.add_operator("map", NodeKind::Map, &["flt"])?;
    topo.add_sink("out", &["map"])?;
    topo.set_filter("flt", Arc::new(|rec: &Record| rec.event_time >= 10_000))?;
    topo.set_transform(
        "map",
        Arc::new(|mut rec: Record| {
            rec.key = format!("agg-{}", rec.key);
            Ok(rec)
        }),
    )?;

    let (sink, collected) = collecting_sink();
    let config = EngineConfig {
        group_id: "it-topology".to_string(),
        partitions: vec![0],
        window: WindowSpec::tumbling(10_000)?,
        ..Default::default()
    };
    let engine = StreamEngine::builder()
        .with_config(config)
        .with_member_id("m-a")
        .with_topology(topo)
        .with_sink(sink)
        .build()?;
    engine.start().await?;

    engine.deliver(input("k", 1_000, 0, 0)).await?;
    // Completes [0, 10000): max event time 1000, filtered out
    engine.deliver(input("k", 12_000, 0, 1)).await?;
    // Completes [10000, 20000): max event time 12000, passes
    engine.deliver(input("k", 22_000, 0, 2)).await?;

    tokio::time::sleep(Duration::from_millis(300)).await;
    engine.stop().await?;

    let out = collected.lock().unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].key, "agg-k");
    let aggregate: WindowAggregate = bincode::deserialize(&out[0].payload).unwrap();
    assert_eq!((aggregate.window_start, aggregate.window_end), (10_000, 20_000));

    let stats = engine.stats();
    assert_eq!(stats.records_processed, 3);
    assert_eq!(stats.windows_completed, 2);
    assert_eq!(stats.records_dropped, 1);
    Ok(())
}

#[tokio::test]
async fn restart_resumes_from_checkpoint_and_dedupes_replay() -> Result<()> {
    init_tracing();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let config = EngineConfig {
        group_id: "it-restart".to_string(),
        partitions: vec![0],
        window: WindowSpec::tumbling(10_000)?,
        checkpoint_interval: 2,
        semantics: ProcessingSemantics::ExactlyOnce,
        ..Default::default()
    };

    // First run: four records, two checkpoints, latest at offset 3
    {
        let (sink, _) = collecting_sink();
        let engine = StreamEngine::builder()
            .with_config(config.clone())
            .with_checkpoint_store(store.clone())
            .with_member_id("m-a")
            .with_sink(sink)
            .build()?;
        engine.start().await?;
        for offset in 0..4 {
            engine.deliver(input("k", 1_000 + offset, 0, offset)).await?;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        engine.stop().await?;
        assert_eq!(engine.stats().checkpoints_taken, 2);
    }
    let latest = store.latest(0).await?.unwrap();
    assert_eq!(latest.offset, 3);

    // Second run against the same store: the source replays from the
    // start; everything at or below the checkpoint offset is suppressed.
    let (sink, collected) = collecting_sink();
    let engine = StreamEngine::builder()
        .with_config(config)
        .with_checkpoint_store(store.clone())
        .with_member_id("m-a")
        .with_sink(sink)
        .build()?;
    engine.start().await?;
    for offset in 0..6 {
        engine.deliver(input("k", 1_000 + offset, 0, offset)).await?;
    }
    // The replayed offsets were suppressed but their window
    // contributions came back with the restored snapshot; a watermark
    // past the window end drains all six records.
    engine.deliver(input("k", 12_000, 0, 6)).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    engine.stop().await?;

    let stats = engine.stats();
    assert_eq!(stats.records_deduped, 4);
    assert_eq!(stats.records_processed, 3);
    let aggregates = decode_aggregates(&collected);
    assert_eq!(aggregates.len(), 1);
    assert_eq!((aggregates[0].window_start, aggregates[0].window_end), (0, 10_000));
    assert_eq!(aggregates[0].record_count, 6);
    Ok(())
}

#[tokio::test]
async fn late_records_honored_within_allowed_lateness() -> Result<()> {
    init_tracing();
    let (sink, collected) = collecting_sink();
    let config = EngineConfig {
        group_id: "it-lateness".to_string(),
        partitions: vec![0],
        window: WindowSpec::tumbling(10_000)?,
        allowed_lateness_ms: 5_000,
        ..Default::default()
    };
    let engine = StreamEngine::builder()
        .with_config(config)
        .with_member_id("m-a")
        .with_sink(sink)
        .build()?;
    engine.start().await?;

    engine.deliver(input("k", 1_000, 0, 0)).await?;
    // Watermark 12000 is past the window end, but lateness keeps the
    // window open; this late record still lands in [0, 10000).
    engine
        .deliver(Record::new("k", vec![], 9_000, 0, 1, 12_000))
        .await?;
    // Watermark 15000 >= 10000 + 5000 completes it
    engine
        .deliver(Record::new("k", vec![], 16_000, 0, 2, 15_000))
        .await?;

    tokio::time::sleep(Duration::from_millis(300)).await;
    engine.stop().await?;

    let aggregates = decode_aggregates(&collected);
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0].record_count, 2);
    assert_eq!(aggregates[0].max_event_time, 9_000);
    Ok(())
}
