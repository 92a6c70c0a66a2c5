//! Core record type and collaborator interfaces
//!
//! This module provides the fundamental types shared across the engine:
//! - [`Record`]: the unit of ingestion, immutable once constructed
//! - [`TimeSource`]: clock abstraction, substitutable for deterministic tests
//! - [`OutputSink`]: the callback invoked once per emitted window aggregate

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A single record flowing through the engine.
///
/// Offsets are strictly increasing per partition and serve as the unique
/// identity used for deduplication. The ingestion boundary owns record
/// construction; the engine never mutates a record after it is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Partition key used for windowing and watermark tracking
    pub key: String,
    /// Opaque payload bytes
    pub payload: Vec<u8>,
    /// Event time in milliseconds since epoch
    pub event_time: i64,
    /// Partition this record belongs to
    pub partition_id: u32,
    /// Offset within the partition; the dedupe identity
    pub offset: i64,
    /// Watermark asserted by the source at ingestion time
    pub ingest_watermark: i64,
}

impl Record {
    /// Create a new record
    pub fn new<K: Into<String>>(
        key: K,
        payload: Vec<u8>,
        event_time: i64,
        partition_id: u32,
        offset: i64,
        ingest_watermark: i64,
    ) -> Self {
        Self {
            key: key.into(),
            payload,
            event_time,
            partition_id,
            offset,
            ingest_watermark,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Record {{ key: {}, partition: {}, offset: {}, event_time: {} }}",
            self.key, self.partition_id, self.offset, self.event_time
        )
    }
}

/// Clock abstraction supplying wall-clock timestamps.
///
/// The engine only reads time for checkpoint metadata; all windowing is
/// event-time driven. Substitute [`FixedClock`] in tests for determinism.
pub trait TimeSource: Send + Sync {
    /// Current time in milliseconds since epoch
    fn now(&self) -> i64;
}

/// System clock backed by chrono
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Fixed clock for deterministic tests; advances only when told to
#[derive(Debug, Default)]
pub struct FixedClock {
    now_ms: AtomicI64,
}

impl FixedClock {
    /// Create a fixed clock at the given timestamp
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    /// Set the current time
    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Advance the clock by the given number of milliseconds
    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl TimeSource for FixedClock {
    fn now(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Output sink callback, invoked once per completed window whose
/// aggregate survives the topology's filters. Must be safe to call
/// concurrently from multiple partition workers.
pub type OutputSink = Arc<dyn Fn(Record) + Send + Sync>;
