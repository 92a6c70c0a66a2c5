//! Watermark tracking for event-time processing
//!
//! A watermark is a monotonic bound asserting no further records with
//! event time below it will arrive for a key. Watermarks drive window
//! completion: a window is eligible to complete once the key's watermark
//! passes `end + allowed_lateness`.
//!
//! Watermark updates are monotonic non-decreasing per key; a regression
//! is clamped to the current value, never applied.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// A watermark timestamp in milliseconds since epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Watermark {
    /// The watermark timestamp
    pub timestamp: i64,
}

impl Watermark {
    /// Create a new watermark
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp }
    }

    /// The minimum possible watermark (nothing has been observed yet)
    pub fn min() -> Self {
        Self {
            timestamp: i64::MIN,
        }
    }

    /// True if this is the minimum watermark
    pub fn is_min(&self) -> bool {
        self.timestamp == i64::MIN
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::min()
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Watermark({})", self.timestamp)
    }
}

/// Per-key watermark state.
///
/// Tracks the maximum watermark observed per key and the maximum across
/// all keys (the partition watermark). Regressions are counted for
/// observability and otherwise ignored. Serializable so the per-key
/// marks survive checkpoint/restore.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct KeyedWatermarks {
    marks: HashMap<String, i64>,
    high: Watermark,
    regressions: u64,
}

impl KeyedWatermarks {
    /// Create empty watermark state
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a watermark for a key, clamping regressions.
    ///
    /// Returns the key's effective watermark after the observation.
    pub fn observe(&mut self, key: &str, watermark: i64) -> Watermark {
        let entry = self.marks.entry(key.to_string()).or_insert(i64::MIN);
        if watermark < *entry {
            self.regressions += 1;
            warn!(
                key = key,
                current = *entry,
                attempted = watermark,
                "watermark regression clamped"
            );
        } else {
            *entry = watermark;
            if watermark > self.high.timestamp {
                self.high = Watermark::new(watermark);
            }
        }
        Watermark::new(*entry)
    }

    /// Current watermark for a key
    pub fn get(&self, key: &str) -> Watermark {
        self.marks
            .get(key)
            .map(|ts| Watermark::new(*ts))
            .unwrap_or_default()
    }

    /// Maximum watermark observed across all keys
    pub fn high(&self) -> Watermark {
        self.high
    }

    /// Number of clamped regressions
    pub fn regressions(&self) -> u64 {
        self.regressions
    }

    /// Reset all state, used on checkpoint restore
    pub fn reset_to(&mut self, watermark: i64) {
        self.marks.clear();
        self.high = Watermark::new(watermark);
        self.regressions = 0;
    }
}
