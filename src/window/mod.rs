//! Event-time windowing
//!
//! Records are grouped per partition-key into tumbling, sliding, session,
//! or global windows. The [`WindowManager`] owns all open windows for one
//! partition and is the only mutator of a window until it is drained.
//!
//! # Completion
//!
//! A window completes once the key's watermark passes
//! `end + allowed_lateness`. Global windows never complete. Drained
//! windows are removed and returned exactly once.
//!
//! # Session semantics
//!
//! At most one session is open per key. A record extends the most
//! recently touched session when `event_time < end + gap`, pushing the
//! end out to `event_time + gap` (never shrinking it). Otherwise the old
//! session is left to drain and a new one opens. A late record that could
//! plausibly belong to an earlier, already-closed activity burst still
//! attaches to the most recent session; concurrent sessions per key are
//! deliberately not supported.

pub mod assigner;
pub mod types;

pub use assigner::{sliding_bounds, tumbling_bounds};
pub use types::{Window, WindowSpec};

use crate::error::WindowError;
use crate::record::Record;
use std::collections::HashMap;
use tracing::trace;
use types::{GLOBAL_END, GLOBAL_START};

/// Per-partition window state: open windows keyed by partition-key.
#[derive(Debug)]
pub struct WindowManager {
    spec: WindowSpec,
    allowed_lateness_ms: i64,
    open: HashMap<String, Vec<Window>>,
    windows_opened: u64,
}

impl WindowManager {
    /// Create a manager for the given spec and allowed lateness
    pub fn new(spec: WindowSpec, allowed_lateness_ms: i64) -> Result<Self, WindowError> {
        spec.validate()?;
        if allowed_lateness_ms < 0 {
            return Err(WindowError::InvalidLateness {
                lateness_ms: allowed_lateness_ms,
            });
        }
        Ok(Self {
            spec,
            allowed_lateness_ms,
            open: HashMap::new(),
            windows_opened: 0,
        })
    }

    /// Assign a record to one or more windows for its key, creating or
    /// extending windows as needed. Returns the bounds of every window
    /// the record now belongs to.
    pub fn assign(&mut self, record: &Record) -> Result<Vec<(i64, i64)>, WindowError> {
        match self.spec {
            WindowSpec::Tumbling { size_ms } => {
                let bounds = vec![tumbling_bounds(size_ms, record.event_time)];
                self.add_to_windows(record, &bounds)?;
                Ok(bounds)
            }
            WindowSpec::Sliding { size_ms, slide_ms } => {
                let bounds = sliding_bounds(size_ms, slide_ms, record.event_time);
                self.add_to_windows(record, &bounds)?;
                Ok(bounds)
            }
            WindowSpec::Session { gap_ms } => self.assign_session(record, gap_ms),
            WindowSpec::Global => {
                let bounds = vec![(GLOBAL_START, GLOBAL_END)];
                self.add_to_windows(record, &bounds)?;
                Ok(bounds)
            }
        }
    }

    /// Remove and return every window for `key` whose completion
    /// condition holds: `watermark >= end + allowed_lateness`. Global
    /// windows are always excluded. No window is returned twice.
    pub fn drain_completed(&mut self, key: &str, watermark: i64) -> Vec<Window> {
        let Some(windows) = self.open.remove(key) else {
            return Vec::new();
        };
        let mut drained = Vec::new();
        let mut kept = Vec::with_capacity(windows.len());
        for mut window in windows {
            if !window.is_global() && watermark >= window.end.saturating_add(self.allowed_lateness_ms) {
                window.complete = true;
                trace!(key = key, window = %window, "window completed");
                drained.push(window);
            } else {
                kept.push(window);
            }
        }
        if !kept.is_empty() {
            self.open.insert(key.to_string(), kept);
        }
        drained
    }

    /// Drain completed windows across every key, used on flush/shutdown
    pub fn drain_all(&mut self, watermark: i64) -> Vec<Window> {
        let keys: Vec<String> = self.open.keys().cloned().collect();
        let mut drained = Vec::new();
        for key in keys {
            drained.extend(self.drain_completed(&key, watermark));
        }
        drained
    }

    /// Number of currently open windows across all keys
    pub fn open_count(&self) -> usize {
        self.open.values().map(Vec::len).sum()
    }

    /// Total windows opened since construction or last clear
    pub fn windows_opened(&self) -> u64 {
        self.windows_opened
    }

    /// Discard all open windows
    pub fn clear(&mut self) {
        self.open.clear();
        self.windows_opened = 0;
    }

    /// The open windows per key, for checkpoint snapshots
    pub fn open_state(&self) -> &HashMap<String, Vec<Window>> {
        &self.open
    }

    /// Replace all open windows, used on checkpoint restore
    pub fn restore_state(&mut self, open: HashMap<String, Vec<Window>>) {
        self.windows_opened = open.values().map(Vec::len).sum::<usize>() as u64;
        self.open = open;
    }

    fn add_to_windows(
        &mut self,
        record: &Record,
        bounds: &[(i64, i64)],
    ) -> Result<(), WindowError> {
        let windows = self.open.entry(record.key.clone()).or_default();
        for &(start, end) in bounds {
            match windows.iter_mut().find(|w| w.start == start && w.end == end) {
                Some(window) => window.push(record.clone()),
                None => {
                    let mut window = Window::new(start, end)?;
                    window.push(record.clone());
                    windows.push(window);
                    self.windows_opened += 1;
                }
            }
        }
        Ok(())
    }

    fn assign_session(
        &mut self,
        record: &Record,
        gap_ms: i64,
    ) -> Result<Vec<(i64, i64)>, WindowError> {
        let windows = self.open.entry(record.key.clone()).or_default();
        if let Some(last) = windows.last_mut() {
            if record.event_time < last.end.saturating_add(gap_ms) {
                // Extend the most recently touched session; never shrink.
                last.start = last.start.min(record.event_time);
                last.end = last.end.max(record.event_time.saturating_add(gap_ms));
                last.push(record.clone());
                return Ok(vec![(last.start, last.end)]);
            }
        }
        let mut window = Window::new(record.event_time, record.event_time.saturating_add(gap_ms))?;
        window.push(record.clone());
        let bounds = (window.start, window.end);
        windows.push(window);
        self.windows_opened += 1;
        Ok(vec![bounds])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, event_time: i64, offset: i64) -> Record {
        Record::new(key, vec![], event_time, 0, offset, event_time)
    }

    #[test]
    fn tumbling_groups_by_interval() {
        // size=10000: events at 1000, 3000, 12000, 15000 produce two
        // windows with two records each.
        let mut mgr = WindowManager::new(WindowSpec::tumbling(10_000).unwrap(), 0).unwrap();
        for (i, t) in [1_000, 3_000, 12_000, 15_000].iter().enumerate() {
            mgr.assign(&record("k", *t, i as i64)).unwrap();
        }
        let mut drained = mgr.drain_completed("k", 20_000);
        drained.sort_by_key(|w| w.start);
        assert_eq!(drained.len(), 2);
        assert_eq!((drained[0].start, drained[0].end), (0, 10_000));
        assert_eq!(drained[0].records.len(), 2);
        assert_eq!((drained[1].start, drained[1].end), (10_000, 20_000));
        assert_eq!(drained[1].records.len(), 2);
        assert!(drained.iter().all(|w| w.complete));
    }

    #[test]
    fn sliding_record_in_multiple_windows() {
        let mut mgr =
            WindowManager::new(WindowSpec::sliding(1_000, 500).unwrap(), 0).unwrap();
        let assigned = mgr.assign(&record("k", 700, 0)).unwrap();
        assert_eq!(assigned, vec![(0, 1_000), (500, 1_500)]);
        assert_eq!(mgr.open_count(), 2);
    }

    #[test]
    fn session_merge_and_split() {
        // gap=30000: t=2000 and t=22000 merge into one window ending at
        // 52000; t=100000 starts a new session.
        let mut mgr = WindowManager::new(WindowSpec::session(30_000).unwrap(), 0).unwrap();
        mgr.assign(&record("k", 2_000, 0)).unwrap();
        let assigned = mgr.assign(&record("k", 22_000, 1)).unwrap();
        assert_eq!(assigned, vec![(2_000, 52_000)]);
        assert_eq!(mgr.open_count(), 1);

        let assigned = mgr.assign(&record("k", 100_000, 2)).unwrap();
        assert_eq!(assigned, vec![(100_000, 130_000)]);
        assert_eq!(mgr.open_count(), 2);
    }

    #[test]
    fn session_old_record_attaches_to_most_recent() {
        let mut mgr = WindowManager::new(WindowSpec::session(10_000).unwrap(), 0).unwrap();
        mgr.assign(&record("k", 50_000, 0)).unwrap();
        // Older than the session start but within the extension bound;
        // attaches instead of spawning a second session.
        let assigned = mgr.assign(&record("k", 45_000, 1)).unwrap();
        assert_eq!(assigned, vec![(45_000, 60_000)]);
        assert_eq!(mgr.open_count(), 1);
    }

    #[test]
    fn global_window_never_drained() {
        let mut mgr = WindowManager::new(WindowSpec::global(), 0).unwrap();
        mgr.assign(&record("k", 1_000, 0)).unwrap();
        mgr.assign(&record("k", 2_000, 1)).unwrap();
        assert_eq!(mgr.open_count(), 1);
        assert!(mgr.drain_completed("k", i64::MAX).is_empty());
        assert_eq!(mgr.open_count(), 1);
    }

    #[test]
    fn allowed_lateness_delays_completion() {
        let mut mgr =
            WindowManager::new(WindowSpec::tumbling(1_000).unwrap(), 500).unwrap();
        mgr.assign(&record("k", 100, 0)).unwrap();
        assert!(mgr.drain_completed("k", 1_000).is_empty());
        assert!(mgr.drain_completed("k", 1_499).is_empty());
        assert_eq!(mgr.drain_completed("k", 1_500).len(), 1);
    }

    #[test]
    fn drained_window_never_returned_twice() {
        let mut mgr = WindowManager::new(WindowSpec::tumbling(1_000).unwrap(), 0).unwrap();
        mgr.assign(&record("k", 100, 0)).unwrap();
        assert_eq!(mgr.drain_completed("k", 5_000).len(), 1);
        assert!(mgr.drain_completed("k", 5_000).is_empty());
        assert_eq!(mgr.open_count(), 0);
    }

    #[test]
    fn keys_are_independent() {
        let mut mgr = WindowManager::new(WindowSpec::tumbling(1_000).unwrap(), 0).unwrap();
        mgr.assign(&record("a", 100, 0)).unwrap();
        mgr.assign(&record("b", 100, 1)).unwrap();
        assert_eq!(mgr.drain_completed("a", 2_000).len(), 1);
        assert_eq!(mgr.open_count(), 1);
        assert_eq!(mgr.drain_completed("b", 2_000).len(), 1);
    }

    #[test]
    fn drain_all_covers_every_key() {
        let mut mgr = WindowManager::new(WindowSpec::tumbling(1_000).unwrap(), 0).unwrap();
        mgr.assign(&record("a", 100, 0)).unwrap();
        mgr.assign(&record("b", 1_100, 1)).unwrap();
        let drained = mgr.drain_all(2_100);
        assert_eq!(drained.len(), 2);
        assert_eq!(mgr.open_count(), 0);
    }

    #[test]
    fn state_roundtrip_preserves_open_windows() {
        let mut mgr = WindowManager::new(WindowSpec::tumbling(10_000).unwrap(), 0).unwrap();
        mgr.assign(&record("k", 1_000, 0)).unwrap();
        mgr.assign(&record("k", 3_000, 1)).unwrap();

        let encoded = serde_json::to_string(mgr.open_state()).unwrap();
        let mut restored =
            WindowManager::new(WindowSpec::tumbling(10_000).unwrap(), 0).unwrap();
        restored.restore_state(serde_json::from_str(&encoded).unwrap());

        assert_eq!(restored.open_count(), 1);
        let drained = restored.drain_completed("k", 10_000);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].records.len(), 2);
        assert_eq!(drained[0].max_event_time, 3_000);
    }

    #[test]
    fn negative_lateness_rejected() {
        assert!(matches!(
            WindowManager::new(WindowSpec::tumbling(1_000).unwrap(), -1),
            Err(WindowError::InvalidLateness { .. })
        ));
    }
}
