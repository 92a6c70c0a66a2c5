//! Window types and specifications

use crate::error::WindowError;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel bounds for the global window, which never completes
pub(crate) const GLOBAL_START: i64 = i64::MIN;
pub(crate) const GLOBAL_END: i64 = i64::MAX;

/// Windowing strategy with validated parameters.
///
/// Invalid parameters are configuration errors, rejected at construction
/// and fatal to engine startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WindowSpec {
    /// Fixed-size, non-overlapping windows
    Tumbling { size_ms: i64 },
    /// Fixed-size, overlapping windows; a record may belong to several
    Sliding { size_ms: i64, slide_ms: i64 },
    /// Activity-gap windows; at most one open session per key
    Session { gap_ms: i64 },
    /// A single never-completing window per key
    Global,
}

impl WindowSpec {
    /// Tumbling windows of the given size
    pub fn tumbling(size_ms: i64) -> Result<Self, WindowError> {
        let spec = Self::Tumbling { size_ms };
        spec.validate()?;
        Ok(spec)
    }

    /// Sliding windows of the given size and slide
    pub fn sliding(size_ms: i64, slide_ms: i64) -> Result<Self, WindowError> {
        let spec = Self::Sliding { size_ms, slide_ms };
        spec.validate()?;
        Ok(spec)
    }

    /// Session windows with the given inactivity gap
    pub fn session(gap_ms: i64) -> Result<Self, WindowError> {
        let spec = Self::Session { gap_ms };
        spec.validate()?;
        Ok(spec)
    }

    /// A single global window per key
    pub fn global() -> Self {
        Self::Global
    }

    /// Validate the window parameters
    pub fn validate(&self) -> Result<(), WindowError> {
        match *self {
            Self::Tumbling { size_ms } => {
                if size_ms <= 0 {
                    return Err(WindowError::InvalidSize { size_ms });
                }
            }
            Self::Sliding { size_ms, slide_ms } => {
                if size_ms <= 0 {
                    return Err(WindowError::InvalidSize { size_ms });
                }
                if slide_ms <= 0 || slide_ms > size_ms {
                    return Err(WindowError::InvalidSlide { slide_ms, size_ms });
                }
            }
            Self::Session { gap_ms } => {
                if gap_ms <= 0 {
                    return Err(WindowError::InvalidGap { gap_ms });
                }
            }
            Self::Global => {}
        }
        Ok(())
    }
}

/// A window instance owning the records assigned to it.
///
/// Keyed by (partition-key, start, end); mutable only by the owning
/// [`WindowManager`](super::WindowManager) until drained. Serializable
/// so open windows survive checkpoint/restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Start of the window (inclusive), milliseconds since epoch
    pub start: i64,
    /// End of the window (exclusive)
    pub end: i64,
    /// Records assigned to this window, in arrival order
    pub records: Vec<Record>,
    /// Maximum event time among assigned records
    pub max_event_time: i64,
    /// Set when the window is drained as completed
    pub complete: bool,
}

impl Window {
    /// Create an empty window over `[start, end)`
    pub fn new(start: i64, end: i64) -> Result<Self, WindowError> {
        if start >= end {
            return Err(WindowError::InvalidBounds { start, end });
        }
        Ok(Self {
            start,
            end,
            records: Vec::new(),
            max_event_time: i64::MIN,
            complete: false,
        })
    }

    /// Add a record, tracking the maximum event time
    pub fn push(&mut self, record: Record) {
        self.max_event_time = self.max_event_time.max(record.event_time);
        self.records.push(record);
    }

    /// True if the timestamp falls within `[start, end)`
    pub fn contains(&self, event_time: i64) -> bool {
        event_time >= self.start && event_time < self.end
    }

    /// True for the global sentinel window
    pub fn is_global(&self) -> bool {
        self.start == GLOBAL_START && self.end == GLOBAL_END
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Window[{}, {})x{}", self.start, self.end, self.records.len())
    }
}
