//! Error types for the stream engine
//!
//! Every subsystem has its own error enum; the top-level [`EngineError`]
//! wraps them so callers can match on the failure domain. Per-record
//! failures are recovered locally by the partition processor and never
//! reach the caller; coordination and configuration errors do.

use thiserror::Error;

/// Top-level engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    /// Window assignment and lifecycle errors
    #[error("window error: {0}")]
    Window(#[from] WindowError),

    /// Consumer group coordination errors
    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// Partition processor errors
    #[error("process error: {0}")]
    Process(#[from] ProcessError),

    /// Checkpoint store errors
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Operator topology errors
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Configuration errors, fatal at engine startup
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Window assignment and lifecycle errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// Window size is invalid
    #[error("invalid window size: {size_ms}ms, must be greater than 0")]
    InvalidSize { size_ms: i64 },

    /// Slide is invalid for sliding windows
    #[error("invalid slide: {slide_ms}ms, must be greater than 0 and at most window size {size_ms}ms")]
    InvalidSlide { slide_ms: i64, size_ms: i64 },

    /// Gap is invalid for session windows
    #[error("invalid session gap: {gap_ms}ms, must be greater than 0")]
    InvalidGap { gap_ms: i64 },

    /// Window bounds are inverted or empty
    #[error("invalid window bounds: [{start}, {end})")]
    InvalidBounds { start: i64, end: i64 },

    /// Allowed lateness is negative
    #[error("invalid allowed lateness: {lateness_ms}ms, must be non-negative")]
    InvalidLateness { lateness_ms: i64 },
}

/// Consumer group coordination errors
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Partition is not part of the group's partition set
    #[error("unknown partition: {partition_id}")]
    UnknownPartition { partition_id: u32 },

    /// Member is not part of the group
    #[error("unknown member: {member_id}")]
    UnknownMember { member_id: String },

    /// Member id already registered
    #[error("duplicate member: {member_id}")]
    DuplicateMember { member_id: String },

    /// Committed offsets must be monotonically increasing per partition
    #[error("offset regression on partition {partition_id}: committed {committed}, attempted {attempted}")]
    OffsetRegression {
        partition_id: u32,
        committed: i64,
        attempted: i64,
    },
}

/// Partition processor errors
#[derive(Error, Debug)]
pub enum ProcessError {
    /// A record's transform failed; recovered via checkpoint restore
    #[error("record failed on partition {partition_id} at offset {offset}: {reason}")]
    RecordFailed {
        partition_id: u32,
        offset: i64,
        reason: String,
    },

    /// Bounded submit wait exceeded the caller-supplied deadline; retryable
    #[error("backpressure timeout on partition {partition_id} after {waited_ms}ms")]
    BackpressureTimeout { partition_id: u32, waited_ms: u64 },

    /// Processor has been stopped and no longer accepts records
    #[error("processor for partition {partition_id} is stopped")]
    Stopped { partition_id: u32 },
}

/// Checkpoint store errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Checkpoint offsets must be monotonically increasing per partition
    #[error("non-monotonic checkpoint offset on partition {partition_id}: latest {latest}, attempted {attempted}")]
    NonMonotonicOffset {
        partition_id: u32,
        latest: i64,
        attempted: i64,
    },

    /// Underlying store failed
    #[error("checkpoint store failure on partition {partition_id}: {reason}")]
    StoreFailed { partition_id: u32, reason: String },

    /// Snapshot could not be encoded or decoded
    #[error("snapshot codec failure: {reason}")]
    SnapshotCodec { reason: String },
}

/// Operator topology errors
#[derive(Error, Debug)]
pub enum TopologyError {
    /// Node id already exists
    #[error("duplicate node id: {id}")]
    DuplicateNode { id: String },

    /// Referenced node does not exist
    #[error("unknown node id: {id}")]
    UnknownNode { id: String },

    /// The node graph contains a cycle
    #[error("cycle detected involving node {id}")]
    Cycle { id: String },

    /// A topology must have exactly one source
    #[error("topology requires exactly one source node, found {count}")]
    SourceCount { count: usize },

    /// A topology must have at least one sink
    #[error("topology requires at least one sink node")]
    MissingSink,

    /// Transform or filter attached to a node of the wrong kind
    #[error("node {id} has kind {kind}, expected {expected}")]
    KindMismatch {
        id: String,
        kind: String,
        expected: String,
    },
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<bincode::Error> for EngineError {
    fn from(err: bincode::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
