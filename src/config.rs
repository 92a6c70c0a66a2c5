//! Engine configuration

use crate::error::{EngineError, Result};
use crate::window::WindowSpec;
use serde::{Deserialize, Serialize};

/// Delivery guarantee for record processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingSemantics {
    /// Records may be processed more than once after a restore
    AtLeastOnce,
    /// Replayed records are suppressed by offset identity
    ExactlyOnce,
}

/// Static configuration for a [`StreamEngine`](crate::engine::StreamEngine).
///
/// Validated once at engine build; invalid configuration is fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Consumer group this engine instance joins
    pub group_id: String,
    /// Partitions the group consumes
    pub partitions: Vec<u32>,
    /// Windowing strategy applied per key
    pub window: WindowSpec,
    /// How long past a window's end late records are admitted, in ms
    #[serde(default)]
    pub allowed_lateness_ms: i64,
    /// Checkpoint after every N processed records
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
    /// Bound of each partition's ingestion queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Delivery guarantee
    #[serde(default = "default_semantics")]
    pub semantics: ProcessingSemantics,
}

fn default_checkpoint_interval() -> u64 {
    100
}

fn default_queue_capacity() -> usize {
    1_024
}

fn default_semantics() -> ProcessingSemantics {
    ProcessingSemantics::ExactlyOnce
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            group_id: "default-group".to_string(),
            partitions: vec![0],
            window: WindowSpec::Tumbling { size_ms: 60_000 },
            allowed_lateness_ms: 0,
            checkpoint_interval: default_checkpoint_interval(),
            queue_capacity: default_queue_capacity(),
            semantics: default_semantics(),
        }
    }
}

impl EngineConfig {
    /// Validate all parameters
    pub fn validate(&self) -> Result<()> {
        if self.group_id.is_empty() {
            return Err(EngineError::Configuration {
                reason: "group_id must not be empty".to_string(),
            });
        }
        if self.partitions.is_empty() {
            return Err(EngineError::Configuration {
                reason: "at least one partition is required".to_string(),
            });
        }
        let mut seen = std::collections::BTreeSet::new();
        for p in &self.partitions {
            if !seen.insert(*p) {
                return Err(EngineError::Configuration {
                    reason: format!("duplicate partition id: {p}"),
                });
            }
        }
        if self.checkpoint_interval == 0 {
            return Err(EngineError::Configuration {
                reason: "checkpoint_interval must be greater than 0".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(EngineError::Configuration {
                reason: "queue_capacity must be greater than 0".to_string(),
            });
        }
        if self.allowed_lateness_ms < 0 {
            return Err(EngineError::Configuration {
                reason: format!(
                    "allowed_lateness_ms must be non-negative, got {}",
                    self.allowed_lateness_ms
                ),
            });
        }
        self.window.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_empty_partitions() {
        let config = EngineConfig {
            partitions: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_partitions() {
        let config = EngineConfig {
            partitions: vec![0, 1, 0],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_interval_and_capacity() {
        let config = EngineConfig {
            checkpoint_interval: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_invalid_window() {
        let config = EngineConfig {
            window: WindowSpec::Tumbling { size_ms: 0 },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::Window(_))
        ));
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{
            "group_id": "orders",
            "partitions": [0, 1, 2],
            "window": { "type": "tumbling", "size_ms": 10000 }
        }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.checkpoint_interval, 100);
        assert_eq!(config.queue_capacity, 1_024);
        assert_eq!(config.semantics, ProcessingSemantics::ExactlyOnce);
        config.validate().unwrap();
    }
}
