//! Consumer-group coordination
//!
//! Tracks group membership, partition ownership, and committed offsets.
//! Every membership or partition change triggers a full range rebalance:
//! members are sorted lexicographically, each receives a contiguous run
//! of floor(P/M) partitions, and the first P mod M members get one
//! extra. No stickiness is attempted; assignments are recomputed from
//! scratch and the generation counter is bumped.
//!
//! All state lives behind a single mutex. Operations are short and
//! synchronous, so contention is bounded by rebalance cost.

use crate::error::CoordinatorError;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct GroupState {
    members: BTreeSet<String>,
    partitions: BTreeSet<u32>,
    assignments: HashMap<u32, String>,
    offsets: HashMap<u32, i64>,
    generation: u64,
}

impl GroupState {
    /// Recompute all assignments with the range strategy
    fn rebalance(&mut self) {
        self.assignments.clear();
        self.generation += 1;
        if self.members.is_empty() {
            return;
        }
        let members: Vec<&String> = self.members.iter().collect();
        let partitions: Vec<u32> = self.partitions.iter().copied().collect();
        let base = partitions.len() / members.len();
        let extra = partitions.len() % members.len();

        let mut cursor = 0usize;
        for (i, member) in members.iter().enumerate() {
            let take = base + usize::from(i < extra);
            for &partition in &partitions[cursor..cursor + take] {
                self.assignments.insert(partition, (*member).clone());
            }
            cursor += take;
        }
    }
}

/// Coordinator for one consumer group
#[derive(Debug)]
pub struct ConsumerGroupCoordinator {
    group_id: String,
    state: Mutex<GroupState>,
}

impl ConsumerGroupCoordinator {
    /// Create a coordinator with no members or partitions
    pub fn new<S: Into<String>>(group_id: S) -> Self {
        Self {
            group_id: group_id.into(),
            state: Mutex::new(GroupState::default()),
        }
    }

    /// The group this coordinator manages
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Register a member and rebalance
    pub fn add_member(&self, member_id: &str) -> Result<(), CoordinatorError> {
        let mut state = self.lock();
        if !state.members.insert(member_id.to_string()) {
            return Err(CoordinatorError::DuplicateMember {
                member_id: member_id.to_string(),
            });
        }
        state.rebalance();
        info!(
            group = %self.group_id,
            member = member_id,
            generation = state.generation,
            "member joined"
        );
        Ok(())
    }

    /// Remove a member and rebalance its partitions to the survivors
    pub fn remove_member(&self, member_id: &str) -> Result<(), CoordinatorError> {
        let mut state = self.lock();
        if !state.members.remove(member_id) {
            return Err(CoordinatorError::UnknownMember {
                member_id: member_id.to_string(),
            });
        }
        state.rebalance();
        info!(
            group = %self.group_id,
            member = member_id,
            generation = state.generation,
            "member left"
        );
        Ok(())
    }

    /// Register a partition with the group and rebalance.
    ///
    /// Registering an already-known partition is a no-op.
    pub fn add_partition(&self, partition_id: u32) {
        let mut state = self.lock();
        if state.partitions.insert(partition_id) {
            state.rebalance();
        }
    }

    /// Partitions currently assigned to a member
    pub fn partitions_for(&self, member_id: &str) -> BTreeSet<u32> {
        let state = self.lock();
        state
            .assignments
            .iter()
            .filter(|(_, m)| m.as_str() == member_id)
            .map(|(p, _)| *p)
            .collect()
    }

    /// The member a partition is assigned to, if any
    pub fn assignment_of(&self, partition_id: u32) -> Option<String> {
        self.lock().assignments.get(&partition_id).cloned()
    }

    /// Commit an offset for a partition.
    ///
    /// Offsets are monotonic: committing at or below the stored offset
    /// is rejected and the stored value is unchanged.
    pub fn commit_offset(&self, partition_id: u32, offset: i64) -> Result<(), CoordinatorError> {
        let mut state = self.lock();
        if !state.partitions.contains(&partition_id) {
            warn!(
                group = %self.group_id,
                partition_id,
                "offset commit for unknown partition rejected"
            );
            return Err(CoordinatorError::UnknownPartition { partition_id });
        }
        if let Some(&committed) = state.offsets.get(&partition_id) {
            if offset <= committed {
                return Err(CoordinatorError::OffsetRegression {
                    partition_id,
                    committed,
                    attempted: offset,
                });
            }
        }
        state.offsets.insert(partition_id, offset);
        Ok(())
    }

    /// The committed offset for a partition, if one exists
    pub fn committed_offset(&self, partition_id: u32) -> Option<i64> {
        self.lock().offsets.get(&partition_id).copied()
    }

    /// Current rebalance generation
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GroupState> {
        // A poisoned lock means a panic mid-rebalance; the state is a
        // plain recomputable map, so continue with it.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
