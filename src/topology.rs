//! Operator topology
//!
//! A declarative DAG of operator nodes describing the per-record
//! pipeline: exactly one source, any number of intermediate operators,
//! at least one sink. The topology is built up front, validated once,
//! and executed in topological order for every record. A filter that
//! drops a record stops propagation to everything downstream of it.

use crate::error::TopologyError;
use crate::record::Record;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// The role a node plays in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Record entry point; exactly one per topology
    Source,
    /// One-to-one fallible transform
    Map,
    /// Predicate; dropping a record stops downstream propagation
    Filter,
    /// Keying stage; records pass through, grouping is the window layer's job
    GroupBy,
    /// Aggregation stage; per-window aggregation happens at drain time
    Aggregate,
    /// Record exit point; at least one per topology
    Sink,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Source => "source",
            NodeKind::Map => "map",
            NodeKind::Filter => "filter",
            NodeKind::GroupBy => "group_by",
            NodeKind::Aggregate => "aggregate",
            NodeKind::Sink => "sink",
        };
        f.write_str(s)
    }
}

/// Fallible one-to-one record transform, attached to Map nodes
pub type TransformFn =
    Arc<dyn Fn(Record) -> std::result::Result<Record, String> + Send + Sync>;

/// Record predicate, attached to Filter nodes
pub type FilterFn = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Result of applying a single node to a record
pub enum ApplyOutcome {
    /// Record continues downstream, possibly transformed
    Forward(Record),
    /// A filter dropped the record
    Dropped,
}

struct TopologyNode {
    id: String,
    kind: NodeKind,
    upstream: BTreeSet<String>,
    transform: Option<TransformFn>,
    filter: Option<FilterFn>,
}

impl fmt::Debug for TopologyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologyNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("upstream", &self.upstream)
            .finish()
    }
}

/// The operator DAG executed per record
#[derive(Debug, Default)]
pub struct OperatorTopology {
    nodes: HashMap<String, TopologyNode>,
    insertion_order: Vec<String>,
}

impl OperatorTopology {
    /// Create an empty topology
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the source node. A topology has exactly one.
    pub fn add_source<S: Into<String>>(&mut self, id: S) -> Result<(), TopologyError> {
        self.add_node(id.into(), NodeKind::Source, BTreeSet::new())
    }

    /// Add an intermediate operator node with the given upstreams,
    /// returning its id
    pub fn add_operator<S: Into<String>>(
        &mut self,
        id: S,
        kind: NodeKind,
        upstream: &[&str],
    ) -> Result<String, TopologyError> {
        let id = id.into();
        let up: BTreeSet<String> = upstream.iter().map(|s| s.to_string()).collect();
        self.add_node(id.clone(), kind, up)?;
        Ok(id)
    }

    /// Add a sink node fed by the given upstreams
    pub fn add_sink<S: Into<String>>(
        &mut self,
        id: S,
        upstream: &[&str],
    ) -> Result<(), TopologyError> {
        let up: BTreeSet<String> = upstream.iter().map(|s| s.to_string()).collect();
        self.add_node(id.into(), NodeKind::Sink, up)
    }

    fn add_node(
        &mut self,
        id: String,
        kind: NodeKind,
        upstream: BTreeSet<String>,
    ) -> Result<(), TopologyError> {
        if self.nodes.contains_key(&id) {
            return Err(TopologyError::DuplicateNode { id });
        }
        for up in &upstream {
            if !self.nodes.contains_key(up) {
                return Err(TopologyError::UnknownNode { id: up.clone() });
            }
        }
        self.insertion_order.push(id.clone());
        self.nodes.insert(
            id.clone(),
            TopologyNode {
                id,
                kind,
                upstream,
                transform: None,
                filter: None,
            },
        );
        Ok(())
    }

    /// Attach a transform to a Map node
    pub fn set_transform(&mut self, id: &str, transform: TransformFn) -> Result<(), TopologyError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| TopologyError::UnknownNode { id: id.to_string() })?;
        if node.kind != NodeKind::Map {
            return Err(TopologyError::KindMismatch {
                id: id.to_string(),
                kind: node.kind.to_string(),
                expected: NodeKind::Map.to_string(),
            });
        }
        node.transform = Some(transform);
        Ok(())
    }

    /// Attach a predicate to a Filter node
    pub fn set_filter(&mut self, id: &str, filter: FilterFn) -> Result<(), TopologyError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| TopologyError::UnknownNode { id: id.to_string() })?;
        if node.kind != NodeKind::Filter {
            return Err(TopologyError::KindMismatch {
                id: id.to_string(),
                kind: node.kind.to_string(),
                expected: NodeKind::Filter.to_string(),
            });
        }
        node.filter = Some(filter);
        Ok(())
    }

    /// Validate structure: exactly one source, at least one sink, acyclic
    pub fn validate(&self) -> Result<(), TopologyError> {
        let sources = self
            .nodes
            .values()
            .filter(|n| n.kind == NodeKind::Source)
            .count();
        if sources != 1 {
            return Err(TopologyError::SourceCount { count: sources });
        }
        if !self.nodes.values().any(|n| n.kind == NodeKind::Sink) {
            return Err(TopologyError::MissingSink);
        }
        self.execution_order()?;
        Ok(())
    }

    /// Topological execution order, erroring on cycles.
    ///
    /// Depth-first post-order from the roots, reversed. Ties are broken
    /// by insertion order so execution is deterministic.
    pub fn execution_order(&self) -> Result<Vec<String>, TopologyError> {
        let mut downstream: HashMap<&str, Vec<&str>> = HashMap::new();
        for id in &self.insertion_order {
            let node = &self.nodes[id];
            for up in &node.upstream {
                downstream.entry(up.as_str()).or_default().push(id.as_str());
            }
        }

        // 0 = unvisited, 1 = on stack, 2 = done
        let mut mark: HashMap<&str, u8> = HashMap::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        fn visit<'a>(
            id: &'a str,
            downstream: &HashMap<&'a str, Vec<&'a str>>,
            mark: &mut HashMap<&'a str, u8>,
            order: &mut Vec<String>,
        ) -> Result<(), TopologyError> {
            match mark.get(id) {
                Some(2) => return Ok(()),
                Some(1) => {
                    return Err(TopologyError::Cycle { id: id.to_string() });
                }
                _ => {}
            }
            mark.insert(id, 1);
            if let Some(next) = downstream.get(id) {
                for n in next {
                    visit(n, downstream, mark, order)?;
                }
            }
            mark.insert(id, 2);
            order.push(id.to_string());
            Ok(())
        }

        for id in &self.insertion_order {
            if self.nodes[id].upstream.is_empty() {
                visit(id, &downstream, &mut mark, &mut order)?;
            }
        }
        if order.len() != self.nodes.len() {
            // Nodes unreachable from any root can only exist inside a cycle
            let stuck = self
                .insertion_order
                .iter()
                .find(|id| mark.get(id.as_str()) != Some(&2))
                .cloned()
                .unwrap_or_default();
            return Err(TopologyError::Cycle { id: stuck });
        }
        order.reverse();
        Ok(order)
    }

    /// Apply a single node to a record
    pub fn apply(&self, node_id: &str, record: Record) -> crate::error::Result<ApplyOutcome> {
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| TopologyError::UnknownNode {
                id: node_id.to_string(),
            })?;
        match node.kind {
            NodeKind::Map => {
                if let Some(transform) = &node.transform {
                    let partition_id = record.partition_id;
                    let offset = record.offset;
                    match transform(record) {
                        Ok(rec) => Ok(ApplyOutcome::Forward(rec)),
                        Err(reason) => Err(crate::error::ProcessError::RecordFailed {
                            partition_id,
                            offset,
                            reason,
                        }
                        .into()),
                    }
                } else {
                    Ok(ApplyOutcome::Forward(record))
                }
            }
            NodeKind::Filter => {
                if let Some(filter) = &node.filter {
                    if filter(&record) {
                        Ok(ApplyOutcome::Forward(record))
                    } else {
                        Ok(ApplyOutcome::Dropped)
                    }
                } else {
                    Ok(ApplyOutcome::Forward(record))
                }
            }
            // Grouping and aggregation are handled by the window layer;
            // these stages pass records through untouched.
            NodeKind::Source | NodeKind::GroupBy | NodeKind::Aggregate | NodeKind::Sink => {
                Ok(ApplyOutcome::Forward(record))
            }
        }
    }

    /// Run a record through the whole pipeline in execution order.
    ///
    /// Returns `Ok(None)` if a filter dropped the record, otherwise the
    /// record as it leaves the last node. A transform failure carries
    /// the record's partition and offset for diagnostics.
    pub fn run(&self, record: Record) -> crate::error::Result<Option<Record>> {
        let order = self.execution_order()?;
        self.run_ordered(&order, record)
    }

    /// Like [`run`](Self::run) with a precomputed execution order,
    /// avoiding the per-record sort
    pub fn run_ordered(
        &self,
        order: &[String],
        record: Record,
    ) -> crate::error::Result<Option<Record>> {
        let mut current = record;
        for id in order {
            match self.apply(id, current)? {
                ApplyOutcome::Forward(rec) => current = rec,
                ApplyOutcome::Dropped => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Number of nodes in the topology
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// A minimal pass-through topology: source feeding one sink
pub fn passthrough() -> OperatorTopology {
    let mut topo = OperatorTopology::new();
    // Infallible: fresh topology, distinct ids
    let _ = topo.add_source("source");
    let _ = topo.add_sink("sink", &["source"]);
    topo
}
