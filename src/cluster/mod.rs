//! Cluster-facing seams: the snapshot accessor and side-effect hooks the
//! scheduler consumes, config persistence, and an in-memory implementation.

pub mod memory;
pub mod node;
pub mod storage;

use serde::{Deserialize, Serialize};

use crate::core::config::ClusterScheduleConfig;
use crate::core::errors::Result;
use node::{KeyRange, NodeId, NodeObservation};

/// Request handed to the leader-transfer engine for the evicted node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderEvictionRequest<'a> {
    /// Name of the requesting scheduler, used as the operator description.
    pub scheduler: &'a str,
    /// The evicted node.
    pub node: NodeId,
    /// Key ranges whose leaders must leave `node`.
    pub key_ranges: Vec<KeyRange>,
    /// Upper bound on leader transfers produced for this request.
    pub batch_size: usize,
    /// Build operators without registering them.
    pub dry_run: bool,
}

/// A pending leader-transfer operator produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorRequest {
    /// Name of the scheduler that asked for it.
    pub desc: String,
    /// Region whose leader moves.
    pub region_id: u64,
    /// Current leader node.
    pub source: NodeId,
    /// New leader node.
    pub target: NodeId,
}

/// Everything the slow-trend scheduler needs from the surrounding cluster.
///
/// Implementations own node metadata; the scheduler only reads snapshots and
/// requests actions.
pub trait SchedulerCluster {
    /// All nodes in the topology, tombstones included.
    fn nodes(&self) -> Vec<NodeObservation>;

    /// One node by id.
    fn node(&self, id: NodeId) -> Option<NodeObservation>;

    /// Mark `id` as evicted by slow trend cluster-wide.
    fn notify_evicted(&self, id: NodeId) -> Result<()>;

    /// Clear the slow-trend eviction mark of `id`.
    fn notify_recovered(&self, id: NodeId);

    /// Build leader-transfer operators moving leadership off the node.
    ///
    /// Returns [`EvictError::NodeNotFound`](crate::core::errors::EvictError::NodeNotFound)
    /// when the node is unknown.
    fn request_leader_eviction(
        &self,
        request: &LeaderEvictionRequest<'_>,
    ) -> Result<Vec<OperatorRequest>>;

    /// Leader operators currently in flight.
    fn leader_operator_count(&self) -> usize;

    /// Cluster-wide scheduling tunables.
    fn schedule_config(&self) -> ClusterScheduleConfig;
}
