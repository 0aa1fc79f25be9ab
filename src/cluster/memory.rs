//! In-process cluster: node table, region leaders, and recorded side effects.
//!
//! Backs the scenario tests and the `ste replay` command. Leader operators
//! produced by eviction requests stay pending until [`InMemoryCluster::finish_operators`]
//! applies them, so the admission gate sees a realistic in-flight count.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use serde::Serialize;

use crate::cluster::node::{NodeId, NodeObservation, NodeState, SlowTrend};
use crate::cluster::{LeaderEvictionRequest, OperatorRequest, SchedulerCluster};
use crate::core::config::ClusterScheduleConfig;
use crate::core::errors::{EvictError, Result};
use chrono::{DateTime, Utc};

/// Side effect recorded by the cluster hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "node", rename_all = "snake_case")]
pub enum Notification {
    Evicted(NodeId),
    Recovered(NodeId),
}

#[derive(Debug, Default)]
struct ClusterState {
    nodes: BTreeMap<NodeId, NodeObservation>,
    region_leaders: BTreeMap<u64, NodeId>,
    schedule_config: ClusterScheduleConfig,
    pending: Vec<OperatorRequest>,
    extra_leader_operators: usize,
    slow_trend_evicted: BTreeSet<NodeId>,
    notifications: Vec<Notification>,
}

/// A complete [`SchedulerCluster`] living in memory.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: RwLock<ClusterState>,
}

impl InMemoryCluster {
    #[must_use]
    pub fn new(schedule_config: ClusterScheduleConfig) -> Self {
        Self {
            state: RwLock::new(ClusterState {
                schedule_config,
                ..ClusterState::default()
            }),
        }
    }

    /// Insert or replace a node.
    pub fn upsert_node(&self, node: NodeObservation) {
        self.state.write().nodes.insert(node.id, node);
    }

    /// Replace the whole node table with a fresh snapshot.
    pub fn replace_nodes(&self, nodes: impl IntoIterator<Item = NodeObservation>) {
        let mut state = self.state.write();
        state.nodes = nodes.into_iter().map(|n| (n.id, n)).collect();
    }

    /// Drop a node from the topology entirely.
    pub fn forget_node(&self, id: NodeId) {
        self.state.write().nodes.remove(&id);
    }

    pub fn set_state(&self, id: NodeId, node_state: NodeState) {
        if let Some(node) = self.state.write().nodes.get_mut(&id) {
            node.state = node_state;
        }
    }

    pub fn set_trend(&self, id: NodeId, trend: Option<SlowTrend>) {
        if let Some(node) = self.state.write().nodes.get_mut(&id) {
            node.slow_trend = trend;
        }
    }

    pub fn set_heartbeat(&self, id: NodeId, at: DateTime<Utc>) {
        if let Some(node) = self.state.write().nodes.get_mut(&id) {
            node.last_heartbeat = at;
        }
    }

    /// Stamp every node's heartbeat with `at`.
    pub fn heartbeat_all(&self, at: DateTime<Utc>) {
        for node in self.state.write().nodes.values_mut() {
            node.last_heartbeat = at;
        }
    }

    pub fn set_region_leader(&self, region_id: u64, leader: NodeId) {
        self.state.write().region_leaders.insert(region_id, leader);
    }

    /// Leader operators in flight that were not produced by eviction requests.
    pub fn set_extra_leader_operators(&self, count: usize) {
        self.state.write().extra_leader_operators = count;
    }

    pub fn set_schedule_config(&self, config: ClusterScheduleConfig) {
        self.state.write().schedule_config = config;
    }

    /// Apply every pending leader transfer and clear the in-flight set.
    pub fn finish_operators(&self) -> usize {
        let mut state = self.state.write();
        let pending = std::mem::take(&mut state.pending);
        for op in &pending {
            state.region_leaders.insert(op.region_id, op.target);
        }
        pending.len()
    }

    #[must_use]
    pub fn leader_count(&self, id: NodeId) -> usize {
        self.state
            .read()
            .region_leaders
            .values()
            .filter(|leader| **leader == id)
            .count()
    }

    #[must_use]
    pub fn is_slow_trend_evicted(&self, id: NodeId) -> bool {
        self.state.read().slow_trend_evicted.contains(&id)
    }

    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.state.read().notifications.clone()
    }

    #[must_use]
    pub fn pending_operators(&self) -> Vec<OperatorRequest> {
        self.state.read().pending.clone()
    }
}

impl SchedulerCluster for InMemoryCluster {
    fn nodes(&self) -> Vec<NodeObservation> {
        self.state.read().nodes.values().cloned().collect()
    }

    fn node(&self, id: NodeId) -> Option<NodeObservation> {
        self.state.read().nodes.get(&id).cloned()
    }

    fn notify_evicted(&self, id: NodeId) -> Result<()> {
        let mut state = self.state.write();
        if !state.nodes.contains_key(&id) {
            return Err(EvictError::NodeNotFound { node: id });
        }
        state.slow_trend_evicted.insert(id);
        state.notifications.push(Notification::Evicted(id));
        Ok(())
    }

    fn notify_recovered(&self, id: NodeId) {
        let mut state = self.state.write();
        state.slow_trend_evicted.remove(&id);
        state.notifications.push(Notification::Recovered(id));
    }

    fn request_leader_eviction(
        &self,
        request: &LeaderEvictionRequest<'_>,
    ) -> Result<Vec<OperatorRequest>> {
        let mut state = self.state.write();
        if !state.nodes.contains_key(&request.node) {
            return Err(EvictError::NodeNotFound { node: request.node });
        }

        let Some(target) = state
            .nodes
            .values()
            .filter(|n| n.is_eligible() && n.id != request.node)
            .map(|n| n.id)
            .find(|id| !state.slow_trend_evicted.contains(id))
        else {
            return Ok(Vec::new());
        };

        let already_moving: BTreeSet<u64> = state.pending.iter().map(|op| op.region_id).collect();
        let ops: Vec<OperatorRequest> = state
            .region_leaders
            .iter()
            .filter(|(region, leader)| **leader == request.node && !already_moving.contains(*region))
            .take(request.batch_size)
            .map(|(region, _)| OperatorRequest {
                desc: request.scheduler.to_string(),
                region_id: *region,
                source: request.node,
                target,
            })
            .collect();

        if !request.dry_run {
            state.pending.extend(ops.iter().cloned());
        }
        Ok(ops)
    }

    fn leader_operator_count(&self) -> usize {
        let state = self.state.read();
        state.pending.len() + state.extra_leader_operators
    }

    fn schedule_config(&self) -> ClusterScheduleConfig {
        self.state.read().schedule_config
    }
}
