//! Slow-trend leader eviction: detection, confirmation, and the per-tick
//! state machine, behind the [`Scheduler`] interface a driver calls.

pub mod detector;
pub mod evict_slow_trend;
pub mod gate;
pub mod metrics;
pub mod state;

use serde::Serialize;

use crate::cluster::node::NodeId;
use crate::cluster::{OperatorRequest, SchedulerCluster};
use crate::core::errors::Result;
use metrics::ActionLabel;

/// A scheduler installed into the placement manager's tick loop.
pub trait Scheduler {
    /// Instance name; also the key of the persisted config.
    fn name(&self) -> &str;

    /// Scheduler kind.
    fn scheduler_type(&self) -> &str;

    /// Serialize the persisted config.
    fn encode_config(&self) -> Result<Vec<u8>>;

    /// Called once on install.
    fn prepare(&mut self, cluster: &dyn SchedulerCluster) -> Result<()>;

    /// Called once on uninstall.
    fn cleanup(&mut self, cluster: &dyn SchedulerCluster);

    /// Admission gate checked by the driver before [`Scheduler::schedule`].
    fn is_schedule_allowed(&self, cluster: &dyn SchedulerCluster) -> bool;

    /// Run one tick.
    fn schedule(&mut self, cluster: &dyn SchedulerCluster, dry_run: bool) -> ScheduleOutcome;
}

/// The single externally visible effect of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "node", rename_all = "snake_case")]
pub enum TickAction {
    /// Nothing happened outside the scheduler.
    None,
    /// Leaders of an already-evicted node are requested to move again.
    ReassertEviction(NodeId),
    /// The node was just evicted and announced.
    StartEviction(NodeId),
    /// The eviction was lifted.
    StopEviction(NodeId),
}

/// Where the state machine sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum EvictionPhase {
    /// No candidate, nothing evicted.
    Idle,
    /// A candidate waits for confirmation.
    Probationary {
        /// Node under probation.
        candidate: NodeId,
    },
    /// One node has its leaders evicted.
    Evicting {
        /// The evicted node.
        node: NodeId,
    },
}

/// Diagnostic record of one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulePlan {
    /// The tick's external effect.
    pub action: TickAction,
    /// Phase after the tick.
    pub phase: EvictionPhase,
    /// Branch labels hit, in order.
    pub branches: Vec<ActionLabel>,
}

/// Operators produced by a tick plus its diagnostic plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleOutcome {
    /// Leader transfers to run.
    pub operators: Vec<OperatorRequest>,
    /// What the tick decided, and why.
    pub plan: SchedulePlan,
}

impl ScheduleOutcome {
    /// Shorthand for the plan's action.
    #[must_use]
    pub fn action(&self) -> TickAction {
        self.plan.action
    }

    /// Whether `label` was hit during the tick.
    #[must_use]
    pub fn hit(&self, label: ActionLabel) -> bool {
        self.plan.branches.contains(&label)
    }
}
