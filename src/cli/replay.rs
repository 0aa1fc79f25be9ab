//! Replays a recorded sequence of cluster snapshots through the scheduler.
//!
//! A scenario file looks like:
//!
//! ```json
//! {
//!   "start": "2024-05-01T12:00:00Z",
//!   "regions": [{ "region_id": 1, "leader": 3 }],
//!   "ticks": [
//!     { "offset_secs": 0, "nodes": [{ "id": 3, "slow_trend": { ... } }] }
//!   ]
//! }
//! ```
//!
//! Node heartbeats default to the tick's own instant.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::SchedulerCluster;
use crate::cluster::memory::{InMemoryCluster, Notification};
use crate::cluster::node::{NodeId, NodeObservation, NodeState, SlowTrend};
use crate::cluster::storage::ConfigStorage;
use crate::core::clock::{Clock, ManualClock};
use crate::core::config::Config;
use crate::core::errors::{EvictError, Result};
use crate::scheduler::evict_slow_trend::EvictSlowTrendScheduler;
use crate::scheduler::metrics::SlowTrendMetrics;
use crate::scheduler::{ScheduleOutcome, Scheduler};

/// A full recorded scenario.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Scenario {
    #[serde(default = "default_start")]
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub regions: Vec<RegionLeader>,
    pub ticks: Vec<ScenarioTick>,
}

fn default_start() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RegionLeader {
    pub region_id: u64,
    pub leader: NodeId,
}

/// One snapshot of the cluster, taken `offset_secs` after the start.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioTick {
    pub offset_secs: i64,
    pub nodes: Vec<ScenarioNode>,
    #[serde(default)]
    pub dry_run: bool,
    /// Apply every pending leader transfer after the tick.
    #[serde(default)]
    pub finish_operators: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioNode {
    pub id: NodeId,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub state: NodeState,
    #[serde(default)]
    pub slow_trend: Option<SlowTrend>,
    /// Heartbeat instant relative to the start; defaults to the tick's offset.
    #[serde(default)]
    pub heartbeat_offset_secs: Option<i64>,
}

/// `start` shifted by `offset_secs`; out-of-range offsets are a scenario error.
fn offset_instant(start: DateTime<Utc>, offset_secs: i64) -> Result<DateTime<Utc>> {
    TimeDelta::try_seconds(offset_secs)
        .and_then(|delta| start.checked_add_signed(delta))
        .ok_or_else(|| EvictError::ConfigParse {
            context: "replay scenario",
            details: format!("offset of {offset_secs}s from {start} is out of range"),
        })
}

impl ScenarioNode {
    fn observe(&self, start: DateTime<Utc>, tick_offset: i64) -> Result<NodeObservation> {
        let heartbeat =
            offset_instant(start, self.heartbeat_offset_secs.unwrap_or(tick_offset))?;
        let mut node = NodeObservation::serving(self.id, heartbeat).with_state(self.state);
        if let Some(address) = &self.address {
            node.address.clone_from(address);
        }
        node.slow_trend = self.slow_trend;
        Ok(node)
    }
}

impl Scenario {
    /// Read and parse a scenario file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| EvictError::io(path, e))?;
        serde_json::from_str(&raw).map_err(|e| EvictError::ConfigParse {
            context: "replay scenario",
            details: e.to_string(),
        })
    }
}

/// Outcome of one replayed tick.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayTick {
    pub tick: usize,
    pub at: DateTime<Utc>,
    /// Admission gate verdict; a refused tick does not run the scheduler.
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ScheduleOutcome>,
    pub notifications: Vec<Notification>,
}

/// Every replayed tick plus the scheduler's metrics afterwards.
#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub ticks: Vec<ReplayTick>,
    /// Prometheus text exposition.
    pub metrics_text: String,
}

/// Drive `scenario` through a scheduler restored from `storage`.
pub fn replay(
    config: &Config,
    scenario: &Scenario,
    storage: Arc<dyn ConfigStorage>,
) -> Result<ReplayReport> {
    let clock = ManualClock::new(scenario.start);
    let cluster = InMemoryCluster::new(config.cluster);
    for region in &scenario.regions {
        cluster.set_region_leader(region.region_id, region.leader);
    }

    let metrics = Arc::new(SlowTrendMetrics::new()?);
    let mut scheduler = EvictSlowTrendScheduler::load(
        config.scheduler.clone(),
        storage,
        Arc::new(clock.clone()),
        Arc::clone(&metrics),
    )?;

    let mut results = Vec::with_capacity(scenario.ticks.len());
    let mut seen_notifications = 0;
    for (index, tick) in scenario.ticks.iter().enumerate() {
        let at = offset_instant(scenario.start, tick.offset_secs)?;
        let nodes = tick
            .nodes
            .iter()
            .map(|n| n.observe(scenario.start, tick.offset_secs))
            .collect::<Result<Vec<_>>>()?;
        clock.set(at);
        cluster.replace_nodes(nodes);

        if index == 0
            && let Err(err) = scheduler.prepare(&cluster)
        {
            tracing::warn!(error = %err, "restoring slow-trend eviction failed");
        }

        let allowed = scheduler.is_schedule_allowed(&cluster);
        let outcome = allowed.then(|| scheduler.schedule(&cluster, tick.dry_run));
        if tick.finish_operators {
            let applied = cluster.finish_operators();
            tracing::debug!(tick = index, applied, "applied pending leader transfers");
        }

        let notifications = cluster.notifications();
        let fresh = notifications[seen_notifications..].to_vec();
        seen_notifications = notifications.len();

        results.push(ReplayTick {
            tick: index,
            at: clock.now(),
            allowed,
            outcome,
            notifications: fresh,
        });
    }

    tracing::info!(
        ticks = results.len(),
        leader_operators = cluster.leader_operator_count(),
        "replay finished"
    );
    Ok(ReplayReport {
        ticks: results,
        metrics_text: metrics.render_text()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::storage::MemoryConfigStorage;
    use crate::scheduler::TickAction;

    const SCENARIO: &str = r#"{
        "start": "2024-05-01T12:00:00Z",
        "regions": [
            {"region_id": 1, "leader": 1},
            {"region_id": 2, "leader": 1}
        ],
        "ticks": [
            {
                "offset_secs": 10,
                "nodes": [
                    {"id": 1, "heartbeat_offset_secs": 0,
                     "slow_trend": {"cause_rate": 1.0, "result_rate": -1.0, "cause_value": 5.0, "result_value": 10.0}},
                    {"id": 2, "heartbeat_offset_secs": 0, "slow_trend": {"cause_rate": 0.0, "result_rate": 0.0, "cause_value": 1.0, "result_value": 50.0}},
                    {"id": 3, "heartbeat_offset_secs": 0, "slow_trend": {"cause_rate": 0.0, "result_rate": 0.0, "cause_value": 1.0, "result_value": 50.0}},
                    {"id": 4, "heartbeat_offset_secs": 0, "slow_trend": {"cause_rate": 0.0, "result_rate": 0.0, "cause_value": 1.0, "result_value": 50.0}},
                    {"id": 5, "heartbeat_offset_secs": 0, "slow_trend": {"cause_rate": 0.0, "result_rate": 0.0, "cause_value": 1.0, "result_value": 50.0}}
                ]
            },
            {
                "offset_secs": 40,
                "finish_operators": true,
                "nodes": [
                    {"id": 1, "slow_trend": {"cause_rate": 1.0, "result_rate": -1.0, "cause_value": 5.0, "result_value": 10.0}},
                    {"id": 2, "slow_trend": {"cause_rate": 0.0, "result_rate": 0.0, "cause_value": 1.0, "result_value": 50.0}},
                    {"id": 3, "slow_trend": {"cause_rate": 0.0, "result_rate": 0.0, "cause_value": 1.0, "result_value": 50.0}},
                    {"id": 4, "slow_trend": {"cause_rate": 0.0, "result_rate": 0.0, "cause_value": 1.0, "result_value": 50.0}},
                    {"id": 5, "slow_trend": {"cause_rate": 0.0, "result_rate": 0.0, "cause_value": 1.0, "result_value": 50.0}}
                ]
            }
        ]
    }"#;

    #[test]
    fn replay_captures_then_evicts() {
        let scenario: Scenario = serde_json::from_str(SCENARIO).expect("scenario");
        let storage = Arc::new(MemoryConfigStorage::new());
        let report = replay(&Config::default(), &scenario, storage.clone()).expect("replay");
        let ticks = &report.ticks;

        assert_eq!(ticks.len(), 2);
        let first = ticks[0].outcome.as_ref().expect("first tick ran");
        assert_eq!(first.action(), TickAction::None);

        let second = ticks[1].outcome.as_ref().expect("second tick ran");
        assert_eq!(second.action(), TickAction::StartEviction(NodeId(1)));
        assert_eq!(second.operators.len(), 2);
        assert_eq!(ticks[1].notifications, vec![Notification::Evicted(NodeId(1))]);
        assert!(storage.get("evict-slow-trend-scheduler").is_some());
        assert!(report.metrics_text.contains("reason=\"evict.start\"} 1"));
    }

    #[test]
    fn replay_restores_persisted_eviction() {
        let storage = Arc::new(MemoryConfigStorage::new());
        storage
            .save_scheduler_config("evict-slow-trend-scheduler", br#"{"evict-by-trend-stores":[2]}"#)
            .expect("seed");
        let mut scenario: Scenario = serde_json::from_str(SCENARIO).expect("scenario");
        scenario.ticks.truncate(1);

        let ticks = replay(&Config::default(), &scenario, storage).expect("replay").ticks;
        assert_eq!(ticks[0].notifications.first(), Some(&Notification::Evicted(NodeId(2))));
        let outcome = ticks[0].outcome.as_ref().expect("tick ran");
        assert_eq!(outcome.action(), TickAction::ReassertEviction(NodeId(2)));
    }

    #[test]
    fn out_of_range_offsets_are_scenario_errors() {
        let mut scenario: Scenario = serde_json::from_str(SCENARIO).expect("scenario");
        scenario.ticks[0].offset_secs = i64::MAX;
        let err = replay(&Config::default(), &scenario, Arc::new(MemoryConfigStorage::new()))
            .expect_err("tick offset out of range");
        assert_eq!(err.code(), "STE-1003");

        let mut scenario: Scenario = serde_json::from_str(SCENARIO).expect("scenario");
        scenario.ticks[1].nodes[3].heartbeat_offset_secs = Some(i64::MIN / 1000);
        let storage = Arc::new(MemoryConfigStorage::new());
        let err = replay(&Config::default(), &scenario, storage.clone())
            .expect_err("heartbeat offset out of range");
        assert!(matches!(
            err,
            EvictError::ConfigParse {
                context: "replay scenario",
                ..
            }
        ));
        assert!(storage.get("evict-slow-trend-scheduler").is_none());
    }

    #[test]
    fn missing_scenario_file_is_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = Scenario::from_path(&dir.path().join("absent.json")).expect_err("missing");
        assert_eq!(err.code(), "STE-3002");
    }
}
