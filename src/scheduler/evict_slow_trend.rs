//! The evict-slow-trend scheduler.
//!
//! Per tick, highest priority first:
//! 1. Evicting: stop if the node was removed or has recovered, otherwise
//!    re-assert the leader eviction.
//! 2. Idle: run detection and capture a candidate.
//! 3. Probationary: cancel if the candidate is gone or sped back up, wait for
//!    fresh heartbeats, otherwise start evicting it.

#![allow(clippy::cast_precision_loss)]

use std::sync::Arc;

use crate::cluster::node::{NodeId, NodeObservation};
use crate::cluster::storage::ConfigStorage;
use crate::cluster::{LeaderEvictionRequest, OperatorRequest, SchedulerCluster};
use crate::core::clock::Clock;
use crate::core::config::SchedulerConfig;
use crate::core::errors::{EvictError, Result};
use crate::scheduler::detector::{self, DetectorSettings};
use crate::scheduler::gate;
use crate::scheduler::metrics::{ActionLabel, BranchRecorder, MiscGauge, SlowTrendMetrics};
use crate::scheduler::state::{EvictionConfig, EvictionState};
use crate::scheduler::{EvictionPhase, ScheduleOutcome, SchedulePlan, Scheduler, TickAction};

/// Instance name, also the storage key of the persisted config.
pub const EVICT_SLOW_TREND_NAME: &str = "evict-slow-trend-scheduler";
/// Scheduler kind.
pub const EVICT_SLOW_TREND_TYPE: &str = "evict-slow-trend";

const LEADER_OPERATOR_KIND: &str = "leader";

type TickResult = (Vec<OperatorRequest>, TickAction);

const fn idle_tick() -> TickResult {
    (Vec::new(), TickAction::None)
}

/// Evicts the leaders of the one node showing a sustained slow trend.
pub struct EvictSlowTrendScheduler {
    settings: SchedulerConfig,
    state: EvictionState,
    metrics: Arc<SlowTrendMetrics>,
    clock: Arc<dyn Clock>,
    /// The cluster has been told about the current eviction.
    announced: bool,
    /// Address label under which the evicted-status gauge was raised.
    status_address: Option<String>,
}

impl EvictSlowTrendScheduler {
    /// A fresh scheduler with nothing evicted.
    #[must_use]
    pub fn new(
        settings: SchedulerConfig,
        storage: Arc<dyn ConfigStorage>,
        clock: Arc<dyn Clock>,
        metrics: Arc<SlowTrendMetrics>,
    ) -> Self {
        Self::with_config(settings, EvictionConfig::default(), storage, clock, metrics)
    }

    /// Rebuild from an encoded config.
    pub fn from_encoded(
        settings: SchedulerConfig,
        data: &[u8],
        storage: Arc<dyn ConfigStorage>,
        clock: Arc<dyn Clock>,
        metrics: Arc<SlowTrendMetrics>,
    ) -> Result<Self> {
        let config = EvictionConfig::decode(data)?;
        Ok(Self::with_config(settings, config, storage, clock, metrics))
    }

    /// Rebuild from whatever `storage` holds under [`EVICT_SLOW_TREND_NAME`].
    pub fn load(
        settings: SchedulerConfig,
        storage: Arc<dyn ConfigStorage>,
        clock: Arc<dyn Clock>,
        metrics: Arc<SlowTrendMetrics>,
    ) -> Result<Self> {
        match storage.load_scheduler_config(EVICT_SLOW_TREND_NAME)? {
            Some(data) => Self::from_encoded(settings, &data, storage, clock, metrics),
            None => Ok(Self::new(settings, storage, clock, metrics)),
        }
    }

    fn with_config(
        settings: SchedulerConfig,
        config: EvictionConfig,
        storage: Arc<dyn ConfigStorage>,
        clock: Arc<dyn Clock>,
        metrics: Arc<SlowTrendMetrics>,
    ) -> Self {
        if let Some(node) = config.evicted() {
            tracing::info!(node_id = %node, "restored slow-trend eviction from persisted config");
        }
        let state = EvictionState::new(EVICT_SLOW_TREND_NAME, config, storage, Arc::clone(&clock));
        Self {
            settings,
            state,
            metrics,
            clock,
            announced: false,
            status_address: None,
        }
    }

    /// Eviction slot and candidate memory.
    #[must_use]
    pub fn state(&self) -> &EvictionState {
        &self.state
    }

    /// Counters and gauges owned by this instance.
    #[must_use]
    pub fn metrics(&self) -> &Arc<SlowTrendMetrics> {
        &self.metrics
    }

    /// Where the state machine currently stands.
    #[must_use]
    pub fn phase(&self) -> EvictionPhase {
        if let Some(node) = self.state.evicted_node() {
            EvictionPhase::Evicting { node }
        } else if let Some(candidate) = self.state.candidate() {
            EvictionPhase::Probationary {
                candidate: candidate.node_id,
            }
        } else {
            EvictionPhase::Idle
        }
    }

    fn detector_settings(&self, cluster: &dyn SchedulerCluster) -> DetectorSettings {
        let schedule = cluster.schedule_config();
        DetectorSettings {
            affected_ratio: schedule.affected_store_ratio_threshold,
            engine: schedule.storage_engine,
            recheck_gap_secs: self.settings.recheck_duration_gap_secs,
        }
    }

    fn tick(
        &mut self,
        cluster: &dyn SchedulerCluster,
        dry_run: bool,
        rec: &mut BranchRecorder<'_>,
    ) -> TickResult {
        if let Some(evicted) = self.state.evicted_node() {
            return self.tick_evicting(cluster, evicted, dry_run, rec);
        }

        // Storage may still hold a cleared eviction.
        if !self.state.is_durable()
            && let Err(err) = self.state.persist()
        {
            tracing::warn!(error = %err, "retrying persist of cleared slow-trend eviction failed");
            rec.hit(ActionLabel::EvictStopPersistErr);
        }

        let nodes = cluster.nodes();
        let mut fresh_captured = false;
        if self.state.candidate().is_none() {
            let settings = self.detector_settings(cluster);
            let last = self.state.last_candidate();
            let now = self.clock.now();
            if let Some(found) =
                detector::choose_candidate(&nodes, last.as_ref(), &settings, now, rec)
            {
                rec.hit(ActionLabel::CandCaptured);
                self.state.capture_candidate(found.id);
                fresh_captured = true;
            }
        } else {
            rec.hit(ActionLabel::CandContinue);
        }

        let Some(candidate) = self.state.candidate() else {
            rec.hit(ActionLabel::CandNone);
            return idle_tick();
        };
        let id = candidate.node_id;

        let Some(observed) = nodes.iter().find(|n| n.id == id && n.is_eligible()) else {
            self.state.pop_candidate();
            tracing::info!(node_id = %id, "slow-trend candidate left the cluster, cancelled");
            rec.hit(ActionLabel::CandCancelGone);
            return idle_tick();
        };

        if !fresh_captured && gate::faster_than_others(&nodes, observed, rec) {
            self.state.pop_candidate();
            tracing::info!(node_id = %id, "slow-trend candidate sped back up, cancelled");
            rec.hit(ActionLabel::CandCancelTooFaster);
            return idle_tick();
        }

        if !gate::stores_updated(&nodes, id, candidate.captured_at, rec) {
            tracing::info!(node_id = %id, "slow-trend candidate waiting for other nodes to heartbeat");
            rec.hit(ActionLabel::CandWait);
            return idle_tick();
        }

        let captured_secs = self.state.candidate_captured_secs();
        tracing::info!(
            node_id = %id,
            candidate_captured_secs = captured_secs,
            "detected slow node by trend, start to evict leaders"
        );
        rec.gauge(MiscGauge::CandCapturedSecs, captured_secs as f64);

        let evicting = self.state.pop_candidate().unwrap_or(id);
        if let Err(err) = self.prepare_evict_leader(cluster, evicting) {
            tracing::warn!(node_id = %evicting, error = %err, "prepare for evicting leaders by slow trend failed");
            rec.hit(ActionLabel::EvictPrepareErr);
            return idle_tick();
        }
        rec.hit(ActionLabel::EvictStart);
        let operators = self.schedule_evict_leader(cluster, observed, dry_run, rec);
        (operators, TickAction::StartEviction(evicting))
    }

    fn tick_evicting(
        &mut self,
        cluster: &dyn SchedulerCluster,
        evicted: NodeId,
        dry_run: bool,
        rec: &mut BranchRecorder<'_>,
    ) -> TickResult {
        let Some(observed) = cluster.node(evicted).filter(|n| !n.is_removed()) else {
            tracing::info!(node_id = %evicted, "node evicted by slow trend has been removed");
            rec.hit(ActionLabel::EvictStopRemoved);
            self.cleanup_evict_leader(cluster, rec);
            return (Vec::new(), TickAction::StopEviction(evicted));
        };

        let nodes = cluster.nodes();
        let eviction_secs = self.state.eviction_secs();
        if gate::can_recover(
            &nodes,
            &observed,
            eviction_secs,
            self.settings.recovery_duration_gap_secs,
            rec,
        ) {
            tracing::info!(node_id = %evicted, eviction_secs, "node evicted by slow trend has recovered");
            rec.hit(ActionLabel::EvictStopRecovered);
            self.cleanup_evict_leader(cluster, rec);
            return (Vec::new(), TickAction::StopEviction(evicted));
        }

        if !self.state.is_durable() || !self.announced {
            if let Err(err) = self.commit_eviction(cluster, evicted) {
                tracing::warn!(node_id = %evicted, error = %err, "retrying slow-trend eviction failed");
                rec.hit(ActionLabel::EvictPrepareErr);
                return idle_tick();
            }
            rec.hit(ActionLabel::EvictStart);
            let operators = self.schedule_evict_leader(cluster, &observed, dry_run, rec);
            return (operators, TickAction::StartEviction(evicted));
        }

        rec.hit(ActionLabel::EvictContinue);
        let operators = self.schedule_evict_leader(cluster, &observed, dry_run, rec);
        (operators, TickAction::ReassertEviction(evicted))
    }

    fn prepare_evict_leader(&mut self, cluster: &dyn SchedulerCluster, id: NodeId) -> Result<()> {
        self.announced = false;
        self.state.set_and_persist(id)?;
        self.commit_eviction(cluster, id)
    }

    /// Finish whatever part of starting the eviction has not succeeded yet.
    fn commit_eviction(&mut self, cluster: &dyn SchedulerCluster, id: NodeId) -> Result<()> {
        if !self.state.is_durable() {
            self.state.persist()?;
        }
        if !self.announced {
            cluster.notify_evicted(id)?;
            self.announced = true;
        }
        Ok(())
    }

    fn cleanup_evict_leader(&mut self, cluster: &dyn SchedulerCluster, rec: &mut BranchRecorder<'_>) {
        let (previous, result) = self.state.clear_and_persist();
        let Some(previous) = previous else {
            return;
        };
        let address = self
            .status_address
            .take()
            .or_else(|| cluster.node(previous).map(|n| n.address))
            .unwrap_or_default();
        self.metrics.set_evicted_status(&address, previous, 0.0);
        if let Err(err) = result {
            tracing::warn!(node_id = %previous, error = %err, "failed to persist cleared slow-trend eviction");
            rec.hit(ActionLabel::EvictStopPersistErr);
        }
        // Only undo what the cluster was told.
        if self.announced {
            cluster.notify_recovered(previous);
        }
        self.announced = false;
    }

    fn schedule_evict_leader(
        &mut self,
        cluster: &dyn SchedulerCluster,
        node: &NodeObservation,
        dry_run: bool,
        rec: &mut BranchRecorder<'_>,
    ) -> Vec<OperatorRequest> {
        self.metrics.set_evicted_status(&node.address, node.id, 1.0);
        self.status_address = Some(node.address.clone());

        let request = LeaderEvictionRequest {
            scheduler: EVICT_SLOW_TREND_NAME,
            node: node.id,
            key_ranges: self.state.key_ranges(node.id),
            batch_size: self.settings.evict_leader_batch_size,
            dry_run,
        };
        match cluster.request_leader_eviction(&request) {
            Ok(operators) => operators,
            Err(EvictError::NodeNotFound { node: missing }) => {
                tracing::debug!(node_id = %missing, "evicted node already gone, no leaders to move");
                Vec::new()
            }
            Err(err) => {
                tracing::warn!(node_id = %node.id, error = %err, "leader eviction request failed");
                rec.hit(ActionLabel::EvictRequestErr);
                Vec::new()
            }
        }
    }
}

impl Scheduler for EvictSlowTrendScheduler {
    fn name(&self) -> &str {
        EVICT_SLOW_TREND_NAME
    }

    fn scheduler_type(&self) -> &str {
        EVICT_SLOW_TREND_TYPE
    }

    fn encode_config(&self) -> Result<Vec<u8>> {
        self.state.config().encode()
    }

    fn prepare(&mut self, cluster: &dyn SchedulerCluster) -> Result<()> {
        let Some(evicted) = self.state.evicted_node() else {
            return Ok(());
        };
        cluster.notify_evicted(evicted)?;
        self.announced = true;
        Ok(())
    }

    fn cleanup(&mut self, cluster: &dyn SchedulerCluster) {
        let metrics = Arc::clone(&self.metrics);
        let mut rec = BranchRecorder::new(&metrics);
        self.cleanup_evict_leader(cluster, &mut rec);
    }

    fn is_schedule_allowed(&self, cluster: &dyn SchedulerCluster) -> bool {
        if self.state.evicted_node().is_none() {
            return true;
        }
        let allowed = cluster.leader_operator_count() < cluster.schedule_config().leader_schedule_limit;
        if !allowed {
            self.metrics
                .inc_operator_limit(EVICT_SLOW_TREND_TYPE, LEADER_OPERATOR_KIND);
        }
        allowed
    }

    fn schedule(&mut self, cluster: &dyn SchedulerCluster, dry_run: bool) -> ScheduleOutcome {
        self.metrics.inc_event("schedule");
        let metrics = Arc::clone(&self.metrics);
        let mut rec = BranchRecorder::new(&metrics);
        let (operators, action) = self.tick(cluster, dry_run, &mut rec);
        ScheduleOutcome {
            operators,
            plan: SchedulePlan {
                action,
                phase: self.phase(),
                branches: rec.into_branches(),
            },
        }
    }
}

impl std::fmt::Debug for EvictSlowTrendScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictSlowTrendScheduler")
            .field("settings", &self.settings)
            .field("state", &self.state)
            .field("announced", &self.announced)
            .finish_non_exhaustive()
    }
}
