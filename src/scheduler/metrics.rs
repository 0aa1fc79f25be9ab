//! Branch counters and gauges of the slow-trend scheduler.
//!
//! Every branch of detection, confirmation, and the eviction state machine
//! increments exactly one `slow_trend_action_status_total{reason}` series.
//! The label strings are a monitoring contract: dashboards key on them.

#![allow(clippy::cast_precision_loss)]

use std::fmt;

use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use serde::{Serialize, Serializer};

use crate::cluster::node::NodeId;
use crate::core::errors::{EvictError, Result};

// ──────────────────── labels ────────────────────

/// Reason label of `slow_trend_action_status_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionLabel {
    /// Fewer than three nodes in the topology.
    CandNoneTooFew,
    /// A node matched a jitter signature, or a candidate was confirmed.
    CandAdd,
    /// No node matched any signature.
    CandNoneNoFit,
    /// More than one node matched; ambiguous.
    CandNoneTooMany,
    /// Too few nodes show a degrading result.
    CandNoneAffectAFew,
    /// The sole match is not slower than enough peers.
    CandNoneNotSlower,
    CandCheckSlowerNoData,
    CandCheckFasterNoData,
    /// Idle → probationary.
    CandCaptured,
    /// Probation continues from an earlier tick.
    CandContinue,
    /// Idle and nothing captured.
    CandNone,
    /// Candidate sped back up before eviction started.
    CandCancelTooFaster,
    /// Candidate left the cluster or the eligible set during probation.
    CandCancelGone,
    /// Not enough fresh heartbeats since capture.
    CandWait,
    /// Persisting or announcing the eviction failed.
    EvictPrepareErr,
    /// Probationary → evicting.
    EvictStart,
    /// Evicting; eviction re-asserted.
    EvictContinue,
    EvictStopRemoved,
    EvictStopRecovered,
    /// Clearing the eviction could not be persisted.
    EvictStopPersistErr,
    /// The leader-transfer engine rejected the request.
    EvictRequestErr,
}

impl ActionLabel {
    /// Every label, in taxonomy order.
    pub const ALL: [Self; 21] = [
        Self::CandNoneTooFew,
        Self::CandAdd,
        Self::CandNoneNoFit,
        Self::CandNoneTooMany,
        Self::CandNoneAffectAFew,
        Self::CandNoneNotSlower,
        Self::CandCheckSlowerNoData,
        Self::CandCheckFasterNoData,
        Self::CandCaptured,
        Self::CandContinue,
        Self::CandNone,
        Self::CandCancelTooFaster,
        Self::CandCancelGone,
        Self::CandWait,
        Self::EvictPrepareErr,
        Self::EvictStart,
        Self::EvictContinue,
        Self::EvictStopRemoved,
        Self::EvictStopRecovered,
        Self::EvictStopPersistErr,
        Self::EvictRequestErr,
    ];

    /// Metric label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CandNoneTooFew => "cand.none:too-few",
            Self::CandAdd => "cand.add",
            Self::CandNoneNoFit => "cand.none:no-fit",
            Self::CandNoneTooMany => "cand.none:too-many",
            Self::CandNoneAffectAFew => "cand.none:affect-a-few",
            Self::CandNoneNotSlower => "cand.none:not-slower",
            Self::CandCheckSlowerNoData => "cand.check-slower:no-data",
            Self::CandCheckFasterNoData => "cand.check-faster:no-data",
            Self::CandCaptured => "cand.captured",
            Self::CandContinue => "cand.continue",
            Self::CandNone => "cand.none",
            Self::CandCancelTooFaster => "cand.cancel:too-faster",
            Self::CandCancelGone => "cand.cancel:gone",
            Self::CandWait => "cand.wait",
            Self::EvictPrepareErr => "evict.prepare.err",
            Self::EvictStart => "evict.start",
            Self::EvictContinue => "evict.continue",
            Self::EvictStopRemoved => "evict.stop:removed",
            Self::EvictStopRecovered => "evict.stop:recovered",
            Self::EvictStopPersistErr => "evict.stop.persist.err",
            Self::EvictRequestErr => "evict.request.err",
        }
    }
}

impl fmt::Display for ActionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ActionLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Kind label of the `slow_trend_misc` gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MiscGauge {
    CandCapturedSecs,
    StoresCheckUpdatedCount,
    StoresCheckUpdatedExpected,
    StoreCheckSlowerCount,
    StoreCheckSlowerExpected,
    StoreCheckFasterCount,
    StoreCheckFasterExpected,
}

impl MiscGauge {
    /// Metric label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CandCapturedSecs => "cand.captured.secs",
            Self::StoresCheckUpdatedCount => "stores.check-updated:count",
            Self::StoresCheckUpdatedExpected => "stores.check-updated:expected",
            Self::StoreCheckSlowerCount => "store.check-slower:count",
            Self::StoreCheckSlowerExpected => "store.check-slower:expected",
            Self::StoreCheckFasterCount => "store.check-faster:count",
            Self::StoreCheckFasterExpected => "store.check-faster:expected",
        }
    }
}

// ──────────────────── registry ────────────────────

/// Prometheus series owned by one scheduler instance.
pub struct SlowTrendMetrics {
    registry: Registry,
    scheduler_events: IntCounterVec,
    action_status: IntCounterVec,
    misc: GaugeVec,
    evicted_status: GaugeVec,
    operator_limit: IntCounterVec,
}

impl SlowTrendMetrics {
    /// Create the series and register them in a fresh registry.
    pub fn new() -> Result<Self> {
        let scheduler_events = IntCounterVec::new(
            Opts::new(
                "slow_trend_scheduler_events_total",
                "Scheduler invocations by event",
            ),
            &["event"],
        )?;
        let action_status = IntCounterVec::new(
            Opts::new(
                "slow_trend_action_status_total",
                "Branches taken by the slow-trend decision loop",
            ),
            &["reason"],
        )?;
        let misc = GaugeVec::new(
            Opts::new(
                "slow_trend_misc",
                "Confirmation counts, thresholds, and candidate age",
            ),
            &["kind"],
        )?;
        let evicted_status = GaugeVec::new(
            Opts::new(
                "slow_trend_evicted_status",
                "1 while the node's leaders are evicted by slow trend",
            ),
            &["address", "store"],
        )?;
        let operator_limit = IntCounterVec::new(
            Opts::new(
                "slow_trend_operator_limit_total",
                "Ticks refused by the leader operator admission limit",
            ),
            &["scheduler", "kind"],
        )?;

        let registry = Registry::new();
        registry.register(Box::new(scheduler_events.clone()))?;
        registry.register(Box::new(action_status.clone()))?;
        registry.register(Box::new(misc.clone()))?;
        registry.register(Box::new(evicted_status.clone()))?;
        registry.register(Box::new(operator_limit.clone()))?;

        Ok(Self {
            registry,
            scheduler_events,
            action_status,
            misc,
            evicted_status,
            operator_limit,
        })
    }

    /// The registry holding every series.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Count one scheduler event.
    pub fn inc_event(&self, event: &str) {
        self.scheduler_events.with_label_values(&[event]).inc();
    }

    /// Count one decision branch.
    pub fn record(&self, label: ActionLabel) {
        self.action_status
            .with_label_values(&[label.as_str()])
            .inc();
    }

    /// Set a misc gauge.
    pub fn set_misc(&self, gauge: MiscGauge, value: f64) {
        self.misc.with_label_values(&[gauge.as_str()]).set(value);
    }

    /// Raise (1) or reset (0) the evicted-status gauge of `node`.
    pub fn set_evicted_status(&self, address: &str, node: NodeId, value: f64) {
        let store = node.to_string();
        self.evicted_status
            .with_label_values(&[address, store.as_str()])
            .set(value);
    }

    /// Count one admission refusal.
    pub fn inc_operator_limit(&self, scheduler: &str, kind: &str) {
        self.operator_limit
            .with_label_values(&[scheduler, kind])
            .inc();
    }

    /// Current value of an event counter.
    #[must_use]
    pub fn event_count(&self, event: &str) -> u64 {
        self.scheduler_events.with_label_values(&[event]).get()
    }

    /// Current value of a branch counter.
    #[must_use]
    pub fn action_count(&self, label: ActionLabel) -> u64 {
        self.action_status
            .with_label_values(&[label.as_str()])
            .get()
    }

    /// Current value of a misc gauge.
    #[must_use]
    pub fn misc_value(&self, gauge: MiscGauge) -> f64 {
        self.misc.with_label_values(&[gauge.as_str()]).get()
    }

    /// Current evicted-status gauge of `node`.
    #[must_use]
    pub fn evicted_status(&self, address: &str, node: NodeId) -> f64 {
        let store = node.to_string();
        self.evicted_status
            .with_label_values(&[address, store.as_str()])
            .get()
    }

    /// Current value of an admission refusal counter.
    #[must_use]
    pub fn operator_limit_count(&self, scheduler: &str, kind: &str) -> u64 {
        self.operator_limit
            .with_label_values(&[scheduler, kind])
            .get()
    }

    /// Render every series in Prometheus text exposition format.
    pub fn render_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| EvictError::Metrics {
            details: e.to_string(),
        })
    }
}

impl fmt::Debug for SlowTrendMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlowTrendMetrics").finish_non_exhaustive()
    }
}

// ──────────────────── per-tick recorder ────────────────────

/// Records the branches hit during one tick into both the counters and the
/// tick's diagnostic plan.
#[derive(Debug)]
pub struct BranchRecorder<'a> {
    metrics: &'a SlowTrendMetrics,
    branches: Vec<ActionLabel>,
}

impl<'a> BranchRecorder<'a> {
    /// An empty recorder writing into `metrics`.
    #[must_use]
    pub fn new(metrics: &'a SlowTrendMetrics) -> Self {
        Self {
            metrics,
            branches: Vec::new(),
        }
    }

    /// Record a branch label.
    pub fn hit(&mut self, label: ActionLabel) {
        self.metrics.record(label);
        self.branches.push(label);
    }

    /// Set a misc gauge.
    pub fn gauge(&mut self, gauge: MiscGauge, value: f64) {
        self.metrics.set_misc(gauge, value);
    }

    /// Count/expected pair of one confirmation check.
    pub fn check(&mut self, count: MiscGauge, expected: MiscGauge, values: (usize, usize)) {
        self.gauge(count, values.0 as f64);
        self.gauge(expected, values.1 as f64);
    }

    /// Labels hit so far.
    #[must_use]
    pub fn branches(&self) -> &[ActionLabel] {
        &self.branches
    }

    /// Consume the recorder, returning the labels hit.
    #[must_use]
    pub fn into_branches(self) -> Vec<ActionLabel> {
        self.branches
    }
}
