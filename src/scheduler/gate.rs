//! Confirmation checks run before starting, cancelling, or ending an eviction.
//!
//! Thresholds are taken over the size of the whole topology; the comparison
//! population is the eligible nodes other than the target.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use chrono::{DateTime, Utc};

use crate::cluster::node::{NodeId, NodeObservation, SlowTrend};
use crate::core::errors::{EvictError, Result};
use crate::scheduler::metrics::{ActionLabel, BranchRecorder, MiscGauge};

/// Rates and magnitudes within this distance of zero count as flat.
pub const TREND_EPSILON: f64 = 1e-9;

/// Parity tolerance of the faster-than-others check.
const FASTER_TOLERANCE: f64 = 1.1;

/// `ceil(n / 2)`.
#[must_use]
pub const fn majority(total: usize) -> usize {
    total.div_ceil(2)
}

/// `floor(2n / 3)`.
#[must_use]
pub const fn two_thirds(total: usize) -> usize {
    total * 2 / 3
}

pub(crate) fn trend_of(node: &NodeObservation) -> Result<SlowTrend> {
    node.slow_trend
        .ok_or(EvictError::NoSignalData { node: node.id })
}

fn peers<'a>(
    nodes: &'a [NodeObservation],
    target: NodeId,
) -> impl Iterator<Item = &'a NodeObservation> + 'a {
    nodes
        .iter()
        .filter(move |n| n.is_eligible() && n.id != target)
}

/// Whether a majority of the topology has heartbeated since `since`.
///
/// Ineligible nodes and the target itself count as updated.
pub fn stores_updated(
    nodes: &[NodeObservation],
    target: NodeId,
    since: DateTime<Utc>,
    rec: &mut BranchRecorder<'_>,
) -> bool {
    if nodes.len() <= 1 {
        return false;
    }
    let expected = majority(nodes.len());
    let updated = nodes
        .iter()
        .filter(|n| !n.is_eligible() || n.id == target || since <= n.last_heartbeat)
        .count();
    rec.check(
        MiscGauge::StoresCheckUpdatedCount,
        MiscGauge::StoresCheckUpdatedExpected,
        (updated, expected),
    );
    updated >= expected
}

/// Whether the target's cause magnitude exceeds that of two-thirds of the topology.
pub fn slower_than_others(
    nodes: &[NodeObservation],
    target: &NodeObservation,
    rec: &mut BranchRecorder<'_>,
) -> bool {
    let expected = two_thirds(nodes.len());
    let own = match trend_of(target) {
        Ok(trend) => trend,
        Err(err) => {
            tracing::debug!(node_id = %target.id, error = %err, "slower-than-others check skipped");
            rec.hit(ActionLabel::CandCheckSlowerNoData);
            return false;
        }
    };
    let slower = peers(nodes, target.id)
        .filter_map(|n| n.slow_trend)
        .filter(|other| {
            own.cause_value - other.cause_value > TREND_EPSILON
                && other.cause_value > TREND_EPSILON
        })
        .count();
    rec.check(
        MiscGauge::StoreCheckSlowerCount,
        MiscGauge::StoreCheckSlowerExpected,
        (slower, expected),
    );
    slower >= expected
}

/// Whether the target is at parity (within 10%) with a majority of the topology.
pub fn faster_than_others(
    nodes: &[NodeObservation],
    target: &NodeObservation,
    rec: &mut BranchRecorder<'_>,
) -> bool {
    let expected = majority(nodes.len());
    let own = match trend_of(target) {
        Ok(trend) => trend,
        Err(err) => {
            tracing::debug!(node_id = %target.id, error = %err, "faster-than-others check skipped");
            rec.hit(ActionLabel::CandCheckFasterNoData);
            return false;
        }
    };
    let at_parity = peers(nodes, target.id)
        .filter_map(|n| n.slow_trend)
        .filter(|other| {
            own.cause_value <= other.cause_value * FASTER_TOLERANCE
                && other.cause_value > TREND_EPSILON
                && own.cause_value > TREND_EPSILON
        })
        .count();
    rec.check(
        MiscGauge::StoreCheckFasterCount,
        MiscGauge::StoreCheckFasterExpected,
        (at_parity, expected),
    );
    at_parity >= expected
}

/// Pure time gate on the eviction's age.
///
/// A signal-based "became fast" requirement could be added here; it stays off
/// because a freshly restarted node may not report it before its detection
/// window fills.
#[must_use]
pub const fn ready_for_recover(eviction_secs: u64, required_secs: u64) -> bool {
    eviction_secs >= required_secs
}

/// Recovery needs parity with peers and an old enough eviction.
pub fn can_recover(
    nodes: &[NodeObservation],
    target: &NodeObservation,
    eviction_secs: u64,
    required_secs: u64,
    rec: &mut BranchRecorder<'_>,
) -> bool {
    faster_than_others(nodes, target, rec) && ready_for_recover(eviction_secs, required_secs)
}
