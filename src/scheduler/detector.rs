//! Picks the single slow-trend outlier of a cluster snapshot, if there is one.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use chrono::{DateTime, Utc};

use crate::cluster::node::NodeObservation;
use crate::core::clock::secs_between;
use crate::core::config::StorageEngine;
use crate::scheduler::gate::{self, TREND_EPSILON};
use crate::scheduler::metrics::{ActionLabel, BranchRecorder};
use crate::scheduler::state::SlowCandidate;

/// Smallest topology in which an outlier can be confirmed.
pub const MIN_DETECTION_NODES: usize = 3;

/// Tunables of one detection pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorSettings {
    /// Fraction of the topology that must show a degrading result.
    pub affected_ratio: f64,
    /// Engines that perceive cause-side jitter admit recurring offenders.
    pub engine: StorageEngine,
    /// Window in which the last candidate may be re-admitted on its cause alone.
    pub recheck_gap_secs: u64,
}

impl DetectorSettings {
    /// `floor(total * ratio)`.
    #[must_use]
    pub fn affected_threshold(&self, total: usize) -> usize {
        (total as f64 * self.affected_ratio).floor() as usize
    }
}

fn is_recurring_offender(
    node: &NodeObservation,
    last: Option<&SlowCandidate>,
    recheck_gap_secs: u64,
    now: DateTime<Utc>,
) -> bool {
    last.is_some_and(|c| {
        c.node_id == node.id && secs_between(c.captured_at, now) <= recheck_gap_secs
    })
}

/// Choose the slow-trend candidate of `nodes`.
///
/// Returns `None` when the topology is too small, nothing matches, more than
/// one node matches, too few nodes are affected, or the sole match is not
/// slower than enough of its peers.
pub fn choose_candidate<'a>(
    nodes: &'a [NodeObservation],
    last: Option<&SlowCandidate>,
    settings: &DetectorSettings,
    now: DateTime<Utc>,
    rec: &mut BranchRecorder<'_>,
) -> Option<&'a NodeObservation> {
    if nodes.len() < MIN_DETECTION_NODES {
        rec.hit(ActionLabel::CandNoneTooFew);
        return None;
    }

    let mut candidates: Vec<&NodeObservation> = Vec::new();
    let mut affected = 0_usize;
    for node in nodes.iter().filter(|n| n.is_eligible()) {
        let Some(trend) = node.slow_trend else {
            continue;
        };
        if trend.result_rate < -TREND_EPSILON {
            affected += 1;
        }

        let primary = trend.cause_rate > TREND_EPSILON && trend.result_rate < -TREND_EPSILON;
        let secondary = !primary
            && settings.engine.perceives_cause_jitter()
            && trend.cause_rate > TREND_EPSILON
            && is_recurring_offender(node, last, settings.recheck_gap_secs, now);
        if primary || secondary {
            rec.hit(ActionLabel::CandAdd);
            tracing::info!(
                node_id = %node.id,
                cause_rate = trend.cause_rate,
                result_rate = trend.result_rate,
                cause_value = trend.cause_value,
                result_value = trend.result_value,
                recurring = secondary,
                "slow-trend candidate pre-captured"
            );
            candidates.push(node);
        }
    }

    let candidate = match candidates.as_slice() {
        [] => {
            rec.hit(ActionLabel::CandNoneNoFit);
            return None;
        }
        [only] => *only,
        _ => {
            rec.hit(ActionLabel::CandNoneTooMany);
            return None;
        }
    };

    let threshold = settings.affected_threshold(nodes.len());
    if affected < threshold {
        tracing::info!(
            node_id = %candidate.id,
            affected,
            threshold,
            "candidate rejected: it only affects a few nodes"
        );
        rec.hit(ActionLabel::CandNoneAffectAFew);
        return None;
    }

    if !gate::slower_than_others(nodes, candidate, rec) {
        tracing::info!(node_id = %candidate.id, "candidate rejected: it is not slower than others");
        rec.hit(ActionLabel::CandNoneNotSlower);
        return None;
    }

    rec.hit(ActionLabel::CandAdd);
    tracing::info!(node_id = %candidate.id, "slow-trend candidate confirmed");
    Some(candidate)
}
