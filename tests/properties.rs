//! Property-based tests for detector and eviction-state invariants.

mod common;

use std::sync::Arc;

use chrono::Duration;
use proptest::prelude::*;

use common::t0;
use slow_trend_evictor::prelude::*;
use slow_trend_evictor::scheduler::detector::{DetectorSettings, choose_candidate};
use slow_trend_evictor::scheduler::metrics::BranchRecorder;

// ──────────────────── strategies ────────────────────

fn arb_state() -> impl Strategy<Value = NodeState> {
    prop_oneof![
        4 => Just(NodeState::Serving),
        1 => Just(NodeState::Preparing),
        1 => Just(NodeState::Removing),
        1 => Just(NodeState::Removed),
    ]
}

fn arb_trend() -> impl Strategy<Value = Option<SlowTrend>> {
    prop::option::weighted(
        0.9,
        (-2.0f64..2.0, -2.0f64..2.0, 0.0f64..10.0, 0.0f64..100.0).prop_map(
            |(cause_rate, result_rate, cause_value, result_value)| SlowTrend {
                cause_rate,
                result_rate,
                cause_value,
                result_value,
            },
        ),
    )
}

fn arb_nodes(range: std::ops::Range<usize>) -> impl Strategy<Value = Vec<NodeObservation>> {
    prop::collection::vec((arb_state(), arb_trend()), range).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (state, trend))| {
                let mut node =
                    NodeObservation::serving(NodeId(i as u64 + 1), t0()).with_state(state);
                node.slow_trend = trend;
                node
            })
            .collect()
    })
}

/// Three or more nodes of which at most two are eligible.
fn arb_sparse_nodes() -> impl Strategy<Value = Vec<NodeObservation>> {
    (arb_nodes(3..12), any::<bool>()).prop_map(|(mut nodes, removed)| {
        let mut eligible = 0;
        for node in &mut nodes {
            if node.is_eligible() {
                eligible += 1;
                if eligible > 2 {
                    node.state = if removed {
                        NodeState::Removed
                    } else {
                        NodeState::Removing
                    };
                }
            }
        }
        nodes
    })
}

fn arb_settings() -> impl Strategy<Value = DetectorSettings> {
    (0.0f64..=1.0, any::<bool>()).prop_map(|(affected_ratio, kv2)| DetectorSettings {
        affected_ratio,
        engine: if kv2 {
            StorageEngine::RaftKv2
        } else {
            StorageEngine::RaftKv
        },
        recheck_gap_secs: 120,
    })
}

fn is_primary(node: &NodeObservation) -> bool {
    node.is_eligible()
        && node
            .slow_trend
            .is_some_and(|t| t.cause_rate > 1e-9 && t.result_rate < -1e-9)
}

fn state_fixture() -> (EvictionState, ManualClock) {
    let clock = ManualClock::new(t0());
    let state = EvictionState::new(
        EVICT_SLOW_TREND_NAME,
        EvictionConfig::default(),
        Arc::new(MemoryConfigStorage::new()),
        Arc::new(clock.clone()),
    );
    (state, clock)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Topologies of fewer than three nodes never yield a candidate.
    #[test]
    fn tiny_topologies_never_choose(nodes in arb_nodes(0..3), settings in arb_settings()) {
        let metrics = SlowTrendMetrics::new().expect("metrics");
        let mut rec = BranchRecorder::new(&metrics);
        let chosen = choose_candidate(&nodes, None, &settings, t0(), &mut rec);
        prop_assert!(chosen.is_none());
        prop_assert_eq!(rec.branches(), &[ActionLabel::CandNoneTooFew]);
    }

    /// Topologies with at most two eligible nodes never yield a candidate,
    /// whatever their total size.
    #[test]
    fn sparse_eligible_topologies_never_choose(
        nodes in arb_sparse_nodes(),
        settings in arb_settings(),
    ) {
        prop_assert!(nodes.len() >= 3);
        prop_assert!(nodes.iter().filter(|n| n.is_eligible()).count() <= 2);
        let metrics = SlowTrendMetrics::new().expect("metrics");
        let mut rec = BranchRecorder::new(&metrics);
        prop_assert!(choose_candidate(&nodes, None, &settings, t0(), &mut rec).is_none());
    }

    /// More than one primary match is always ambiguous.
    #[test]
    fn multiple_primary_matches_are_rejected(
        nodes in arb_nodes(3..12),
        settings in arb_settings(),
    ) {
        prop_assume!(nodes.iter().filter(|n| is_primary(n)).count() > 1);
        let metrics = SlowTrendMetrics::new().expect("metrics");
        let mut rec = BranchRecorder::new(&metrics);
        let chosen = choose_candidate(&nodes, None, &settings, t0(), &mut rec);
        prop_assert!(chosen.is_none());
        prop_assert!(rec.branches().contains(&ActionLabel::CandNoneTooMany));
    }

    /// A chosen node is always eligible, carries a rising cause, and is the
    /// only match.
    #[test]
    fn chosen_node_is_an_eligible_sole_match(
        nodes in arb_nodes(3..12),
        settings in arb_settings(),
    ) {
        let metrics = SlowTrendMetrics::new().expect("metrics");
        let mut rec = BranchRecorder::new(&metrics);
        if let Some(chosen) = choose_candidate(&nodes, None, &settings, t0(), &mut rec) {
            prop_assert!(chosen.is_eligible());
            prop_assert!(is_primary(chosen));
            prop_assert_eq!(nodes.iter().filter(|n| is_primary(n)).count(), 1);
        }
    }

    /// Popping and recapturing the same node always refreshes the memory
    /// to the popped value.
    #[test]
    fn pop_then_capture_keeps_popped_memory(
        first in 1u64..50,
        second in 1u64..50,
        waits in prop::collection::vec(0i64..500, 1..6),
    ) {
        let (mut state, clock) = state_fixture();
        state.capture_candidate(NodeId(first));
        for wait in &waits {
            clock.advance_secs(*wait);
            state.pop_candidate();
            state.capture_candidate(NodeId(second));
        }
        let current = state.candidate().expect("candidate");
        prop_assert_eq!(state.pop_candidate(), Some(NodeId(second)));
        state.capture_candidate(NodeId(second));
        prop_assert_eq!(state.last_candidate(), Some(current));
    }

    /// Candidate age follows the clock and never goes negative.
    #[test]
    fn candidate_age_tracks_the_clock(secs in -100i64..10_000) {
        let (mut state, clock) = state_fixture();
        state.capture_candidate(NodeId(3));
        clock.set(t0() + Duration::seconds(secs));
        prop_assert_eq!(state.candidate_captured_secs(), u64::try_from(secs).unwrap_or(0));
    }

    /// Encoding is stable for any single evicted id.
    #[test]
    fn config_encoding_is_stable(raw in 1u64..u64::MAX) {
        let config = EvictionConfig::with_evicted(Some(NodeId(raw)));
        let first = config.encode().expect("encode");
        let again = EvictionConfig::decode(&first).expect("decode").encode().expect("encode");
        prop_assert_eq!(&first, &again);
        prop_assert_eq!(
            String::from_utf8(first).expect("utf8"),
            format!("{{\"evict-by-trend-stores\":[{raw}]}}")
        );
    }
}
