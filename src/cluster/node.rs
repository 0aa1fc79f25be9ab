//! Read-only node observations taken from the cluster snapshot.

#![allow(missing_docs)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable node identity. Zero is reserved for "no node" and never constructed
/// through [`NodeId::new`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Wrap a raw id, mapping the reserved zero to `None`.
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Preparing,
    #[default]
    Serving,
    /// Any other non-terminal lifecycle (offline, being decommissioned).
    Removing,
    Removed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preparing => write!(f, "preparing"),
            Self::Serving => write!(f, "serving"),
            Self::Removing => write!(f, "removing"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// Pre-computed trend signal of one node.
///
/// `cause_value` / `result_value` are magnitudes where higher means slower;
/// the rates are their signed first derivatives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct SlowTrend {
    pub cause_rate: f64,
    pub result_rate: f64,
    pub cause_value: f64,
    pub result_value: f64,
}

/// One node as seen in the current cluster snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeObservation {
    pub id: NodeId,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub state: NodeState,
    #[serde(default)]
    pub slow_trend: Option<SlowTrend>,
    pub last_heartbeat: DateTime<Utc>,
}

impl NodeObservation {
    /// A serving node without a trend signal.
    #[must_use]
    pub fn serving(id: NodeId, last_heartbeat: DateTime<Utc>) -> Self {
        Self {
            id,
            address: format!("node-{id}:20160"),
            state: NodeState::Serving,
            slow_trend: None,
            last_heartbeat,
        }
    }

    #[must_use]
    pub fn with_trend(mut self, trend: SlowTrend) -> Self {
        self.slow_trend = Some(trend);
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: NodeState) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.state == NodeState::Removed
    }

    /// Whether the node takes part in detection and confirmation arithmetic.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        matches!(self.state, NodeState::Preparing | NodeState::Serving)
    }
}

/// Half-open key range `[start_key, end_key)`; empty bounds are unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KeyRange {
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
}

impl KeyRange {
    /// The whole key space.
    #[must_use]
    pub fn full() -> Self {
        Self::default()
    }
}
