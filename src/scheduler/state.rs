//! Eviction state: the persisted evicted-node slot plus volatile candidate memory.
//!
//! Two slots with different durability contracts:
//! - [`EvictionConfig`] is written to [`ConfigStorage`] on every mutation and
//!   is the only thing a restart reconstructs from.
//! - the current and last [`SlowCandidate`] live in memory only; a restart
//!   forgets in-flight candidates but never a confirmed eviction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::node::{KeyRange, NodeId};
use crate::cluster::storage::ConfigStorage;
use crate::core::clock::{Clock, secs_between};
use crate::core::errors::{EvictError, Result};

// ──────────────────── persisted config ────────────────────

/// The persisted unit: at most one evicted node.
///
/// On the wire it stays list-shaped: `{"evict-by-trend-stores":[]}` or
/// `{"evict-by-trend-stores":[7]}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvictionConfig {
    #[serde(rename = "evict-by-trend-stores", with = "evicted_list", default)]
    evicted: Option<NodeId>,
}

impl EvictionConfig {
    /// A config holding `evicted`, or nothing.
    #[must_use]
    pub const fn with_evicted(evicted: Option<NodeId>) -> Self {
        Self { evicted }
    }

    /// The evicted node, if any.
    #[must_use]
    pub const fn evicted(&self) -> Option<NodeId> {
        self.evicted
    }

    /// Canonical JSON encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a persisted config; rejects more than one node and the reserved id 0.
    pub fn decode(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| EvictError::ConfigParse {
            context: "evict-slow-trend config",
            details: e.to_string(),
        })
    }
}

mod evicted_list {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::cluster::node::NodeId;

    pub fn serialize<S: Serializer>(
        evicted: &Option<NodeId>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let ids: Vec<u64> = evicted.iter().map(|id| id.get()).collect();
        serializer.collect_seq(ids)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NodeId>, D::Error> {
        let ids = Vec::<u64>::deserialize(deserializer)?;
        match ids.as_slice() {
            [] => Ok(None),
            [raw] => NodeId::new(*raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom("evicted node id 0 is reserved")),
            _ => Err(D::Error::custom(format!(
                "at most one evicted node is supported, got {}",
                ids.len()
            ))),
        }
    }
}

// ──────────────────── volatile candidate ────────────────────

/// A node under probation, with the instant it was first proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlowCandidate {
    /// Node under probation.
    pub node_id: NodeId,
    /// When it was captured.
    pub captured_at: DateTime<Utc>,
}

// ──────────────────── eviction state ────────────────────

/// Persisted eviction slot plus volatile candidate tracking.
pub struct EvictionState {
    name: String,
    storage: Arc<dyn ConfigStorage>,
    clock: Arc<dyn Clock>,
    config: EvictionConfig,
    durable: bool,
    evicted_since: Option<DateTime<Utc>>,
    candidate: Option<SlowCandidate>,
    last_candidate: Option<SlowCandidate>,
}

impl EvictionState {
    /// Wrap a config loaded from storage (or a fresh empty one).
    ///
    /// A restored eviction counts as starting now for the recovery gap.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        config: EvictionConfig,
        storage: Arc<dyn ConfigStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let evicted_since = config.evicted().map(|_| clock.now());
        Self {
            name: name.into(),
            storage,
            clock,
            config,
            durable: true,
            evicted_since,
            candidate: None,
            last_candidate: None,
        }
    }

    /// The in-memory config.
    #[must_use]
    pub const fn config(&self) -> &EvictionConfig {
        &self.config
    }

    /// The node currently evicted.
    #[must_use]
    pub const fn evicted_node(&self) -> Option<NodeId> {
        self.config.evicted()
    }

    /// Whether the in-memory eviction slot matches what storage holds.
    #[must_use]
    pub const fn is_durable(&self) -> bool {
        self.durable
    }

    /// Key ranges whose leaders must leave `id`: everything if `id` is evicted.
    #[must_use]
    pub fn key_ranges(&self, id: NodeId) -> Vec<KeyRange> {
        if self.evicted_node() == Some(id) {
            vec![KeyRange::full()]
        } else {
            Vec::new()
        }
    }

    /// Write the current config to storage.
    pub fn persist(&mut self) -> Result<()> {
        let data = self.config.encode()?;
        self.storage.save_scheduler_config(&self.name, &data)?;
        self.durable = true;
        Ok(())
    }

    /// Evict `id` and persist. On failure the node stays evicted in memory but
    /// is flagged non-durable.
    pub fn set_and_persist(&mut self, id: NodeId) -> Result<()> {
        self.config = EvictionConfig::with_evicted(Some(id));
        self.evicted_since = Some(self.clock.now());
        self.durable = false;
        self.persist()
    }

    /// Clear the evicted slot and persist, returning the node evicted before.
    ///
    /// Nothing is written when no node was evicted.
    pub fn clear_and_persist(&mut self) -> (Option<NodeId>, Result<()>) {
        let Some(previous) = self.config.evicted() else {
            return (None, Ok(()));
        };
        self.config = EvictionConfig::default();
        self.evicted_since = None;
        self.durable = false;
        (Some(previous), self.persist())
    }

    /// Whole seconds since the current eviction started.
    #[must_use]
    pub fn eviction_secs(&self) -> u64 {
        self.evicted_since
            .map_or(0, |since| secs_between(since, self.clock.now()))
    }

    /// The candidate under probation.
    #[must_use]
    pub const fn candidate(&self) -> Option<SlowCandidate> {
        self.candidate
    }

    /// The most recently popped (or first) candidate.
    #[must_use]
    pub const fn last_candidate(&self) -> Option<SlowCandidate> {
        self.last_candidate
    }

    /// Start probation for `id`. The very first candidate also seeds the
    /// last-candidate memory.
    pub fn capture_candidate(&mut self, id: NodeId) {
        let captured = SlowCandidate {
            node_id: id,
            captured_at: self.clock.now(),
        };
        self.candidate = Some(captured);
        if self.last_candidate.is_none() {
            self.last_candidate = Some(captured);
        }
    }

    /// End probation: move the current candidate into the last-candidate
    /// memory and return its id.
    pub fn pop_candidate(&mut self) -> Option<NodeId> {
        self.last_candidate = self.candidate.take();
        self.last_candidate.map(|c| c.node_id)
    }

    /// Seconds since the current candidate was captured; 0 without one.
    #[must_use]
    pub fn candidate_captured_secs(&self) -> u64 {
        self.candidate
            .map_or(0, |c| secs_between(c.captured_at, self.clock.now()))
    }
}

impl std::fmt::Debug for EvictionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictionState")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("durable", &self.durable)
            .field("evicted_since", &self.evicted_since)
            .field("candidate", &self.candidate)
            .field("last_candidate", &self.last_candidate)
            .finish_non_exhaustive()
    }
}
