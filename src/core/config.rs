//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{EvictError, Result};

/// Gap after eviction start before a node may be recovered, unit: s.
pub const DEFAULT_RECOVERY_DURATION_GAP_SECS: u64 = 600;
/// Window in which the last candidate may be re-admitted on cause alone, unit: s.
pub const MIN_RECHECK_DURATION_GAP_SECS: u64 = 120;
/// Leader transfers requested per tick for the evicted node.
pub const DEFAULT_EVICT_LEADER_BATCH_SIZE: usize = 3;

/// Full evictor configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub cluster: ClusterScheduleConfig,
    pub paths: PathsConfig,
}

/// Knobs owned by the slow-trend scheduler itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub recovery_duration_gap_secs: u64,
    pub recheck_duration_gap_secs: u64,
    pub evict_leader_batch_size: usize,
}

/// Tunables read from the cluster-wide scheduling configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterScheduleConfig {
    /// Admission limit on concurrent leader operators.
    pub leader_schedule_limit: usize,
    /// Fraction of the cluster that must show a degrading result before a
    /// single candidate is treated as a structural outlier.
    pub affected_store_ratio_threshold: f64,
    /// Storage engine mode; `raft-kv2` enables the recurring-offender rule.
    pub storage_engine: StorageEngine,
}

/// Storage engine running on the nodes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum StorageEngine {
    #[default]
    #[serde(rename = "raft-kv")]
    RaftKv,
    /// Engine able to perceive network-io jitter on the cause dimension.
    #[serde(rename = "raft-kv2")]
    RaftKv2,
}

impl StorageEngine {
    /// Whether cause-only trends may re-admit the last candidate.
    #[must_use]
    pub const fn perceives_cause_jitter(self) -> bool {
        matches!(self, Self::RaftKv2)
    }
}

impl fmt::Display for StorageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RaftKv => write!(f, "raft-kv"),
            Self::RaftKv2 => write!(f, "raft-kv2"),
        }
    }
}

impl FromStr for StorageEngine {
    type Err = EvictError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "raft-kv" => Ok(Self::RaftKv),
            "raft-kv2" => Ok(Self::RaftKv2),
            other => Err(EvictError::ConfigParse {
                context: "storage_engine",
                details: format!("unknown storage engine {other:?}"),
            }),
        }
    }
}

/// Filesystem paths used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub state_file: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            recovery_duration_gap_secs: DEFAULT_RECOVERY_DURATION_GAP_SECS,
            recheck_duration_gap_secs: MIN_RECHECK_DURATION_GAP_SECS,
            evict_leader_batch_size: DEFAULT_EVICT_LEADER_BATCH_SIZE,
        }
    }
}

impl Default for ClusterScheduleConfig {
    fn default() -> Self {
        Self {
            leader_schedule_limit: 4,
            affected_store_ratio_threshold: 0.3,
            storage_engine: StorageEngine::RaftKv,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                tracing::warn!("HOME not set, falling back to /tmp for data paths");
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("ste").join("config.toml");
        let data = home_dir.join(".local").join("share").join("ste");
        Self {
            config_file: cfg,
            state_file: data.join("scheduler-config.json"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| EvictError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(EvictError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("STE_SCHEDULER_RECOVERY_DURATION_GAP_SECS") {
            self.scheduler.recovery_duration_gap_secs =
                parse_env("STE_SCHEDULER_RECOVERY_DURATION_GAP_SECS", &raw)?;
        }
        if let Some(raw) = lookup("STE_SCHEDULER_RECHECK_DURATION_GAP_SECS") {
            self.scheduler.recheck_duration_gap_secs =
                parse_env("STE_SCHEDULER_RECHECK_DURATION_GAP_SECS", &raw)?;
        }
        if let Some(raw) = lookup("STE_SCHEDULER_EVICT_LEADER_BATCH_SIZE") {
            self.scheduler.evict_leader_batch_size =
                parse_env("STE_SCHEDULER_EVICT_LEADER_BATCH_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("STE_CLUSTER_LEADER_SCHEDULE_LIMIT") {
            self.cluster.leader_schedule_limit =
                parse_env("STE_CLUSTER_LEADER_SCHEDULE_LIMIT", &raw)?;
        }
        if let Some(raw) = lookup("STE_CLUSTER_AFFECTED_STORE_RATIO_THRESHOLD") {
            self.cluster.affected_store_ratio_threshold =
                parse_env("STE_CLUSTER_AFFECTED_STORE_RATIO_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("STE_CLUSTER_STORAGE_ENGINE") {
            self.cluster.storage_engine = raw.parse()?;
        }
        if let Some(raw) = lookup("STE_PATHS_STATE_FILE") {
            self.paths.state_file = PathBuf::from(raw);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let ratio = self.cluster.affected_store_ratio_threshold;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(EvictError::InvalidConfig {
                details: format!(
                    "cluster.affected_store_ratio_threshold must be in [0,1], got {ratio}"
                ),
            });
        }

        if self.cluster.leader_schedule_limit == 0 {
            return Err(EvictError::InvalidConfig {
                details: "cluster.leader_schedule_limit must be >= 1".to_string(),
            });
        }

        if self.scheduler.evict_leader_batch_size == 0 {
            return Err(EvictError::InvalidConfig {
                details: "scheduler.evict_leader_batch_size must be >= 1".to_string(),
            });
        }

        if self.scheduler.recheck_duration_gap_secs > self.scheduler.recovery_duration_gap_secs {
            return Err(EvictError::InvalidConfig {
                details: format!(
                    "scheduler.recheck_duration_gap_secs ({}) must be <= recovery_duration_gap_secs ({})",
                    self.scheduler.recheck_duration_gap_secs,
                    self.scheduler.recovery_duration_gap_secs
                ),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| EvictError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
