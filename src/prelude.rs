//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use slow_trend_evictor::prelude::*;
//! ```

// Core
pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::config::{ClusterScheduleConfig, Config, SchedulerConfig, StorageEngine};
pub use crate::core::errors::{EvictError, Result};

// Cluster
pub use crate::cluster::memory::{InMemoryCluster, Notification};
pub use crate::cluster::node::{KeyRange, NodeId, NodeObservation, NodeState, SlowTrend};
pub use crate::cluster::storage::{ConfigStorage, FileConfigStorage, MemoryConfigStorage};
pub use crate::cluster::{LeaderEvictionRequest, OperatorRequest, SchedulerCluster};

// Scheduler
pub use crate::scheduler::evict_slow_trend::{
    EVICT_SLOW_TREND_NAME, EVICT_SLOW_TREND_TYPE, EvictSlowTrendScheduler,
};
pub use crate::scheduler::metrics::{ActionLabel, MiscGauge, SlowTrendMetrics};
pub use crate::scheduler::state::{EvictionConfig, EvictionState, SlowCandidate};
pub use crate::scheduler::{EvictionPhase, ScheduleOutcome, SchedulePlan, Scheduler, TickAction};
