#![forbid(unsafe_code)]

//! Slow-trend evictor (ste): decides when one storage node's leaders should be
//! moved away because it shows a sustained slow trend, and when to let them back.
//!
//! The core runs once per scheduling tick:
//! 1. **Detection** picks the single node whose cause signal rises while its
//!    result falls.
//! 2. **Confirmation** waits for fresh heartbeats and a supermajority of slower
//!    peers before evicting.
//! 3. **Recovery** ends the eviction once the node is back at parity and old
//!    enough.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use slow_trend_evictor::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use slow_trend_evictor::core::config::Config;
//! use slow_trend_evictor::scheduler::evict_slow_trend::EvictSlowTrendScheduler;
//! ```

pub mod prelude;

#[cfg(feature = "cli")]
pub mod cli;
pub mod cluster;
pub mod core;
pub mod scheduler;
