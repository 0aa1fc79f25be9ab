#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};

use slow_trend_evictor::prelude::*;

// ──────────────────── cluster harness ────────────────────

/// A trend with a flat rate and the given cause magnitude.
pub fn calm_trend(cause_value: f64) -> SlowTrend {
    SlowTrend {
        cause_rate: 0.0,
        result_rate: 0.0,
        cause_value,
        result_value: 100.0,
    }
}

/// The canonical jitter signature: rising cause, falling result.
pub fn jitter_trend(cause_value: f64) -> SlowTrend {
    SlowTrend {
        cause_rate: 1.0,
        result_rate: -1.0,
        cause_value,
        result_value: 20.0,
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// One scheduler wired to an in-memory cluster, storage, and a manual clock.
pub struct Harness {
    pub cluster: InMemoryCluster,
    pub storage: Arc<MemoryConfigStorage>,
    pub clock: ManualClock,
    pub metrics: Arc<SlowTrendMetrics>,
    pub scheduler: EvictSlowTrendScheduler,
}

impl Harness {
    /// `size` serving nodes with calm trends (cause 1.0), every heartbeat at t0,
    /// the clock 10s later, and `regions` leaders on node 1.
    pub fn new(size: u64, regions: u64) -> Self {
        Self::with_config(size, regions, ClusterScheduleConfig::default())
    }

    pub fn with_config(size: u64, regions: u64, schedule: ClusterScheduleConfig) -> Self {
        let clock = ManualClock::new(t0());
        let cluster = InMemoryCluster::new(schedule);
        for id in 1..=size {
            cluster.upsert_node(
                NodeObservation::serving(NodeId(id), t0()).with_trend(calm_trend(1.0)),
            );
        }
        for region in 1..=regions {
            cluster.set_region_leader(region, NodeId(1));
        }
        clock.advance_secs(10);

        let storage = Arc::new(MemoryConfigStorage::new());
        let metrics = Arc::new(SlowTrendMetrics::new().expect("metrics"));
        let scheduler = EvictSlowTrendScheduler::new(
            SchedulerConfig::default(),
            storage.clone(),
            Arc::new(clock.clone()),
            Arc::clone(&metrics),
        );
        Self {
            cluster,
            storage,
            clock,
            metrics,
            scheduler,
        }
    }

    /// Rebuild the scheduler from what storage holds, as after a restart.
    pub fn restart(&mut self) {
        self.scheduler = EvictSlowTrendScheduler::load(
            SchedulerConfig::default(),
            self.storage.clone(),
            Arc::new(self.clock.clone()),
            Arc::clone(&self.metrics),
        )
        .expect("reload scheduler");
    }

    pub fn jitter(&self, id: u64) {
        self.cluster.set_trend(NodeId(id), Some(jitter_trend(5.0)));
    }

    pub fn calm(&self, id: u64, cause_value: f64) {
        self.cluster.set_trend(NodeId(id), Some(calm_trend(cause_value)));
    }

    pub fn advance(&self, secs: i64) {
        self.clock.advance_secs(secs);
    }

    /// Every node reports a heartbeat now.
    pub fn heartbeat(&self) {
        self.cluster.heartbeat_all(self.clock.now());
    }

    pub fn tick(&mut self) -> ScheduleOutcome {
        self.scheduler.schedule(&self.cluster, false)
    }

    /// Capture node `id`, then let everyone heartbeat and start the eviction.
    pub fn evict(&mut self, id: u64) -> ScheduleOutcome {
        self.jitter(id);
        let captured = self.tick();
        assert!(captured.hit(ActionLabel::CandCaptured), "{:?}", captured.plan);
        self.advance(30);
        self.heartbeat();
        let started = self.tick();
        assert_eq!(started.action(), TickAction::StartEviction(NodeId(id)));
        started
    }

    pub fn stored(&self) -> Option<String> {
        self.storage
            .get(EVICT_SLOW_TREND_NAME)
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
    }
}

// ──────────────────── binary runner ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("ste-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = PathBuf::from(
        option_env!("CARGO_BIN_EXE_ste").expect("ste binary requires the cli feature"),
    );

    let output = Command::new(&bin_path)
        .args(args)
        .env("RUST_LOG", "warn")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute ste command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let log_content = format!(
        "case={case_name}\nbin={}\nargs={args:?}\nstatus={}\n----- stdout -----\n{stdout}\n----- stderr -----\n{stderr}\n",
        bin_path.display(),
        output.status
    );
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
