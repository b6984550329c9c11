//! Per-module acquisition health.
//!
//! The tracker consumes every info record of the stream and keeps:
//! - pause/resume bookkeeping and cumulative dead time for each `(sfp, board)` module
//! - first/last data timestamps per module, from which live time is derived
//! - rolling "last seen" timestamps and instantaneous frequencies of the periodic
//!   EBIS, T1 and pulser markers
//!
//! Nothing in here can fail: control records for modules outside the configured
//! table are logged and ignored.

use crate::config::DaqConfig;
use crate::hit::{InfoCode, InfoRecord, ModuleId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, error, warn};

/// Reference used for a resume when the module has not paused in this run.
const RUN_START: u64 = 0;

/// Acquisition statistics for one digitiser module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStats {
    /// Module these statistics belong to.
    pub module: ModuleId,
    /// Timestamp of the first channel hit seen from this module.
    pub first_timestamp: u64,
    /// Timestamp of the latest channel hit seen from this module.
    pub last_timestamp: u64,
    /// Total paused time in nanoseconds.
    pub cumulative_dead_time: u64,
    /// Pause records seen.
    pub pause_count: u64,
    /// Resume records seen.
    pub resume_count: u64,
    /// Timestamp of a pause still waiting for its resume.
    pub pause_pending: Option<u64>,
    /// Timestamp of the latest pause in this run. Survives resumes, so a
    /// repeated resume is measured from it rather than from run start.
    pub last_pause: Option<u64>,
    /// Channel hits attributed to this module.
    pub n_hits: u64,
}

impl ModuleStats {
    fn new(module: ModuleId) -> Self {
        Self {
            module,
            ..Default::default()
        }
    }

    /// Time between first and last hit, minus dead time, in nanoseconds.
    pub fn live_time(&self) -> u64 {
        self.last_timestamp
            .saturating_sub(self.first_timestamp)
            .saturating_sub(self.cumulative_dead_time)
    }

    /// Dead time in seconds.
    pub fn dead_time_seconds(&self) -> f64 {
        self.cumulative_dead_time as f64 / 1e9
    }

    /// Live time in seconds.
    pub fn live_time_seconds(&self) -> f64 {
        self.live_time() as f64 / 1e9
    }
}

/// Frequency of a periodic marker at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencySample {
    /// Marker timestamp the sample was taken at.
    pub timestamp: u64,
    /// Frequency derived from the gap to the previous marker.
    pub hz: f64,
}

/// Rolling state of one periodic timing marker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerStats {
    /// Most recently accepted marker timestamp.
    pub last: Option<u64>,
    /// Accepted markers.
    pub count: u64,
    /// Markers dropped as duplicates of the previous one.
    pub duplicates: u64,
    /// Frequency at the latest accepted marker.
    pub last_frequency_hz: Option<f64>,
    /// Every frequency sample, in stream order.
    pub samples: Vec<FrequencySample>,
}

impl MarkerStats {
    /// Accepts a marker, optionally ignoring it when it lies within `debounce_ns`
    /// of the last accepted one. Returns whether it was accepted.
    fn update(&mut self, timestamp: u64, debounce_ns: Option<u64>) -> bool {
        if let (Some(window), Some(last)) = (debounce_ns, self.last) {
            if timestamp.abs_diff(last) <= window {
                self.duplicates += 1;
                return false;
            }
        }

        if let Some(previous) = self.last {
            if timestamp > previous {
                let hz = 1e9 / (timestamp - previous) as f64;
                self.last_frequency_hz = Some(hz);
                self.samples.push(FrequencySample { timestamp, hz });
            } else {
                debug!(timestamp, previous, "Marker went backwards, frequency not sampled");
            }
        }

        self.last = Some(timestamp);
        self.count += 1;
        true
    }

    /// Last accepted timestamp, or 0 when none has been seen yet.
    pub fn latest(&self) -> u64 {
        self.last.unwrap_or(0)
    }
}

/// Info-record counts by classified code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoCounts {
    /// All info records.
    pub total: u64,
    /// Accepted EBIS markers.
    pub ebis: u64,
    /// Accepted T1 markers.
    pub t1: u64,
    /// Pulser markers.
    pub pulser: u64,
    /// Accepted pause records.
    pub pause: u64,
    /// Accepted resume records.
    pub resume: u64,
    /// Records with an unclassified code.
    pub other: u64,
    /// Pause/resume records rejected for a missing or out-of-range module.
    pub rejected: u64,
}

/// Module health tracker, owned by one event builder.
#[derive(Debug, Clone)]
pub struct ModuleHealthTracker {
    daq: DaqConfig,
    modules: Vec<ModuleStats>,
    ebis: MarkerStats,
    t1: MarkerStats,
    pulser: MarkerStats,
    counts: InfoCounts,
    foreign_modules: HashSet<ModuleId>,
}

impl ModuleHealthTracker {
    /// Creates a tracker with one entry per module in the sfp×board grid.
    pub fn new(daq: DaqConfig) -> Self {
        let modules = (0..daq.n_sfp)
            .flat_map(|sfp| (0..daq.n_board).map(move |board| ModuleStats::new(ModuleId::new(sfp, board))))
            .collect();
        Self {
            daq,
            modules,
            ebis: MarkerStats::default(),
            t1: MarkerStats::default(),
            pulser: MarkerStats::default(),
            counts: InfoCounts::default(),
            foreign_modules: HashSet::new(),
        }
    }

    /// Clears all statistics, keeping the module table layout.
    pub fn reset(&mut self) {
        *self = Self::new(self.daq.clone());
    }

    /// Routes one info record. Returns its classified code.
    pub fn observe(&mut self, info: &InfoRecord) -> InfoCode {
        let code = self.daq.classify(info.code);
        self.counts.total += 1;
        let debounce = Some(self.daq.marker_debounce_ns);

        match code {
            InfoCode::Ebis => {
                if self.ebis.update(info.timestamp, debounce) {
                    self.counts.ebis += 1;
                }
            }
            InfoCode::T1 => {
                if self.t1.update(info.timestamp, debounce) {
                    self.counts.t1 += 1;
                }
            }
            InfoCode::Pulser => {
                self.pulser.update(info.timestamp, None);
                self.counts.pulser += 1;
            }
            InfoCode::Pause => self.pause(info),
            InfoCode::Resume => self.resume(info),
            InfoCode::Other(_) => self.counts.other += 1,
        }

        code
    }

    fn pause(&mut self, info: &InfoRecord) {
        let Some(stats) = self.control_target(info, "pause") else {
            return;
        };
        stats.pause_count += 1;
        stats.pause_pending = Some(info.timestamp);
        stats.last_pause = Some(info.timestamp);
        self.counts.pause += 1;
    }

    fn resume(&mut self, info: &InfoRecord) {
        let Some(stats) = self.control_target(info, "resume") else {
            return;
        };
        stats.resume_count += 1;

        stats.pause_pending = None;
        let reference = match stats.last_pause {
            Some(paused_at) => paused_at,
            None => {
                warn!(
                    sfp = stats.module.sfp,
                    board = stats.module.board,
                    blocked_s = info.timestamp as f64 / 1e9,
                    "Module was blocked at start of run"
                );
                RUN_START
            }
        };

        match info.timestamp.checked_sub(reference) {
            Some(dead) => stats.cumulative_dead_time += dead,
            None => warn!(
                sfp = stats.module.sfp,
                board = stats.module.board,
                paused_at = reference,
                resumed_at = info.timestamp,
                "Resume precedes its pause, dead time not counted"
            ),
        }
        self.counts.resume += 1;
    }

    fn control_target(&mut self, info: &InfoRecord, kind: &str) -> Option<&mut ModuleStats> {
        let index = info.module.and_then(|module| self.index(module));
        match index {
            Some(index) => self.modules.get_mut(index),
            None => {
                self.counts.rejected += 1;
                match info.module {
                    Some(module) => error!(
                        sfp = module.sfp,
                        board = module.board,
                        timestamp = info.timestamp,
                        "Bad {kind} event"
                    ),
                    None => error!(timestamp = info.timestamp, "Bad {kind} event without a module"),
                }
                None
            }
        }
    }

    /// Records a channel hit for live-time bookkeeping.
    ///
    /// Returns false when the module is outside the configured table.
    pub fn record_hit(&mut self, module: ModuleId, timestamp: u64) -> bool {
        let Some(index) = self.index(module) else {
            if self.foreign_modules.insert(module) {
                warn!(
                    sfp = module.sfp,
                    board = module.board,
                    "Channel data from a module outside the configured table"
                );
            }
            return false;
        };

        let stats = &mut self.modules[index];
        if stats.n_hits == 0 {
            stats.first_timestamp = timestamp;
        }
        stats.last_timestamp = timestamp;
        stats.n_hits += 1;
        true
    }

    fn index(&self, module: ModuleId) -> Option<usize> {
        self.daq
            .contains(module)
            .then(|| usize::from(module.sfp) * usize::from(self.daq.n_board) + usize::from(module.board))
    }

    /// Statistics of one module, if it is inside the grid.
    pub fn module(&self, module: ModuleId) -> Option<&ModuleStats> {
        self.index(module).and_then(|index| self.modules.get(index))
    }

    /// Statistics of every module, in sfp-major order.
    pub fn modules(&self) -> &[ModuleStats] {
        &self.modules
    }

    /// Latest accepted EBIS timestamp (0 before the first).
    pub fn ebis_timestamp(&self) -> u64 {
        self.ebis.latest()
    }

    /// Latest accepted T1 timestamp (0 before the first).
    pub fn t1_timestamp(&self) -> u64 {
        self.t1.latest()
    }

    /// EBIS marker state.
    pub fn ebis(&self) -> &MarkerStats {
        &self.ebis
    }

    /// T1 marker state.
    pub fn t1(&self) -> &MarkerStats {
        &self.t1
    }

    /// Pulser marker state.
    pub fn pulser(&self) -> &MarkerStats {
        &self.pulser
    }

    /// Info-record counts.
    pub fn counts(&self) -> &InfoCounts {
        &self.counts
    }
}
