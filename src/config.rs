//! Sort configuration using Figment
//!
//! This module provides strongly-typed configuration loading for the event builder.
//! Configuration is loaded from:
//! 1. a TOML settings file (window width, DAQ layout, info codes, mapping tables)
//! 2. Environment variables (prefixed with MB_SORT_, nested keys split on `__`)
//!
//! # Example
//! ```no_run
//! use rust_mbsort::config::SortConfig;
//!
//! let config = SortConfig::load_from("config/mb_sort.toml")?;
//! config.validate()?;
//! println!("Window: {} ns", config.builder.window_width_ns);
//! # Ok::<(), rust_mbsort::error::SortError>(())
//! ```

use crate::error::{SortError, SortResult};
use crate::hit::{InfoCode, ModuleId, StripSide};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Top-level sort configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SortConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Event-window and reconstruction settings
    #[serde(default)]
    pub builder: BuilderConfig,
    /// Digitiser layout and info codes
    #[serde(default)]
    pub daq: DaqConfig,
    /// CD detector layout
    #[serde(default)]
    pub cd: CdConfig,
    /// Miniball channel mapping table
    #[serde(default)]
    pub miniball: Vec<MiniballChannel>,
    /// CD channel mapping table
    #[serde(default)]
    pub cd_channel: Vec<CdChannel>,
    /// Per-channel calibration overrides
    #[serde(default)]
    pub calibration: Vec<ChannelCalibration>,
    /// Live monitoring cadence
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// How gamma-ray singles are merged into addback events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddbackMode {
    /// Each single joins at most one group; groups are formed per cluster.
    #[default]
    Clustered,
    /// Reproduces the historical output exactly, including its double counting.
    Legacy,
}

/// Event-window and reconstruction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Width of the event window in nanoseconds
    #[serde(default = "default_window_width")]
    pub window_width_ns: u64,
    /// Addback grouping strategy
    #[serde(default)]
    pub addback_mode: AddbackMode,
    /// Emit windows that contain particles but no gamma rays
    #[serde(default)]
    pub emit_particle_only: bool,
    /// Number of progress updates per stream
    #[serde(default = "default_progress_granularity")]
    pub progress_granularity: u64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            window_width_ns: default_window_width(),
            addback_mode: AddbackMode::default(),
            emit_particle_only: false,
            progress_granularity: default_progress_granularity(),
        }
    }
}

/// Digitiser layout and info-record codes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaqConfig {
    /// Number of SFP links
    #[serde(default = "default_n_sfp")]
    pub n_sfp: u8,
    /// Number of boards per SFP
    #[serde(default = "default_n_board")]
    pub n_board: u8,
    /// Number of channels per board
    #[serde(default = "default_n_channel")]
    pub n_channel: u8,
    /// Info code of the EBIS pulse marker
    #[serde(default = "default_ebis_code")]
    pub ebis_code: u8,
    /// Info code of the T1 proton pulse marker
    #[serde(default = "default_t1_code")]
    pub t1_code: u8,
    /// Info code of the pulser marker
    #[serde(default = "default_pulser_code")]
    pub pulser_code: u8,
    /// Info code of a module pause
    #[serde(default = "default_pause_code")]
    pub pause_code: u8,
    /// Info code of a module resume
    #[serde(default = "default_resume_code")]
    pub resume_code: u8,
    /// EBIS/T1 markers closer than this to the previous one are duplicates
    #[serde(default = "default_marker_debounce")]
    pub marker_debounce_ns: u64,
}

impl Default for DaqConfig {
    fn default() -> Self {
        Self {
            n_sfp: default_n_sfp(),
            n_board: default_n_board(),
            n_channel: default_n_channel(),
            ebis_code: default_ebis_code(),
            t1_code: default_t1_code(),
            pulser_code: default_pulser_code(),
            pause_code: default_pause_code(),
            resume_code: default_resume_code(),
            marker_debounce_ns: default_marker_debounce(),
        }
    }
}

impl DaqConfig {
    /// Classify a raw info code.
    pub fn classify(&self, code: u8) -> InfoCode {
        if code == self.ebis_code {
            InfoCode::Ebis
        } else if code == self.t1_code {
            InfoCode::T1
        } else if code == self.pulser_code {
            InfoCode::Pulser
        } else if code == self.pause_code {
            InfoCode::Pause
        } else if code == self.resume_code {
            InfoCode::Resume
        } else {
            InfoCode::Other(code)
        }
    }

    /// Whether `module` lies inside the sfp×board grid.
    pub fn contains(&self, module: ModuleId) -> bool {
        module.sfp < self.n_sfp && module.board < self.n_board
    }

    /// Number of modules in the sfp×board grid
    pub fn n_modules(&self) -> usize {
        usize::from(self.n_sfp) * usize::from(self.n_board)
    }
}

/// CD detector layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdConfig {
    /// Number of CD detectors
    #[serde(default = "default_n_cd_detectors")]
    pub n_detectors: u8,
    /// Sectors per detector
    #[serde(default = "default_n_cd_sectors")]
    pub n_sectors: u8,
    /// Strips on the p side of each sector
    #[serde(default = "default_n_strips_p")]
    pub n_strips_p: u8,
    /// Strips on the n side of each sector
    #[serde(default = "default_n_strips_n")]
    pub n_strips_n: u8,
}

impl Default for CdConfig {
    fn default() -> Self {
        Self {
            n_detectors: default_n_cd_detectors(),
            n_sectors: default_n_cd_sectors(),
            n_strips_p: default_n_strips_p(),
            n_strips_n: default_n_strips_n(),
        }
    }
}

/// One Miniball channel in the mapping table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiniballChannel {
    /// SFP link
    pub sfp: u8,
    /// Board on the SFP link
    pub board: u8,
    /// Channel on the board
    pub channel: u8,
    /// Cluster number
    pub cluster: u8,
    /// Crystal within the cluster
    pub crystal: u8,
    /// Segment 0 is the core
    pub segment: u8,
}

/// One CD strip channel in the mapping table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdChannel {
    /// SFP link
    pub sfp: u8,
    /// Board on the SFP link
    pub board: u8,
    /// Channel on the board
    pub channel: u8,
    /// CD detector
    pub detector: u8,
    /// Sector within the detector
    pub sector: u8,
    /// 0 = p side, 1 = n side
    pub side: u8,
    /// Strip on its side
    pub strip: u8,
}

/// Calibration coefficients for one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCalibration {
    /// SFP link
    pub sfp: u8,
    /// Board on the SFP link
    pub board: u8,
    /// Channel on the board
    pub channel: u8,
    /// Constant term in keV
    #[serde(default)]
    pub offset: f32,
    /// Linear term
    #[serde(default = "default_gain")]
    pub gain: f32,
    /// Quadratic term
    #[serde(default)]
    pub gain_quadr: f32,
    /// Raw-integral threshold
    #[serde(default)]
    pub threshold: f32,
}

/// Live monitoring cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Sleep between polling cycles in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

// Default value functions
fn default_name() -> String {
    "Miniball event builder".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_window_width() -> u64 {
    3000
}

fn default_progress_granularity() -> u64 {
    100
}

fn default_n_sfp() -> u8 {
    2
}

fn default_n_board() -> u8 {
    16
}

fn default_n_channel() -> u8 {
    16
}

fn default_ebis_code() -> u8 {
    21
}

fn default_t1_code() -> u8 {
    22
}

fn default_pulser_code() -> u8 {
    20
}

fn default_pause_code() -> u8 {
    2
}

fn default_resume_code() -> u8 {
    3
}

fn default_marker_debounce() -> u64 {
    1000
}

fn default_n_cd_detectors() -> u8 {
    1
}

fn default_n_cd_sectors() -> u8 {
    4
}

fn default_n_strips_p() -> u8 {
    16
}

fn default_n_strips_n() -> u8 {
    12
}

fn default_gain() -> f32 {
    1.0
}

fn default_poll_interval() -> u64 {
    5000
}

impl SortConfig {
    /// Load configuration from config/mb_sort.toml and environment variables
    ///
    /// Environment variables can override configuration with prefix MB_SORT_
    /// Example: MB_SORT_BUILDER__WINDOW_WIDTH_NS=5000
    pub fn load() -> SortResult<Self> {
        Self::load_from("config/mb_sort.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> SortResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("MB_SORT_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overrides)
    pub fn from_toml_str(toml: &str) -> SortResult<Self> {
        let config = Figment::new().merge(Toml::string(toml)).extract()?;
        Ok(config)
    }

    /// Render the effective configuration (file plus environment) as TOML
    pub fn to_toml(&self) -> SortResult<String> {
        toml::to_string_pretty(self).map_err(|e| invalid(format!("Cannot render configuration: {e}")))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> SortResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.builder.window_width_ns == 0 {
            return Err(invalid("window_width_ns must be greater than 0"));
        }

        if self.builder.progress_granularity == 0 {
            return Err(invalid("progress_granularity must be greater than 0"));
        }

        if self.daq.n_sfp == 0 || self.daq.n_board == 0 || self.daq.n_channel == 0 {
            return Err(invalid(format!(
                "DAQ layout must have at least one sfp, board and channel (got {}x{}x{})",
                self.daq.n_sfp, self.daq.n_board, self.daq.n_channel
            )));
        }

        let codes = [
            ("ebis_code", self.daq.ebis_code),
            ("t1_code", self.daq.t1_code),
            ("pulser_code", self.daq.pulser_code),
            ("pause_code", self.daq.pause_code),
            ("resume_code", self.daq.resume_code),
        ];
        let mut seen_codes = HashSet::new();
        for (name, code) in codes {
            if !seen_codes.insert(code) {
                return Err(invalid(format!("Info code {code} ({name}) is used twice")));
            }
        }

        let mut mapped = HashSet::new();
        for entry in &self.miniball {
            self.check_channel(entry.sfp, entry.board, entry.channel)?;
            if !mapped.insert((entry.sfp, entry.board, entry.channel)) {
                return Err(duplicate(entry.sfp, entry.board, entry.channel));
            }
        }

        for entry in &self.cd_channel {
            self.check_channel(entry.sfp, entry.board, entry.channel)?;
            if !mapped.insert((entry.sfp, entry.board, entry.channel)) {
                return Err(duplicate(entry.sfp, entry.board, entry.channel));
            }
            if entry.detector >= self.cd.n_detectors || entry.sector >= self.cd.n_sectors {
                return Err(invalid(format!(
                    "CD channel (sfp {}, board {}, ch {}) maps to detector {} sector {}, outside {}x{}",
                    entry.sfp,
                    entry.board,
                    entry.channel,
                    entry.detector,
                    entry.sector,
                    self.cd.n_detectors,
                    self.cd.n_sectors
                )));
            }
            let n_strips = match StripSide::from_index(entry.side) {
                Some(StripSide::P) => self.cd.n_strips_p,
                Some(StripSide::N) => self.cd.n_strips_n,
                None => {
                    return Err(invalid(format!(
                        "CD channel (sfp {}, board {}, ch {}) has side {}, must be 0 (p) or 1 (n)",
                        entry.sfp, entry.board, entry.channel, entry.side
                    )))
                }
            };
            if entry.strip >= n_strips {
                return Err(invalid(format!(
                    "CD channel (sfp {}, board {}, ch {}) strip {} exceeds {} strips",
                    entry.sfp, entry.board, entry.channel, entry.strip, n_strips
                )));
            }
        }

        let mut calibrated = HashSet::new();
        for entry in &self.calibration {
            self.check_channel(entry.sfp, entry.board, entry.channel)?;
            if !calibrated.insert((entry.sfp, entry.board, entry.channel)) {
                return Err(invalid(format!(
                    "Calibration for sfp {}, board {}, ch {} is given twice",
                    entry.sfp, entry.board, entry.channel
                )));
            }
            if !entry.gain.is_finite() || !entry.offset.is_finite() || !entry.gain_quadr.is_finite()
            {
                return Err(invalid(format!(
                    "Calibration for sfp {}, board {}, ch {} has non-finite coefficients",
                    entry.sfp, entry.board, entry.channel
                )));
            }
        }

        Ok(())
    }

    fn check_channel(&self, sfp: u8, board: u8, channel: u8) -> SortResult<()> {
        if sfp >= self.daq.n_sfp || board >= self.daq.n_board || channel >= self.daq.n_channel {
            return Err(invalid(format!(
                "Channel (sfp {}, board {}, ch {}) is outside the {}x{}x{} DAQ layout",
                sfp, board, channel, self.daq.n_sfp, self.daq.n_board, self.daq.n_channel
            )));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> SortError {
    SortError::Configuration(message.into())
}

fn duplicate(sfp: u8, board: u8, channel: u8) -> SortError {
    invalid(format!(
        "Channel (sfp {sfp}, board {board}, ch {channel}) is mapped more than once"
    ))
}
