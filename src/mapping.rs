//! Channel mapping and calibration collaborators.
//!
//! The event builder never decodes detector geometry itself: a [`ChannelMapper`]
//! tells it what a `(module, channel)` pair is connected to, and an optional
//! [`Calibration`] recomputes energies and threshold decisions from the raw integral
//! when a recalibration is requested. Table-backed implementations built from
//! [`SortConfig`] are provided for both.

use crate::config::SortConfig;
use crate::hit::{ChannelRole, ModuleId, StripSide};
use std::collections::HashMap;

/// Resolves a digitiser channel to its detector role.
pub trait ChannelMapper: Send + Sync {
    /// Role of `channel` on `module`; [`ChannelRole::Unmapped`] when unknown.
    fn resolve(&self, module: ModuleId, channel: u8) -> ChannelRole;
}

/// Energy calibration and threshold source.
pub trait Calibration: Send + Sync {
    /// Calibrated energy in keV for a raw charge integral.
    fn energy(&self, module: ModuleId, channel: u8, raw_integral: f32) -> f32;

    /// Raw-integral threshold below which a reading is noise.
    fn threshold(&self, module: ModuleId, channel: u8) -> f32;
}

/// Mapper backed by the `[[miniball]]` and `[[cd_channel]]` configuration tables.
#[derive(Debug, Clone, Default)]
pub struct TableMapper {
    roles: HashMap<(ModuleId, u8), ChannelRole>,
}

impl TableMapper {
    /// Builds the table from the configuration's mapping entries.
    pub fn from_config(config: &SortConfig) -> Self {
        let mut roles = HashMap::with_capacity(config.miniball.len() + config.cd_channel.len());

        for entry in &config.miniball {
            roles.insert(
                (ModuleId::new(entry.sfp, entry.board), entry.channel),
                ChannelRole::Miniball {
                    cluster: entry.cluster,
                    crystal: entry.crystal,
                    segment: entry.segment,
                },
            );
        }

        for entry in &config.cd_channel {
            // validate() rejects other sides, so skipping here only matters for
            // unvalidated configs
            let Some(side) = StripSide::from_index(entry.side) else {
                continue;
            };
            roles.insert(
                (ModuleId::new(entry.sfp, entry.board), entry.channel),
                ChannelRole::Cd {
                    detector: entry.detector,
                    sector: entry.sector,
                    side,
                    strip: entry.strip,
                },
            );
        }

        Self { roles }
    }

    /// Adds or replaces a single channel.
    pub fn insert(&mut self, module: ModuleId, channel: u8, role: ChannelRole) {
        self.roles.insert((module, channel), role);
    }

    /// Number of mapped channels.
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Whether no channel is mapped.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl ChannelMapper for TableMapper {
    fn resolve(&self, module: ModuleId, channel: u8) -> ChannelRole {
        self.roles
            .get(&(module, channel))
            .copied()
            .unwrap_or(ChannelRole::Unmapped)
    }
}

#[derive(Debug, Clone, Copy)]
struct Coefficients {
    offset: f32,
    gain: f32,
    gain_quadr: f32,
    threshold: f32,
}

impl Default for Coefficients {
    fn default() -> Self {
        Self {
            offset: 0.0,
            gain: 1.0,
            gain_quadr: 0.0,
            threshold: 0.0,
        }
    }
}

/// Quadratic calibration: `offset + gain*q + gain_quadr*q²`.
///
/// Channels without an entry use unit gain and a zero threshold.
#[derive(Debug, Clone, Default)]
pub struct TableCalibration {
    coefficients: HashMap<(ModuleId, u8), Coefficients>,
}

impl TableCalibration {
    /// Builds the coefficient table from `[[calibration]]`.
    pub fn from_config(config: &SortConfig) -> Self {
        let coefficients = config
            .calibration
            .iter()
            .map(|entry| {
                (
                    (ModuleId::new(entry.sfp, entry.board), entry.channel),
                    Coefficients {
                        offset: entry.offset,
                        gain: entry.gain,
                        gain_quadr: entry.gain_quadr,
                        threshold: entry.threshold,
                    },
                )
            })
            .collect();
        Self { coefficients }
    }

    fn lookup(&self, module: ModuleId, channel: u8) -> Coefficients {
        self.coefficients
            .get(&(module, channel))
            .copied()
            .unwrap_or_default()
    }
}

impl Calibration for TableCalibration {
    fn energy(&self, module: ModuleId, channel: u8, raw_integral: f32) -> f32 {
        let c = self.lookup(module, channel);
        c.offset + c.gain * raw_integral + c.gain_quadr * raw_integral * raw_integral
    }

    fn threshold(&self, module: ModuleId, channel: u8) -> f32 {
        self.lookup(module, channel).threshold
    }
}
