//! Input stream records and their resolved forms.
//!
//! The hit stream is a time-ordered sequence of [`HitRecord`]s: either a digitised
//! channel reading from a FEBEX module or an info record (timing marker or
//! pause/resume control signal). After channel mapping a reading becomes a
//! [`ResolvedHit`], and only gamma/particle candidates that pass threshold take part
//! in event building.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A digitiser module, addressed by its `(sfp, board)` pair.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ModuleId {
    /// SFP link number.
    pub sfp: u8,
    /// Board on the SFP link.
    pub board: u8,
}

impl ModuleId {
    /// Creates a module address.
    pub fn new(sfp: u8, board: u8) -> Self {
        Self { sfp, board }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SFP {}, board {}", self.sfp, self.board)
    }
}

/// One calibrated channel reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelHit {
    /// Module that produced the reading.
    pub module: ModuleId,
    /// Channel on the module.
    pub channel: u8,
    /// Uncalibrated charge integral (Qint).
    pub raw_integral: f32,
    /// Calibrated energy in keV.
    pub energy: f32,
    /// Whether the reading passed the hardware threshold.
    pub over_threshold: bool,
    /// Nanoseconds since the start of the run.
    pub timestamp: u64,
}

/// Timing marker or control signal from the DAQ.
///
/// `code` is the raw DAQ identifier; it is classified into an [`InfoCode`] with the
/// configured code table. Global markers (EBIS, T1, pulser) usually carry no module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoRecord {
    /// Raw DAQ code.
    pub code: u8,
    /// Module a control record refers to.
    #[serde(default)]
    pub module: Option<ModuleId>,
    /// Nanoseconds since the start of the run.
    pub timestamp: u64,
}

/// Classified info-record code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoCode {
    /// EBIS pulse.
    Ebis,
    /// Proton pulse on target.
    T1,
    /// Test pulser.
    Pulser,
    /// Module stopped taking data.
    Pause,
    /// Module resumed taking data.
    Resume,
    /// Any other code, kept raw.
    Other(u8),
}

/// One element of the input stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HitRecord {
    /// Digitised channel reading.
    Channel(ChannelHit),
    /// Timing marker or control signal.
    Info(InfoRecord),
}

impl HitRecord {
    /// Timestamp of the record in nanoseconds.
    pub fn timestamp(&self) -> u64 {
        match self {
            HitRecord::Channel(hit) => hit.timestamp,
            HitRecord::Info(info) => info.timestamp,
        }
    }

    /// Whether this is an info record.
    pub fn is_info(&self) -> bool {
        matches!(self, HitRecord::Info(_))
    }
}

impl From<ChannelHit> for HitRecord {
    fn from(hit: ChannelHit) -> Self {
        HitRecord::Channel(hit)
    }
}

impl From<InfoRecord> for HitRecord {
    fn from(info: InfoRecord) -> Self {
        HitRecord::Info(info)
    }
}

/// Which face of a double-sided strip detector a channel reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StripSide {
    /// Junction side, index 0.
    P,
    /// Ohmic side, index 1.
    N,
}

impl StripSide {
    /// Side for a configuration index, 0 for p and 1 for n.
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(StripSide::P),
            1 => Some(StripSide::N),
            _ => None,
        }
    }

    /// Configuration index of the side.
    pub fn index(self) -> u8 {
        match self {
            StripSide::P => 0,
            StripSide::N => 1,
        }
    }
}

/// Detector role of a `(module, channel)` pair, as reported by the channel mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Miniball crystal core or segment.
    Miniball {
        /// Cluster number.
        cluster: u8,
        /// Crystal within the cluster.
        crystal: u8,
        /// Segment, 0 for the core.
        segment: u8,
    },
    /// CD strip.
    Cd {
        /// CD detector.
        detector: u8,
        /// Sector within the detector.
        sector: u8,
        /// Strip side.
        side: StripSide,
        /// Strip on its side.
        strip: u8,
    },
    /// Not in the mapping table.
    Unmapped,
}

/// A Miniball reading that passed threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GammaCandidate {
    /// Energy in keV.
    pub energy: f32,
    /// Nanoseconds since the start of the run.
    pub timestamp: u64,
    /// Cluster number.
    pub cluster: u8,
    /// Crystal within the cluster.
    pub crystal: u8,
    /// Segment 0 is the core contact.
    pub segment: u8,
}

/// A CD strip reading that passed threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleCandidate {
    /// Energy in keV.
    pub energy: f32,
    /// Nanoseconds since the start of the run.
    pub timestamp: u64,
    /// CD detector.
    pub detector: u8,
    /// Sector within the detector.
    pub sector: u8,
    /// Strip side.
    pub side: StripSide,
    /// Strip on its side.
    pub strip: u8,
}

/// A channel hit after mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedHit {
    /// Miniball candidate.
    Gamma(GammaCandidate),
    /// CD candidate.
    Particle(ParticleCandidate),
    /// Channel with no detector role.
    Unmapped,
}

impl ResolvedHit {
    /// Builds the resolved form of a reading from its role and calibrated energy.
    pub fn from_role(role: ChannelRole, energy: f32, timestamp: u64) -> Self {
        match role {
            ChannelRole::Miniball {
                cluster,
                crystal,
                segment,
            } => ResolvedHit::Gamma(GammaCandidate {
                energy,
                timestamp,
                cluster,
                crystal,
                segment,
            }),
            ChannelRole::Cd {
                detector,
                sector,
                side,
                strip,
            } => ResolvedHit::Particle(ParticleCandidate {
                energy,
                timestamp,
                detector,
                sector,
                side,
                strip,
            }),
            ChannelRole::Unmapped => ResolvedHit::Unmapped,
        }
    }

    /// Timestamp of a candidate; `None` for unmapped hits.
    pub fn timestamp(&self) -> Option<u64> {
        match self {
            ResolvedHit::Gamma(hit) => Some(hit.timestamp),
            ResolvedHit::Particle(hit) => Some(hit.timestamp),
            ResolvedHit::Unmapped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_json_records() {
        let line = r#"{"kind":"channel","module":{"sfp":0,"board":3},"channel":7,"raw_integral":1520.0,"energy":511.0,"over_threshold":true,"timestamp":1000}"#;
        let record: HitRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.timestamp(), 1000);
        match &record {
            HitRecord::Channel(hit) => {
                assert_eq!(hit.module, ModuleId::new(0, 3));
                assert_eq!(hit.channel, 7);
            }
            other => panic!("unexpected record: {:?}", other),
        }

        let info: HitRecord =
            serde_json::from_str(r#"{"kind":"info","code":21,"timestamp":5000}"#).unwrap();
        assert!(info.is_info());
        match info {
            HitRecord::Info(info) => assert_eq!(info.module, None),
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[test]
    fn strip_side_indices() {
        assert_eq!(StripSide::from_index(0), Some(StripSide::P));
        assert_eq!(StripSide::from_index(1), Some(StripSide::N));
        assert_eq!(StripSide::from_index(2), None);
        assert_eq!(StripSide::N.index(), 1);
    }

    #[test]
    fn unmapped_role_resolves_without_timestamp() {
        let hit = ResolvedHit::from_role(ChannelRole::Unmapped, 10.0, 42);
        assert_eq!(hit, ResolvedHit::Unmapped);
        assert_eq!(hit.timestamp(), None);
    }
}
