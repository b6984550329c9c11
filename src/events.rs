//! Reconstructed event records.
//!
//! A [`BuiltEvent`] is what the builder hands to a sink for every closed window
//! that produced gamma rays: the latest EBIS/T1 timestamps plus the gamma singles,
//! addback events and correlated particles found in that window.

use serde::{Deserialize, Serialize};

/// A gamma ray seen by a single crystal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GammaSingleEvent {
    /// Core energy in keV, unmodified.
    pub energy: f32,
    /// Cluster the crystal belongs to.
    pub cluster: u8,
    /// Crystal within the cluster.
    pub crystal: u8,
    /// Segment with the largest energy deposit, or 0 when no segment fired.
    pub segment: u8,
    /// Core timestamp in nanoseconds.
    pub timestamp: u64,
}

/// A gamma ray reconstructed from all singles of one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GammaAddbackEvent {
    /// Summed energy of the merged singles.
    pub energy: f32,
    /// Cluster whose singles were merged.
    pub cluster: u8,
    /// Crystal, segment and time of the highest-energy member.
    pub crystal: u8,
    /// Segment of the highest-energy member.
    pub segment: u8,
    /// Timestamp of the highest-energy member.
    pub timestamp: u64,
}

/// A CD particle with exactly one hit on each side of its sector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticleEvent {
    /// CD detector.
    pub detector: u8,
    /// Sector within the detector.
    pub sector: u8,
    /// Energy of the p-side strip in keV.
    pub energy_p: f32,
    /// Energy of the n-side strip in keV.
    pub energy_n: f32,
    /// Timestamp of the p-side hit.
    pub time_p: u64,
    /// Timestamp of the n-side hit.
    pub time_n: u64,
    /// Strip number on the p side.
    pub strip_p: u8,
    /// Strip number on the n side.
    pub strip_n: u8,
}

impl ParticleEvent {
    /// Time of the p-side hit, which is the reference for coincidences.
    pub fn timestamp(&self) -> u64 {
        self.time_p
    }
}

/// One physics event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuiltEvent {
    /// Absolute time of the latest EBIS pulse.
    pub ebis_timestamp: u64,
    /// Absolute time of the latest proton pulse on target.
    pub t1_timestamp: u64,
    /// Core-level gamma rays.
    pub gamma_singles: Vec<GammaSingleEvent>,
    /// Gamma rays after cluster addback.
    pub gamma_addback: Vec<GammaAddbackEvent>,
    /// Matched p/n strip pairs.
    pub particles: Vec<ParticleEvent>,
}

impl BuiltEvent {
    /// Number of gamma singles.
    pub fn gamma_multiplicity(&self) -> usize {
        self.gamma_singles.len()
    }

    /// Number of addback gamma rays.
    pub fn addback_multiplicity(&self) -> usize {
        self.gamma_addback.len()
    }

    /// Number of particles.
    pub fn particle_multiplicity(&self) -> usize {
        self.particles.len()
    }

    /// Whether any single or addback gamma ray is present.
    pub fn has_gamma(&self) -> bool {
        !self.gamma_singles.is_empty() || !self.gamma_addback.is_empty()
    }

    /// Whether the event carries nothing at all.
    pub fn is_empty(&self) -> bool {
        !self.has_gamma() && self.particles.is_empty()
    }
}
