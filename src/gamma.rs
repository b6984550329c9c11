//! Gamma-ray reconstruction for one closed window.
//!
//! Two passes over the Miniball hits of a window:
//!
//! 1. **Single-crystal consolidation.** Every core hit (segment 0) becomes one
//!    [`GammaSingleEvent`] carrying the core energy and time. Its `segment` is the
//!    highest-energy companion hit in the same `(cluster, crystal)`, first maximum
//!    wins, or 0 when no segment fired.
//! 2. **Addback.** Singles in the same cluster are summed into
//!    [`GammaAddbackEvent`]s. The highest-energy member donates crystal, segment and
//!    time. Grouping is purely by cluster; there is no line-of-sight test.

use crate::config::AddbackMode;
use crate::events::{GammaAddbackEvent, GammaSingleEvent};
use crate::hit::GammaCandidate;
use std::sync::Once;
use tracing::{trace, warn};

static LEGACY_WARNING: Once = Once::new();

/// Singles and addback events of one window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GammaOutput {
    /// Core-level singles in input order.
    pub singles: Vec<GammaSingleEvent>,
    /// Addback events, one per merge.
    pub addback: Vec<GammaAddbackEvent>,
}

/// Gamma-ray reconstructor.
#[derive(Debug, Clone, Copy, Default)]
pub struct GammaReconstructor {
    mode: AddbackMode,
}

impl GammaReconstructor {
    /// Creates a reconstructor; selecting legacy addback logs a warning once per process.
    pub fn new(mode: AddbackMode) -> Self {
        if mode == AddbackMode::Legacy {
            LEGACY_WARNING.call_once(|| {
                warn!("Legacy addback selected: seeds can be counted twice and singles reused");
            });
        }
        Self { mode }
    }

    /// Addback algorithm in use.
    pub fn mode(&self) -> AddbackMode {
        self.mode
    }

    /// Finds the singles of a window and merges them per cluster.
    pub fn reconstruct(&self, hits: &[GammaCandidate]) -> GammaOutput {
        let singles = find_singles(hits);
        let addback = match self.mode {
            AddbackMode::Clustered => addback_clustered(&singles),
            AddbackMode::Legacy => addback_legacy(&singles),
        };
        GammaOutput { singles, addback }
    }
}

/// Pass 1: one single per core hit.
pub fn find_singles(hits: &[GammaCandidate]) -> Vec<GammaSingleEvent> {
    let mut singles = Vec::new();

    for (i, core) in hits.iter().enumerate() {
        if core.segment != 0 {
            continue;
        }

        // a crystal with dead segments keeps the core as its position
        let mut max_segment = 0;
        let mut max_energy = 0.0_f32;
        let mut segment_sum = 0.0_f32;
        let mut multiplicity = 0_u32;

        for (j, other) in hits.iter().enumerate() {
            if i == j || other.cluster != core.cluster || other.crystal != core.crystal {
                continue;
            }
            multiplicity += 1;
            segment_sum += other.energy;
            if other.energy > max_energy {
                max_energy = other.energy;
                max_segment = other.segment;
            }
        }

        trace!(
            cluster = core.cluster,
            crystal = core.crystal,
            core_energy = core.energy,
            segment_sum,
            multiplicity,
            "Single-crystal gamma"
        );

        singles.push(GammaSingleEvent {
            energy: core.energy,
            cluster: core.cluster,
            crystal: core.crystal,
            segment: max_segment,
            timestamp: core.timestamp,
        });
    }

    singles
}

/// Pass 2: each single is used at most once, either as a seed or a member.
pub fn addback_clustered(singles: &[GammaSingleEvent]) -> Vec<GammaAddbackEvent> {
    let mut consumed = vec![false; singles.len()];
    let mut addback = Vec::new();

    for (i, seed) in singles.iter().enumerate() {
        if consumed[i] {
            continue;
        }
        consumed[i] = true;

        let mut sum = seed.energy;
        let mut donor = seed;

        for (j, member) in singles.iter().enumerate().skip(i + 1) {
            if consumed[j] || member.cluster != seed.cluster {
                continue;
            }
            consumed[j] = true;
            sum += member.energy;
            if member.energy > donor.energy {
                donor = member;
            }
        }

        addback.push(GammaAddbackEvent {
            energy: sum,
            cluster: seed.cluster,
            crystal: donor.crystal,
            segment: donor.segment,
            timestamp: donor.timestamp,
        });
    }

    addback
}

/// Pass 2 as historically sorted data was produced.
///
/// Every single seeds a group, members are searched from index `2*i` onwards and
/// nothing is ever marked as used. For the first single this includes the seed
/// itself, so its energy is counted twice.
pub fn addback_legacy(singles: &[GammaSingleEvent]) -> Vec<GammaAddbackEvent> {
    let mut addback = Vec::with_capacity(singles.len());

    for (i, seed) in singles.iter().enumerate() {
        let mut sum = seed.energy;
        let mut donor = seed;

        for member in singles.iter().skip(i + i) {
            if member.cluster != seed.cluster {
                continue;
            }
            sum += member.energy;
            if member.energy > donor.energy {
                donor = member;
            }
        }

        addback.push(GammaAddbackEvent {
            energy: sum,
            cluster: seed.cluster,
            crystal: donor.crystal,
            segment: donor.segment,
            timestamp: donor.timestamp,
        });
    }

    addback
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(cluster: u8, crystal: u8, segment: u8, energy: f32, timestamp: u64) -> GammaCandidate {
        GammaCandidate {
            energy,
            timestamp,
            cluster,
            crystal,
            segment,
        }
    }

    fn single(cluster: u8, crystal: u8, segment: u8, energy: f32, timestamp: u64) -> GammaSingleEvent {
        GammaSingleEvent {
            energy,
            cluster,
            crystal,
            segment,
            timestamp,
        }
    }

    #[test]
    fn core_keeps_its_energy_and_takes_max_segment() {
        let hits = [
            candidate(1, 0, 0, 500.0, 1000),
            candidate(1, 0, 3, 50.0, 1000),
        ];
        let singles = find_singles(&hits);
        assert_eq!(singles, vec![single(1, 0, 3, 500.0, 1000)]);
    }

    #[test]
    fn core_without_segments_uses_segment_zero() {
        let singles = find_singles(&[candidate(2, 1, 0, 1332.5, 77)]);
        assert_eq!(singles, vec![single(2, 1, 0, 1332.5, 77)]);
    }

    #[test]
    fn segment_ties_keep_first_maximum() {
        let hits = [
            candidate(0, 2, 4, 80.0, 10),
            candidate(0, 2, 0, 300.0, 10),
            candidate(0, 2, 5, 80.0, 11),
            candidate(0, 1, 6, 900.0, 12),
        ];
        let singles = find_singles(&hits);
        assert_eq!(singles.len(), 1);
        assert_eq!(singles[0].segment, 4);
        assert_eq!(singles[0].crystal, 2);
    }

    #[test]
    fn segments_without_core_produce_nothing() {
        let hits = [candidate(0, 0, 1, 100.0, 0), candidate(0, 0, 2, 200.0, 0)];
        assert!(find_singles(&hits).is_empty());
    }

    #[test]
    fn clustered_addback_merges_same_cluster() {
        let singles = [single(1, 0, 3, 500.0, 1000), single(1, 2, 1, 300.0, 1010)];
        let addback = addback_clustered(&singles);
        assert_eq!(addback.len(), 1);
        assert_eq!(
            addback[0],
            GammaAddbackEvent {
                energy: 800.0,
                cluster: 1,
                crystal: 0,
                segment: 3,
                timestamp: 1000,
            }
        );
    }

    #[test]
    fn clustered_addback_donor_is_maximum_member() {
        let singles = [
            single(4, 0, 0, 100.0, 1),
            single(5, 0, 0, 700.0, 2),
            single(4, 2, 6, 400.0, 3),
            single(4, 1, 2, 400.0, 4),
        ];
        let addback = addback_clustered(&singles);
        assert_eq!(addback.len(), 2);
        assert_eq!(addback[0].energy, 900.0);
        assert_eq!(addback[0].cluster, 4);
        assert_eq!((addback[0].crystal, addback[0].segment, addback[0].timestamp), (2, 6, 3));
        assert_eq!(addback[1].energy, 700.0);
        assert_eq!(addback[1].cluster, 5);
    }

    #[test]
    fn legacy_addback_reproduces_historical_output() {
        let singles = [single(1, 0, 3, 500.0, 1000), single(1, 2, 1, 300.0, 1010)];
        let addback = addback_legacy(&singles);
        assert_eq!(addback.len(), 2);
        // seed 0 scans from index 0 and adds itself again
        assert_eq!(addback[0].energy, 1300.0);
        assert_eq!(addback[0].crystal, 0);
        // seed 1 scans from index 2, finds nothing
        assert_eq!(addback[1].energy, 300.0);
        assert_eq!(addback[1].crystal, 2);
    }

    #[test]
    fn reconstruct_runs_both_passes() {
        let hits = [
            candidate(1, 0, 0, 500.0, 1000),
            candidate(1, 0, 3, 50.0, 1000),
            candidate(1, 1, 0, 300.0, 1005),
            candidate(2, 0, 0, 122.0, 1100),
        ];
        let output = GammaReconstructor::new(AddbackMode::Clustered).reconstruct(&hits);
        assert_eq!(output.singles.len(), 3);
        assert_eq!(output.addback.len(), 2);
        assert_eq!(output.addback[0].energy, 800.0);
        assert_eq!(output.addback[1].energy, 122.0);
    }
}
