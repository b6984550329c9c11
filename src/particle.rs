//! CD particle reconstruction for one closed window.
//!
//! Hits are partitioned into `(detector, sector)` cells and split by side. A cell
//! yields a [`ParticleEvent`] only when it holds exactly one p-side and exactly one
//! n-side hit; any other multiplicity is pile-up that this pass does not resolve.

use crate::events::ParticleEvent;
use crate::hit::{ParticleCandidate, StripSide};
use std::collections::BTreeMap;
use tracing::trace;

#[derive(Default)]
struct Cell<'a> {
    p: Vec<&'a ParticleCandidate>,
    n: Vec<&'a ParticleCandidate>,
}

/// Particle reconstructor for a detector/sector grid.
#[derive(Debug, Clone, Copy)]
pub struct ParticleReconstructor {
    n_detectors: u8,
    n_sectors: u8,
}

impl ParticleReconstructor {
    /// Creates a reconstructor for `n_detectors`×`n_sectors` cells.
    pub fn new(n_detectors: u8, n_sectors: u8) -> Self {
        Self {
            n_detectors,
            n_sectors,
        }
    }

    /// Events in ascending `(detector, sector)` order.
    pub fn reconstruct(&self, hits: &[ParticleCandidate]) -> Vec<ParticleEvent> {
        let mut cells: BTreeMap<(u8, u8), Cell<'_>> = BTreeMap::new();

        for hit in hits {
            if hit.detector >= self.n_detectors || hit.sector >= self.n_sectors {
                trace!(detector = hit.detector, sector = hit.sector, "CD hit outside grid");
                continue;
            }
            let cell = cells.entry((hit.detector, hit.sector)).or_default();
            match hit.side {
                StripSide::P => cell.p.push(hit),
                StripSide::N => cell.n.push(hit),
            }
        }

        cells
            .into_iter()
            .filter_map(|((detector, sector), cell)| match (cell.p.as_slice(), cell.n.as_slice()) {
                ([p], [n]) => Some(ParticleEvent {
                    detector,
                    sector,
                    energy_p: p.energy,
                    energy_n: n.energy,
                    time_p: p.timestamp,
                    time_n: n.timestamp,
                    strip_p: p.strip,
                    strip_n: n.strip,
                }),
                (p, n) => {
                    trace!(detector, sector, p_mul = p.len(), n_mul = n.len(), "Unmatched CD cell");
                    None
                }
            })
            .collect()
    }
}
