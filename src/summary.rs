//! End-of-run summary.

use crate::emitter::EmitterStats;
use crate::health::{InfoCounts, MarkerStats, ModuleStats};
use crate::histogram::Histogram1D;
use crate::window::SegmenterStats;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Everything the builder counted over one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Stream records processed.
    pub entries: u64,
    /// Channel readings in the stream.
    pub channel_hits: u64,
    /// Info-record counts.
    pub info: InfoCounts,
    /// Readings mapped to Miniball.
    pub miniball_hits: u64,
    /// Readings mapped to the CD.
    pub cd_hits: u64,
    /// Readings with no detector role.
    pub unmapped_hits: u64,
    /// Mapped readings that failed threshold.
    pub below_threshold_hits: u64,
    /// Channel hits from modules outside the sfp×board table.
    pub foreign_module_hits: u64,
    /// Window segmentation counters.
    pub segmenter: SegmenterStats,
    /// Emission counters.
    pub emitter: EmitterStats,
    /// Gamma singles in emitted events.
    pub gamma_singles: u64,
    /// Addback gamma rays in emitted events.
    pub gamma_addback: u64,
    /// Particles in emitted events.
    pub particles: u64,
    /// Per-module health.
    pub modules: Vec<ModuleStats>,
    /// Channel hits per SFP link.
    pub sfp_hits: Vec<u64>,
    /// Time to the window anchor, every record.
    pub tdiff: Histogram1D,
    /// Time to the window anchor, above-threshold records only.
    pub tdiff_clean: Histogram1D,
    /// EBIS marker state at end of stream.
    pub ebis: MarkerStats,
    /// T1 marker state at end of stream.
    pub t1: MarkerStats,
    /// Pulser marker state at end of stream.
    pub pulser: MarkerStats,
}

impl RunSummary {
    /// Events handed to the sink.
    pub fn built_events(&self) -> u64 {
        self.emitter.emitted
    }

    /// Windows closed for any reason.
    pub fn windows_closed(&self) -> u64 {
        self.segmenter.closed_by_width
            + self.segmenter.closed_by_regression
            + self.segmenter.closed_by_end_of_stream
    }

    /// Dead time summed over all modules, in nanoseconds.
    pub fn total_dead_time(&self) -> u64 {
        self.modules.iter().map(|m| m.cumulative_dead_time).sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Event builder finished")?;
        writeln!(f, "  Stream entries = {}", self.entries)?;
        writeln!(f, "  Channel hits = {}", self.channel_hits)?;
        for (sfp, hits) in self.sfp_hits.iter().enumerate() {
            writeln!(f, "   SFP {} hits = {}", sfp, hits)?;
        }
        writeln!(f, "   Below threshold = {}", self.below_threshold_hits)?;
        writeln!(f, "   Unmapped = {}", self.unmapped_hits)?;
        if self.foreign_module_hits > 0 {
            writeln!(f, "   Outside module table = {}", self.foreign_module_hits)?;
        }
        writeln!(f, "  Info records = {}", self.info.total)?;
        writeln!(f, "   Pulser = {}", self.info.pulser)?;
        writeln!(f, "   EBIS = {} ({} duplicates)", self.info.ebis, self.ebis.duplicates)?;
        writeln!(f, "   T1 = {} ({} duplicates)", self.info.t1, self.t1.duplicates)?;
        writeln!(f, "   Pause = {}", self.info.pause)?;
        writeln!(f, "   Resume = {}", self.info.resume)?;
        writeln!(f, "   Other = {}", self.info.other)?;
        if self.info.rejected > 0 {
            writeln!(f, "   Rejected control records = {}", self.info.rejected)?;
        }
        if self.segmenter.out_of_order > 0 {
            writeln!(f, "  Out of order timestamps = {}", self.segmenter.out_of_order)?;
        }
        writeln!(f, "  Windows closed = {}", self.windows_closed())?;
        writeln!(f, "  Built events = {}", self.built_events())?;
        writeln!(f, "   Miniball hits = {}", self.miniball_hits)?;
        writeln!(f, "    Gamma singles events = {}", self.gamma_singles)?;
        writeln!(f, "    Gamma addback events = {}", self.gamma_addback)?;
        writeln!(f, "   CD hits = {}", self.cd_hits)?;
        writeln!(f, "    Particle events = {}", self.particles)?;
        if self.emitter.dropped_particle_only > 0 {
            writeln!(
                f,
                "    Particle-only windows dropped = {}",
                self.emitter.dropped_particle_only
            )?;
        }
        for module in self.modules.iter().filter(|m| m.n_hits > 0 || m.pause_count > 0) {
            writeln!(
                f,
                "  {}: hits = {}, pause = {}, resume = {}, dead time = {:.6} s, live time = {:.6} s",
                module.module,
                module.n_hits,
                module.pause_count,
                module.resume_count,
                module.dead_time_seconds(),
                module.live_time_seconds()
            )?;
        }
        Ok(())
    }
}
