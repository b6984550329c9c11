//! Assembly of reconstructed windows into output records.

use crate::events::{BuiltEvent, ParticleEvent};
use crate::gamma::GammaOutput;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Emission counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitterStats {
    /// Events handed to the sink.
    pub emitted: u64,
    /// Windows with particles but no gamma rays that were not emitted.
    pub dropped_particle_only: u64,
    /// Windows that reconstructed to nothing at all.
    pub empty: u64,
}

/// Builds one [`BuiltEvent`] per reconstructed window.
///
/// A window is emitted when it produced at least one gamma single or addback
/// event. Windows with only particles are dropped unless `emit_particle_only` is set.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    emit_particle_only: bool,
    stats: EmitterStats,
}

impl EventEmitter {
    /// Creates an emitter with zeroed counters.
    pub fn new(emit_particle_only: bool) -> Self {
        Self {
            emit_particle_only,
            stats: EmitterStats::default(),
        }
    }

    /// Assembles a window's reconstruction into an event, or counts why it was not emitted.
    pub fn emit(
        &mut self,
        ebis_timestamp: u64,
        t1_timestamp: u64,
        gamma: GammaOutput,
        particles: Vec<ParticleEvent>,
    ) -> Option<BuiltEvent> {
        let event = BuiltEvent {
            ebis_timestamp,
            t1_timestamp,
            gamma_singles: gamma.singles,
            gamma_addback: gamma.addback,
            particles,
        };

        if event.is_empty() {
            self.stats.empty += 1;
            return None;
        }
        if !event.has_gamma() && !self.emit_particle_only {
            trace!(particles = event.particle_multiplicity(), "Dropping particle-only window");
            self.stats.dropped_particle_only += 1;
            return None;
        }

        self.stats.emitted += 1;
        Some(event)
    }

    /// Counters since creation or the last reset.
    pub fn stats(&self) -> &EmitterStats {
        &self.stats
    }

    /// Zeroes the counters.
    pub fn reset(&mut self) {
        self.stats = EmitterStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::GammaSingleEvent;

    fn particle() -> ParticleEvent {
        ParticleEvent {
            detector: 0,
            sector: 1,
            energy_p: 100.0,
            energy_n: 98.0,
            time_p: 10,
            time_n: 12,
            strip_p: 4,
            strip_n: 9,
        }
    }

    fn gamma() -> GammaOutput {
        GammaOutput {
            singles: vec![GammaSingleEvent {
                energy: 511.0,
                cluster: 0,
                crystal: 0,
                segment: 0,
                timestamp: 5,
            }],
            addback: Vec::new(),
        }
    }

    #[test]
    fn gamma_window_is_emitted_with_markers() {
        let mut emitter = EventEmitter::new(false);
        let event = emitter.emit(100, 200, gamma(), vec![particle()]).unwrap();
        assert_eq!(event.ebis_timestamp, 100);
        assert_eq!(event.t1_timestamp, 200);
        assert_eq!(event.gamma_multiplicity(), 1);
        assert_eq!(event.particle_multiplicity(), 1);
        assert_eq!(emitter.stats().emitted, 1);
    }

    #[test]
    fn particle_only_window_is_dropped_by_default() {
        let mut emitter = EventEmitter::new(false);
        assert!(emitter.emit(0, 0, GammaOutput::default(), vec![particle()]).is_none());
        assert_eq!(emitter.stats().dropped_particle_only, 1);
    }

    #[test]
    fn particle_only_window_is_emitted_when_enabled() {
        let mut emitter = EventEmitter::new(true);
        let event = emitter.emit(0, 0, GammaOutput::default(), vec![particle()]).unwrap();
        assert!(!event.has_gamma());
        assert_eq!(emitter.stats().dropped_particle_only, 0);
    }

    #[test]
    fn empty_reconstruction_is_never_emitted() {
        let mut emitter = EventEmitter::new(true);
        assert!(emitter.emit(0, 0, GammaOutput::default(), Vec::new()).is_none());
        assert_eq!(emitter.stats().empty, 1);
    }
}
