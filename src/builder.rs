//! The event-building engine.
//!
//! [`EventBuilder`] owns every piece of per-run state: the window segmenter, the
//! module health tracker, the reconstructors and all counters. One instance
//! processes one ordered stream at a time; [`EventBuilder::start_file`] (or a new
//! call to [`EventBuilder::build`]) restarts it for the next file.
//!
//! # Example
//! ```no_run
//! use rust_mbsort::builder::EventBuilder;
//! use rust_mbsort::config::SortConfig;
//! use rust_mbsort::hit::HitRecord;
//!
//! let config = SortConfig::load()?;
//! let mut builder = EventBuilder::new(&config)?;
//! let records: Vec<HitRecord> = Vec::new();
//! for event in builder.build(records) {
//!     println!("{} gamma rays", event.gamma_multiplicity());
//! }
//! println!("{}", builder.summary());
//! # Ok::<(), rust_mbsort::error::SortError>(())
//! ```

use crate::config::{BuilderConfig, SortConfig};
use crate::emitter::EventEmitter;
use crate::error::SortResult;
use crate::events::BuiltEvent;
use crate::gamma::GammaReconstructor;
use crate::health::ModuleHealthTracker;
use crate::hit::{ChannelHit, ChannelRole, HitRecord, ResolvedHit};
use crate::mapping::{Calibration, ChannelMapper, TableCalibration, TableMapper};
use crate::particle::ParticleReconstructor;
use crate::summary::RunSummary;
use crate::window::{Admission, ClosedWindow, WindowSegmenter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::watch;
use tracing::{debug, error, info, trace};

/// Below this many entries progress is published for every entry.
const FINE_PROGRESS_LIMIT: u64 = 200;

/// Publish interval when the stream length is unknown.
const UNKNOWN_TOTAL_STEP: u64 = 10_000;

/// Progress through the current stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Entries processed so far.
    pub processed: u64,
    /// Stream length, when known up front.
    pub total: Option<u64>,
    /// Fraction complete in `[0, 1]`; 0 while the total is unknown.
    pub fraction: f64,
}

/// Logs progress published by a builder on a dedicated thread.
///
/// A line is logged each time the fraction advances by `step`, and for every
/// update while the total is unknown. The thread ends once the builder holding the
/// sender is dropped; joining it yields the number of lines logged.
pub fn spawn_progress_logger(
    mut receiver: watch::Receiver<Progress>,
    step: f64,
) -> SortResult<JoinHandle<u64>> {
    let handle = thread::Builder::new()
        .name("mb-sort-progress".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().build() {
                Ok(runtime) => runtime,
                Err(err) => {
                    error!(error = %err, "Failed to create progress runtime");
                    return 0;
                }
            };
            runtime.block_on(async move {
                let mut logged = 0;
                let mut last_reported = 0.0;
                while receiver.changed().await.is_ok() {
                    let progress = *receiver.borrow_and_update();
                    // a new file restarts from zero
                    if progress.fraction < last_reported {
                        last_reported = 0.0;
                    }
                    let due = progress.total.is_none()
                        || progress.fraction - last_reported >= step
                        || (progress.fraction >= 1.0 && last_reported < 1.0);
                    if due {
                        last_reported = progress.fraction;
                        logged += 1;
                        info!(
                            processed = progress.processed,
                            total = progress.total,
                            percent = progress.fraction * 100.0,
                            "Progress"
                        );
                    }
                }
                logged
            })
        })?;
    Ok(handle)
}

#[derive(Debug, Clone, Default)]
struct HitCounters {
    channel_hits: u64,
    miniball_hits: u64,
    cd_hits: u64,
    unmapped_hits: u64,
    below_threshold_hits: u64,
    foreign_module_hits: u64,
    sfp_hits: Vec<u64>,
}

/// Decides what each stream record is and feeds the health tracker.
///
/// Kept apart from the segmenter so both can be borrowed at once.
struct Router {
    health: ModuleHealthTracker,
    mapper: Arc<dyn ChannelMapper>,
    calibration: Option<Arc<dyn Calibration>>,
    counters: HitCounters,
}

impl Router {
    fn reset(&mut self) {
        self.health.reset();
        self.counters = HitCounters {
            sfp_hits: vec![0; self.counters.sfp_hits.len()],
            ..Default::default()
        };
    }

    fn admit(&mut self, record: &HitRecord) -> Admission {
        match record {
            HitRecord::Info(info) => {
                self.health.observe(info);
                Admission::Control
            }
            HitRecord::Channel(hit) => self.admit_channel(hit),
        }
    }

    fn admit_channel(&mut self, hit: &ChannelHit) -> Admission {
        self.counters.channel_hits += 1;
        if let Some(count) = self.counters.sfp_hits.get_mut(usize::from(hit.module.sfp)) {
            *count += 1;
        }
        if !self.health.record_hit(hit.module, hit.timestamp) {
            self.counters.foreign_module_hits += 1;
        }

        let (energy, over_threshold) = match &self.calibration {
            Some(calibration) => (
                calibration.energy(hit.module, hit.channel, hit.raw_integral),
                hit.raw_integral > calibration.threshold(hit.module, hit.channel),
            ),
            None => (hit.energy, hit.over_threshold),
        };

        let role = self.mapper.resolve(hit.module, hit.channel);
        match role {
            ChannelRole::Miniball { .. } => self.counters.miniball_hits += 1,
            ChannelRole::Cd { .. } => self.counters.cd_hits += 1,
            ChannelRole::Unmapped => {
                trace!(
                    sfp = hit.module.sfp,
                    board = hit.module.board,
                    channel = hit.channel,
                    "Unmapped channel"
                );
                self.counters.unmapped_hits += 1;
                return Admission::Rejected {
                    below_threshold: !over_threshold,
                };
            }
        }

        if !over_threshold {
            self.counters.below_threshold_hits += 1;
            return Admission::Rejected {
                below_threshold: true,
            };
        }

        Admission::Qualifying(ResolvedHit::from_role(role, energy, hit.timestamp))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ReconstructionTotals {
    gamma_singles: u64,
    gamma_addback: u64,
    particles: u64,
}

/// Time-window event builder.
pub struct EventBuilder {
    config: BuilderConfig,
    segmenter: WindowSegmenter,
    router: Router,
    gamma: GammaReconstructor,
    particle: ParticleReconstructor,
    emitter: EventEmitter,
    totals: ReconstructionTotals,
    entries: u64,
    total: Option<u64>,
    requested_total: Option<u64>,
    progress: Option<watch::Sender<Progress>>,
}

impl EventBuilder {
    /// Creates a builder from a validated configuration.
    ///
    /// The channel mapper is built from the mapping tables. A calibration is attached
    /// only when the configuration carries `[[calibration]]` entries; otherwise the
    /// energies and threshold flags of the input records are used as they are.
    pub fn new(config: &SortConfig) -> SortResult<Self> {
        config.validate()?;

        let calibration: Option<Arc<dyn Calibration>> = if config.calibration.is_empty() {
            None
        } else {
            Some(Arc::new(TableCalibration::from_config(config)))
        };

        debug!(
            window_width_ns = config.builder.window_width_ns,
            addback_mode = ?config.builder.addback_mode,
            mapped_channels = config.miniball.len() + config.cd_channel.len(),
            recalibrate = calibration.is_some(),
            "Creating event builder"
        );

        Ok(Self {
            config: config.builder.clone(),
            segmenter: WindowSegmenter::new(config.builder.window_width_ns),
            router: Router {
                health: ModuleHealthTracker::new(config.daq.clone()),
                mapper: Arc::new(TableMapper::from_config(config)),
                calibration,
                counters: HitCounters {
                    sfp_hits: vec![0; usize::from(config.daq.n_sfp)],
                    ..Default::default()
                },
            },
            gamma: GammaReconstructor::new(config.builder.addback_mode),
            particle: ParticleReconstructor::new(config.cd.n_detectors, config.cd.n_sectors),
            emitter: EventEmitter::new(config.builder.emit_particle_only),
            totals: ReconstructionTotals::default(),
            entries: 0,
            total: None,
            requested_total: None,
            progress: None,
        })
    }

    /// Replaces the table mapper.
    pub fn with_mapper(mut self, mapper: Arc<dyn ChannelMapper>) -> Self {
        self.router.mapper = mapper;
        self
    }

    /// Recomputes energies and thresholds from the raw integral.
    pub fn with_calibration(mut self, calibration: Arc<dyn Calibration>) -> Self {
        self.router.calibration = Some(calibration);
        self
    }

    /// Publishes [`Progress`] through `sender`.
    pub fn with_progress(mut self, sender: watch::Sender<Progress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Number of entries in the next stream, for progress reporting.
    pub fn with_total(mut self, total: u64) -> Self {
        self.requested_total = Some(total);
        self
    }

    /// Like [`with_total`](Self::with_total), for an already constructed builder.
    pub fn set_total(&mut self, total: u64) {
        self.requested_total = Some(total);
    }

    /// Clears all per-file state: counters, module tables, markers, histograms,
    /// the lookahead buffer and any open window.
    pub fn start_file(&mut self) {
        self.segmenter.reset();
        self.router.reset();
        self.emitter.reset();
        self.totals = ReconstructionTotals::default();
        self.entries = 0;
        self.total = None;
    }

    /// Lazily builds events from `input`, starting a fresh file.
    ///
    /// The stream is flushed when `input` is exhausted. An exact `size_hint` or a
    /// total given with [`with_total`](Self::with_total) drives progress reporting.
    pub fn build<I>(&mut self, input: I) -> BuiltEvents<'_, I::IntoIter>
    where
        I: IntoIterator<Item = HitRecord>,
    {
        let input = input.into_iter();
        self.start_file();
        self.total = self.requested_total.take().or_else(|| match input.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(lower as u64),
            _ => None,
        });
        BuiltEvents {
            builder: self,
            input,
            finished: false,
        }
    }

    /// Feeds one record. Returns the event of a window closed by this record.
    pub fn push(&mut self, record: HitRecord) -> Option<BuiltEvent> {
        let router = &mut self.router;
        let closed = self.segmenter.feed(record, |r| router.admit(r));
        self.entries += 1;
        self.report_progress(false);
        closed.and_then(|window| self.reconstruct(window))
    }

    /// Ends the stream and returns the event of the final window, if any.
    pub fn finish(&mut self) -> Option<BuiltEvent> {
        let router = &mut self.router;
        let closed = self.segmenter.flush(|r| router.admit(r));
        let event = closed.and_then(|window| self.reconstruct(window));
        self.report_progress(true);

        info!(
            entries = self.entries,
            events = self.emitter.stats().emitted,
            gamma_singles = self.totals.gamma_singles,
            particles = self.totals.particles,
            "Stream finished"
        );
        event
    }

    fn reconstruct(&mut self, window: ClosedWindow) -> Option<BuiltEvent> {
        let mut gammas = Vec::new();
        let mut particles = Vec::new();
        for hit in window.hits {
            match hit {
                ResolvedHit::Gamma(gamma) => gammas.push(gamma),
                ResolvedHit::Particle(particle) => particles.push(particle),
                ResolvedHit::Unmapped => {}
            }
        }

        let gamma = self.gamma.reconstruct(&gammas);
        let particles = self.particle.reconstruct(&particles);

        self.totals.gamma_singles += gamma.singles.len() as u64;
        self.totals.gamma_addback += gamma.addback.len() as u64;
        self.totals.particles += particles.len() as u64;

        trace!(
            anchor = window.anchor_timestamp,
            span = window.max_timestamp - window.min_timestamp,
            reason = ?window.reason,
            singles = gamma.singles.len(),
            particles = particles.len(),
            "Window closed"
        );

        let health = &self.router.health;
        self.emitter.emit(
            health.ebis_timestamp(),
            health.t1_timestamp(),
            gamma,
            particles,
        )
    }

    fn report_progress(&self, last: bool) {
        let Some(sender) = &self.progress else {
            return;
        };

        let processed = self.entries;
        let due = match self.total {
            Some(total) if total < FINE_PROGRESS_LIMIT => true,
            Some(total) => {
                let step = (total / self.config.progress_granularity.max(1)).max(1);
                processed % step == 0 || processed == total
            }
            None => processed % UNKNOWN_TOTAL_STEP == 0,
        };
        if !due && !last {
            return;
        }

        let fraction = match self.total {
            Some(0) => 1.0,
            Some(total) => (processed as f64 / total as f64).min(1.0),
            None if last => 1.0,
            None => 0.0,
        };
        sender.send_replace(Progress {
            processed,
            total: self.total,
            fraction,
        });
    }

    /// Summary of the current stream so far.
    pub fn summary(&self) -> RunSummary {
        let health = &self.router.health;
        let counters = &self.router.counters;
        RunSummary {
            entries: self.entries,
            channel_hits: counters.channel_hits,
            info: health.counts().clone(),
            miniball_hits: counters.miniball_hits,
            cd_hits: counters.cd_hits,
            unmapped_hits: counters.unmapped_hits,
            below_threshold_hits: counters.below_threshold_hits,
            foreign_module_hits: counters.foreign_module_hits,
            segmenter: self.segmenter.stats().clone(),
            emitter: self.emitter.stats().clone(),
            gamma_singles: self.totals.gamma_singles,
            gamma_addback: self.totals.gamma_addback,
            particles: self.totals.particles,
            modules: health.modules().to_vec(),
            sfp_hits: counters.sfp_hits.clone(),
            tdiff: self.segmenter.tdiff().clone(),
            tdiff_clean: self.segmenter.tdiff_clean().clone(),
            ebis: health.ebis().clone(),
            t1: health.t1().clone(),
            pulser: health.pulser().clone(),
        }
    }

    /// Health tracker of the current stream.
    pub fn health(&self) -> &ModuleHealthTracker {
        &self.router.health
    }

    /// Builder section of the configuration in use.
    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Whether a window is currently accumulating hits.
    pub fn has_open_window(&self) -> bool {
        self.segmenter.is_open()
    }
}

/// Lazy event sequence returned by [`EventBuilder::build`].
pub struct BuiltEvents<'a, I> {
    builder: &'a mut EventBuilder,
    input: I,
    finished: bool,
}

impl<I> Iterator for BuiltEvents<'_, I>
where
    I: Iterator<Item = HitRecord>,
{
    type Item = BuiltEvent;

    fn next(&mut self) -> Option<BuiltEvent> {
        while !self.finished {
            match self.input.next() {
                Some(record) => {
                    if let Some(event) = self.builder.push(record) {
                        return Some(event);
                    }
                }
                None => {
                    self.finished = true;
                    return self.builder.finish();
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AddbackMode, CdChannel, ChannelCalibration, MiniballChannel};
    use crate::hit::{InfoRecord, ModuleId};

    fn config() -> SortConfig {
        let mut config = SortConfig::default();
        config.builder.window_width_ns = 100;
        config.daq.n_sfp = 1;
        config.daq.n_board = 2;
        for (channel, segment) in [(0, 0), (1, 1), (2, 2)] {
            config.miniball.push(MiniballChannel {
                sfp: 0,
                board: 0,
                channel,
                cluster: 0,
                crystal: 0,
                segment,
            });
        }
        config.miniball.push(MiniballChannel {
            sfp: 0,
            board: 0,
            channel: 3,
            cluster: 0,
            crystal: 1,
            segment: 0,
        });
        for (channel, side, strip) in [(0, 0, 5), (1, 1, 3)] {
            config.cd_channel.push(CdChannel {
                sfp: 0,
                board: 1,
                channel,
                detector: 0,
                sector: 0,
                side,
                strip,
            });
        }
        config
    }

    fn channel(board: u8, channel: u8, energy: f32, timestamp: u64) -> HitRecord {
        HitRecord::Channel(ChannelHit {
            module: ModuleId::new(0, board),
            channel,
            raw_integral: energy,
            energy,
            over_threshold: energy > 0.0,
            timestamp,
        })
    }

    fn info(code: u8, timestamp: u64) -> HitRecord {
        HitRecord::Info(InfoRecord {
            code,
            module: None,
            timestamp,
        })
    }

    #[test]
    fn builds_gamma_and_particle_event() {
        let mut builder = EventBuilder::new(&config()).unwrap();
        let records = vec![
            info(21, 5),
            channel(0, 0, 500.0, 1000),
            channel(0, 1, 50.0, 1000),
            channel(1, 0, 4000.0, 1010),
            channel(1, 1, 3900.0, 1012),
        ];
        let events: Vec<_> = builder.build(records).collect();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.ebis_timestamp, 5);
        assert_eq!(event.gamma_singles.len(), 1);
        assert_eq!(event.gamma_singles[0].segment, 1);
        assert_eq!(event.gamma_addback.len(), 1);
        assert_eq!(event.particles.len(), 1);
        assert_eq!(event.particles[0].strip_p, 5);
        assert_eq!(event.particles[0].strip_n, 3);
    }

    #[test]
    fn push_and_finish_split_windows() {
        let mut builder = EventBuilder::new(&config()).unwrap();
        assert!(builder.push(channel(0, 0, 100.0, 0)).is_none());
        assert!(builder.push(channel(0, 3, 200.0, 50)).is_none());
        let first = builder.push(channel(0, 0, 300.0, 500)).unwrap();
        assert_eq!(first.gamma_singles.len(), 2);
        assert_eq!(first.gamma_addback.len(), 1);
        assert_eq!(first.gamma_addback[0].energy, 300.0);
        // the 500 ns hit is still in the lookahead buffer
        assert!(!builder.has_open_window());
        let last = builder.finish().unwrap();
        assert_eq!(last.gamma_singles[0].energy, 300.0);
        assert!(builder.finish().is_none());
    }

    #[test]
    fn particle_only_windows_follow_config() {
        let records = vec![channel(1, 0, 4000.0, 10), channel(1, 1, 3900.0, 12)];

        let mut builder = EventBuilder::new(&config()).unwrap();
        assert_eq!(builder.build(records.clone()).count(), 0);
        assert_eq!(builder.summary().emitter.dropped_particle_only, 1);

        let mut config = config();
        config.builder.emit_particle_only = true;
        let mut builder = EventBuilder::new(&config).unwrap();
        assert_eq!(builder.build(records).count(), 1);
    }

    #[test]
    fn calibration_overrides_energy_and_threshold() {
        let mut config = config();
        config.calibration.push(ChannelCalibration {
            sfp: 0,
            board: 0,
            channel: 0,
            offset: 1.0,
            gain: 2.0,
            gain_quadr: 0.0,
            threshold: 10.0,
        });
        let mut builder = EventBuilder::new(&config).unwrap();

        let mut below = channel(0, 0, 5.0, 0);
        let mut above = channel(0, 0, 20.0, 1000);
        if let HitRecord::Channel(hit) = &mut below {
            hit.over_threshold = true;
        }
        if let HitRecord::Channel(hit) = &mut above {
            hit.over_threshold = false;
            hit.energy = 0.0;
        }

        let events: Vec<_> = builder.build(vec![below, above]).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].gamma_singles[0].energy, 41.0);
        assert_eq!(builder.summary().below_threshold_hits, 1);
    }

    #[test]
    fn legacy_mode_is_selectable() {
        let mut config = config();
        config.builder.addback_mode = AddbackMode::Legacy;
        let mut builder = EventBuilder::new(&config).unwrap();
        let events: Vec<_> = builder
            .build(vec![channel(0, 0, 500.0, 0), channel(0, 3, 300.0, 10)])
            .collect();
        assert_eq!(events[0].gamma_addback.len(), 2);
        assert_eq!(events[0].gamma_addback[0].energy, 1300.0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = config();
        config.builder.window_width_ns = 0;
        assert!(EventBuilder::new(&config).is_err());
    }

    #[test]
    fn progress_reaches_completion() {
        let (tx, rx) = watch::channel(Progress::default());
        let mut builder = EventBuilder::new(&config()).unwrap().with_progress(tx);
        let records: Vec<_> = (0..10).map(|i| channel(0, 0, 1.0, i * 1000)).collect();
        assert_eq!(builder.build(records).count(), 10);
        let progress = *rx.borrow();
        assert_eq!(progress.processed, 10);
        assert_eq!(progress.total, Some(10));
        assert!((progress.fraction - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn progress_is_logged_without_emitted_events() {
        let (tx, rx) = watch::channel(Progress::default());
        let logger = spawn_progress_logger(rx, 0.1).unwrap();
        let mut builder = EventBuilder::new(&config()).unwrap().with_progress(tx);
        // particle-only windows, all dropped
        let records: Vec<_> = (0..50)
            .flat_map(|i| {
                [
                    channel(1, 0, 4000.0, i * 1000),
                    channel(1, 1, 3900.0, i * 1000 + 2),
                ]
            })
            .collect();
        assert_eq!(builder.build(records).count(), 0);
        drop(builder);

        let logged = logger.join().unwrap();
        assert!(logged >= 1);
    }

    #[test]
    fn start_file_clears_state() {
        let mut builder = EventBuilder::new(&config()).unwrap();
        builder.push(channel(0, 0, 1.0, 0));
        builder.push(info(21, 10));
        builder.start_file();
        let summary = builder.summary();
        assert_eq!(summary.entries, 0);
        assert_eq!(summary.channel_hits, 0);
        assert_eq!(builder.health().ebis_timestamp(), 0);
        assert!(!builder.has_open_window());
    }
}
