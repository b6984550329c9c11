//! Live monitoring driver.
//!
//! A [`MonitorLoop`] runs the event builder repeatedly on a dedicated worker
//! thread: poll the source, build whatever arrived with a freshly created engine,
//! hand the events to the sink, publish a [`MonitorSnapshot`], sleep. Nothing but
//! the source's read position survives from one cycle to the next, so consumers
//! only ever see immutable snapshots through a `tokio::sync::watch` channel.
//!
//! Cancellation is cooperative. [`MonitorLoop::stop`] clears the shared flag and
//! joins the worker; a cycle in progress always runs to completion.

use crate::builder::EventBuilder;
use crate::config::SortConfig;
use crate::error::{SortError, SortResult};
use crate::sink::EventSink;
use crate::source::HitSource;
use crate::summary::RunSummary;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Granularity of the stop-flag check while sleeping between cycles.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Read-only view of the latest completed cycle.
#[derive(Debug, Clone, Default)]
pub struct MonitorSnapshot {
    /// Completed cycles; 0 before the first one finishes.
    pub cycle: u64,
    /// Records polled in this cycle.
    pub records: usize,
    /// Events built in this cycle.
    pub events: u64,
    /// Summary of the cycle's build.
    pub summary: Option<RunSummary>,
    /// Error that ended the cycle early, if any.
    pub error: Option<String>,
}

/// Repeating poll/build/publish loop.
pub struct MonitorLoop {
    config: SortConfig,
    interval: Duration,
    max_cycles: Option<u64>,
    running: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
    worker: Mutex<Option<JoinHandle<()>>>,
    snapshots: Arc<watch::Sender<MonitorSnapshot>>,
}

impl MonitorLoop {
    /// Creates a stopped loop from a validated configuration.
    pub fn new(config: SortConfig) -> SortResult<Self> {
        config.validate()?;
        let interval = Duration::from_millis(config.monitor.poll_interval_ms);
        let (snapshots, _) = watch::channel(MonitorSnapshot::default());
        Ok(Self {
            config,
            interval,
            max_cycles: None,
            running: Arc::new(AtomicBool::new(false)),
            cycles: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
            snapshots: Arc::new(snapshots),
        })
    }

    /// Overrides `monitor.poll_interval_ms`.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Stops on its own after `cycles` cycles.
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    /// Receiver for the snapshot published after each cycle.
    pub fn subscribe(&self) -> watch::Receiver<MonitorSnapshot> {
        self.snapshots.subscribe()
    }

    /// Whether the worker thread is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Cycles started since creation.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Starts the worker thread.
    pub fn start(
        &self,
        mut source: Box<dyn HitSource>,
        mut sink: Box<dyn EventSink>,
    ) -> SortResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SortError::MonitorRunning);
        }

        // a finished worker from a previous run
        if let Some(handle) = self.worker.lock().take() {
            if let Err(e) = handle.join() {
                error!("Monitor thread panicked: {:?}", e);
            }
        }

        let running = Arc::clone(&self.running);
        let cycles = Arc::clone(&self.cycles);
        let snapshots = Arc::clone(&self.snapshots);
        let config = self.config.clone();
        let interval = self.interval;
        let max_cycles = self.max_cycles;
        let description = source.describe();

        let spawned = thread::Builder::new()
            .name("mb-sort-monitor".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let cycle = cycles.fetch_add(1, Ordering::SeqCst) + 1;
                    let snapshot = run_cycle(cycle, &config, source.as_mut(), sink.as_mut());
                    if let Some(err) = &snapshot.error {
                        error!(cycle, error = %err, "Monitor cycle failed");
                    }
                    snapshots.send_replace(snapshot);

                    if max_cycles.is_some_and(|max| cycle >= max) {
                        break;
                    }

                    let wake = Instant::now() + interval;
                    while running.load(Ordering::SeqCst) {
                        let now = Instant::now();
                        if now >= wake {
                            break;
                        }
                        thread::sleep(SLEEP_SLICE.min(wake - now));
                    }
                }
                running.store(false, Ordering::SeqCst);
                debug!("Monitor thread exiting");
            });

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                info!(source = %description, interval_ms = self.interval.as_millis() as u64, "Started monitor loop");
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                Err(err.into())
            }
        }
    }

    /// Signals the worker to stop and waits for it.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.join();
        info!(cycles = self.cycles(), "Stopped monitor loop");
    }

    /// Waits for a worker started with a cycle limit to finish on its own.
    pub fn join(&self) {
        if let Some(handle) = self.worker.lock().take() {
            if let Err(e) = handle.join() {
                error!("Monitor thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for MonitorLoop {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.join();
    }
}

fn run_cycle(
    cycle: u64,
    config: &SortConfig,
    source: &mut dyn HitSource,
    sink: &mut dyn EventSink,
) -> MonitorSnapshot {
    let mut snapshot = MonitorSnapshot {
        cycle,
        ..Default::default()
    };
    if let Err(err) = build_once(config, source, sink, &mut snapshot) {
        snapshot.error = Some(err.to_string());
    }
    snapshot
}

fn build_once(
    config: &SortConfig,
    source: &mut dyn HitSource,
    sink: &mut dyn EventSink,
    snapshot: &mut MonitorSnapshot,
) -> SortResult<()> {
    let records = source.poll()?;
    snapshot.records = records.len();

    let mut builder = EventBuilder::new(config)?;
    for event in builder.build(records) {
        sink.write_event(&event)?;
        snapshot.events += 1;
    }

    let summary = builder.summary();
    sink.write_summary(&summary)?;
    sink.finish()?;
    debug!(
        cycle = snapshot.cycle,
        records = snapshot.records,
        events = snapshot.events,
        "Monitor cycle complete"
    );
    snapshot.summary = Some(summary);
    Ok(())
}
