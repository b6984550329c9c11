//! Output sinks for built events and run summaries.
//!
//! - [`JsonLinesSink`]: one JSON object per event, summary in a sibling
//!   `<stem>.summary.json`
//! - [`CsvSink`]: one row per gamma single, addback gamma or particle (requires the
//!   `storage_csv` feature)
//! - [`MemorySink`]: shared in-memory buffer, mainly for tests
//! - [`CountingSink`]: keeps counts only; the monitor's default when no output
//!   file is given

use crate::error::SortResult;
use crate::events::BuiltEvent;
use crate::summary::RunSummary;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Consumer of the built event stream.
pub trait EventSink: Send {
    /// Writes one event.
    fn write_event(&mut self, event: &BuiltEvent) -> SortResult<()>;

    /// Writes the end-of-run summary.
    fn write_summary(&mut self, summary: &RunSummary) -> SortResult<()>;

    /// Flushes buffered output. The sink may be reused afterwards.
    fn finish(&mut self) -> SortResult<()>;
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn write_event(&mut self, event: &BuiltEvent) -> SortResult<()> {
        (**self).write_event(event)
    }

    fn write_summary(&mut self, summary: &RunSummary) -> SortResult<()> {
        (**self).write_summary(summary)
    }

    fn finish(&mut self) -> SortResult<()> {
        (**self).finish()
    }
}

/// Path of the summary file written next to `path`.
pub fn summary_path(path: &Path) -> PathBuf {
    path.with_extension("summary.json")
}

fn write_summary_file(path: &Path, summary: &RunSummary) -> SortResult<()> {
    let target = summary_path(path);
    let file = File::create(&target)?;
    serde_json::to_writer_pretty(BufWriter::new(file), summary)?;
    info!(path = %target.display(), "Summary written");
    Ok(())
}

/// JSON-lines event writer.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl JsonLinesSink {
    /// Creates the file, and any missing parent directories.
    pub fn create<P: AsRef<Path>>(path: P) -> SortResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(&path)?);
        info!(path = %path.display(), "JSON-lines sink opened");
        Ok(Self {
            path,
            writer,
            written: 0,
        })
    }

    /// Path of the event file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events written so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl EventSink for JsonLinesSink {
    fn write_event(&mut self, event: &BuiltEvent) -> SortResult<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn write_summary(&mut self, summary: &RunSummary) -> SortResult<()> {
        write_summary_file(&self.path, summary)
    }

    fn finish(&mut self) -> SortResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(feature = "storage_csv")]
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    event: u64,
    kind: &'static str,
    ebis_timestamp: u64,
    t1_timestamp: u64,
    timestamp: u64,
    energy: f32,
    energy_n: Option<f32>,
    /// Cluster for gamma rays, detector for particles.
    unit: u8,
    /// Crystal for gamma rays, sector for particles.
    element: u8,
    /// Segment for gamma rays, p strip for particles.
    position: u8,
    strip_n: Option<u8>,
}

/// CSV event writer.
#[cfg(feature = "storage_csv")]
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
    events: u64,
}

#[cfg(feature = "storage_csv")]
impl CsvSink {
    /// Creates the file, and any missing parent directories.
    pub fn create<P: AsRef<Path>>(path: P) -> SortResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let writer = csv::Writer::from_path(&path)?;
        info!(path = %path.display(), "CSV sink opened");
        Ok(Self {
            path,
            writer,
            events: 0,
        })
    }

    /// Path of the CSV file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(feature = "storage_csv")]
impl EventSink for CsvSink {
    fn write_event(&mut self, event: &BuiltEvent) -> SortResult<()> {
        let base = |kind: &'static str, timestamp: u64, energy: f32| CsvRow {
            event: self.events,
            kind,
            ebis_timestamp: event.ebis_timestamp,
            t1_timestamp: event.t1_timestamp,
            timestamp,
            energy,
            energy_n: None,
            unit: 0,
            element: 0,
            position: 0,
            strip_n: None,
        };

        let mut rows = Vec::with_capacity(
            event.gamma_multiplicity() + event.addback_multiplicity() + event.particle_multiplicity(),
        );
        for gamma in &event.gamma_singles {
            rows.push(CsvRow {
                unit: gamma.cluster,
                element: gamma.crystal,
                position: gamma.segment,
                ..base("gamma", gamma.timestamp, gamma.energy)
            });
        }
        for gamma in &event.gamma_addback {
            rows.push(CsvRow {
                unit: gamma.cluster,
                element: gamma.crystal,
                position: gamma.segment,
                ..base("addback", gamma.timestamp, gamma.energy)
            });
        }
        for particle in &event.particles {
            rows.push(CsvRow {
                energy_n: Some(particle.energy_n),
                unit: particle.detector,
                element: particle.sector,
                position: particle.strip_p,
                strip_n: Some(particle.strip_n),
                ..base("particle", particle.timestamp(), particle.energy_p)
            });
        }

        for row in rows {
            self.writer.serialize(row)?;
        }
        self.events += 1;
        Ok(())
    }

    fn write_summary(&mut self, summary: &RunSummary) -> SortResult<()> {
        write_summary_file(&self.path, summary)
    }

    fn finish(&mut self) -> SortResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryContents {
    events: Vec<BuiltEvent>,
    summaries: Vec<RunSummary>,
    finished: u64,
}

/// In-memory sink. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryContents>>,
}

impl MemorySink {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the buffered events.
    pub fn events(&self) -> Vec<BuiltEvent> {
        self.inner.lock().events.clone()
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    /// Whether no event was buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The latest summary written, if any.
    pub fn last_summary(&self) -> Option<RunSummary> {
        self.inner.lock().summaries.last().cloned()
    }

    /// Number of `finish` calls seen.
    pub fn finished(&self) -> u64 {
        self.inner.lock().finished
    }
}

impl EventSink for MemorySink {
    fn write_event(&mut self, event: &BuiltEvent) -> SortResult<()> {
        self.inner.lock().events.push(event.clone());
        Ok(())
    }

    fn write_summary(&mut self, summary: &RunSummary) -> SortResult<()> {
        self.inner.lock().summaries.push(summary.clone());
        Ok(())
    }

    fn finish(&mut self) -> SortResult<()> {
        self.inner.lock().finished += 1;
        Ok(())
    }
}

/// Sink that discards events and keeps only counts, so a long-running monitor
/// without an output file holds constant memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountingSink {
    /// Events written since creation.
    pub events: u64,
    /// Summaries written since creation.
    pub summaries: u64,
}

impl CountingSink {
    /// Creates a sink with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for CountingSink {
    fn write_event(&mut self, _event: &BuiltEvent) -> SortResult<()> {
        self.events += 1;
        Ok(())
    }

    fn write_summary(&mut self, _summary: &RunSummary) -> SortResult<()> {
        self.summaries += 1;
        Ok(())
    }

    fn finish(&mut self) -> SortResult<()> {
        debug!(events = self.events, summaries = self.summaries, "Discarded sink output");
        Ok(())
    }
}
