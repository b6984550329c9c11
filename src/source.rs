//! Hit-stream inputs.
//!
//! The on-disk format is JSON lines, one [`HitRecord`] per line, tagged with
//! `"kind": "channel"` or `"kind": "info"`. Two ways to consume it:
//!
//! - [`HitReader`] iterates a complete file for batch building. A malformed line is
//!   treated as the end of the stream; the error is kept for the caller.
//! - [`HitSource`] implementations are polled by the live monitor and return
//!   whatever arrived since the last poll: [`JsonLinesSource`] tails a growing file
//!   and [`MockHitSource`] synthesises traffic.

use crate::config::SortConfig;
use crate::error::{SortError, SortResult};
use crate::hit::{ChannelHit, HitRecord, InfoRecord, ModuleId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

fn parse_line(line: &str, line_number: u64) -> SortResult<HitRecord> {
    serde_json::from_str(line).map_err(|e| SortError::Input {
        line: line_number,
        message: e.to_string(),
    })
}

/// Iterator over the records of a JSON-lines hit file.
pub struct HitReader<R> {
    reader: R,
    line: u64,
    buffer: String,
    error: Option<SortError>,
    done: bool,
}

impl HitReader<BufReader<File>> {
    /// Opens a hit file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> SortResult<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> HitReader<R> {
    /// Wraps a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buffer: String::new(),
            error: None,
            done: false,
        }
    }

    /// The error that ended the stream early, if any.
    pub fn error(&self) -> Option<&SortError> {
        self.error.as_ref()
    }

    /// Takes the error that ended the stream early, if any.
    pub fn take_error(&mut self) -> Option<SortError> {
        self.error.take()
    }

    /// Lines read so far.
    pub fn lines_read(&self) -> u64 {
        self.line
    }

    fn stop(&mut self, err: SortError) -> Option<HitRecord> {
        error!(error = %err, "Input ended early, flushing what was read");
        self.error = Some(err);
        self.done = true;
        None
    }
}

impl<R: BufRead> Iterator for HitReader<R> {
    type Item = HitRecord;

    fn next(&mut self) -> Option<HitRecord> {
        while !self.done {
            self.buffer.clear();
            match self.reader.read_line(&mut self.buffer) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line += 1;
                    let text = self.buffer.trim();
                    if text.is_empty() {
                        continue;
                    }
                    return match parse_line(text, self.line) {
                        Ok(record) => Some(record),
                        Err(err) => self.stop(err),
                    };
                }
                Err(err) => return self.stop(err.into()),
            }
        }
        None
    }
}

/// A live source of hit records.
pub trait HitSource: Send {
    /// Returns the records available now, possibly none.
    fn poll(&mut self) -> SortResult<Vec<HitRecord>>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Tails a JSON-lines file that another process appends to.
///
/// Only complete lines are consumed; a trailing partial line is left for the next
/// poll. If the file shrinks it is assumed to have been replaced and is read again
/// from the start.
#[derive(Debug)]
pub struct JsonLinesSource {
    path: PathBuf,
    offset: u64,
    line: u64,
}

impl JsonLinesSource {
    /// Creates a source that starts at the beginning of `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            line: 0,
        }
    }

    /// Byte position up to which the file has been consumed.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl HitSource for JsonLinesSource {
    fn poll(&mut self) -> SortResult<Vec<HitRecord>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Input file not there yet");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let length = file.metadata()?.len();
        if length < self.offset {
            warn!(
                path = %self.path.display(),
                length,
                offset = self.offset,
                "Input file shrank, reading from the start"
            );
            self.offset = 0;
            self.line = 0;
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut bytes = Vec::new();
        file.take(length - self.offset).read_to_end(&mut bytes)?;

        let Some(end) = bytes.iter().rposition(|&b| b == b'\n') else {
            return Ok(Vec::new());
        };
        let complete = &bytes[..=end];
        self.offset += complete.len() as u64;

        let mut records = Vec::new();
        for raw in complete.split(|&b| b == b'\n') {
            let text = String::from_utf8_lossy(raw);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            self.line += 1;
            match parse_line(text, self.line) {
                Ok(record) => records.push(record),
                Err(err) => error!(path = %self.path.display(), error = %err, "Skipping malformed record"),
            }
        }
        Ok(records)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

#[derive(Debug, Clone, Copy)]
struct MockCrystal {
    module: ModuleId,
    core_channel: u8,
    segment_channels: [Option<u8>; 2],
}

#[derive(Debug, Clone, Copy)]
struct MockCdPair {
    p: (ModuleId, u8),
    n: (ModuleId, u8),
}

/// Generates plausible Miniball/CD traffic from the configured mapping tables.
///
/// Each poll produces a batch of physics events spaced well beyond the window
/// width, each with one or two crystals firing and an optional CD particle, plus an
/// EBIS marker every tenth event.
pub struct MockHitSource {
    rng: StdRng,
    crystals: Vec<MockCrystal>,
    cd_pairs: Vec<MockCdPair>,
    ebis_code: u8,
    spacing_ns: u64,
    events_per_poll: usize,
    clock: u64,
    generated: u64,
}

impl MockHitSource {
    /// Creates a source; `seed` makes the traffic reproducible.
    pub fn new(config: &SortConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let crystals = config
            .miniball
            .iter()
            .filter(|c| c.segment == 0)
            .map(|core| {
                let mut segments = config.miniball.iter().filter(|s| {
                    s.segment != 0 && s.cluster == core.cluster && s.crystal == core.crystal
                });
                let mut next_segment = || segments.next().map(|s| s.channel);
                MockCrystal {
                    module: ModuleId::new(core.sfp, core.board),
                    core_channel: core.channel,
                    segment_channels: [next_segment(), next_segment()],
                }
            })
            .collect();

        let cd_pairs = config
            .cd_channel
            .iter()
            .filter(|c| c.side == 0)
            .filter_map(|p| {
                config
                    .cd_channel
                    .iter()
                    .find(|n| n.side == 1 && n.detector == p.detector && n.sector == p.sector)
                    .map(|n| MockCdPair {
                        p: (ModuleId::new(p.sfp, p.board), p.channel),
                        n: (ModuleId::new(n.sfp, n.board), n.channel),
                    })
            })
            .collect();

        Self {
            rng,
            crystals,
            cd_pairs,
            ebis_code: config.daq.ebis_code,
            spacing_ns: config.builder.window_width_ns.saturating_mul(4).max(1000),
            events_per_poll: 100,
            clock: 0,
            generated: 0,
        }
    }

    /// Sets the number of physics events generated per poll.
    pub fn with_events_per_poll(mut self, events: usize) -> Self {
        self.events_per_poll = events;
        self
    }

    /// Physics events generated so far.
    pub fn generated(&self) -> u64 {
        self.generated
    }

    fn channel(module: ModuleId, channel: u8, energy: f32, timestamp: u64) -> HitRecord {
        HitRecord::Channel(ChannelHit {
            module,
            channel,
            raw_integral: energy,
            energy,
            over_threshold: true,
            timestamp,
        })
    }

    fn generate_event(&mut self, records: &mut Vec<HitRecord>) {
        let t0 = self.clock;

        if self.generated % 10 == 0 {
            records.push(HitRecord::Info(InfoRecord {
                code: self.ebis_code,
                module: None,
                timestamp: t0,
            }));
        }

        let mut hits = Vec::new();
        if !self.crystals.is_empty() {
            let fired = self.rng.gen_range(1..=2usize);
            for _ in 0..fired {
                let crystal = self.crystals[self.rng.gen_range(0..self.crystals.len())];
                let energy = self.rng.gen_range(50.0_f32..2000.0);
                let t = t0 + self.rng.gen_range(1..200);
                hits.push(Self::channel(crystal.module, crystal.core_channel, energy, t));
                if let Some(segment) = crystal.segment_channels[self.rng.gen_range(0..2)] {
                    hits.push(Self::channel(crystal.module, segment, energy * 0.8, t));
                }
            }
        }
        if !self.cd_pairs.is_empty() && self.rng.gen_bool(0.5) {
            let pair = self.cd_pairs[self.rng.gen_range(0..self.cd_pairs.len())];
            let energy = self.rng.gen_range(1000.0_f32..50_000.0);
            let t = t0 + self.rng.gen_range(1..200);
            hits.push(Self::channel(pair.p.0, pair.p.1, energy, t));
            hits.push(Self::channel(pair.n.0, pair.n.1, energy * 0.98, t + 5));
        }

        hits.sort_by_key(HitRecord::timestamp);
        records.extend(hits);
        self.clock = t0 + self.spacing_ns;
        self.generated += 1;
    }
}

impl HitSource for MockHitSource {
    fn poll(&mut self) -> SortResult<Vec<HitRecord>> {
        let mut records = Vec::with_capacity(self.events_per_poll * 4);
        for _ in 0..self.events_per_poll {
            self.generate_event(&mut records);
        }
        Ok(records)
    }

    fn describe(&self) -> String {
        format!(
            "mock source ({} crystals, {} CD cells)",
            self.crystals.len(),
            self.cd_pairs.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CdChannel, MiniballChannel};
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    const GOOD: &str = r#"{"kind":"info","code":21,"timestamp":5}"#;
    const HIT: &str = r#"{"kind":"channel","module":{"sfp":0,"board":1},"channel":2,"raw_integral":10.0,"energy":11.0,"over_threshold":true,"timestamp":10}"#;

    #[test]
    fn reader_skips_blank_lines() {
        let text = format!("{GOOD}\n\n{HIT}\n");
        let mut reader = HitReader::new(Cursor::new(text));
        let records: Vec<_> = reader.by_ref().collect();
        assert_eq!(records.len(), 2);
        assert!(reader.error().is_none());
        assert_eq!(reader.lines_read(), 3);
    }

    #[test]
    fn reader_stops_at_malformed_line() {
        let text = format!("{GOOD}\nnot json\n{HIT}\n");
        let mut reader = HitReader::new(Cursor::new(text));
        let records: Vec<_> = reader.by_ref().collect();
        assert_eq!(records.len(), 1);
        match reader.take_error() {
            Some(SortError::Input { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn file_source_consumes_complete_lines_only() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{GOOD}\n{HIT}").unwrap();
        file.flush().unwrap();

        let mut source = JsonLinesSource::new(file.path());
        assert_eq!(source.poll().unwrap().len(), 1);

        writeln!(file).unwrap();
        file.flush().unwrap();
        let records = source.poll().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp(), 10);
        assert!(source.poll().unwrap().is_empty());
    }

    #[test]
    fn file_source_waits_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = JsonLinesSource::new(dir.path().join("later.jsonl"));
        assert!(source.poll().unwrap().is_empty());
        assert_eq!(source.offset(), 0);
    }

    fn mock_config() -> SortConfig {
        let mut config = SortConfig::default();
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
        for (channel, side) in [(0, 0), (1, 1)] {
            config.cd_channel.push(CdChannel {
                sfp: 0,
                board: 1,
                channel,
                detector: 0,
                sector: 0,
                side,
                strip: 0,
            });
        }
        config
    }

    #[test]
    fn mock_source_is_ordered_and_reproducible() {
        let config = mock_config();
        let mut a = MockHitSource::new(&config, Some(7)).with_events_per_poll(50);
        let mut b = MockHitSource::new(&config, Some(7)).with_events_per_poll(50);
        let first = a.poll().unwrap();
        assert_eq!(first, b.poll().unwrap());
        assert!(first.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
        assert_eq!(a.generated(), 50);
        assert_eq!(first.iter().filter(|r| r.is_info()).count(), 5);
    }
}
