//! Event-window segmentation.
//!
//! The segmenter consumes the ordered hit stream through a one-element lookahead
//! buffer: a record is only processed once the record after it has arrived (or the
//! stream has ended), because whether the open window closes depends on the
//! timestamp of the *next* element.
//!
//! For each processed record the caller-supplied admission closure decides what the
//! record is (control record, rejected reading or qualifying hit). Qualifying hits
//! open a window if none is open, anchoring it at their timestamp, and are appended.
//! The window then closes when `t_next - anchor` exceeds the configured width, when
//! it is negative (the stream restarted, e.g. at a file boundary), or at end of stream.

use crate::hit::{HitRecord, ResolvedHit};
use crate::histogram::Histogram1D;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What the owner of the segmenter made of one stream record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// An info record. Never opens or extends a window.
    Control,
    /// A channel reading that is unmapped or below threshold.
    Rejected {
        /// Mapped but under threshold, as opposed to unmapped.
        below_threshold: bool,
    },
    /// A mapped, over-threshold reading.
    Qualifying(ResolvedHit),
}

/// Why a window was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// The next record lies beyond the window width.
    WidthExceeded,
    /// The next record is earlier than the anchor.
    TimestampRegression,
    /// The stream ended.
    EndOfStream,
}

/// The accumulated content of a window at close time.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedWindow {
    /// Timestamp of the first record.
    pub anchor_timestamp: u64,
    /// Earliest timestamp in the window.
    pub min_timestamp: u64,
    /// Latest timestamp in the window.
    pub max_timestamp: u64,
    /// Resolved channel hits in arrival order.
    pub hits: Vec<ResolvedHit>,
    /// What closed the window.
    pub reason: CloseReason,
}

#[derive(Debug, Clone)]
struct Window {
    anchor: u64,
    min: u64,
    max: u64,
    hits: Vec<ResolvedHit>,
}

impl Window {
    fn open(hit: ResolvedHit, timestamp: u64) -> Self {
        Self {
            anchor: timestamp,
            min: timestamp,
            max: timestamp,
            hits: vec![hit],
        }
    }

    fn push(&mut self, hit: ResolvedHit, timestamp: u64) {
        self.min = self.min.min(timestamp);
        self.max = self.max.max(timestamp);
        self.hits.push(hit);
    }
}

/// Counters kept by the segmenter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmenterStats {
    /// Records processed (control records included).
    pub processed: u64,
    /// Records whose timestamp is earlier than their predecessor.
    pub out_of_order: u64,
    /// Windows opened.
    pub windows_opened: u64,
    /// Windows closed because the next record was too late.
    pub closed_by_width: u64,
    /// Windows closed because the next record went back in time.
    pub closed_by_regression: u64,
    /// Windows closed at end of stream.
    pub closed_by_end_of_stream: u64,
}

/// Window segmenter with a one-element lookahead.
#[derive(Debug, Clone)]
pub struct WindowSegmenter {
    width: u64,
    lookahead: Option<HitRecord>,
    window: Option<Window>,
    /// Anchor of the latest window, kept after it closes; 0 before the first.
    last_anchor: u64,
    previous_timestamp: Option<u64>,
    stats: SegmenterStats,
    tdiff: Histogram1D,
    tdiff_clean: Histogram1D,
}

impl WindowSegmenter {
    /// Creates a segmenter for windows of `window_width_ns`.
    pub fn new(window_width_ns: u64) -> Self {
        Self {
            width: window_width_ns,
            lookahead: None,
            window: None,
            last_anchor: 0,
            previous_timestamp: None,
            stats: SegmenterStats::default(),
            tdiff: Histogram1D::new(
                "tdiff",
                "Time difference to first trigger;#Delta t [ns]",
                1000,
                -10.0,
                1e5,
            ),
            tdiff_clean: Histogram1D::new(
                "tdiff_clean",
                "Time difference to first trigger without noise;#Delta t [ns]",
                1000,
                -10.0,
                1e5,
            ),
        }
    }

    /// Drops the lookahead and any open window and clears all counters.
    pub fn reset(&mut self) {
        *self = Self::new(self.width);
    }

    /// Window width in nanoseconds.
    pub fn window_width(&self) -> u64 {
        self.width
    }

    /// Whether a window is currently accumulating hits.
    pub fn is_open(&self) -> bool {
        self.window.is_some()
    }

    /// Number of hits in the open window.
    pub fn open_hits(&self) -> usize {
        self.window.as_ref().map_or(0, |w| w.hits.len())
    }

    /// Feeds the next stream element.
    ///
    /// The element is buffered; the *previous* element is processed now that its
    /// successor's timestamp is known. `admit` is called on that previous element.
    pub fn feed<F>(&mut self, record: HitRecord, admit: F) -> Option<ClosedWindow>
    where
        F: FnOnce(&HitRecord) -> Admission,
    {
        let next_timestamp = record.timestamp();
        let current = self.lookahead.replace(record)?;
        self.step(current, Some(next_timestamp), admit)
    }

    /// Ends the stream: processes the buffered element and force-closes the window.
    pub fn flush<F>(&mut self, admit: F) -> Option<ClosedWindow>
    where
        F: FnOnce(&HitRecord) -> Admission,
    {
        match self.lookahead.take() {
            Some(current) => self.step(current, None, admit),
            None => self.close(CloseReason::EndOfStream),
        }
    }

    fn step<F>(&mut self, current: HitRecord, next: Option<u64>, admit: F) -> Option<ClosedWindow>
    where
        F: FnOnce(&HitRecord) -> Admission,
    {
        let timestamp = current.timestamp();
        self.stats.processed += 1;
        self.check_order(timestamp);

        let admission = admit(&current);
        let below_threshold = match admission {
            Admission::Qualifying(hit) => {
                self.append(hit, timestamp);
                false
            }
            Admission::Rejected { below_threshold } => below_threshold,
            Admission::Control => false,
        };

        let Some(next) = next else {
            return self.close(CloseReason::EndOfStream);
        };
        let anchor = self.last_anchor;
        let diff = i128::from(next) - i128::from(anchor);

        if admission != Admission::Control {
            self.tdiff.fill(diff as f64);
            if below_threshold {
                self.tdiff_clean.fill(diff as f64);
            }
        }

        if self.window.is_none() {
            return None;
        }
        if diff > i128::from(self.width) {
            self.close(CloseReason::WidthExceeded)
        } else if diff < 0 {
            debug!(anchor, next, "Timestamp regression, closing window");
            self.close(CloseReason::TimestampRegression)
        } else {
            None
        }
    }

    fn check_order(&mut self, timestamp: u64) {
        if let Some(previous) = self.previous_timestamp {
            if previous > timestamp {
                self.stats.out_of_order += 1;
                warn!(previous, timestamp, "Out of order timestamp in hit stream");
            }
        }
        self.previous_timestamp = Some(timestamp);
    }

    fn append(&mut self, hit: ResolvedHit, timestamp: u64) {
        match self.window.as_mut() {
            Some(window) => window.push(hit, timestamp),
            None => {
                self.stats.windows_opened += 1;
                self.last_anchor = timestamp;
                self.window = Some(Window::open(hit, timestamp));
            }
        }
    }

    fn close(&mut self, reason: CloseReason) -> Option<ClosedWindow> {
        let window = self.window.take()?;
        match reason {
            CloseReason::WidthExceeded => self.stats.closed_by_width += 1,
            CloseReason::TimestampRegression => self.stats.closed_by_regression += 1,
            CloseReason::EndOfStream => self.stats.closed_by_end_of_stream += 1,
        }
        Some(ClosedWindow {
            anchor_timestamp: window.anchor,
            min_timestamp: window.min,
            max_timestamp: window.max,
            hits: window.hits,
            reason,
        })
    }

    /// Segmentation counters.
    pub fn stats(&self) -> &SegmenterStats {
        &self.stats
    }

    /// Time of every record relative to the window anchor.
    pub fn tdiff(&self) -> &Histogram1D {
        &self.tdiff
    }

    /// Same as [`tdiff`](Self::tdiff), above-threshold records only.
    pub fn tdiff_clean(&self) -> &Histogram1D {
        &self.tdiff_clean
    }
}
