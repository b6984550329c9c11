//! Fixed-binning diagnostic histogram.

use serde::{Deserialize, Serialize};

/// One-dimensional histogram with uniform bins over `[low, high)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram1D {
    /// Short identifier.
    pub name: String,
    /// Title with axis labels, `;`-separated.
    pub title: String,
    /// Lower edge of the first bin.
    pub low: f64,
    /// Upper edge of the last bin.
    pub high: f64,
    /// Per-bin counts.
    pub counts: Vec<u64>,
    /// Fills below `low`, NaN included.
    pub underflow: u64,
    /// Fills at or above `high`.
    pub overflow: u64,
}

impl Histogram1D {
    /// Creates an empty histogram; at least one bin is always allocated.
    pub fn new(name: impl Into<String>, title: impl Into<String>, bins: usize, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            low,
            high,
            counts: vec![0; bins.max(1)],
            underflow: 0,
            overflow: 0,
        }
    }

    /// Adds one entry.
    pub fn fill(&mut self, value: f64) {
        if value.is_nan() || value < self.low {
            self.underflow += 1;
            return;
        }
        if value >= self.high {
            self.overflow += 1;
            return;
        }
        let width = (self.high - self.low) / self.counts.len() as f64;
        let bin = (((value - self.low) / width) as usize).min(self.counts.len() - 1);
        self.counts[bin] += 1;
    }

    /// Entries inside the range.
    pub fn integral(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// All fills including under/overflow.
    pub fn entries(&self) -> u64 {
        self.integral() + self.underflow + self.overflow
    }

    /// Centre of `bin` on the value axis.
    pub fn bin_center(&self, bin: usize) -> f64 {
        let width = (self.high - self.low) / self.counts.len() as f64;
        self.low + (bin as f64 + 0.5) * width
    }

    /// Zeroes every bin.
    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
        self.underflow = 0;
        self.overflow = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_bins_and_edges() {
        let mut h = Histogram1D::new("h", "test", 10, 0.0, 100.0);
        h.fill(-1.0);
        h.fill(0.0);
        h.fill(55.0);
        h.fill(99.99);
        h.fill(100.0);
        assert_eq!(h.underflow, 1);
        assert_eq!(h.overflow, 1);
        assert_eq!(h.counts[0], 1);
        assert_eq!(h.counts[5], 1);
        assert_eq!(h.counts[9], 1);
        assert_eq!(h.entries(), 5);
        assert_eq!(h.integral(), 3);
        assert!((h.bin_center(5) - 55.0).abs() < 1e-9);

        h.reset();
        assert_eq!(h.entries(), 0);
    }
}
