//! # Miniball event builder
//!
//! Turns a time-ordered stream of digitised detector-channel hits and DAQ info
//! records into physics events. Hits that fall within a configurable time window of
//! the first hit are grouped; each closed window is reconstructed into gamma-ray
//! singles, addback gamma rays and CD particles, and emitted as a [`BuiltEvent`].
//! Alongside, per-module dead time and live time are tracked from pause/resume
//! control records, and the EBIS/T1/pulser marker rates are sampled.
//!
//! ## Crate Structure
//!
//! - **`hit`**: input records (`HitRecord`) and their mapped forms.
//! - **`config`**: figment-based `SortConfig` with validation.
//! - **`mapping`**: `ChannelMapper` and `Calibration` collaborators with table-backed
//!   implementations.
//! - **`window`**: the lookahead window segmenter.
//! - **`gamma`** / **`particle`**: per-window reconstruction passes.
//! - **`health`**: pause/resume dead time, live time and marker frequencies.
//! - **`emitter`**: assembly of output records and the emission guard.
//! - **`builder`**: `EventBuilder`, the engine tying all of the above together.
//! - **`summary`**: the end-of-run `RunSummary`.
//! - **`sink`** / **`source`**: event outputs and hit inputs.
//! - **`monitor`**: the repeating live-monitoring loop.
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: the crate error type, `SortError`.

pub mod builder;
pub mod config;
pub mod emitter;
pub mod error;
pub mod events;
pub mod gamma;
pub mod health;
pub mod histogram;
pub mod hit;
pub mod logging;
pub mod mapping;
pub mod monitor;
pub mod particle;
pub mod sink;
pub mod source;
pub mod summary;
pub mod window;

pub use builder::{EventBuilder, Progress};
pub use config::SortConfig;
pub use error::{SortError, SortResult};
pub use events::BuiltEvent;
pub use hit::HitRecord;
pub use summary::RunSummary;
