//! Tracing subscriber setup.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` (`RUST_LOG` wins
//! over the configured level) and one of three output formats. Initialisation is
//! idempotent: if a global subscriber is already installed, `init` returns `Ok`.
//!
//! # Example
//! ```no_run
//! use rust_mbsort::{config::SortConfig, logging};
//! use tracing::info;
//!
//! let config = SortConfig::load()?;
//! logging::init_from_config(&config)?;
//! info!(window_ns = config.builder.window_width_ns, "Sorting");
//! # Ok::<(), rust_mbsort::error::SortError>(())
//! ```

use crate::config::SortConfig;
use crate::error::{SortError, SortResult};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer,
};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, coloured (interactive use)
    Pretty,
    /// One line per event, no colours
    Compact,
    /// JSON objects for log aggregation
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = SortError;

    fn from_str(s: &str) -> SortResult<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(OutputFormat::Pretty),
            "compact" => Ok(OutputFormat::Compact),
            "json" => Ok(OutputFormat::Json),
            other => Err(SortError::Configuration(format!(
                "Invalid log format '{other}'. Must be one of: pretty, compact, json"
            ))),
        }
    }
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Maximum level emitted
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Log span creation and close
    pub with_span_events: bool,
    /// Include source file and line
    pub with_file_and_line: bool,
    /// Include thread names (the monitor worker is named)
    pub with_thread_names: bool,
    /// ANSI colours, Pretty format only
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Builds a config from `[application] log_level`.
    pub fn from_sort_config(config: &SortConfig) -> SortResult<Self> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            ..Default::default()
        })
    }

    /// Creates a config at `level` with default formatting.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Sets the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enables span enter/close events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enables ANSI colours.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialise tracing with the level from `[application] log_level`.
pub fn init_from_config(config: &SortConfig) -> SortResult<()> {
    init(TracingConfig::from_sort_config(config)?)
}

/// Initialise tracing. Safe to call more than once.
pub fn init(config: TracingConfig) -> SortResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let result = match config.format {
        OutputFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_thread_names(config.with_thread_names)
                .with_ansi(config.with_ansi)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
        OutputFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_thread_names(config.with_thread_names)
                .with_ansi(false)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
        OutputFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_thread_names(config.with_thread_names)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
    };

    tolerate_existing(result)
}

/// Tests and embedding applications may already have installed a subscriber.
fn tolerate_existing(result: Result<(), TryInitError>) -> SortResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("a global default trace dispatcher has already been set") => {
            Ok(())
        }
        Err(e) => Err(SortError::Configuration(format!(
            "Failed to initialize tracing: {e}"
        ))),
    }
}

fn parse_log_level(level: &str) -> SortResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(SortError::Configuration(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}

fn level_to_filter_string(level: Level) -> String {
    match level {
        Level::TRACE => "trace".to_string(),
        Level::DEBUG => "debug".to_string(),
        Level::INFO => "info".to_string(),
        Level::WARN => "warn".to_string(),
        Level::ERROR => "error".to_string(),
    }
}
