//! CLI entry point for the Miniball event builder.
//!
//! Sort files once:
//! ```bash
//! rust_mbsort build --config config/mb_sort.toml --input run1.jsonl --input run2.jsonl --output sorted/
//! ```
//!
//! Watch a growing file (or synthetic data):
//! ```bash
//! rust_mbsort monitor --config config/mb_sort.toml --input live.jsonl
//! rust_mbsort monitor --config config/mb_sort.toml --mock --cycles 5
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rust_mbsort::builder::{spawn_progress_logger, EventBuilder, Progress};
use rust_mbsort::config::{AddbackMode, SortConfig};
use rust_mbsort::logging::{self, OutputFormat, TracingConfig};
use rust_mbsort::monitor::MonitorLoop;
use rust_mbsort::sink::{CountingSink, EventSink, JsonLinesSink};
use rust_mbsort::source::{HitReader, HitSource, JsonLinesSource, MockHitSource};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rust_mbsort")]
#[command(about = "Time-window event builder for Miniball and CD data", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, default_value = "compact")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputKind {
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Build events from one or more hit files
    Build {
        #[arg(long)]
        config: PathBuf,

        /// Hit files (JSON lines); each is sorted independently
        #[arg(long = "input", required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory
        #[arg(long)]
        output: PathBuf,

        #[arg(long, value_enum, default_value = "json")]
        format: OutputKind,

        /// Reproduce historical addback output
        #[arg(long)]
        legacy_addback: bool,
    },

    /// Repeatedly sort whatever new data is available
    Monitor {
        #[arg(long)]
        config: PathBuf,

        /// Hit file to tail
        #[arg(long, conflicts_with = "mock")]
        input: Option<PathBuf>,

        /// Use synthetic data instead of a file
        #[arg(long)]
        mock: bool,

        /// Events written here (JSON lines); kept in memory otherwise
        #[arg(long)]
        output: Option<PathBuf>,

        /// Overrides monitor.poll_interval_ms
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Load and validate a configuration file
    CheckConfig {
        #[arg(long)]
        config: PathBuf,

        /// Print the effective configuration as TOML
        #[arg(long)]
        dump: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            config,
            inputs,
            output,
            format,
            legacy_addback,
        } => {
            let mut config = load_config(&config, &cli.log_format)?;
            if legacy_addback {
                config.builder.addback_mode = AddbackMode::Legacy;
            }
            build_files(&config, &inputs, &output, format)
        }
        Commands::Monitor {
            config,
            input,
            mock,
            output,
            interval_ms,
            cycles,
        } => {
            let config = load_config(&config, &cli.log_format)?;
            run_monitor(config, input, mock, output, interval_ms, cycles)
        }
        Commands::CheckConfig { config, dump } => {
            let config = load_config(&config, &cli.log_format)?;
            print_config(&config);
            if dump {
                println!();
                println!("{}", config.to_toml()?);
            }
            Ok(())
        }
    }
}

fn load_config(path: &Path, log_format: &str) -> Result<SortConfig> {
    let config = SortConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate().context("Invalid configuration")?;

    let format: OutputFormat = log_format.parse()?;
    logging::init(TracingConfig::from_sort_config(&config)?.with_format(format))?;
    Ok(config)
}

fn open_sink(path: &Path, format: OutputKind) -> Result<Box<dyn EventSink>> {
    match format {
        OutputKind::Json => Ok(Box::new(JsonLinesSink::create(path)?)),
        #[cfg(feature = "storage_csv")]
        OutputKind::Csv => Ok(Box::new(rust_mbsort::sink::CsvSink::create(path)?)),
        #[cfg(not(feature = "storage_csv"))]
        OutputKind::Csv => Err(rust_mbsort::SortError::FeatureNotEnabled("storage_csv".into()).into()),
    }
}

fn output_path(output: &Path, input: &Path, format: OutputKind) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "events".to_string());
    let extension = match format {
        OutputKind::Json => "events.jsonl",
        OutputKind::Csv => "events.csv",
    };
    output.join(format!("{stem}.{extension}"))
}

fn count_records(path: &Path) -> Result<u64> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut count = 0;
    for line in BufReader::new(file).lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

fn build_files(config: &SortConfig, inputs: &[PathBuf], output: &Path, format: OutputKind) -> Result<()> {
    let (progress_tx, progress_rx) = watch::channel(Progress::default());
    let progress_logger = spawn_progress_logger(progress_rx, 0.1)?;
    let mut builder = EventBuilder::new(config)?.with_progress(progress_tx);

    for input in inputs {
        info!(input = %input.display(), "Sorting file");
        let mut reader = HitReader::open(input)
            .with_context(|| format!("Failed to open {}", input.display()))?;
        builder.set_total(count_records(input)?);
        let target = output_path(output, input, format);
        let mut sink = open_sink(&target, format)?;

        for event in builder.build(reader.by_ref()) {
            sink.write_event(&event)?;
        }
        if let Some(err) = reader.take_error() {
            warn!(input = %input.display(), error = %err, "Input truncated, events up to the bad record were kept");
        }

        let summary = builder.summary();
        info!("{}", summary);
        sink.write_summary(&summary)?;
        sink.finish()?;
        info!(output = %target.display(), events = summary.built_events(), "File done");
    }

    drop(builder);
    if progress_logger.join().is_err() {
        warn!("Progress logger thread panicked");
    }
    Ok(())
}

fn run_monitor(
    config: SortConfig,
    input: Option<PathBuf>,
    mock: bool,
    output: Option<PathBuf>,
    interval_ms: Option<u64>,
    cycles: Option<u64>,
) -> Result<()> {
    let source: Box<dyn HitSource> = match (input, mock) {
        (Some(path), false) => Box::new(JsonLinesSource::new(path)),
        (None, true) => Box::new(MockHitSource::new(&config, None)),
        _ => bail!("monitor needs exactly one of --input or --mock"),
    };
    let sink: Box<dyn EventSink> = match output {
        Some(path) => Box::new(JsonLinesSink::create(path)?),
        None => Box::new(CountingSink::new()),
    };

    let mut monitor = MonitorLoop::new(config)?;
    if let Some(ms) = interval_ms {
        monitor = monitor.with_interval(Duration::from_millis(ms));
    }
    if let Some(n) = cycles {
        monitor = monitor.with_max_cycles(n);
    }

    let mut snapshots = monitor.subscribe();
    monitor.start(source, sink)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create runtime")?;
    runtime.block_on(async {
        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    match &snapshot.summary {
                        Some(summary) => info!(
                            cycle = snapshot.cycle,
                            records = snapshot.records,
                            events = snapshot.events,
                            dead_time_s = summary.total_dead_time() as f64 / 1e9,
                            "Monitor update"
                        ),
                        None => warn!(cycle = snapshot.cycle, error = ?snapshot.error, "Monitor cycle without result"),
                    }
                    let limit_reached = cycles.is_some_and(|n| snapshot.cycle >= n);
                    if limit_reached || !monitor.is_running() {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
            }
        }
    });

    monitor.stop();
    Ok(())
}

fn print_config(config: &SortConfig) {
    println!("{}", config.application.name);
    println!("  Window width: {} ns", config.builder.window_width_ns);
    println!("  Addback mode: {:?}", config.builder.addback_mode);
    println!("  Particle-only events: {}", config.builder.emit_particle_only);
    println!(
        "  DAQ layout: {} sfp x {} boards x {} channels",
        config.daq.n_sfp, config.daq.n_board, config.daq.n_channel
    );
    println!(
        "  Info codes: EBIS {}, T1 {}, pulser {}, pause {}, resume {}",
        config.daq.ebis_code,
        config.daq.t1_code,
        config.daq.pulser_code,
        config.daq.pause_code,
        config.daq.resume_code
    );
    println!(
        "  CD: {} detectors x {} sectors ({} p strips, {} n strips)",
        config.cd.n_detectors, config.cd.n_sectors, config.cd.n_strips_p, config.cd.n_strips_n
    );
    println!("  Miniball channels: {}", config.miniball.len());
    println!("  CD channels: {}", config.cd_channel.len());
    println!("  Calibrated channels: {}", config.calibration.len());
}
