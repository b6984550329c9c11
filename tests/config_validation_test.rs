//! Configuration loading and validation against files on disk.

use rust_mbsort::builder::EventBuilder;
use rust_mbsort::config::{AddbackMode, SortConfig};
use rust_mbsort::SortError;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn shipped_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/mb_sort.toml")
}

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn assert_invalid(toml: &str, expected: &str) {
    let config = SortConfig::from_toml_str(toml).unwrap();
    let err = config.validate().unwrap_err();
    assert!(matches!(err, SortError::Configuration(_)));
    let err_msg = err.to_string();
    assert!(
        err_msg.contains(expected),
        "expected '{expected}' in '{err_msg}'"
    );
}

#[test]
fn test_shipped_config_is_valid() {
    let config = SortConfig::load_from(shipped_config()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.builder.window_width_ns, 3000);
    assert_eq!(config.builder.addback_mode, AddbackMode::Clustered);
    assert_eq!(config.miniball.len(), 42);
    assert_eq!(config.cd_channel.len(), 16);
    assert!(config.calibration.is_empty());
    assert!(EventBuilder::new(&config).is_ok());
}

#[test]
fn test_shipped_config_has_one_core_per_crystal() {
    let config = SortConfig::load_from(shipped_config()).unwrap();
    let mut cores: Vec<_> = config
        .miniball
        .iter()
        .filter(|c| c.segment == 0)
        .map(|c| (c.cluster, c.crystal))
        .collect();
    let total = cores.len();
    cores.sort_unstable();
    cores.dedup();
    assert_eq!(cores.len(), total);
    assert_eq!(total, 6);
}

#[test]
fn test_load_from_temp_file() {
    let file = write_config(
        r#"
        [builder]
        window_width_ns = 1500
        addback_mode = "legacy"
        emit_particle_only = true

        [daq]
        n_sfp = 1
        n_board = 1

        [[calibration]]
        sfp = 0
        board = 0
        channel = 4
        gain = 0.5
        threshold = 20.0
        "#,
    );

    let config = SortConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();
    assert_eq!(config.builder.window_width_ns, 1500);
    assert_eq!(config.builder.addback_mode, AddbackMode::Legacy);
    assert!(config.builder.emit_particle_only);
    assert_eq!(config.calibration[0].gain, 0.5);
    assert_eq!(config.calibration[0].offset, 0.0);
    // untouched sections keep their defaults
    assert_eq!(config.daq.ebis_code, 21);
    assert_eq!(config.cd.n_strips_p, 16);
}

#[test]
fn test_type_mismatch_is_a_load_error() {
    let file = write_config(
        r#"
        [builder]
        window_width_ns = "wide"
        "#,
    );
    let err = SortConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, SortError::Config(_)));
}

#[test]
fn test_zero_window_width_rejected() {
    assert_invalid(
        "[builder]\nwindow_width_ns = 0\n",
        "window_width_ns must be greater than 0",
    );
}

#[test]
fn test_channel_mapped_twice_rejected() {
    assert_invalid(
        r#"
        [[miniball]]
        sfp = 0
        board = 1
        channel = 2
        cluster = 0
        crystal = 0
        segment = 0

        [[cd_channel]]
        sfp = 0
        board = 1
        channel = 2
        detector = 0
        sector = 0
        side = 0
        strip = 0
        "#,
        "mapped more than once",
    );
}

#[test]
fn test_cd_strip_beyond_layout_rejected() {
    assert_invalid(
        r#"
        [[cd_channel]]
        sfp = 0
        board = 0
        channel = 0
        detector = 0
        sector = 0
        side = 1
        strip = 12
        "#,
        "strip 12 exceeds 12 strips",
    );
}

#[test]
fn test_cd_sector_beyond_layout_rejected() {
    assert_invalid(
        r#"
        [[cd_channel]]
        sfp = 0
        board = 0
        channel = 0
        detector = 0
        sector = 4
        side = 0
        strip = 0
        "#,
        "outside 1x4",
    );
}

#[test]
fn test_non_finite_calibration_rejected() {
    let mut config = SortConfig::from_toml_str(
        r#"
        [[calibration]]
        sfp = 0
        board = 0
        channel = 0
        "#,
    )
    .unwrap();
    config.calibration[0].gain = f32::NAN;
    let err_msg = config.validate().unwrap_err().to_string();
    assert!(err_msg.contains("non-finite coefficients"));
}

#[test]
fn test_dumped_config_reloads() {
    let config = SortConfig::load_from(shipped_config()).unwrap();
    let file = write_config(&config.to_toml().unwrap());
    let reloaded = SortConfig::load_from(file.path()).unwrap();
    reloaded.validate().unwrap();
    assert_eq!(reloaded.miniball.len(), config.miniball.len());
    assert_eq!(reloaded.daq.n_board, config.daq.n_board);
    assert_eq!(reloaded.builder.addback_mode, config.builder.addback_mode);
}
