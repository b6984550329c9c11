//! Tracing initialisation. Lives in its own binary because it installs the global
//! subscriber.

use rust_mbsort::config::SortConfig;
use rust_mbsort::logging::{self, OutputFormat, TracingConfig};
use tracing::Level;

#[test]
fn test_init_is_idempotent() {
    let config = TracingConfig::new(Level::DEBUG)
        .with_format(OutputFormat::Json)
        .with_ansi(false);
    assert!(logging::init(config.clone()).is_ok());
    assert!(logging::init(config).is_ok());
    assert!(logging::init_from_config(&SortConfig::default()).is_ok());
    tracing::info!("Logging initialised twice without error");
}

#[test]
fn test_init_from_config_rejects_bad_level() {
    let mut config = SortConfig::default();
    config.application.log_level = "loud".to_string();
    assert!(logging::init_from_config(&config).is_err());
}
