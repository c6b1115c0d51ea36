//! Unit tests for the logging subsystem.

use std::path::Path;

use super::{
    format_service_name,
    manager::{build_file_appender, build_filter},
    service::{logger_config, LoggingInitConfig},
    types::*,
    LoggingInitError,
};

fn init_config<'a>(dir: Option<&'a Path>, directives: &'a [String]) -> LoggingInitConfig<'a> {
    LoggingInitConfig {
        service_base_name: "rollup-sequencer",
        service_label: Some("dev"),
        log_dir: dir,
        log_file_prefix: None,
        json_format: Some(true),
        directives,
        default_log_prefix: "sequencer",
    }
}

#[test]
fn test_format_service_name() {
    assert_eq!(format_service_name("seq", None), "seq");
    assert_eq!(format_service_name("seq", Some("prod")), "seq%prod");
}

#[test]
fn test_logger_config_builder_pattern() {
    let config = LoggerConfig::new("test-service".to_string())
        .with_json_logging(true)
        .with_directive("rollup_lock=debug");

    assert_eq!(config.service_name, "test-service");
    assert!(config.stdout_config.json_format);
    assert_eq!(config.directives, vec!["rollup_lock=debug".to_string()]);
    assert!(config.file_logging_config.is_none());
}

#[test]
fn test_logger_config_from_init_config() {
    let dir = tempfile::tempdir().unwrap();
    let directives = vec!["rollup_proof_pipeline=trace".to_string()];
    let config = logger_config(&init_config(Some(dir.path()), &directives));

    assert_eq!(config.service_name, "rollup-sequencer%dev");
    assert!(config.stdout_config.json_format);
    let file = config.file_logging_config.unwrap();
    assert_eq!(file.directory, dir.path());
    assert_eq!(file.file_name_prefix, "sequencer");
}

#[test]
fn test_bad_directive_is_reported() {
    let config = LoggerConfig::default().with_directive("rollup_lock=notalevel");
    assert!(matches!(
        build_filter(&config),
        Err(LoggingInitError::Directive { .. })
    ));
    assert!(build_filter(&LoggerConfig::default()).is_ok());
}

#[test]
fn test_file_appender_creates_directory() {
    let dir = tempfile::tempdir().unwrap();
    let logs = dir.path().join("logs");
    let config = FileLoggingConfig::new(logs.clone(), "sequencer".to_string())
        .with_rotation(super::Rotation::NEVER)
        .with_json_format(true);

    build_file_appender(&config).unwrap();
    assert!(logs.is_dir());
}
