//! Logging initialization.

use thiserror::Error;
use tracing::*;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{
    filter::ParseError,
    fmt::layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer,
};

use super::types::{FileLoggingConfig, LoggerConfig};

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("invalid log directive {directive:?}: {source}")]
    Directive {
        directive: String,
        #[source]
        source: ParseError,
    },

    #[error("log file appender: {0}")]
    FileAppender(#[from] rolling::InitError),

    #[error("global subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Builds the level filter: `INFO` by default, overridable through `RUST_LOG`, plus the
/// configured directives.
pub(crate) fn build_filter(config: &LoggerConfig) -> Result<EnvFilter, LoggingInitError> {
    let mut filt = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    for directive in &config.directives {
        let parsed = directive
            .parse()
            .map_err(|source| LoggingInitError::Directive {
                directive: directive.clone(),
                source,
            })?;
        filt = filt.add_directive(parsed);
    }

    Ok(filt)
}

pub(crate) fn build_file_appender(
    config: &FileLoggingConfig,
) -> Result<RollingFileAppender, LoggingInitError> {
    Ok(RollingFileAppender::builder()
        .rotation(config.rotation.clone())
        .filename_prefix(&config.file_name_prefix)
        .build(&config.directory)?)
}

/// Initializes the logging subsystem with the provided config.
pub fn init(config: LoggerConfig) -> Result<(), LoggingInitError> {
    let filt = build_filter(&config)?;

    // Configure stdout logging with JSON or compact format
    let stdout_sub = if config.stdout_config.json_format {
        layer()
            .json()
            .with_span_events(config.stdout_config.fmt_span.clone())
            .with_filter(filt)
            .boxed()
    } else {
        layer()
            .compact()
            .with_span_events(config.stdout_config.fmt_span.clone())
            .with_filter(filt)
            .boxed()
    };

    // Build optional file logging layer
    let file_layer = match &config.file_logging_config {
        Some(file_config) => {
            let file_appender = build_file_appender(file_config)?;
            let layer = if file_config.json_format {
                layer()
                    .json()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .with_filter(build_filter(&config)?)
                    .boxed()
            } else {
                layer()
                    .compact()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .with_filter(build_filter(&config)?)
                    .boxed()
            };
            Some(layer)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stdout_sub)
        .with(file_layer)
        .try_init()?;

    info!(service_name = %config.service_name, "logging initialized");
    Ok(())
}
