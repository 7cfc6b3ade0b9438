//! Structured logging with pretty/JSON/compact console output and file rotation

use std::io;

use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::config::{FileLoggingConfig, LogFormat, LoggingConfig, RotationStrategy};
use crate::error::{ObservabilityError, Result};

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Keeps the background file writer alive; drop it to flush.
pub struct LogGuard {
    _guard: Option<WorkerGuard>,
}

impl LogGuard {
    fn new(guard: Option<WorkerGuard>) -> Self {
        Self { _guard: guard }
    }

    /// Whether a file writer is attached
    pub fn has_file_writer(&self) -> bool {
        self._guard.is_some()
    }
}

/// Install the global subscriber described by `config`.
///
/// Fails with [`ObservabilityError::LoggingInit`] if a subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<LogGuard> {
    let filter = build_filter(config)?;

    let mut layers: Vec<BoxedLayer<_>> = vec![console_layer(config)];
    let guard = match &config.file {
        Some(file_config) => {
            let (writer, guard) = create_file_writer(file_config);
            layers.push(file_layer(config, writer));
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| ObservabilityError::LoggingInit(e.to_string()))?;

    Ok(LogGuard::new(guard))
}

/// `RUST_LOG` wins over the configured directives
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = config.directives();
    EnvFilter::try_new(&directives)
        .map_err(|e| ObservabilityError::Config(format!("{directives}: {e}")))
}

fn console_layer<S>(config: &LoggingConfig) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_writer(io::stdout)
        .with_file(config.source_locations)
        .with_line_number(config.source_locations);

    match config.format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

// Files always get JSON regardless of the console format.
fn file_layer<S>(config: &LoggingConfig, writer: NonBlocking) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(writer)
        .with_file(config.source_locations)
        .with_line_number(config.source_locations)
        .with_ansi(false)
        .json()
        .boxed()
}

fn create_file_writer(config: &FileLoggingConfig) -> (NonBlocking, WorkerGuard) {
    let appender = match config.rotation {
        RotationStrategy::Daily => tracing_appender::rolling::daily(&config.directory, &config.prefix),
        RotationStrategy::Hourly => {
            tracing_appender::rolling::hourly(&config.directory, &config.prefix)
        }
        RotationStrategy::Never => tracing_appender::rolling::never(&config.directory, &config.prefix),
    };
    tracing_appender::non_blocking(appender)
}
