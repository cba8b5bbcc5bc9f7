use anyhow::{Context, Result};
use sandstorm_config::{LogFormat, LoggingConfig};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::timer::LocalClock;

/// Name of the mirrored console log inside a task or worker directory
pub const CONSOLE_LOG_FILE: &str = "console.log";

/// Where console output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleTarget {
    Stdout,
    /// Worker processes keep stdout free for their parent
    Stderr,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize simple tracing for basic console output
pub fn init_simple_tracing(log_level: &str) -> Result<()> {
    let env_filter = build_filter(log_level);

    // Use try_init to avoid panic if global subscriber already set
    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_timer(LocalClock)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Initialize tracing for worker processes (output to stderr)
pub fn init_worker_tracing(log_level: &str) -> Result<()> {
    let env_filter = build_filter(log_level);

    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_timer(LocalClock)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    tracing::debug!("Worker tracing initialized");
    Ok(())
}

fn console_layer(format: LogFormat, target: ConsoleTarget) -> BoxedLayer {
    let writer = match target {
        ConsoleTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
        ConsoleTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
    };
    let layer = fmt::layer()
        .with_timer(LocalClock)
        .with_target(false)
        .with_writer(writer);

    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Text => layer.boxed(),
    }
}

/// Initialize logging for a batch, coordinator or worker run.
///
/// With `mirror_dir` set and mirroring enabled, every event is also written
/// to `<mirror_dir>/console.log` through a non-blocking appender. The
/// returned guard flushes that file when dropped and must be kept alive for
/// the life of the process.
pub fn init_batch_logging(
    config: &LoggingConfig,
    level_override: Option<&str>,
    mirror_dir: Option<&Path>,
    target: ConsoleTarget,
) -> Result<Option<WorkerGuard>> {
    let level = level_override.unwrap_or(config.level.as_filter());
    let mut layers: Vec<BoxedLayer> = vec![console_layer(config.format, target)];
    let mut guard = None;

    if let (true, Some(dir)) = (config.mirror_to_file, mirror_dir) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let appender = tracing_appender::rolling::never(dir, CONSOLE_LOG_FILE);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .with_timer(LocalClock)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
        guard = Some(file_guard);
    }

    if tracing_subscriber::registry()
        .with(layers)
        .with(build_filter(level))
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_logging_mirrors_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig::default();

        let guard = init_batch_logging(&config, Some("info"), Some(dir.path()), ConsoleTarget::Stderr)
            .unwrap();
        assert!(guard.is_some());

        tracing::info!("mirrored line");
        drop(guard);

        let content = std::fs::read_to_string(dir.path().join(CONSOLE_LOG_FILE)).unwrap();
        assert!(content.contains("mirrored line"));

        // A second initialization must not panic
        assert!(init_simple_tracing("debug").is_ok());
    }
}
