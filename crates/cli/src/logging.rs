// Logging initialization
// stderr always (stdout carries command output); optional daily-rolling file
use anyhow::{Context, Result};
use clap::ValueEnum;
use std::path::Path;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

const DEFAULT_FILTER: &str = "isoenv=info";
const LOG_FILE_PREFIX: &str = "isoenv.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, colored
    Pretty,
    /// One JSON object per event
    Json,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn env_filter() -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("Failed to create env filter")
}

fn console_layer<W>(format: LogFormat, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_writer(writer).boxed(),
    }
}

fn console_subscriber<W>(format: LogFormat, writer: W) -> Result<impl Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    Ok(tracing_subscriber::registry()
        .with(console_layer(format, writer))
        .with(env_filter()?))
}

/// Stderr-only subscriber for startup, before the log dir is known
///
/// Use with `tracing::subscriber::with_default` around configuration loading.
pub fn startup(format: LogFormat) -> Result<impl Subscriber + Send + Sync> {
    console_subscriber(format, std::io::stderr)
}

/// Install the global subscriber
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// whole process.
pub fn init(format: LogFormat, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = env_filter()?;

    let mut layers: Vec<BoxedLayer> = vec![console_layer(format, std::io::stderr)];

    let guard = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_startup_subscriber_sees_config_loading() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = console_subscriber(LogFormat::Json, move || writer.clone()).unwrap();

        let result = tracing::subscriber::with_default(subscriber, || {
            isoenv_infra_config::load_from_path(Path::new("/nonexistent/isoenv.toml"))
        });

        assert!(result.is_err());
        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Loading configuration"), "output: {output}");
        assert!(output.contains("/nonexistent/isoenv.toml"));
    }
}
