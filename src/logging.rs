// Tracing subscriber setup for the CLI
//
// Console output goes to stderr so the binary's own report on stdout stays
// clean. `RUST_LOG` overrides the default filter unless `--verbose` is given.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "windd=info";
const VERBOSE_FILTER: &str = "windd=debug";

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
}

impl LogConfig {
    fn filter(&self) -> EnvFilter {
        if self.verbose {
            EnvFilter::new(VERBOSE_FILTER)
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        }
    }
}

/// Install the global subscriber. The returned guard flushes the log file
/// when dropped and must be held until the program exits.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>, InitError> {
    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "windd.log".to_string());

            let appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(file_name)
                .build(directory)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    // Ignore the error if a subscriber is already installed
    let _ = tracing_subscriber::registry()
        .with(config.filter())
        .with(console_layer)
        .with(file_layer)
        .try_init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let config = LogConfig {
            verbose: true,
            log_file: Some(path.clone()),
        };

        let guard = init(&config).unwrap();
        assert!(guard.is_some());
        tracing::info!("log file test");
        drop(guard);
        assert!(path.exists());
    }
}
