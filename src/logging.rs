//! Logging setup for feedstore.
//!
//! Structured logging through the `tracing` ecosystem. Log output always goes
//! to stderr so `--format json` output on stdout stays machine-readable.
//! `RUST_LOG`, when set, replaces the directive derived from [`LogConfig`].
//!
//! # Usage
//!
//! ```rust
//! use feedstore::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::for_cli(false, 1, false));
//! tracing::info!("Application started");
//! ```

use std::fmt;
use std::time::Instant;

use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::format::FmtSpan,
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// Logging configuration.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub timestamps: bool,
    /// Include the module path of each event.
    pub target: bool,
    /// Emit span enter/exit events.
    pub spans: bool,
    pub colors: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, for reading merge traces by eye.
    Pretty,
    Compact,
    /// Compact plus thread, file and line.
    Full,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            timestamps: true,
            target: false,
            spans: false,
            colors: true,
        }
    }
}

impl LogConfig {
    /// Config for the `feedstore` binary.
    ///
    /// Without `-v` only warnings reach stderr, so invariant violations stay
    /// visible while per-page summaries do not. `-v` adds the summaries,
    /// `-vv` per-pass detail, `-vvv` everything down to per-entity traces.
    #[must_use]
    pub fn for_cli(quiet: bool, verbose: u8, colors: bool) -> Self {
        let base = Self {
            colors,
            ..Self::default()
        };
        if quiet {
            return Self {
                level: LogLevel::Error,
                timestamps: false,
                ..base
            };
        }
        match verbose {
            0 => Self {
                level: LogLevel::Warn,
                timestamps: false,
                ..base
            },
            1 => base,
            2 => Self {
                level: LogLevel::Debug,
                format: LogFormat::Pretty,
                target: true,
                ..base
            },
            _ => Self {
                level: LogLevel::Trace,
                format: LogFormat::Full,
                target: true,
                spans: true,
                ..base
            },
        }
    }

    /// Directive used when `RUST_LOG` is not set.
    #[must_use]
    pub fn default_directive(&self) -> String {
        format!("feedstore={}", self.level)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        })
    }
}

fn stderr_layer<S>(config: &LogConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let span_events = if config.spans {
        FmtSpan::ENTER | FmtSpan::EXIT
    } else {
        FmtSpan::NONE
    };
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.colors)
        .with_target(config.target)
        .with_span_events(span_events);

    match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => layer.pretty().boxed(),
        (LogFormat::Pretty, false) => layer.pretty().without_time().boxed(),
        (LogFormat::Compact, true) => layer.compact().boxed(),
        (LogFormat::Compact, false) => layer.compact().without_time().boxed(),
        (LogFormat::Full, _) => layer
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    }
}

/// Install the global subscriber. Only the first call has any effect.
pub fn init_logging(config: &LogConfig) {
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.default_directive())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer(config))
        .try_init()
        .ok();
}

/// Logging for tests: silent unless `RUST_LOG` is set.
pub fn init_test_logging() {
    init_logging(&LogConfig {
        level: LogLevel::Off,
        ..LogConfig::default()
    });
}

/// Logging for the `feedstore` binary. See [`LogConfig::for_cli`].
pub fn init_cli_logging(quiet: bool, verbose: u8, colors: bool) {
    init_logging(&LogConfig::for_cli(quiet, verbose, colors));
}

/// Logs the start and outcome of an operation with its duration.
pub struct OperationGuard {
    name: String,
    start: Instant,
}

impl OperationGuard {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        tracing::debug!(operation = %name, "Starting operation");
        Self {
            name,
            start: Instant::now(),
        }
    }

    pub fn complete(self) {
        tracing::info!(
            operation = %self.name,
            duration_ms = self.start.elapsed().as_millis(),
            "Operation completed"
        );
    }

    pub fn fail(self, error: &dyn fmt::Display) {
        tracing::error!(
            operation = %self.name,
            duration_ms = self.start.elapsed().as_millis(),
            error = %error,
            "Operation failed"
        );
    }
}

/// Log a named measurement at info level, with an optional unit.
#[macro_export]
macro_rules! log_metric {
    ($name:expr, $value:expr) => {
        tracing::info!(metric = $name, value = $value, "Performance metric");
    };
    ($name:expr, $value:expr, $unit:expr) => {
        tracing::info!(
            metric = $name,
            value = $value,
            unit = $unit,
            "Performance metric"
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_targets_crate() {
        assert_eq!(LogConfig::default().default_directive(), "feedstore=info");
        assert_eq!(
            LogConfig::for_cli(true, 3, false).default_directive(),
            "feedstore=error"
        );
    }

    #[test]
    fn cli_verbosity_raises_level() {
        let levels: Vec<LogLevel> = (0..=4)
            .map(|v| LogConfig::for_cli(false, v, true).level)
            .collect();
        assert_eq!(
            levels,
            [
                LogLevel::Warn,
                LogLevel::Info,
                LogLevel::Debug,
                LogLevel::Trace,
                LogLevel::Trace
            ]
        );
        assert!(LogConfig::for_cli(false, 3, true).spans);
        assert!(!LogConfig::for_cli(false, 0, false).colors);
    }

    #[test]
    fn init_is_repeatable() {
        init_test_logging();
        init_test_logging();
        OperationGuard::new("noop").complete();
    }
}
