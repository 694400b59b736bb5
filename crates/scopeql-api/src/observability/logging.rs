//! Log subscriber setup for hosts embedding the engine.
//!
//! The engine only emits `tracing` events; installing a subscriber is the
//! host's job. [`init_logging`] installs one built from [`LogSettings`],
//! which mirror the `logging` section of the engine configuration file.
//!
//! # Log Format
//!
//! With [`LogFormat::Json`] each event is one JSON object per line:
//!
//! ```json
//! {"timestamp":"2024-01-15T10:30:00.000Z","level":"WARN","target":"scopeql_domain::resolver","fields":{"message":"object-level permission denied","model":"item"}}
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use scopeql_api::observability::{init_logging, LogSettings};
//!
//! let settings = LogSettings::from_settings(&config.logging.level, config.logging.json)?;
//! init_logging(&settings);
//! ```

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    prelude::*,
    EnvFilter,
};

/// Crates whose events follow the configured engine level.
const ENGINE_TARGETS: [&str; 4] = [
    "scopeql_domain",
    "scopeql_storage",
    "scopeql_server",
    "scopeql_api",
];

/// Output encoding for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line human readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// What the installed subscriber records and how it writes it.
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub format: LogFormat,
    /// Level for the engine crates when `RUST_LOG` is unset.
    pub engine_level: Level,
    /// Level for every other target when `RUST_LOG` is unset.
    pub dependency_level: Level,
    /// Record span enter/exit, useful when tracing slow operations.
    pub span_events: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            engine_level: Level::INFO,
            dependency_level: Level::WARN,
            span_events: false,
        }
    }
}

impl LogSettings {
    pub fn json() -> Self {
        Self {
            format: LogFormat::Json,
            ..Default::default()
        }
    }

    /// Builds settings from the configuration file's `logging.level` and
    /// `logging.json` values.
    ///
    /// # Errors
    ///
    /// Returns the offending level name if `tracing` does not know it.
    pub fn from_settings(level: &str, json: bool) -> Result<Self, String> {
        let engine_level = Level::from_str(level).map_err(|_| level.to_string())?;
        Ok(Self {
            format: if json { LogFormat::Json } else { LogFormat::Pretty },
            engine_level,
            ..Default::default()
        })
    }

    pub fn with_engine_level(mut self, level: Level) -> Self {
        self.engine_level = level;
        self
    }

    pub fn with_span_events(mut self) -> Self {
        self.span_events = true;
        self
    }

    /// Filter directives used when `RUST_LOG` is unset, for example
    /// `warn,scopeql_domain=info,...`.
    pub fn directives(&self) -> String {
        let mut directives = vec![self.dependency_level.to_string().to_lowercase()];
        directives.extend(
            ENGINE_TARGETS
                .iter()
                .map(|target| format!("{target}={}", self.engine_level.to_string().to_lowercase())),
        );
        directives.join(",")
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()))
    }

    fn fmt_span(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::ENTER | FmtSpan::EXIT
        } else {
            FmtSpan::NONE
        }
    }
}

/// Installs the global subscriber.
///
/// Returns `false` when a subscriber was already installed, in which case
/// the existing one is left in place.
pub fn init_logging(settings: &LogSettings) -> bool {
    let filter = settings.filter();
    let installed = match settings.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .json()
                    .with_span_events(settings.fmt_span())
                    .with_current_span(true)
                    .with_target(true),
            ),
        ),
        LogFormat::Pretty => tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .pretty()
                    .with_span_events(settings.fmt_span())
                    .with_target(true),
            ),
        ),
    };
    installed.is_ok()
}

/// JSON subscriber writing every event to `writer`.
///
/// Not installed globally; pair with `tracing::subscriber::with_default`.
pub fn json_subscriber<W>(writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(EnvFilter::new("trace"))
        .with(fmt::layer().json().with_writer(writer).with_target(true))
}
