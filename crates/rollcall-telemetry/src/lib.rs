mod logging;

pub use logging::{LogEntry, LogFilter, WarningLayer, WarningLog};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "rollcall_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Whether to persist warn+ logs to SQLite.
    pub log_to_sqlite: bool,
    /// Path to the log database.
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            log_to_sqlite: true,
            log_db_path: home_fallback().join(".rollcall/logs.db"),
        }
    }
}

/// Returned by [`init_telemetry`]; hold it for the lifetime of the process.
pub struct TelemetryGuard {
    _warnings: Option<Arc<WarningLog>>,
}

/// Build the filter directive string from the configured levels.
fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

/// Initialize the telemetry subsystem. Call once at startup.
///
/// Log lines go to stderr as JSON; stdout belongs to the console adapter.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_span_list(true)
        .with_filter(env_filter);

    let (sqlite_layer, warnings) = if config.log_to_sqlite {
        match WarningLog::open(&config.log_db_path) {
            Ok(log) => {
                let log = Arc::new(log);
                (Some(WarningLayer::new(log.clone())), Some(log))
            }
            Err(e) => {
                eprintln!("rollcall-telemetry: failed to open log DB: {e}");
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(sqlite_layer)
        .try_init()
    {
        eprintln!("rollcall-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard {
        _warnings: warnings,
    }
}

fn home_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_module_overrides() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("rollcall_engine".into(), Level::DEBUG)],
            log_to_sqlite: false,
            log_db_path: PathBuf::from("/dev/null"),
        };
        assert_eq!(filter_directives(&config), "warn,rollcall_engine=debug");
    }

    #[test]
    fn default_persists_warnings() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.log_to_sqlite);
        assert!(config.log_db_path.ends_with(".rollcall/logs.db"));
    }
}
