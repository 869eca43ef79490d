//! Logging initialization.
//!
//! Installs a `tracing-subscriber` fmt subscriber. `RUST_LOG` takes precedence
//! over the configured level when set.

use tracing::Level;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Output form of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Initialize the global subscriber.
///
/// Returns `true` when this call installed the subscriber and `false` when
/// one was already set, so calling twice is harmless.
///
/// ```ignore
/// init_logging("info", LogFormat::Compact);
/// tracing::info!("Ledger started");
/// ```
pub fn init_logging(level: &str, format: LogFormat) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(normalize(level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match format {
        LogFormat::Compact => builder.compact().finish().try_init(),
        LogFormat::Json => builder.json().finish().try_init(),
    };
    result.is_ok()
}

/// Parse a level name, falling back to INFO for anything unrecognized.
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn normalize(level: &str) -> String {
    parse_level(level).to_string().to_ascii_lowercase()
}
