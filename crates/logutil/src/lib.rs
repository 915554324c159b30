//! Utilities for logging.
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    HumanReadable,
    Json,
}

/// Install a global tracing subscriber.
///
/// `RUST_LOG` overrides `default_level` when set. Returns false if a global
/// subscriber was already installed.
pub fn configure_global_logger(default_level: Level, format: LogFormat) -> bool {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let builder = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_file(true)
        .with_line_number(true);

    let result = match format {
        LogFormat::HumanReadable => tracing::subscriber::set_global_default(builder.finish()),
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
    };

    result.is_ok()
}

/// Install a subscriber that writes through the test harness.
///
/// Safe to call from every test, only the first call has an effect.
pub fn init_test() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::DEBUG.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_test_writer()
        .with_env_filter(env_filter)
        .with_file(true)
        .with_line_number(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_test_twice() {
        init_test();
        init_test();
        assert!(!configure_global_logger(Level::INFO, LogFormat::Json));
    }
}
