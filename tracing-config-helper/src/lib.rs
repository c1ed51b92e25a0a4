use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Once;
use tracing::subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact human readable lines
    Pretty,
    /// One json object per line, for log shippers
    Json,
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other}, expected pretty or json")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingSetupError {
    #[error("Tried to initialize tracing twice")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Uses RUST_LOG if present and valid, otherwise falls back to `info`.
pub fn env_filter_or_default() -> EnvFilter {
    EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|e| {
        println!(
            "Missing or invalid RUST_LOG, defaulting to {DEFAULT_FILTER}. {:#?}",
            e
        );
        EnvFilter::builder()
            .parse(DEFAULT_FILTER)
            .unwrap_or_else(|_| panic!("{DEFAULT_FILTER} should work as filter"))
    })
}

pub fn setup_logging(format: LogFormat) -> Result<(), LoggingSetupError> {
    let filter = env_filter_or_default();
    println!("Using env filter: {}", filter);
    let fmt = match format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .compact()
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_filter(filter)
            .boxed(),
    };
    let subscriber = tracing_subscriber::Registry::default().with(fmt);
    subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Safe to call from every test, only the first call installs the subscriber.
pub fn setup_tracing_console_logging_for_test() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let fmt = tracing_subscriber::fmt::layer()
            // ansi is fine for test output
            .with_ansi(true)
            .with_test_writer()
            .compact()
            .with_filter(env_filter_or_default());
        let subscriber = tracing_subscriber::Registry::default().with(fmt);
        if let Err(e) = subscriber::set_global_default(subscriber) {
            println!("Tracing was already initialized: {e}");
        }
    });
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!(LogFormat::from_str("JSON"), Ok(LogFormat::Json));
        assert_eq!(LogFormat::from_str("pretty"), Ok(LogFormat::Pretty));
        assert!(LogFormat::from_str("xml").is_err());
        assert_eq!(LogFormat::Json.to_string(), "json");
    }
}
