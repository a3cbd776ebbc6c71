//! Process-level logging setup shared by both binaries

use eyre::Result;
use tracing::{debug, info};

/// Parse a log level name, returning None for unknown names
pub fn parse_level(s: &str) -> Option<tracing::Level> {
    match s.to_uppercase().as_str() {
        "TRACE" => Some(tracing::Level::TRACE),
        "DEBUG" => Some(tracing::Level::DEBUG),
        "INFO" => Some(tracing::Level::INFO),
        "WARN" | "WARNING" => Some(tracing::Level::WARN),
        "ERROR" => Some(tracing::Level::ERROR),
        _ => None,
    }
}

/// Install the global subscriber writing to stderr
///
/// Level priority: CLI `--log-level` > config file > INFO. `RUST_LOG` directives
/// are honoured on top of the chosen level.
pub fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => parse_level(s).unwrap_or_else(|| {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            tracing::Level::INFO
        }),
        None => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install log subscriber: {e}"))?;

    info!("Logging initialized (level: {:?})", level);
    debug!(?cli_log_level, ?config_log_level, "setup_logging: sources");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Some(tracing::Level::DEBUG));
        assert_eq!(parse_level("WARNING"), Some(tracing::Level::WARN));
        assert_eq!(parse_level("Error"), Some(tracing::Level::ERROR));
        assert_eq!(parse_level("loud"), None);
    }
}
