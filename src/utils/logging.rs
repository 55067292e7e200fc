//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` formatter driven by [`LoggingConfig`].
//! `RUST_LOG` takes precedence over the configured level when set.

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Install the global subscriber.
///
/// Fails if a subscriber has already been installed, or if console output
/// is disabled (there is no other sink).
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if !config.log_to_console {
        return Err(ProtocolError::ConfigError(
            "Console logging is the only supported output".to_string(),
        ));
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;

    info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_output_required() {
        let config = LoggingConfig {
            log_to_console: false,
            ..LoggingConfig::default()
        };
        assert!(matches!(
            init_logging(&config),
            Err(ProtocolError::ConfigError(_))
        ));
    }

    #[test]
    fn test_second_install_fails() {
        let config = LoggingConfig {
            log_level: tracing::Level::DEBUG,
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_err());
    }
}
