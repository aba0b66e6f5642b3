//! Telegram transport settings.

use config::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use terabox_relay_core::config::{build_config, RelaySettings};

/// Telegram transport settings loaded from environment variables.
#[derive(Deserialize, Serialize, Clone, Default)]
pub struct TelegramSettings {
    /// Telegram Bot API token.
    #[serde(default, alias = "telegram_token")]
    pub telegram_api_key: String,
}

// The token never shows up in logs.
impl fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("telegram_api_key", &"[TELEGRAM_TOKEN]")
            .finish()
    }
}

impl TelegramSettings {
    /// Create new settings by loading from environment and files.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or no token is configured.
    pub fn new() -> Result<Self, ConfigError> {
        let settings: Self = build_config()?.try_deserialize()?;
        if settings.telegram_api_key.trim().is_empty() {
            return Err(ConfigError::NotFound(
                "TELEGRAM_API_KEY environment variable not set".to_string(),
            ));
        }
        Ok(settings)
    }
}

/// Combined settings used by the Telegram transport layer.
#[derive(Debug, Clone)]
pub struct BotSettings {
    /// Relay pipeline settings.
    pub relay: Arc<RelaySettings>,
    /// Telegram-specific settings.
    pub telegram: Arc<TelegramSettings>,
}

impl BotSettings {
    /// Create a new combined settings bundle.
    #[must_use]
    pub fn new(relay: RelaySettings, telegram: TelegramSettings) -> Self {
        Self {
            relay: Arc::new(relay),
            telegram: Arc::new(telegram),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    // Tests run sequentially to avoid environment variable race conditions
    #[test]
    fn test_token_loading() -> Result<(), Box<dyn std::error::Error>> {
        env::remove_var("TELEGRAM_TOKEN");
        env::set_var("TELEGRAM_API_KEY", "123456:dummy");
        let settings = TelegramSettings::new()?;
        assert_eq!(settings.telegram_api_key, "123456:dummy");
        env::remove_var("TELEGRAM_API_KEY");

        // Alias used by older deployments
        env::set_var("TELEGRAM_TOKEN", "654321:dummy");
        let settings = TelegramSettings::new()?;
        assert_eq!(settings.telegram_api_key, "654321:dummy");
        env::remove_var("TELEGRAM_TOKEN");

        // Missing and empty tokens are both fatal
        assert!(TelegramSettings::new().is_err());
        env::set_var("TELEGRAM_API_KEY", "");
        assert!(TelegramSettings::new().is_err());
        env::remove_var("TELEGRAM_API_KEY");
        Ok(())
    }

    #[test]
    fn test_debug_hides_token() {
        let settings = TelegramSettings {
            telegram_api_key: "123456:secret".to_string(),
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("secret"));
    }
}
