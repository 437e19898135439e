//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Service configuration, read from `RANDOM_COFFEE_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Telegram bot token. The bot is disabled when unset.
    pub bot_token: Option<SecretString>,
    /// Community name shown in prompts.
    pub community: String,
    pub db_path: PathBuf,
    pub api_port: u16,
    /// Bearer token for the admin API. The API is disabled when unset.
    pub api_token: Option<SecretString>,
    /// Pause between participants in bulk deliveries.
    pub delivery_pause: Duration,
    pub schedule: ScheduleConfig,
}

/// Cron expressions for the weekly jobs. Each job is off when unset.
#[derive(Debug, Clone, Default)]
pub struct ScheduleConfig {
    pub invite: Option<cron::Schedule>,
    pub broadcast: Option<cron::Schedule>,
    pub feedback: Option<cron::Schedule>,
    pub tick: Duration,
}

impl ScheduleConfig {
    pub fn is_empty(&self) -> bool {
        self.invite.is_none() && self.broadcast.is_none() && self.feedback.is_none()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            community: "Random Coffee".to_string(),
            db_path: PathBuf::from("./data/random-coffee.db"),
            api_port: 8080,
            api_token: None,
            delivery_pause: Duration::from_millis(2000),
            schedule: ScheduleConfig {
                tick: Duration::from_secs(60),
                ..ScheduleConfig::default()
            },
        }
    }
}

impl AppConfig {
    /// Build config from environment variables.
    ///
    /// Unparseable numbers fall back to their defaults; a malformed cron
    /// expression is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let secret = |key: &str| {
            var(key)
                .filter(|s| !s.trim().is_empty())
                .map(SecretString::from)
        };
        let cron = |key: &str| -> Result<Option<cron::Schedule>, ConfigError> {
            match var(key).filter(|s| !s.trim().is_empty()) {
                None => Ok(None),
                Some(expr) => cron::Schedule::from_str(expr.trim()).map(Some).map_err(|e| {
                    ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: format!("invalid cron: {e}"),
                    }
                }),
            }
        };

        let api_port: u16 = var("RANDOM_COFFEE_API_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.api_port);

        let delivery_pause = var("RANDOM_COFFEE_DELIVERY_PAUSE_MS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.delivery_pause);

        let tick = var("RANDOM_COFFEE_SCHEDULER_TICK_SECS")
            .and_then(|s| s.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.schedule.tick);

        Ok(Self {
            bot_token: secret("RANDOM_COFFEE_BOT_TOKEN"),
            community: var("RANDOM_COFFEE_COMMUNITY").unwrap_or(defaults.community),
            db_path: var("RANDOM_COFFEE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            api_port,
            api_token: secret("RANDOM_COFFEE_API_TOKEN"),
            delivery_pause,
            schedule: ScheduleConfig {
                invite: cron("RANDOM_COFFEE_INVITE_CRON")?,
                broadcast: cron("RANDOM_COFFEE_BROADCAST_CRON")?,
                feedback: cron("RANDOM_COFFEE_FEEDBACK_CRON")?,
                tick,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert!(config.bot_token.is_none());
        assert!(config.api_token.is_none());
        assert_eq!(config.community, "Random Coffee");
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.delivery_pause, Duration::from_secs(2));
        assert_eq!(config.schedule.tick, Duration::from_secs(60));
        assert!(config.schedule.is_empty());
    }

    #[test]
    fn reads_values() {
        let config = load(&[
            ("RANDOM_COFFEE_BOT_TOKEN", "123:abc"),
            ("RANDOM_COFFEE_COMMUNITY", "Hub"),
            ("RANDOM_COFFEE_API_PORT", "9000"),
            ("RANDOM_COFFEE_DELIVERY_PAUSE_MS", "0"),
            ("RANDOM_COFFEE_INVITE_CRON", "0 0 12 * * Fri *"),
        ])
        .unwrap();
        assert_eq!(config.bot_token.unwrap().expose_secret(), "123:abc");
        assert_eq!(config.community, "Hub");
        assert_eq!(config.api_port, 9000);
        assert!(config.delivery_pause.is_zero());
        assert!(config.schedule.invite.is_some());
        assert!(config.schedule.broadcast.is_none());
    }

    #[test]
    fn bad_numbers_fall_back() {
        let config = load(&[
            ("RANDOM_COFFEE_API_PORT", "http"),
            ("RANDOM_COFFEE_SCHEDULER_TICK_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.schedule.tick, Duration::from_secs(60));
    }

    #[test]
    fn bad_cron_is_rejected() {
        let err = load(&[("RANDOM_COFFEE_FEEDBACK_CRON", "every monday")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "RANDOM_COFFEE_FEEDBACK_CRON"));
    }
}
