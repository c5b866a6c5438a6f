use socketio_client::ChannelConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub backend_url: String,
    pub health_check_interval: Duration,
    pub health_check_timeout: Duration,
    pub reconnect_delay: Duration,
    pub ping_timeout: Duration,
    pub voice_locale: String,
    pub greetings_path: Option<PathBuf>,
    pub greeting_template: String,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let backend_url = std::env::var("BACKEND_HOST_URL")
            .unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());
        let backend_url = validate_backend_url(&backend_url)
            .map_err(|reason| ConfigError::InvalidValue("BACKEND_HOST_URL".to_string(), reason))?;

        let health_check_interval =
            Duration::from_secs(parse_var("HEALTH_CHECK_INTERVAL_SECS", 3600)?);
        let health_check_timeout = Duration::from_secs(parse_var("HEALTH_CHECK_TIMEOUT_SECS", 10)?);
        let reconnect_delay = Duration::from_millis(parse_var("RECONNECT_DELAY_MS", 1000)?);
        let ping_timeout = Duration::from_secs(parse_var("PING_TIMEOUT_SECS", 86_400)?);

        if health_check_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "HEALTH_CHECK_INTERVAL_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let voice_locale = std::env::var("VOICE_LOCALE").unwrap_or_else(|_| "en-IN".to_string());

        let greetings_path = std::env::var("GREETINGS_PATH").ok().map(PathBuf::from);
        let greeting_template = std::env::var("GREETING_TEMPLATE")
            .unwrap_or_else(|_| facewatch_core::announce::DEFAULT_TEMPLATE.to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            backend_url,
            health_check_interval,
            health_check_timeout,
            reconnect_delay,
            ping_timeout,
            voice_locale,
            greetings_path,
            greeting_template,
            log_level,
        })
    }

    /// Push-channel settings derived from this configuration.
    pub fn channel_config(&self) -> ChannelConfig {
        let mut channel = ChannelConfig::new(self.backend_url.clone());
        channel.reconnect_delay = self.reconnect_delay;
        channel.ping_timeout = self.ping_timeout;
        channel
    }
}

/// Checks that `url` is an absolute http(s) URL and strips trailing slashes.
pub fn validate_backend_url(url: &str) -> Result<String, String> {
    let trimmed = url.trim().trim_end_matches('/');
    let host = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .ok_or_else(|| format!("'{}' is not an http(s) URL", url))?;
    if host.is_empty() {
        return Err(format!("'{}' has no host", url));
    }
    Ok(trimmed.to_string())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
