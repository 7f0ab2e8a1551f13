use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{OneVoiceError, Result};
use crate::retry::RetryPolicy;

/// Environment variable that overrides `api.base_url`
pub const BASE_URL_ENV: &str = "ONEVOICE_API_BASE_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub polling: PollingConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Root URL of the processing service
    pub base_url: String,
    /// Timeout for status and feedback requests
    pub request_timeout_secs: u64,
    /// Timeout for video uploads and artifact downloads
    pub transfer_timeout_secs: u64,
    /// User agent sent with every request
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between a status response and the next poll
    pub interval_ms: u64,
    /// Consecutive transient poll failures tolerated before giving up
    pub max_network_retries: u32,
    /// Backoff before the first retry of a failed poll
    pub retry_base_delay_ms: u64,
    /// Backoff growth per consecutive failure
    pub retry_multiplier: f64,
    /// Upper bound on any single backoff
    pub retry_max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory that finished videos are written to
    pub directory: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            request_timeout_secs: 30,
            transfer_timeout_secs: 600,
            user_agent: concat!("onevoice/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            max_network_retries: 3,
            retry_base_delay_ms: 1000,
            retry_multiplier: 2.0,
            retry_max_delay_ms: 15_000,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            multiplier: self.retry_multiplier,
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OneVoiceError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| OneVoiceError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| OneVoiceError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| OneVoiceError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Apply overrides taken from the environment.
    pub fn apply_env(&mut self) {
        self.apply_base_url_override(std::env::var(BASE_URL_ENV).ok());
    }

    fn apply_base_url_override(&mut self, value: Option<String>) {
        if let Some(url) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            self.api.base_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.api.base_url)
            .map_err(|e| OneVoiceError::Config(format!("Invalid api.base_url '{}': {}", self.api.base_url, e)))?;

        if self.api.request_timeout_secs == 0 || self.api.transfer_timeout_secs == 0 {
            return Err(OneVoiceError::Config("API timeouts must be greater than zero".to_string()));
        }
        if self.polling.interval_ms == 0 {
            return Err(OneVoiceError::Config("polling.interval_ms must be greater than zero".to_string()));
        }
        if !(self.polling.retry_multiplier >= 1.0 && self.polling.retry_multiplier.is_finite()) {
            return Err(OneVoiceError::Config(format!(
                "polling.retry_multiplier must be at least 1.0, got {}",
                self.polling.retry_multiplier
            )));
        }
        if self.polling.retry_max_delay_ms < self.polling.retry_base_delay_ms {
            return Err(OneVoiceError::Config(
                "polling.retry_max_delay_ms must not be below polling.retry_base_delay_ms".to_string(),
            ));
        }

        Ok(())
    }
}
