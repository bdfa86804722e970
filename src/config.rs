//! Runtime settings, loaded from an optional TOML file.
//!
//! Every field has a default, so an empty file (or no file) is a valid configuration.

use crate::error::{CheckoutError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const MAX_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub periods: PeriodSettings,
    pub checkout: CheckoutSettings,
    pub processor: ProcessorSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodSettings {
    /// Resolution tick.
    pub poll_interval_secs: u64,
    pub transition_warning_secs: u64,
}

impl Default for PeriodSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            transition_warning_secs: 3600,
        }
    }
}

impl PeriodSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn warning_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.transition_warning_secs as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckoutSettings {
    pub create_timeout_secs: u64,
    pub capture_timeout_secs: u64,
    pub create_retry_attempts: u32,
    /// First backoff delay; doubles on every retry.
    pub retry_backoff_ms: u64,
    /// How long a concurrent capture waits for the in-flight one to settle.
    pub settle_wait_ms: u64,
    pub settle_poll_ms: u64,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            create_timeout_secs: 20,
            capture_timeout_secs: 30,
            create_retry_attempts: 3,
            retry_backoff_ms: 250,
            settle_wait_ms: 5000,
            settle_poll_ms: 50,
        }
    }
}

impl CheckoutSettings {
    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.create_timeout_secs)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn settle_wait(&self) -> Duration {
        Duration::from_millis(self.settle_wait_ms)
    }

    pub fn settle_poll(&self) -> Duration {
        Duration::from_millis(self.settle_poll_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    /// Orders API of the payment processor. Without it the sandbox processor is used.
    pub base_url: Option<String>,
    pub access_token: Option<String>,
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.periods.poll_interval_secs == 0 {
            return Err(invalid("periods.poll_interval_secs must be positive"));
        }
        for (name, secs) in [
            ("checkout.create_timeout_secs", self.checkout.create_timeout_secs),
            ("checkout.capture_timeout_secs", self.checkout.capture_timeout_secs),
        ] {
            if !(1..=MAX_TIMEOUT_SECS).contains(&secs) {
                return Err(invalid(&format!(
                    "{name} must be between 1 and {MAX_TIMEOUT_SECS} seconds"
                )));
            }
        }
        if self.checkout.create_retry_attempts == 0 {
            return Err(invalid("checkout.create_retry_attempts must be at least 1"));
        }
        if self.checkout.settle_poll_ms == 0 {
            return Err(invalid("checkout.settle_poll_ms must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> CheckoutError {
    CheckoutError::Configuration(message.to_string())
}
