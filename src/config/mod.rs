//! Configuration for the probe.
//!
//! Sources, later overriding earlier:
//! 1. `ledger-probe.yaml` in the working directory (if present)
//! 2. The file named by [`CONFIG_ENV_VAR`] (if set)
//! 3. Environment variables prefixed with [`CONFIG_ENV_PREFIX`], nested
//!    keys separated by `__` (e.g. `LEDGER_PROBE_EVENTS__TIMEOUT_MS=5000`)

use std::time::Duration;

use serde::Deserialize;

use crate::poll::PollSettings;
use crate::verify::AssertionSettings;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "ledger-probe";
/// Environment variable naming an additional config file.
pub const CONFIG_ENV_VAR: &str = "LEDGER_PROBE_CONFIG";
/// Prefix for environment overrides.
pub const CONFIG_ENV_PREFIX: &str = "LEDGER_PROBE";
/// Environment variable holding the tracing filter.
pub const LOG_ENV_VAR: &str = "LEDGER_PROBE_LOG";

/// Result type for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {field} must be greater than zero")]
    ZeroInterval { field: &'static str },

    #[error("Invalid configuration: {field} ({delay_ms}ms) exceeds {timeout_field} ({timeout_ms}ms)")]
    DelayExceedsTimeout {
        field: &'static str,
        delay_ms: u64,
        timeout_field: &'static str,
        timeout_ms: u64,
    },
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub events: EventConfig,
    pub job_polling: JobPollingConfig,
}

/// Event capture and assertion timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// When false every event assertion passes without looking at the store.
    pub verification_enabled: bool,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_delay_ms: u64,
    /// How long "not raised" assertions watch the store.
    pub not_raised_window_ms: u64,
    /// Pause before an assertion starts polling.
    pub transaction_commit_delay_ms: u64,
    pub listener_startup_timeout_ms: u64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            verification_enabled: true,
            timeout_ms: 30_000,
            poll_interval_ms: 100,
            poll_delay_ms: 0,
            not_raised_window_ms: 2_000,
            transaction_commit_delay_ms: 100,
            listener_startup_timeout_ms: 20_000,
        }
    }
}

impl EventConfig {
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings::new(
            Duration::from_millis(self.timeout_ms),
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_millis(self.poll_delay_ms),
        )
    }

    pub fn assertion_settings(&self) -> AssertionSettings {
        AssertionSettings {
            verification_enabled: self.verification_enabled,
            poll: self.poll_settings(),
            not_raised_window: Duration::from_millis(self.not_raised_window_ms),
            commit_delay: Duration::from_millis(self.transaction_commit_delay_ms),
        }
    }

    pub fn listener_startup_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_startup_timeout_ms)
    }
}

/// Scheduler job and COB catch-up waits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct JobPollingConfig {
    pub timeout_ms: u64,
    pub interval_ms: u64,
    pub delay_ms: u64,
}

impl Default for JobPollingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            interval_ms: 500,
            delay_ms: 200,
        }
    }
}

impl JobPollingConfig {
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings::new(
            Duration::from_millis(self.timeout_ms),
            Duration::from_millis(self.interval_ms),
            Duration::from_millis(self.delay_ms),
        )
    }
}

impl ProbeConfig {
    /// Load and validate configuration from file and environment.
    pub fn load() -> Result<Self> {
        use ::config::{Config, Environment, File, FileFormat};

        let mut builder = Config::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: ProbeConfig = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        tracing::debug!(?config, "Configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let events = &self.events;
        if events.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "events.poll_interval_ms",
            });
        }
        if events.poll_delay_ms > events.timeout_ms {
            return Err(ConfigError::DelayExceedsTimeout {
                field: "events.poll_delay_ms",
                delay_ms: events.poll_delay_ms,
                timeout_field: "events.timeout_ms",
                timeout_ms: events.timeout_ms,
            });
        }

        let jobs = &self.job_polling;
        if jobs.interval_ms == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "job_polling.interval_ms",
            });
        }
        if jobs.delay_ms > jobs.timeout_ms {
            return Err(ConfigError::DelayExceedsTimeout {
                field: "job_polling.delay_ms",
                delay_ms: jobs.delay_ms,
                timeout_field: "job_polling.timeout_ms",
                timeout_ms: jobs.timeout_ms,
            });
        }
        Ok(())
    }
}
