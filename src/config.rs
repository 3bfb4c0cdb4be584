//! Lockstep configuration types and loading
//!
//! Addresses and the task command come from the CLI; this file carries the
//! tunables (warm-up interval, retry bounds, optional timeouts).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main lockstep configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator-side tunables
    pub coordinator: CoordinatorConfig,

    /// Participant-side tunables
    pub participant: ParticipantConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .lockstep.yml
        let local_config = PathBuf::from(".lockstep.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/lockstep/lockstep.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("lockstep").join("lockstep.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Coordinator-side tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Seconds to wait after launching the task before releasing participants
    #[serde(rename = "warmup-secs")]
    pub warmup_secs: u64,

    /// Release send retries beyond the first attempt, per participant
    #[serde(rename = "release-max-retries")]
    pub release_max_retries: u32,

    /// Overall deadline for all participants to report ready; absent = wait forever
    #[serde(rename = "readiness-timeout-secs")]
    pub readiness_timeout_secs: Option<u64>,

    /// Channel buffer size for barrier requests
    #[serde(rename = "channel-buffer")]
    pub channel_buffer: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            warmup_secs: 30,
            release_max_retries: 5,
            readiness_timeout_secs: None,
            channel_buffer: 64,
        }
    }
}

impl CoordinatorConfig {
    /// The warm-up interval as a Duration
    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }

    /// The readiness deadline, if one is configured
    pub fn readiness_timeout(&self) -> Option<Duration> {
        self.readiness_timeout_secs.map(Duration::from_secs)
    }
}

/// Participant-side tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    /// Bind retries beyond the first attempt for the local release port
    #[serde(rename = "bind-max-retries")]
    pub bind_max_retries: u32,

    /// Connect/send retries beyond the first attempt for the ready signal
    #[serde(rename = "connect-max-retries")]
    pub connect_max_retries: u32,

    /// Delay between retry attempts, in seconds
    #[serde(rename = "retry-delay-secs")]
    pub retry_delay_secs: u64,

    /// Overall deadline for the release signal; absent = wait forever
    #[serde(rename = "release-timeout-secs")]
    pub release_timeout_secs: Option<u64>,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            bind_max_retries: 5,
            connect_max_retries: 5,
            retry_delay_secs: 5,
            release_timeout_secs: None,
        }
    }
}

impl ParticipantConfig {
    /// The retry delay as a Duration
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// The release deadline, if one is configured
    pub fn release_timeout(&self) -> Option<Duration> {
        self.release_timeout_secs.map(Duration::from_secs)
    }
}
