//! Configuration for the assignment engine.

use std::path::Path;

use serde::{Deserialize, Serialize};

use guild_core::{Error, MAX_REPUTATION, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildConfig {
    /// Reputation scoring parameters.
    #[serde(default)]
    pub reputation: ReputationConfig,

    /// Record store behaviour.
    #[serde(default)]
    pub store: StoreConfig,

    /// Notification bus settings.
    #[serde(default)]
    pub events: EventsConfig,
}

impl GuildConfig {
    /// Create a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the document does not parse or fails
    /// validation.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::FileAccess` if the file exists but cannot be read, or
    /// `Error::Config` if its content is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::file_access(path, e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.reputation.validate()?;

        if self.store.lock_timeout_ms == 0 {
            return Err(Error::config("store.lock_timeout_ms must be greater than 0"));
        }

        if self.events.channel_capacity == 0 {
            return Err(Error::config("events.channel_capacity must be greater than 0"));
        }

        Ok(())
    }
}

/// Reputation scoring parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// Reputation of an agent seen for the first time.
    #[serde(default = "default_initial")]
    pub initial: u32,

    /// Added on a successful completion.
    #[serde(default = "default_success_reward")]
    pub success_reward: u32,

    /// Subtracted on a failure.
    #[serde(default = "default_failure_penalty")]
    pub failure_penalty: u32,

    /// Upper bound.
    #[serde(default = "default_ceiling")]
    pub ceiling: u32,

    /// Lower bound.
    #[serde(default = "default_floor")]
    pub floor: u32,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            initial: default_initial(),
            success_reward: default_success_reward(),
            failure_penalty: default_failure_penalty(),
            ceiling: default_ceiling(),
            floor: default_floor(),
        }
    }
}

impl ReputationConfig {
    /// Validate the bounds.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` unless `floor <= initial <= ceiling <= 100`.
    pub fn validate(&self) -> Result<()> {
        if self.ceiling > MAX_REPUTATION {
            return Err(Error::config(format!(
                "reputation.ceiling must be at most {MAX_REPUTATION}"
            )));
        }
        if self.floor > self.ceiling {
            return Err(Error::config("reputation.floor must not exceed reputation.ceiling"));
        }
        if self.initial < self.floor || self.initial > self.ceiling {
            return Err(Error::config(
                "reputation.initial must lie between reputation.floor and reputation.ceiling",
            ));
        }
        Ok(())
    }
}

/// Data directory behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long a command waits for another command's lock on the data
    /// directory before giving up.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Lock wait as a duration.
    #[must_use]
    pub const fn lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Notification bus settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Broadcast buffer size.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

const fn default_initial() -> u32 {
    100
}

const fn default_success_reward() -> u32 {
    5
}

const fn default_failure_penalty() -> u32 {
    10
}

const fn default_ceiling() -> u32 {
    MAX_REPUTATION
}

const fn default_floor() -> u32 {
    0
}

const fn default_lock_timeout_ms() -> u64 {
    5_000
}

const fn default_channel_capacity() -> usize {
    1024
}
