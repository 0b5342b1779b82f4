//! Configuration types.
//!
//! Everything comes from environment variables. The builders take a lookup
//! function so they can be exercised without touching the process env.

use std::time::Duration;

use crate::channels::discord::DiscordConfig;
use crate::channels::reddit::RedditConfig;
use crate::chat::ChatWorkerConfig;
use crate::error::ConfigError;
use crate::relay::RelayFilter;
use crate::relay::filter::DEFAULT_KEYWORD;

/// Variable lookup used by the config builders.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Top-level relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub reddit: RedditConfig,
    pub discord: DiscordConfig,
    /// Substring that marks forum content for relay.
    pub keyword: String,
    /// Period of the chat side's relay task.
    pub relay_interval: Duration,
    /// Pause between forum worker iterations.
    pub forum_pause: Duration,
}

impl RelayConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let keyword = optional(lookup, "RELAY_KEYWORD").unwrap_or_else(|| DEFAULT_KEYWORD.into());
        // Validate early so a bad keyword fails at startup.
        RelayFilter::new(keyword.clone())?;

        Ok(Self {
            reddit: RedditConfig::from_lookup(lookup)?,
            discord: DiscordConfig::from_lookup(lookup)?,
            keyword,
            relay_interval: seconds(lookup, "RELAY_INTERVAL_SECS", 5)?,
            forum_pause: seconds(lookup, "FORUM_POLL_PAUSE_SECS", 2)?,
        })
    }

    pub fn relay_filter(&self) -> Result<RelayFilter, ConfigError> {
        RelayFilter::new(self.keyword.clone())
    }

    pub fn chat_worker_config(&self) -> ChatWorkerConfig {
        ChatWorkerConfig {
            prefix: self.discord.prefix.clone(),
            default_channel_id: self.discord.default_channel_id.clone(),
            relay_interval: self.relay_interval,
            ..ChatWorkerConfig::default()
        }
    }
}

/// A variable that must be present and non-empty.
pub(crate) fn required(lookup: Lookup<'_>, key: &str) -> Result<String, ConfigError> {
    optional(lookup, key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// A variable that may be absent; blank values count as absent.
pub(crate) fn optional(lookup: Lookup<'_>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// A whole number of seconds, with a default.
pub(crate) fn seconds(lookup: Lookup<'_>, key: &str, default: u64) -> Result<Duration, ConfigError> {
    let Some(raw) = optional(lookup, key) else {
        return Ok(Duration::from_secs(default));
    };
    let secs: u64 = raw.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?} is not a number of seconds: {e}"),
    })?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1 second".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}
