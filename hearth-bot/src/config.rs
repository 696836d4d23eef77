//! Bot configuration.
//!
//! Process flags come from the command line / environment (see `main.rs`).
//! Everything about community layout (role names, channel names, windows)
//! lives in a TOML settings file; every key is optional.
//!
//! ```toml
//! prefix = "!"
//!
//! [voice]
//! parent_category = "Voice Channels"
//! general_channel = "General"
//! rate_limit_secs = 300
//! empty_timeout_secs = 300
//!
//! [streams]
//! live_role = "Live"
//! streamer_role = "Streamers"
//! announce_channel = "streams"
//! host_channel = "ourcommunity"
//! throttle_secs = 300
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("can't read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("bad settings file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Top-level settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Chat command prefix.
    pub prefix: String,
    pub voice: VoiceSettings,
    pub streams: StreamSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            prefix: "!".to_string(),
            voice: VoiceSettings::default(),
            streams: StreamSettings::default(),
        }
    }
}

/// Ephemeral voice channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    /// Category new channels are created under.
    pub parent_category: String,
    /// Channel that is never reclaimed, matched case-insensitively.
    pub general_channel: String,
    /// Only reclaim channels under `parent_category`.
    pub restrict_to_category: bool,
    /// How long a creator waits between provisions.
    pub rate_limit_secs: u64,
    /// How long a channel may sit empty before it is deleted.
    pub empty_timeout_secs: u64,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            parent_category: "Voice Channels".to_string(),
            general_channel: "General".to_string(),
            restrict_to_category: false,
            rate_limit_secs: 300,
            empty_timeout_secs: 300,
        }
    }
}

impl VoiceSettings {
    pub fn rate_limit(&self) -> Duration {
        Duration::from_secs(self.rate_limit_secs)
    }

    pub fn empty_timeout(&self) -> Duration {
        Duration::from_secs(self.empty_timeout_secs)
    }
}

/// Live streamer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Role held while a member is live.
    pub live_role: String,
    /// Role marking a member as a community streamer; never revoked.
    pub streamer_role: String,
    /// Text channel "went live" announcements go to.
    pub announce_channel: String,
    /// Our own streaming-platform channel that hosts the featured streamer.
    /// No host calls are made when unset.
    pub host_channel: Option<String>,
    /// Minimum time between two announcements for the same member.
    pub throttle_secs: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            live_role: "Live".to_string(),
            streamer_role: "Streamers".to_string(),
            announce_channel: "streams".to_string(),
            host_channel: None,
            throttle_secs: 300,
        }
    }
}

impl StreamSettings {
    pub fn throttle(&self) -> Duration {
        Duration::from_secs(self.throttle_secs)
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() {
            return Err(ConfigError::Invalid("prefix must not be empty".into()));
        }
        if self.voice.parent_category.trim().is_empty() {
            return Err(ConfigError::Invalid("voice.parent_category must not be empty".into()));
        }
        if self.streams.live_role == self.streams.streamer_role {
            return Err(ConfigError::Invalid(
                "streams.live_role and streams.streamer_role must differ".into(),
            ));
        }
        Ok(())
    }
}
