//! Player Configuration
//!
//! Queue depth and the bounded waits of every playback thread. Loaded from a
//! JSON file; any missing field falls back to its default.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame_queue::DEFAULT_CAPACITY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Depth of both the video and the audio queue
    pub queue_capacity: usize,
    /// Render thread wait for a frame before skipping the tick
    pub video_pop_timeout_ms: u64,
    /// Audio callback wait for a chunk before substituting silence
    pub audio_pop_timeout_ms: u64,
    /// Sleep of an idle (paused) background loop
    pub idle_poll_ms: u64,
    /// How often a blocked buffering push re-checks for shutdown
    pub push_poll_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_CAPACITY,
            video_pop_timeout_ms: 100,
            audio_pop_timeout_ms: 100,
            idle_poll_ms: 5,
            push_poll_ms: 20,
        }
    }
}

impl PlayerConfig {
    /// Load and validate a JSON config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".into()));
        }
        for (name, value) in [
            ("video_pop_timeout_ms", self.video_pop_timeout_ms),
            ("audio_pop_timeout_ms", self.audio_pop_timeout_ms),
            ("push_poll_ms", self.push_poll_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }

    pub fn video_pop_timeout(&self) -> Duration {
        Duration::from_millis(self.video_pop_timeout_ms)
    }

    pub fn audio_pop_timeout(&self) -> Duration {
        Duration::from_millis(self.audio_pop_timeout_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn push_poll(&self) -> Duration {
        Duration::from_millis(self.push_poll_ms)
    }
}
