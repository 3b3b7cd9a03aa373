//! Configuration management

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionQuality {
    Fast,
    #[default]
    Normal,
    Slow,
    VerySlow,
    Custom,
}

impl ConnectionQuality {
    pub fn buffer_seconds(&self, custom: u32) -> u32 {
        match self {
            ConnectionQuality::Fast => 2,
            ConnectionQuality::Normal => 5,
            ConnectionQuality::Slow => 15,
            ConnectionQuality::VerySlow => 30,
            ConnectionQuality::Custom => custom,
        }
    }

    pub fn is_slow(&self) -> bool {
        matches!(self, ConnectionQuality::Slow | ConnectionQuality::VerySlow)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Start playback as soon as the stream is ready
    #[serde(default = "default_true")]
    pub autoplay: bool,
    /// Stored positions at or below this are treated as the start
    #[serde(default = "default_resume_threshold")]
    pub resume_threshold_secs: u64,
    /// Minimum gap between persisted position writes
    #[serde(default = "default_save_interval")]
    pub position_save_interval_secs: u64,
    /// Remaining time at which the next-episode countdown starts
    #[serde(default = "default_next_episode_threshold")]
    pub next_episode_threshold_secs: u64,
    #[serde(default = "default_countdown")]
    pub next_episode_countdown_secs: u64,
    #[serde(default = "default_epg_refresh")]
    pub epg_refresh_interval_secs: u64,
    /// Hours to subtract from "now" before matching guide entries
    #[serde(default)]
    pub epg_time_offset: f32,
    /// Consecutive recoverable faults tolerated before giving up
    #[serde(default = "default_recovery_limit")]
    pub recovery_attempt_limit: u32,
    #[serde(default)]
    pub connection_quality: ConnectionQuality,
    #[serde(default = "default_buffer")]
    pub buffer_seconds: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub external_player: String,
    #[serde(default = "default_true")]
    pub hw_accel: bool,
}

fn default_true() -> bool { true }
fn default_resume_threshold() -> u64 { 30 }
fn default_save_interval() -> u64 { 5 }
fn default_next_episode_threshold() -> u64 { 30 }
fn default_countdown() -> u64 { 10 }
fn default_epg_refresh() -> u64 { 300 }
fn default_recovery_limit() -> u32 { 3 }
fn default_buffer() -> u32 { 5 }
fn default_user_agent() -> String { "XtremeIPTV/1.0".to_string() }

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            autoplay: true,
            resume_threshold_secs: 30,
            position_save_interval_secs: 5,
            next_episode_threshold_secs: 30,
            next_episode_countdown_secs: 10,
            epg_refresh_interval_secs: 300,
            epg_time_offset: 0.0,
            recovery_attempt_limit: 3,
            connection_quality: ConnectionQuality::Normal,
            buffer_seconds: 5,
            user_agent: default_user_agent(),
            external_player: String::new(),
            hw_accel: true,
        }
    }
}

impl PlayerConfig {
    /// `<config dir>/xtreme_iptv/<file>`, creating the directory
    pub fn config_dir_file(file: &str) -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("xtreme_iptv");
        fs::create_dir_all(&path).ok();
        path.push(file);
        path
    }

    fn config_path() -> PathBuf {
        Self::config_dir_file("player.json")
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        Self::load_from(&Self::config_path()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.position_save_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval("position_save_interval_secs"));
        }
        if self.epg_refresh_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval("epg_refresh_interval_secs"));
        }
        if self.next_episode_countdown_secs == 0 {
            return Err(ConfigError::ZeroInterval("next_episode_countdown_secs"));
        }
        Ok(())
    }

    pub fn effective_buffer(&self) -> u32 {
        self.connection_quality.buffer_seconds(self.buffer_seconds)
    }

    pub fn position_save_interval(&self) -> Duration {
        Duration::from_secs(self.position_save_interval_secs)
    }

    /// EPG offset in whole seconds
    pub fn epg_offset_secs(&self) -> i64 {
        (self.epg_time_offset * 3600.0) as i64
    }
}
