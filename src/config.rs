use crate::error::{PlayerError, PlayerResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub muted: bool,
    /// When enabled, the next track is preloaded into the standby sink and
    /// switched in before the active track ends.
    #[serde(default = "default_gapless")]
    pub gapless_enabled: bool,
    /// Remaining-time threshold (seconds) below which preloading begins.
    #[serde(default = "default_lookahead")]
    pub lookahead_secs: f64,
    /// How long before the natural end of the active track the switch fires.
    #[serde(default = "default_safety_margin")]
    pub safety_margin_ms: u64,
    #[serde(default)]
    pub crossfade_enabled: bool,
    #[serde(default = "default_crossfade")]
    pub crossfade_secs: f64,
    /// Minimum uninterrupted play time (seconds) before a playback-log
    /// event is emitted.
    #[serde(default = "default_scrobble_threshold")]
    pub scrobble_threshold_secs: f64,
    /// Tag identifying where playback originated, forwarded with every
    /// playback-log event and queue snapshot.
    #[serde(default = "default_source_tag")]
    pub source_tag: String,
}

fn default_volume() -> f32 {
    1.0
}

fn default_gapless() -> bool {
    true
}

fn default_lookahead() -> f64 {
    30.0
}

fn default_safety_margin() -> u64 {
    100
}

fn default_crossfade() -> f64 {
    1.0
}

fn default_scrobble_threshold() -> f64 {
    30.0
}

fn default_source_tag() -> String {
    "player".to_string()
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            muted: false,
            gapless_enabled: default_gapless(),
            lookahead_secs: default_lookahead(),
            safety_margin_ms: default_safety_margin(),
            crossfade_enabled: false,
            crossfade_secs: default_crossfade(),
            scrobble_threshold_secs: default_scrobble_threshold(),
            source_tag: default_source_tag(),
        }
    }
}

impl PlayerConfig {
    pub fn config_dir() -> PlayerResult<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| PlayerError::Config("Cannot find home directory".into()))?;
        Ok(home.join(".wavecrest"))
    }

    pub fn config_path() -> PlayerResult<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    pub fn load() -> PlayerResult<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Err(PlayerError::Config("Config file not found".into()));
        }
        let content = std::fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> PlayerResult<()> {
        let dir = Self::config_dir()?;
        std::fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::config_path()?, content)?;
        Ok(())
    }

    /// Volume to apply at startup: muted overrides the stored level.
    pub fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }
}
