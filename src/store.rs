use crate::audio::queue::RepeatMode;
use crate::config::PlayerConfig;
use crate::error::PlayerResult;
use crate::model::Track;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Durable snapshot of the queue and playback prefs, written on every
/// meaningful state change and read once at startup. Restoring never
/// auto-plays; it only re-establishes queue and current-track identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub tracks: Vec<Track>,
    pub original_order: Vec<Track>,
    pub current_index: Option<usize>,
    pub volume: f32,
    pub shuffle_enabled: bool,
    pub repeat_mode: RepeatMode,
    pub source_tag: String,
}

pub struct QueueStore {
    dir: PathBuf,
}

impl QueueStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn default_location() -> PlayerResult<Self> {
        Ok(Self::new(PlayerConfig::config_dir()?))
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join("queue.json")
    }

    pub fn save(&self, snapshot: &QueueSnapshot) -> PlayerResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(self.snapshot_path(), content)?;
        Ok(())
    }

    /// Returns `None` when no snapshot has ever been written.
    pub fn load(&self) -> PlayerResult<Option<QueueSnapshot>> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let snapshot: QueueSnapshot = serde_json::from_str(&content)?;
        Ok(Some(snapshot))
    }
}
