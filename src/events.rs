use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
    Buffering,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressPayload {
    pub position: f64,
    pub duration: f64,
    pub position_fraction: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackChangedPayload {
    pub track_hash: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration: f64,
    pub artwork_url: Option<String>,
    pub codec: Option<String>,
    pub quality: Option<String>,
}

/// State-change notifications broadcast by the engine. UI layers and the
/// presentation-sync fan-out subscribe to these; the engine never waits for
/// a subscriber.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StateChanged(PlaybackState),
    TrackChanged(TrackChangedPayload),
    Progress(ProgressPayload),
    Seeked { position: f64 },
    TrackEnded,
    QueueChanged,
    QueueCleared,
    FavoriteChanged { track_hash: String, favorite: bool },
}

/// Derive a human-friendly quality label from a codec hint.
pub fn quality_label(codec: &str) -> String {
    match codec.to_lowercase().as_str() {
        "flac" | "flac_hires" => "FLAC",
        "aaclc" | "mp4a.40.2" | "mp4a" | "aac" => "AAC",
        "heaacv1" | "mp4a.40.5" => "AAC",
        "mp3" => "MP3",
        "eac3_joc" => "Atmos",
        other => other,
    }
    .to_string()
}
