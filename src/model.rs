use serde::{Deserialize, Serialize};

/// Immutable track descriptor handed to the engine by the catalog layer.
/// The engine never mutates a `Track`; it only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Stable content hash uniquely identifying the track.
    pub hash: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: String,
    /// Duration in seconds, from catalog metadata.
    pub duration: f64,
    /// Opaque content locator resolved by the content-retrieval service.
    pub locator: String,
    pub artwork_url: Option<String>,
}

impl Track {
    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }
}

/// A single playback-log ("scrobble") record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackLogEntry {
    pub track_hash: String,
    /// Seconds of uninterrupted playback being reported (the configured
    /// minimum threshold, not total elapsed time).
    pub seconds_played: u64,
    /// Where playback originated (album page, playlist, radio, ...).
    pub source_tag: String,
    pub unix_timestamp: i64,
}
