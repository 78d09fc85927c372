use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    /// A newer load or play command arrived while this one was in flight.
    /// Expected during rapid track switching; callers swallow it.
    #[error("Operation superseded by a newer command")]
    Superseded,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Serialize for PlayerError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("PlayerError", 2)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

impl PlayerError {
    pub fn kind(&self) -> &str {
        match self {
            PlayerError::Http(_) => "http",
            PlayerError::Json(_) => "json",
            PlayerError::Audio(_) => "audio",
            PlayerError::Decode(_) => "decode",
            PlayerError::Fetch(_) => "fetch",
            PlayerError::Superseded => "superseded",
            PlayerError::Config(_) => "config",
            PlayerError::NotFound(_) => "not_found",
            PlayerError::Io(_) => "io",
        }
    }

    /// Only failures that change whether audio is audible should reach the
    /// UI layer; everything else stays internal.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            PlayerError::Http(_)
                | PlayerError::Fetch(_)
                | PlayerError::Decode(_)
                | PlayerError::Audio(_)
        )
    }
}

pub type PlayerResult<T> = Result<T, PlayerError>;
