//! Cross-component favorite-status broadcast. Catalog views register as
//! listeners at startup; the engine announces favorite toggles through the
//! bus instead of reaching into other modules. Targets are best-effort and
//! isolated from each other.

use crate::error::PlayerResult;
use std::sync::Arc;

pub trait FavoriteListener: Send + Sync {
    fn name(&self) -> &str;
    fn favorite_changed(&self, track_hash: &str, favorite: bool) -> PlayerResult<()>;
}

#[derive(Default, Clone)]
pub struct FavoriteBroadcast {
    listeners: Vec<Arc<dyn FavoriteListener>>,
}

impl FavoriteBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn FavoriteListener>) {
        self.listeners.push(listener);
    }

    pub fn broadcast(&self, track_hash: &str, favorite: bool) {
        for listener in &self.listeners {
            if let Err(e) = listener.favorite_changed(track_hash, favorite) {
                log::warn!(
                    "favorites: listener '{}' failed for {track_hash}: {e}",
                    listener.name()
                );
            }
        }
    }
}
