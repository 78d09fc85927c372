//! Best-effort forwarding of playback state to external presentation
//! surfaces: the OS media session, desktop window transport controls, and a
//! remote rich-presence service. Dispatch runs on its own task off the
//! transport command path; one surface failing never blocks the others.

use crate::error::PlayerResult;
use crate::events::{EngineEvent, PlaybackState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Transport actions a surface can send back into the engine (media-key
/// callbacks, window buttons). Drained by the engine tick loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportCommand {
    Play,
    Pause,
    Toggle,
    Next,
    Previous,
    Seek(f64),
}

/// Snapshot of what's playing, suitable for media-session metadata or a
/// rich-presence payload.
#[derive(Debug, Clone)]
pub struct NowPlayingInfo {
    pub track_hash: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration: f64,
    pub position: f64,
    pub paused: bool,
    pub artwork_url: Option<String>,
}

#[derive(Debug, Clone)]
pub enum PresentationUpdate {
    NowPlaying(NowPlayingInfo),
    Position {
        position: f64,
        duration: f64,
        paused: bool,
    },
    Cleared,
}

/// One external surface. Implementations must not block; slow I/O belongs
/// inside the implementation's own task.
pub trait PresentationSurface: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, update: &PresentationUpdate) -> PlayerResult<()>;
}

/// Fan-out task: subscribes to engine events, tracks current metadata, and
/// forwards updates to every registered surface independently.
pub struct PresentationSync {
    surfaces: Vec<Arc<dyn PresentationSurface>>,
    /// Minimum interval between forwarded position updates.
    position_throttle: Duration,
}

impl PresentationSync {
    pub fn new(surfaces: Vec<Arc<dyn PresentationSurface>>) -> Self {
        Self {
            surfaces,
            position_throttle: Duration::from_secs(1),
        }
    }

    pub fn spawn(self, mut events: broadcast::Receiver<EngineEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut current: Option<NowPlayingInfo> = None;
            let mut last_position_push = Instant::now() - self.position_throttle;

            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::debug!("presentation: lagged, skipped {skipped} events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let update = match event {
                    EngineEvent::TrackChanged(payload) => {
                        let info = NowPlayingInfo {
                            track_hash: payload.track_hash,
                            title: payload.title,
                            artist: payload.artist,
                            album: payload.album,
                            duration: payload.duration,
                            position: 0.0,
                            paused: false,
                            artwork_url: payload.artwork_url,
                        };
                        current = Some(info.clone());
                        Some(PresentationUpdate::NowPlaying(info))
                    }
                    EngineEvent::StateChanged(state) => match state {
                        PlaybackState::Stopped => {
                            current = None;
                            Some(PresentationUpdate::Cleared)
                        }
                        PlaybackState::Playing | PlaybackState::Paused => {
                            current.as_mut().map(|info| {
                                info.paused = state == PlaybackState::Paused;
                                PresentationUpdate::NowPlaying(info.clone())
                            })
                        }
                        PlaybackState::Buffering => None,
                    },
                    EngineEvent::Seeked { position } => current.as_mut().map(|info| {
                        info.position = position;
                        PresentationUpdate::NowPlaying(info.clone())
                    }),
                    EngineEvent::Progress(progress) => {
                        if last_position_push.elapsed() < self.position_throttle {
                            None
                        } else {
                            last_position_push = Instant::now();
                            if let Some(info) = current.as_mut() {
                                info.position = progress.position;
                            }
                            Some(PresentationUpdate::Position {
                                position: progress.position,
                                duration: progress.duration,
                                paused: current.as_ref().map(|i| i.paused).unwrap_or(false),
                            })
                        }
                    }
                    EngineEvent::QueueCleared => {
                        current = None;
                        Some(PresentationUpdate::Cleared)
                    }
                    EngineEvent::TrackEnded
                    | EngineEvent::QueueChanged
                    | EngineEvent::FavoriteChanged { .. } => None,
                };

                if let Some(update) = update {
                    self.dispatch(&update);
                }
            }
        })
    }

    fn dispatch(&self, update: &PresentationUpdate) {
        for surface in &self.surfaces {
            if let Err(e) = surface.apply(update) {
                log::warn!("presentation: surface '{}' failed: {e}", surface.name());
            }
        }
    }
}
