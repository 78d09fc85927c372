//! Client-side playback engine for a streaming music application.
//!
//! The engine sits between a catalog/UI layer and a host-provided audio
//! sink. It owns the playback queue, a dual-buffer gapless source, the
//! transition scheduler, play-session accounting, and fan-out to external
//! presentation surfaces. Hosts provide the leaf integrations: an
//! [`sink::AudioSink`] for decode/output, a [`fetch::ContentFetcher`] for
//! resolving track content, and optionally a [`fetch::PlaybackLogger`] and
//! [`presentation::PresentationSurface`]s.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod favorites;
pub mod fetch;
pub mod model;
pub mod presentation;
pub mod sink;
pub mod store;

pub use audio::queue::{QueueState, RepeatMode};
pub use config::PlayerConfig;
pub use engine::Engine;
pub use error::{PlayerError, PlayerResult};
pub use events::{EngineEvent, PlaybackState};
pub use model::{PlaybackLogEntry, Track};

/// Initialise logging for host binaries. Defaults to `info`; override with
/// the `RUST_LOG` environment variable.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
