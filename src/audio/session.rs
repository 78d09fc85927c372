//! Play-session accounting: decides when a track counts as "played".
//!
//! Accumulates uninterrupted play time from position ticks and asks for a
//! playback-log emission exactly once per uninterrupted segment that crosses
//! the threshold. Any position jump larger than the seek tolerance resets
//! both the accumulator and the emitted flag, so a track interrupted by
//! seeks may legitimately log more than once.

/// Position jump (seconds) beyond which a tick is treated as a seek.
const SEEK_JUMP_TOLERANCE: f64 = 2.0;

#[derive(Debug)]
struct PlaybackSession {
    track_hash: String,
    accumulated_secs: f64,
    last_position: f64,
    has_emitted: bool,
}

/// Request to emit a playback-log event; the engine fills in source tag and
/// timestamp and fires it off.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrobbleRequest {
    pub track_hash: String,
    pub seconds_played: u64,
}

pub struct SessionTracker {
    threshold_secs: f64,
    session: Option<PlaybackSession>,
}

impl SessionTracker {
    pub fn new(threshold_secs: f64) -> Self {
        Self {
            threshold_secs,
            session: None,
        }
    }

    /// Begin a fresh session for a track that just started playing.
    /// Replaces any prior session without emitting.
    pub fn start(&mut self, track_hash: &str) {
        self.session = Some(PlaybackSession {
            track_hash: track_hash.to_string(),
            accumulated_secs: 0.0,
            last_position: 0.0,
            has_emitted: false,
        });
    }

    pub fn track_hash(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.track_hash.as_str())
    }

    pub fn accumulated_secs(&self) -> f64 {
        self.session.as_ref().map(|s| s.accumulated_secs).unwrap_or(0.0)
    }

    /// Feed a position tick. Returns a scrobble request the first time the
    /// accumulated uninterrupted time crosses the threshold in the current
    /// segment.
    pub fn on_tick(&mut self, position: f64, playing: bool) -> Option<ScrobbleRequest> {
        let threshold = self.threshold_secs;
        let session = self.session.as_mut()?;

        if !playing {
            // Frozen: keep the accumulator, track the position so resume
            // doesn't see a phantom jump.
            session.last_position = position;
            return None;
        }

        let delta = position - session.last_position;
        if delta.abs() > SEEK_JUMP_TOLERANCE {
            // Detected seek: new uninterrupted segment.
            log::debug!(
                "session: position jump {:.1}s -> {:.1}s, resetting segment",
                session.last_position,
                position
            );
            session.accumulated_secs = 0.0;
            session.has_emitted = false;
            session.last_position = position;
            return None;
        }

        if delta > 0.0 {
            session.accumulated_secs += delta;
        }
        session.last_position = position;

        if session.accumulated_secs >= threshold && !session.has_emitted {
            session.has_emitted = true;
            return Some(ScrobbleRequest {
                track_hash: session.track_hash.clone(),
                seconds_played: threshold as u64,
            });
        }
        None
    }

    /// Explicit user seek: reset the segment regardless of jump size.
    pub fn on_seek(&mut self, position: f64) {
        if let Some(session) = self.session.as_mut() {
            session.accumulated_secs = 0.0;
            session.has_emitted = false;
            session.last_position = position;
        }
    }

    pub fn on_pause(&mut self, position: f64) {
        if let Some(session) = self.session.as_mut() {
            session.last_position = position;
        }
    }

    pub fn on_resume(&mut self, position: f64) {
        if let Some(session) = self.session.as_mut() {
            session.last_position = position;
        }
    }

    /// Discard the session. Stray ticks after finalize never emit.
    pub fn finalize(&mut self) {
        self.session = None;
    }
}
