use crate::error::{PlayerError, PlayerResult};
use crate::fetch::AudioStream;
use crate::model::Track;

/// Host-provided audio output primitive. Decoding and device output happen
/// behind this trait; the engine only hands it a byte stream and transport
/// commands, and polls position/ended/error.
pub trait AudioSink: Send {
    /// Begin consuming the stream. Returns once the sink has probed the
    /// format and is ready to start emitting audio on `play`.
    fn load(&mut self, stream: AudioStream, duration: f64) -> PlayerResult<()>;
    fn play(&mut self) -> PlayerResult<()>;
    fn pause(&mut self);
    fn seek(&mut self, position_seconds: f64);
    fn set_volume(&mut self, volume: f32);
    fn volume(&self) -> f32;
    fn position_seconds(&self) -> f64;
    fn duration_seconds(&self) -> f64;
    fn is_playing(&self) -> bool;
    /// Whether the sink has consumed the stream to the end.
    fn is_finished(&self) -> bool;
    /// Whether the sink hit an unrecoverable decode/output error.
    fn error(&self) -> Option<String>;
    /// Stop output and free any buffered audio resources now, not at drop.
    fn release(&mut self);
}

/// Lifecycle of one sink slot. All transitions funnel through
/// `SinkSlot::dispatch`; host callbacks are polled into `SinkInput`s rather
/// than handled ad hoc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
    Error,
}

/// State-transition inputs for a sink slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkInput {
    LoadStarted,
    LoadReady,
    LoadFailed,
    PlayStarted,
    Paused,
    NaturalEnd,
    Fault,
    Released,
}

/// One of the two interchangeable sink slots owned by the dual-buffer
/// source: the boxed host sink, its FSM state, and the track it holds.
pub struct SinkSlot {
    sink: Box<dyn AudioSink>,
    state: SinkState,
    track: Option<Track>,
    /// Codec hint of the loaded stream, kept so a preloaded slot can still
    /// report it after the stream has been handed to the sink.
    codec: Option<String>,
}

impl SinkSlot {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            sink,
            state: SinkState::Idle,
            track: None,
            codec: None,
        }
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    pub fn track_hash(&self) -> Option<&str> {
        self.track.as_ref().map(|t| t.hash.as_str())
    }

    pub fn codec_hint(&self) -> Option<&str> {
        self.codec.as_deref()
    }

    fn dispatch(&mut self, input: SinkInput) {
        use SinkState::*;
        let next = match (self.state, input) {
            (_, SinkInput::Released) => Idle,
            (_, SinkInput::Fault) => Error,
            (_, SinkInput::LoadStarted) => Loading,
            (Loading, SinkInput::LoadReady) => Ready,
            (Loading, SinkInput::LoadFailed) => Error,
            (Ready | Paused | Ended, SinkInput::PlayStarted) => Playing,
            (Playing, SinkInput::Paused) => Paused,
            (Playing, SinkInput::NaturalEnd) => Ended,
            (state, input) => {
                log::debug!("sink: ignoring {input:?} in {state:?}");
                state
            }
        };
        if next != self.state {
            log::debug!("sink: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    pub fn load(&mut self, track: Track, stream: AudioStream) -> PlayerResult<()> {
        let duration = track.duration;
        self.track = Some(track);
        self.codec = stream.codec_hint.clone();
        self.dispatch(SinkInput::LoadStarted);
        match self.sink.load(stream, duration) {
            Ok(()) => {
                self.dispatch(SinkInput::LoadReady);
                Ok(())
            }
            Err(e) => {
                self.dispatch(SinkInput::LoadFailed);
                Err(e)
            }
        }
    }

    pub fn play(&mut self) -> PlayerResult<()> {
        if !matches!(
            self.state,
            SinkState::Ready | SinkState::Paused | SinkState::Ended
        ) {
            return Err(PlayerError::Audio(format!(
                "cannot play from {:?}",
                self.state
            )));
        }
        self.sink.play()?;
        self.dispatch(SinkInput::PlayStarted);
        Ok(())
    }

    pub fn pause(&mut self) {
        self.sink.pause();
        self.dispatch(SinkInput::Paused);
    }

    pub fn seek(&mut self, position_seconds: f64) {
        self.sink.seek(position_seconds);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.sink.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.sink.volume()
    }

    pub fn position_seconds(&self) -> f64 {
        self.sink.position_seconds()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.sink.duration_seconds()
    }

    pub fn is_playing(&self) -> bool {
        self.state == SinkState::Playing
    }

    /// Poll the host sink for asynchronous signals (ended, error) and feed
    /// them through the FSM. Called from the engine tick loop.
    pub fn poll(&mut self) -> SinkState {
        if let Some(err) = self.sink.error() {
            log::error!("sink error: {err}");
            self.dispatch(SinkInput::Fault);
        } else if self.state == SinkState::Playing && self.sink.is_finished() {
            self.dispatch(SinkInput::NaturalEnd);
        }
        self.state
    }

    /// Vacate the slot: stop output, free buffered audio, forget the track.
    /// No-op when the slot is already empty.
    pub fn release(&mut self) {
        if self.state == SinkState::Idle {
            return;
        }
        self.sink.release();
        self.track = None;
        self.codec = None;
        self.dispatch(SinkInput::Released);
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct FakeSinkState {
        pub position: f64,
        pub duration: f64,
        pub playing: bool,
        pub finished: bool,
        pub error: Option<String>,
        pub volume: f32,
        pub fail_next_load: bool,
        pub loads: u32,
        pub plays: u32,
        pub releases: u32,
        pub stream: Option<AudioStream>,
    }

    /// Scriptable sink for engine and dual-source tests. The handle lets a
    /// test advance position, finish the track, or inject errors.
    #[derive(Clone)]
    pub struct FakeSinkHandle(pub Arc<Mutex<FakeSinkState>>);

    impl FakeSinkHandle {
        pub fn advance(&self, seconds: f64) {
            let mut s = self.0.lock().unwrap();
            if s.playing {
                s.position += seconds;
                if s.duration > 0.0 && s.position >= s.duration {
                    s.position = s.duration;
                    s.finished = true;
                }
            }
        }

        pub fn set_position(&self, seconds: f64) {
            self.0.lock().unwrap().position = seconds;
        }

        pub fn finish(&self) {
            self.0.lock().unwrap().finished = true;
        }

        pub fn volume(&self) -> f32 {
            self.0.lock().unwrap().volume
        }

        pub fn state(&self) -> std::sync::MutexGuard<'_, FakeSinkState> {
            self.0.lock().unwrap()
        }
    }

    pub struct FakeSink(Arc<Mutex<FakeSinkState>>);

    impl FakeSink {
        pub fn new() -> (Self, FakeSinkHandle) {
            let state = Arc::new(Mutex::new(FakeSinkState {
                volume: 1.0,
                ..Default::default()
            }));
            (Self(Arc::clone(&state)), FakeSinkHandle(state))
        }
    }

    impl AudioSink for FakeSink {
        fn load(&mut self, stream: AudioStream, duration: f64) -> PlayerResult<()> {
            let mut s = self.0.lock().unwrap();
            if s.fail_next_load {
                s.fail_next_load = false;
                return Err(PlayerError::Decode("fake load failure".into()));
            }
            s.loads += 1;
            s.stream = Some(stream);
            s.duration = duration;
            s.position = 0.0;
            s.finished = false;
            s.playing = false;
            s.error = None;
            Ok(())
        }

        fn play(&mut self) -> PlayerResult<()> {
            let mut s = self.0.lock().unwrap();
            s.plays += 1;
            s.playing = true;
            Ok(())
        }

        fn pause(&mut self) {
            self.0.lock().unwrap().playing = false;
        }

        fn seek(&mut self, position_seconds: f64) {
            let mut s = self.0.lock().unwrap();
            s.position = position_seconds;
            s.finished = false;
        }

        fn set_volume(&mut self, volume: f32) {
            self.0.lock().unwrap().volume = volume.clamp(0.0, 1.0);
        }

        fn volume(&self) -> f32 {
            self.0.lock().unwrap().volume
        }

        fn position_seconds(&self) -> f64 {
            self.0.lock().unwrap().position
        }

        fn duration_seconds(&self) -> f64 {
            self.0.lock().unwrap().duration
        }

        fn is_playing(&self) -> bool {
            self.0.lock().unwrap().playing
        }

        fn is_finished(&self) -> bool {
            self.0.lock().unwrap().finished
        }

        fn error(&self) -> Option<String> {
            self.0.lock().unwrap().error.clone()
        }

        fn release(&mut self) {
            let mut s = self.0.lock().unwrap();
            s.releases += 1;
            s.playing = false;
            if let Some(stream) = s.stream.take() {
                stream.release();
            }
        }
    }

    pub fn test_track(hash: &str, duration: f64) -> Track {
        Track {
            hash: hash.to_string(),
            title: format!("Track {hash}"),
            artists: vec!["Artist".to_string()],
            album: "Album".to_string(),
            duration,
            locator: format!("https://content.example/{hash}"),
            artwork_url: None,
        }
    }

    pub fn empty_stream() -> AudioStream {
        let (stream, writer) = AudioStream::new(None);
        writer.finish();
        stream
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn slot_walks_the_load_play_end_lifecycle() {
        let (sink, handle) = FakeSink::new();
        let mut slot = SinkSlot::new(Box::new(sink));
        assert_eq!(slot.state(), SinkState::Idle);

        slot.load(test_track("a", 10.0), empty_stream()).unwrap();
        assert_eq!(slot.state(), SinkState::Ready);

        slot.play().unwrap();
        assert_eq!(slot.state(), SinkState::Playing);

        handle.advance(10.0);
        assert_eq!(slot.poll(), SinkState::Ended);

        slot.release();
        assert_eq!(slot.state(), SinkState::Idle);
        assert!(slot.track().is_none());
    }

    #[test]
    fn failed_load_moves_to_error_and_play_is_rejected() {
        let (sink, handle) = FakeSink::new();
        handle.state().fail_next_load = true;
        let mut slot = SinkSlot::new(Box::new(sink));

        assert!(slot.load(test_track("a", 10.0), empty_stream()).is_err());
        assert_eq!(slot.state(), SinkState::Error);
        assert!(slot.play().is_err());
    }

    #[test]
    fn slot_keeps_codec_hint_until_released() {
        let (sink, _handle) = FakeSink::new();
        let mut slot = SinkSlot::new(Box::new(sink));
        let (stream, writer) = AudioStream::new(Some("flac".into()));
        writer.finish();

        slot.load(test_track("a", 10.0), stream).unwrap();
        assert_eq!(slot.codec_hint(), Some("flac"));

        slot.release();
        assert!(slot.codec_hint().is_none());
    }

    #[test]
    fn pause_and_resume_round_trip() {
        let (sink, _handle) = FakeSink::new();
        let mut slot = SinkSlot::new(Box::new(sink));
        slot.load(test_track("a", 10.0), empty_stream()).unwrap();
        slot.play().unwrap();
        slot.pause();
        assert_eq!(slot.state(), SinkState::Paused);
        slot.play().unwrap();
        assert_eq!(slot.state(), SinkState::Playing);
    }
}
