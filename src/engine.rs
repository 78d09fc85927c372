//! Engine façade: composes the dual-buffer source, queue, transition
//! scheduler, and session tracker behind transport commands, and owns the
//! concurrency discipline that keeps them race-free.
//!
//! All mutable playback state lives behind one async mutex (the transport
//! lock); every sink command is issued while holding it, so a `pause` that
//! arrives during a pending `play` waits for the play to settle. Loads are
//! single-flight: each new load bumps a generation counter and cancels the
//! previous fetch, and a load that finds itself superseded discards its
//! stream instead of touching playback state.

use crate::audio::dual_source::DualBufferSource;
use crate::audio::queue::{PlaybackQueue, QueueState, RepeatMode};
use crate::audio::session::{ScrobbleRequest, SessionTracker};
use crate::audio::transition::{TransitionAction, TransitionPhase, TransitionScheduler};
use crate::config::PlayerConfig;
use crate::error::{PlayerError, PlayerResult};
use crate::events::{
    quality_label, EngineEvent, PlaybackState, ProgressPayload, TrackChangedPayload,
};
use crate::favorites::FavoriteBroadcast;
use crate::fetch::{CancelToken, ContentFetcher, PlaybackLogger};
use crate::model::{PlaybackLogEntry, Track};
use crate::presentation::TransportCommand;
use crate::sink::{AudioSink, SinkState};
use crate::store::{QueueSnapshot, QueueStore};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};

const TICK_INTERVAL: Duration = Duration::from_millis(250);
const EVENT_CHANNEL_CAPACITY: usize = 64;
/// `previous` restarts the current track instead of stepping back once
/// playback has passed this many seconds.
const PREVIOUS_RESTART_THRESHOLD: f64 = 15.0;

struct EngineState {
    source: DualBufferSource,
    queue: PlaybackQueue,
    scheduler: TransitionScheduler,
    session: SessionTracker,
    current: Option<Track>,
    current_codec: Option<String>,
    playback: PlaybackState,
    config: PlayerConfig,
    favorites: HashSet<String>,
    /// Cancellation for the in-flight active-slot fetch, if any.
    pending_load_cancel: Option<CancelToken>,
    /// Cancellation for the in-flight standby preload fetch, if any.
    pending_preload_cancel: Option<CancelToken>,
    /// A pause arrived while a load was still settling; the load honours it
    /// instead of starting audio.
    pause_requested: bool,
    /// Re-entry guard for the natural-end fallback.
    advancing: bool,
}

impl EngineState {
    /// The queue (or its ordering policy) changed, so the resolved next
    /// track may have too: tear down pending transition work now rather
    /// than waiting for the next tick, and drop the standby preload unless
    /// it still matches the new resolution.
    fn queue_mutated(&mut self) {
        self.scheduler.cancel();
        if let Some(cancel) = self.pending_preload_cancel.take() {
            cancel.cancel();
        }
        let standby_still_valid = self
            .queue
            .peek_next()
            .map(|t| self.source.standby_ready_for(&t.hash))
            .unwrap_or(false);
        if !standby_still_valid {
            self.source.invalidate_standby();
        }
    }
}

struct Shared {
    state: Mutex<EngineState>,
    fetcher: Arc<dyn ContentFetcher>,
    logger: Option<Arc<dyn PlaybackLogger>>,
    store: Option<QueueStore>,
    favorites_bus: FavoriteBroadcast,
    events: broadcast::Sender<EngineEvent>,
    load_generation: AtomicU64,
    transport_tx: mpsc::UnboundedSender<TransportCommand>,
}

/// The playback engine. Owns both sink slots, the queue, and the current
/// session exclusively; collaborators reach playback state only through its
/// commands. Construct with `new`, start the tick loop with `init`, and
/// tear down with `dispose`.
pub struct Engine {
    shared: Arc<Shared>,
    transport_rx: Option<mpsc::UnboundedReceiver<TransportCommand>>,
    tick: Option<tokio::task::JoinHandle<()>>,
}

impl Engine {
    pub fn new(
        config: PlayerConfig,
        primary: Box<dyn AudioSink>,
        secondary: Box<dyn AudioSink>,
        fetcher: Arc<dyn ContentFetcher>,
        logger: Option<Arc<dyn PlaybackLogger>>,
        store: Option<QueueStore>,
        favorites_bus: FavoriteBroadcast,
    ) -> Self {
        let mut source = DualBufferSource::new(primary, secondary);
        source.set_volume(config.effective_volume());

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let state = EngineState {
            source,
            queue: PlaybackQueue::new(),
            scheduler: TransitionScheduler::new(),
            session: SessionTracker::new(config.scrobble_threshold_secs),
            current: None,
            current_codec: None,
            playback: PlaybackState::Stopped,
            config,
            favorites: HashSet::new(),
            pending_load_cancel: None,
            pending_preload_cancel: None,
            pause_requested: false,
            advancing: false,
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                fetcher,
                logger,
                store,
                favorites_bus,
                events,
                load_generation: AtomicU64::new(0),
                transport_tx,
            }),
            transport_rx: Some(transport_rx),
            tick: None,
        }
    }

    /// Restore the persisted queue snapshot (without auto-playing) and
    /// start the tick loop. Calling twice is a no-op.
    pub async fn init(&mut self) {
        if self.tick.is_some() {
            return;
        }

        if let Some(store) = &self.shared.store {
            match store.load() {
                Ok(Some(snapshot)) => {
                    let mut state = self.shared.state.lock().await;
                    state.queue.restore(
                        snapshot.tracks,
                        snapshot.original_order,
                        snapshot.current_index,
                        snapshot.repeat_mode,
                        snapshot.shuffle_enabled,
                    );
                    state.config.volume = snapshot.volume;
                    let volume = state.config.effective_volume();
                    state.source.set_volume(volume);
                    state.current = state.queue.current_track().cloned();
                    log::info!(
                        "restored queue snapshot: {} tracks, current {:?}",
                        state.queue.len(),
                        state.current.as_ref().map(|t| t.hash.as_str())
                    );
                }
                Ok(None) => {}
                Err(e) => log::warn!("failed to load queue snapshot: {e}"),
            }
        }

        let shared = Arc::clone(&self.shared);
        let Some(mut transport_rx) = self.transport_rx.take() else {
            return;
        };
        self.tick = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(TICK_INTERVAL).await;
                while let Ok(cmd) = transport_rx.try_recv() {
                    shared.handle_transport(cmd).await;
                }
                shared.tick().await;
            }
        }));
    }

    /// Stop the tick loop, cancel in-flight work, and release both sinks.
    pub async fn dispose(mut self) {
        if let Some(tick) = self.tick.take() {
            tick.abort();
        }
        let mut state = self.shared.state.lock().await;
        state.scheduler.cancel();
        if let Some(cancel) = state.pending_load_cancel.take() {
            cancel.cancel();
        }
        if let Some(cancel) = state.pending_preload_cancel.take() {
            cancel.cancel();
        }
        state.session.finalize();
        state.source.release_all();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    /// Channel presentation surfaces use to send transport actions back in.
    pub fn transport_sender(&self) -> mpsc::UnboundedSender<TransportCommand> {
        self.shared.transport_tx.clone()
    }

    /// Replace the queue and start playing at `start_index`.
    pub async fn play_tracks(&self, tracks: Vec<Track>, start_index: usize) -> PlayerResult<()> {
        let track = {
            let mut state = self.shared.state.lock().await;
            state.queue.set_tracks(tracks, start_index);
            let track = state.queue.current_track().cloned();
            self.shared.emit(EngineEvent::QueueChanged);
            self.shared.persist(&state);
            track
        };
        match track {
            Some(track) => swallow_superseded(self.shared.start_track(track, true).await),
            None => Ok(()),
        }
    }

    /// Jump to a queue position and play it.
    pub async fn play_index(&self, index: usize) -> PlayerResult<()> {
        let track = {
            let mut state = self.shared.state.lock().await;
            state
                .queue
                .set_current_index(index)
                .cloned()
                .ok_or_else(|| PlayerError::NotFound("queue index out of bounds".into()))?
        };
        swallow_superseded(self.shared.start_track(track, true).await)
    }

    pub async fn play(&self) -> PlayerResult<()> {
        swallow_superseded(self.shared.play().await)
    }

    pub async fn pause(&self) {
        self.shared.pause().await;
    }

    pub async fn toggle(&self) -> PlayerResult<()> {
        let paused = {
            let state = self.shared.state.lock().await;
            state.playback != PlaybackState::Playing
        };
        if paused {
            self.play().await
        } else {
            self.pause().await;
            Ok(())
        }
    }

    pub async fn stop(&self) {
        self.shared.stop().await;
    }

    pub async fn seek(&self, position: f64) {
        self.shared.seek(position).await;
    }

    pub async fn next(&self) -> PlayerResult<()> {
        swallow_superseded(self.shared.next().await)
    }

    pub async fn previous(&self) -> PlayerResult<()> {
        swallow_superseded(self.shared.previous().await)
    }

    pub async fn set_volume(&self, volume: f32) {
        let mut state = self.shared.state.lock().await;
        state.config.volume = volume.clamp(0.0, 1.0);
        state.config.muted = false;
        let effective = state.config.effective_volume();
        state.source.set_volume(effective);
        self.shared.persist(&state);
    }

    pub async fn toggle_mute(&self) -> bool {
        let mut state = self.shared.state.lock().await;
        state.config.muted = !state.config.muted;
        let effective = state.config.effective_volume();
        state.source.set_volume(effective);
        state.config.muted
    }

    pub async fn volume(&self) -> f32 {
        self.shared.state.lock().await.config.volume
    }

    pub async fn set_shuffle(&self, enabled: bool) {
        let mut state = self.shared.state.lock().await;
        if enabled {
            state.queue.shuffle();
        } else {
            state.queue.unshuffle();
        }
        state.queue_mutated();
        self.shared.emit(EngineEvent::QueueChanged);
        self.shared.persist(&state);
    }

    pub async fn cycle_repeat(&self) -> RepeatMode {
        let mut state = self.shared.state.lock().await;
        let mode = state.queue.cycle_repeat();
        state.queue_mutated();
        self.shared.emit(EngineEvent::QueueChanged);
        self.shared.persist(&state);
        mode
    }

    pub async fn enqueue(&self, track: Track) {
        let mut state = self.shared.state.lock().await;
        state.queue.add_track(track);
        state.queue_mutated();
        self.shared.emit(EngineEvent::QueueChanged);
        self.shared.persist(&state);
    }

    pub async fn remove_from_queue(&self, index: usize) {
        let mut state = self.shared.state.lock().await;
        state.queue.remove_track(index);
        state.queue_mutated();
        self.shared.emit(EngineEvent::QueueChanged);
        self.shared.persist(&state);
    }

    pub async fn reorder_queue(&self, from: usize, to: usize) {
        let mut state = self.shared.state.lock().await;
        state.queue.move_track(from, to);
        state.queue_mutated();
        self.shared.emit(EngineEvent::QueueChanged);
        self.shared.persist(&state);
    }

    pub async fn clear_queue(&self) {
        self.shared.stop().await;
        let mut state = self.shared.state.lock().await;
        state.queue.clear();
        self.shared.emit(EngineEvent::QueueCleared);
        self.shared.persist(&state);
    }

    /// Toggle the current track's favorite flag and broadcast the new
    /// status to registered catalog views. Returns the new status, or None
    /// when nothing is playing.
    pub async fn toggle_favorite(&self) -> Option<bool> {
        let (hash, favorite) = {
            let mut state = self.shared.state.lock().await;
            let hash = state.current.as_ref()?.hash.clone();
            let favorite = if state.favorites.contains(&hash) {
                state.favorites.remove(&hash);
                false
            } else {
                state.favorites.insert(hash.clone());
                true
            };
            (hash, favorite)
        };

        self.shared.emit(EngineEvent::FavoriteChanged {
            track_hash: hash.clone(),
            favorite,
        });
        let bus = self.shared.favorites_bus.clone();
        tokio::spawn(async move {
            bus.broadcast(&hash, favorite);
        });
        Some(favorite)
    }

    pub async fn current_track(&self) -> Option<Track> {
        self.shared.state.lock().await.current.clone()
    }

    /// Codec hint of the active stream, when the fetch reported one.
    pub async fn current_codec(&self) -> Option<String> {
        self.shared.state.lock().await.current_codec.clone()
    }

    pub async fn playback_state(&self) -> PlaybackState {
        self.shared.state.lock().await.playback
    }

    pub async fn queue_state(&self) -> QueueState {
        self.shared.state.lock().await.queue.state()
    }

    pub async fn position_seconds(&self) -> f64 {
        self.shared
            .state
            .lock()
            .await
            .source
            .active()
            .position_seconds()
    }
}

impl Shared {
    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    /// Persist the queue snapshot; failures are logged, never surfaced.
    fn persist(&self, state: &EngineState) {
        let Some(store) = &self.store else { return };
        let queue = &state.queue;
        let snapshot = QueueSnapshot {
            tracks: queue.tracks().to_vec(),
            original_order: queue.original_order().to_vec(),
            current_index: queue.current_index(),
            volume: state.config.volume,
            shuffle_enabled: queue.is_shuffled(),
            repeat_mode: queue.repeat_mode(),
            source_tag: state.config.source_tag.clone(),
        };
        if let Err(e) = store.save(&snapshot) {
            log::warn!("failed to persist queue snapshot: {e}");
        }
    }

    fn emit_track_changed(&self, track: &Track, codec: Option<&str>) {
        self.emit(EngineEvent::TrackChanged(TrackChangedPayload {
            track_hash: track.hash.clone(),
            title: track.title.clone(),
            artist: track.artist_line(),
            album: track.album.clone(),
            duration: track.duration,
            artwork_url: track.artwork_url.clone(),
            codec: codec.map(str::to_string),
            quality: codec.map(quality_label),
        }));
    }

    fn spawn_scrobble(self: &Arc<Self>, request: ScrobbleRequest, source_tag: &str) {
        let Some(logger) = self.logger.clone() else {
            return;
        };
        let entry = PlaybackLogEntry {
            track_hash: request.track_hash,
            seconds_played: request.seconds_played,
            source_tag: source_tag.to_string(),
            unix_timestamp: chrono::Utc::now().timestamp(),
        };
        tokio::spawn(async move {
            if let Err(e) = logger.log_playback(entry).await {
                log::debug!("playback log failed (ignored): {e}");
            }
        });
    }

    /// Fetch and start a track in the active slot. Single-flight: bumping
    /// the generation cancels the previous fetch, and a superseded load
    /// never touches playback state.
    async fn start_track(self: &Arc<Self>, track: Track, autoplay: bool) -> PlayerResult<()> {
        let generation = self.load_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancelToken::new();

        {
            let mut state = self.state.lock().await;
            if let Some(previous) = state.pending_load_cancel.replace(cancel.clone()) {
                previous.cancel();
            }
            if let Some(previous) = state.pending_preload_cancel.take() {
                previous.cancel();
            }
            // Manual track change tears down any pending transition and
            // overrides an earlier pause intent.
            state.scheduler.cancel();
            state.source.invalidate_standby();
            state.pause_requested = false;
        }

        log::info!("starting track {} ({})", track.hash, track.title);
        let fetched = self.fetcher.fetch_audio(&track, cancel.clone()).await;

        let mut state = self.state.lock().await;
        if self.load_generation.load(Ordering::SeqCst) != generation || cancel.is_cancelled() {
            if let Ok(stream) = fetched {
                stream.release();
            }
            log::debug!("load of {} superseded", track.hash);
            return Err(PlayerError::Superseded);
        }
        state.pending_load_cancel = None;

        let stream = fetched?;
        let codec = stream.codec_hint.clone();
        state.source.load_active(track.clone(), stream)?;

        state.session.finalize();
        state.session.start(&track.hash);
        state.current = Some(track.clone());
        state.current_codec = codec.clone();

        // A pause issued while this load was in flight wins over autoplay.
        let autoplay = autoplay && !state.pause_requested;
        state.pause_requested = false;

        if autoplay {
            state.source.active_mut().play()?;
            state.playback = PlaybackState::Playing;
        } else {
            state.playback = PlaybackState::Paused;
        }

        self.emit_track_changed(&track, codec.as_deref());
        self.emit(EngineEvent::StateChanged(state.playback));
        self.persist(&state);
        Ok(())
    }

    async fn play(self: &Arc<Self>) -> PlayerResult<()> {
        let track_to_start = {
            let mut state = self.state.lock().await;
            if state.playback == PlaybackState::Playing {
                return Ok(());
            }
            let resumable = matches!(
                state.source.active().state(),
                SinkState::Paused | SinkState::Ready
            );
            state.pause_requested = false;
            if resumable && state.current.is_some() {
                let position = state.source.active().position_seconds();
                state.source.active_mut().play()?;
                state.session.on_resume(position);
                state.playback = PlaybackState::Playing;
                self.emit(EngineEvent::StateChanged(PlaybackState::Playing));
                return Ok(());
            }
            // Nothing loaded (fresh start or restored snapshot): load the
            // current queue entry from scratch.
            state
                .current
                .clone()
                .or_else(|| state.queue.current_track().cloned())
        };
        match track_to_start {
            Some(track) => self.start_track(track, true).await,
            None => Ok(()),
        }
    }

    async fn pause(&self) {
        let mut state = self.state.lock().await;
        // Explicit pause cancels pending transition work; the scheduler
        // re-evaluates from scratch on the next position update.
        state.scheduler.cancel();
        if let Some(cancel) = state.pending_preload_cancel.take() {
            cancel.cancel();
        }
        if state.pending_load_cancel.is_some() {
            // A load is still settling; it applies the pause on completion.
            state.pause_requested = true;
        }
        if state.playback == PlaybackState::Playing {
            let position = state.source.active().position_seconds();
            state.source.active_mut().pause();
            state.session.on_pause(position);
            state.playback = PlaybackState::Paused;
            self.emit(EngineEvent::StateChanged(PlaybackState::Paused));
        }
    }

    async fn stop(&self) {
        let mut state = self.state.lock().await;
        state.scheduler.cancel();
        if let Some(cancel) = state.pending_load_cancel.take() {
            cancel.cancel();
        }
        if let Some(cancel) = state.pending_preload_cancel.take() {
            cancel.cancel();
        }
        state.session.finalize();
        state.source.release_all();
        state.current = None;
        state.current_codec = None;
        state.playback = PlaybackState::Stopped;
        self.emit(EngineEvent::StateChanged(PlaybackState::Stopped));
        self.persist(&state);
    }

    async fn seek(&self, position: f64) {
        let mut state = self.state.lock().await;
        if state.current.is_none() {
            return;
        }
        // Seek cancels the pending switch timer; the standby preload is
        // kept and reused if the resolved next track is unchanged.
        state.scheduler.cancel();
        if let Some(cancel) = state.pending_preload_cancel.take() {
            cancel.cancel();
        }
        state.source.active_mut().seek(position);
        state.session.on_seek(position);

        let duration = state.source.active().duration_seconds();
        self.emit(EngineEvent::Seeked { position });
        self.emit(EngineEvent::Progress(ProgressPayload {
            position,
            duration,
            position_fraction: if duration > 0.0 {
                position / duration
            } else {
                0.0
            },
        }));
    }

    async fn next(self: &Arc<Self>) -> PlayerResult<()> {
        let next = {
            let mut state = self.state.lock().await;
            state.queue.next_track().cloned()
        };
        match next {
            Some(track) => self.start_track(track, true).await,
            None => {
                self.stop().await;
                Ok(())
            }
        }
    }

    async fn previous(self: &Arc<Self>) -> PlayerResult<()> {
        let (position, current) = {
            let state = self.state.lock().await;
            (
                state.source.active().position_seconds(),
                state.current.clone(),
            )
        };

        if position > PREVIOUS_RESTART_THRESHOLD {
            if let Some(track) = current {
                return self.start_track(track, true).await;
            }
            return Ok(());
        }

        let previous = {
            let mut state = self.state.lock().await;
            state.queue.previous_track().cloned()
        };
        match previous {
            Some(track) => self.start_track(track, true).await,
            None => Ok(()),
        }
    }

    async fn handle_transport(self: &Arc<Self>, command: TransportCommand) {
        let result = match command {
            TransportCommand::Play => self.play().await,
            TransportCommand::Pause => {
                self.pause().await;
                Ok(())
            }
            TransportCommand::Toggle => {
                let playing = {
                    let state = self.state.lock().await;
                    state.playback == PlaybackState::Playing
                };
                if playing {
                    self.pause().await;
                    Ok(())
                } else {
                    self.play().await
                }
            }
            TransportCommand::Next => self.next().await,
            TransportCommand::Previous => self.previous().await,
            TransportCommand::Seek(position) => {
                self.seek(position).await;
                Ok(())
            }
        };
        match result {
            Ok(()) | Err(PlayerError::Superseded) => {}
            Err(e) => log::error!("transport command {command:?} failed: {e}"),
        }
    }

    /// One pass of the periodic loop: poll the active sink, feed the
    /// session tracker and transition scheduler, and handle natural end.
    async fn tick(self: &Arc<Self>) {
        let ended = {
            let mut state = self.state.lock().await;
            if state.advancing || state.current.is_none() {
                return;
            }

            let slot_state = state.source.active_mut().poll();
            let position = state.source.active().position_seconds();
            let duration = state.source.active().duration_seconds();
            let playing = state.source.active().is_playing();

            if let Some(request) = state.session.on_tick(position, playing) {
                let source_tag = state.config.source_tag.clone();
                self.spawn_scrobble(request, &source_tag);
            }

            if playing {
                self.emit(EngineEvent::Progress(ProgressPayload {
                    position,
                    duration,
                    position_fraction: if duration > 0.0 {
                        position / duration
                    } else {
                        0.0
                    },
                }));

                let remaining = duration - position;
                let next = state.queue.peek_next().cloned();
                let standby_ready = next
                    .as_ref()
                    .map(|t| state.source.standby_ready_for(&t.hash))
                    .unwrap_or(false);
                let gapless = state.config.gapless_enabled;
                let lookahead = state.config.lookahead_secs;
                let margin = Duration::from_millis(state.config.safety_margin_ms);

                match state
                    .scheduler
                    .evaluate(remaining, next.as_ref(), standby_ready, gapless, lookahead, margin)
                {
                    TransitionAction::BeginPreload(track) => {
                        if state.source.standby_ready_for(&track.hash) {
                            // A preload from before a seek/pause is still
                            // valid; skip the fetch.
                            state.scheduler.preload_ready(&track.hash);
                        } else {
                            let cancel = CancelToken::new();
                            if let Some(previous) =
                                state.pending_preload_cancel.replace(cancel.clone())
                            {
                                previous.cancel();
                            }
                            self.spawn_preload(track, cancel);
                        }
                    }
                    TransitionAction::Arm(delay) => {
                        let timer = self.spawn_switch_timer(delay);
                        state.scheduler.set_timer(timer);
                    }
                    TransitionAction::InvalidateStandby => {
                        if let Some(cancel) = state.pending_preload_cancel.take() {
                            cancel.cancel();
                        }
                        state.source.invalidate_standby();
                    }
                    TransitionAction::None => {}
                }
            }

            match slot_state {
                SinkState::Ended if state.scheduler.phase() != TransitionPhase::Transitioning => {
                    state.advancing = true;
                    true
                }
                SinkState::Error => {
                    log::error!("active sink faulted, stopping playback");
                    state.scheduler.cancel();
                    if let Some(cancel) = state.pending_preload_cancel.take() {
                        cancel.cancel();
                    }
                    state.source.active_mut().release();
                    state.session.finalize();
                    state.current = None;
                    state.playback = PlaybackState::Stopped;
                    self.emit(EngineEvent::StateChanged(PlaybackState::Stopped));
                    false
                }
                _ => false,
            }
        };

        if ended {
            self.advance_after_end().await;
            self.state.lock().await.advancing = false;
        }
    }

    /// Non-gapless fallback: the active track ran out without a scheduled
    /// switch (preload failed, gapless disabled, or repeat-one).
    async fn advance_after_end(self: &Arc<Self>) {
        log::info!("track ended, advancing");
        self.emit(EngineEvent::TrackEnded);

        let next = {
            let mut state = self.state.lock().await;
            state.session.finalize();
            state.queue.next_track().cloned()
        };

        match next {
            Some(track) => {
                if let Err(e) = self.start_track(track, true).await {
                    match e {
                        PlayerError::Superseded => {}
                        e => log::error!("failed to start next track: {e}"),
                    }
                }
            }
            None => self.stop().await,
        }
    }

    fn spawn_preload(self: &Arc<Self>, track: Track, cancel: CancelToken) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let fetched = shared.fetcher.fetch_audio(&track, cancel.clone()).await;

            let mut state = shared.state.lock().await;
            if cancel.is_cancelled() || state.scheduler.target_hash() != Some(track.hash.as_str())
            {
                if let Ok(stream) = fetched {
                    stream.release();
                }
                log::debug!("discarding stale preload of {}", track.hash);
                return;
            }

            let hash = track.hash.clone();
            match fetched.and_then(|stream| state.source.preload(track, stream)) {
                Ok(()) => state.scheduler.preload_ready(&hash),
                Err(e) => {
                    log::warn!("preload of {hash} failed, non-gapless fallback: {e}");
                    state.scheduler.preload_failed(&hash);
                }
            }
        });
    }

    fn spawn_switch_timer(self: &Arc<Self>, delay: Duration) -> tokio::task::JoinHandle<()> {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.fire_transition().await;
        })
    }

    /// Execute the gapless switchover. Holding the transport lock from the
    /// re-validation through the switch makes the swap indivisible with
    /// respect to transport commands.
    async fn fire_transition(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        let Some(target) = state.scheduler.begin_transition() else {
            // Cancelled between the timer firing and the lock; nothing to do.
            return;
        };
        if !state.source.standby_ready_for(&target) {
            log::warn!("standby lost preload of {target} before switch, falling back");
            state.scheduler.cancel();
            return;
        }
        // The queue may have changed between arming and firing; never
        // switch to a track that is no longer the resolved next.
        if state.queue.peek_next().map(|t| t.hash.as_str()) != Some(target.as_str()) {
            log::warn!("{target} is no longer the next track, abandoning switch");
            state.scheduler.cancel();
            state.source.invalidate_standby();
            return;
        }

        let crossfade = if state.config.crossfade_enabled {
            Some(Duration::from_secs_f64(state.config.crossfade_secs))
        } else {
            None
        };
        let codec = state.source.standby().codec_hint().map(str::to_string);

        if let Err(e) = state.source.switch(crossfade).await {
            log::error!("switchover failed: {e}");
            state.scheduler.cancel();
            return;
        }

        state.queue.next_track();
        state.session.finalize();
        state.session.start(&target);
        state.current = state.queue.current_track().cloned();
        state.current_codec = codec.clone();
        state.playback = PlaybackState::Playing;
        state.scheduler.complete();

        if let Some(track) = state.current.clone() {
            self.emit_track_changed(&track, codec.as_deref());
        }
        self.emit(EngineEvent::StateChanged(PlaybackState::Playing));
        self.persist(&state);
    }
}

fn swallow_superseded(result: PlayerResult<()>) -> PlayerResult<()> {
    match result {
        Err(PlayerError::Superseded) => Ok(()),
        other => other,
    }
}
