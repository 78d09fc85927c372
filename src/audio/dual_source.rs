//! Dual-buffer audio source: two interchangeable sink slots, one active and
//! one standby. The standby slot is preloaded with the next track while the
//! active slot plays, then the roles swap at the switch instant. Callers
//! (the engine façade) hold the transport lock across `switch`, which makes
//! the swap indivisible with respect to transport commands.

use crate::error::{PlayerError, PlayerResult};
use crate::fetch::AudioStream;
use crate::model::Track;
use crate::sink::{AudioSink, SinkSlot, SinkState};
use std::time::Duration;

/// Discrete volume steps in a crossfade ramp.
const CROSSFADE_STEPS: u32 = 20;

pub struct DualBufferSource {
    slots: [SinkSlot; 2],
    active: usize,
    /// Volume applied to whichever slot is audible.
    target_volume: f32,
}

impl DualBufferSource {
    pub fn new(primary: Box<dyn AudioSink>, secondary: Box<dyn AudioSink>) -> Self {
        Self {
            slots: [SinkSlot::new(primary), SinkSlot::new(secondary)],
            active: 0,
            target_volume: 1.0,
        }
    }

    pub fn active(&self) -> &SinkSlot {
        &self.slots[self.active]
    }

    pub fn active_mut(&mut self) -> &mut SinkSlot {
        &mut self.slots[self.active]
    }

    fn standby_index(&self) -> usize {
        1 - self.active
    }

    pub fn standby(&self) -> &SinkSlot {
        &self.slots[self.standby_index()]
    }

    /// Load a track into the active slot, replacing whatever it held.
    /// Used for direct (non-gapless) starts.
    pub fn load_active(&mut self, track: Track, stream: AudioStream) -> PlayerResult<()> {
        let volume = self.target_volume;
        let slot = self.active_mut();
        slot.release();
        slot.load(track, stream)?;
        slot.set_volume(volume);
        Ok(())
    }

    /// Preload a track into the standby slot without disturbing the active
    /// slot. On failure the standby slot is vacated and the error returned;
    /// the caller degrades to the non-gapless path.
    pub fn preload(&mut self, track: Track, stream: AudioStream) -> PlayerResult<()> {
        let standby = self.standby_index();
        let slot = &mut self.slots[standby];
        slot.release();
        match slot.load(track, stream) {
            Ok(()) => {
                log::info!(
                    "preloaded {:?} into standby slot",
                    self.slots[standby].track_hash()
                );
                Ok(())
            }
            Err(e) => {
                self.slots[standby].release();
                Err(e)
            }
        }
    }

    /// Whether the standby slot is fully preloaded for exactly this track.
    pub fn standby_ready_for(&self, track_hash: &str) -> bool {
        let slot = self.standby();
        slot.state() == SinkState::Ready && slot.track_hash() == Some(track_hash)
    }

    /// Drop any standby preload. No-op when the slot is already empty.
    pub fn invalidate_standby(&mut self) {
        let standby = self.standby_index();
        if self.slots[standby].state() != SinkState::Idle {
            log::debug!("invalidating stale standby preload");
            self.slots[standby].release();
        }
    }

    /// Swap active and standby roles. The standby slot must be preloaded.
    /// With a crossfade the outgoing slot ramps to zero while the incoming
    /// one ramps to the target volume over `duration` in discrete steps;
    /// without one the outgoing slot is paused and released immediately.
    /// The standby sink is silent (volume zero) until this call, so exactly
    /// one slot is audible at any instant outside the crossfade overlap.
    pub async fn switch(&mut self, crossfade: Option<Duration>) -> PlayerResult<()> {
        let incoming = self.standby_index();
        let outgoing = self.active;

        if self.slots[incoming].state() != SinkState::Ready {
            return Err(PlayerError::Audio("standby slot not preloaded".into()));
        }

        let target = self.target_volume;
        match crossfade {
            Some(duration) if !duration.is_zero() => {
                let from = self.slots[outgoing].volume();
                self.slots[incoming].set_volume(0.0);
                self.slots[incoming].play()?;
                self.active = incoming;

                let step = duration / CROSSFADE_STEPS;
                for i in 1..=CROSSFADE_STEPS {
                    tokio::time::sleep(step).await;
                    let frac = i as f32 / CROSSFADE_STEPS as f32;
                    self.slots[outgoing].set_volume(from * (1.0 - frac));
                    self.slots[incoming].set_volume(target * frac);
                }
                self.slots[outgoing].pause();
                self.slots[outgoing].release();
            }
            _ => {
                self.slots[incoming].set_volume(target);
                self.slots[incoming].play()?;
                self.active = incoming;
                self.slots[outgoing].pause();
                self.slots[outgoing].release();
            }
        }

        log::info!(
            "switched to {:?}",
            self.slots[self.active].track_hash()
        );
        Ok(())
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.target_volume = volume.clamp(0.0, 1.0);
        let volume = self.target_volume;
        self.active_mut().set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.target_volume
    }

    /// Release both slots. Used on stop/clear and on dispose.
    pub fn release_all(&mut self) {
        for slot in &mut self.slots {
            slot.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::{empty_stream, test_track, FakeSink, FakeSinkHandle};

    fn source() -> (DualBufferSource, FakeSinkHandle, FakeSinkHandle) {
        let (a, ha) = FakeSink::new();
        let (b, hb) = FakeSink::new();
        (DualBufferSource::new(Box::new(a), Box::new(b)), ha, hb)
    }

    #[tokio::test]
    async fn preload_does_not_disturb_active_playback() {
        let (mut source, ha, _hb) = source();
        source
            .load_active(test_track("a", 180.0), empty_stream())
            .unwrap();
        source.active_mut().play().unwrap();
        ha.advance(5.0);

        source
            .preload(test_track("b", 200.0), empty_stream())
            .unwrap();

        assert!(source.active().is_playing());
        assert_eq!(source.active().track_hash(), Some("a"));
        assert!(source.standby_ready_for("b"));
    }

    #[tokio::test]
    async fn plain_switch_swaps_roles_and_releases_outgoing() {
        let (mut source, ha, _hb) = source();
        source
            .load_active(test_track("a", 180.0), empty_stream())
            .unwrap();
        source.active_mut().play().unwrap();
        source
            .preload(test_track("b", 200.0), empty_stream())
            .unwrap();

        source.switch(None).await.unwrap();

        assert_eq!(source.active().track_hash(), Some("b"));
        assert!(source.active().is_playing());
        assert_eq!(source.standby().state(), SinkState::Idle);
        assert_eq!(ha.state().releases, 1);
        assert!(!ha.state().playing);
    }

    #[tokio::test(start_paused = true)]
    async fn crossfade_ramps_incoming_to_target_volume() {
        let (mut source, ha, hb) = source();
        source.set_volume(0.8);
        source
            .load_active(test_track("a", 180.0), empty_stream())
            .unwrap();
        source.active_mut().play().unwrap();
        source
            .preload(test_track("b", 200.0), empty_stream())
            .unwrap();

        source
            .switch(Some(Duration::from_millis(400)))
            .await
            .unwrap();

        assert_eq!(source.active().track_hash(), Some("b"));
        assert!((hb.volume() - 0.8).abs() < 1e-6);
        // Outgoing slot faded to zero before release.
        assert_eq!(ha.volume(), 0.0);
        assert_eq!(ha.state().releases, 1);
    }

    #[tokio::test]
    async fn switch_without_preload_is_an_error() {
        let (mut source, _ha, _hb) = source();
        source
            .load_active(test_track("a", 180.0), empty_stream())
            .unwrap();
        assert!(source.switch(None).await.is_err());
        assert_eq!(source.active().track_hash(), Some("a"));
    }

    #[tokio::test]
    async fn failed_preload_vacates_standby() {
        let (mut source, _ha, hb) = source();
        source
            .load_active(test_track("a", 180.0), empty_stream())
            .unwrap();
        hb.state().fail_next_load = true;

        assert!(source
            .preload(test_track("b", 200.0), empty_stream())
            .is_err());
        assert_eq!(source.standby().state(), SinkState::Idle);
        assert!(!source.standby_ready_for("b"));
    }

    #[tokio::test]
    async fn invalidate_standby_drops_stale_preload() {
        let (mut source, _ha, hb) = source();
        source
            .preload(test_track("b", 200.0), empty_stream())
            .unwrap();
        source.invalidate_standby();
        assert_eq!(source.standby().state(), SinkState::Idle);
        assert_eq!(hb.state().releases, 1);
    }

    #[tokio::test]
    async fn standby_is_silent_until_switch() {
        let (mut source, _ha, hb) = source();
        source.set_volume(0.5);
        source
            .load_active(test_track("a", 180.0), empty_stream())
            .unwrap();
        source.active_mut().play().unwrap();
        source
            .preload(test_track("b", 200.0), empty_stream())
            .unwrap();
        assert!(!hb.state().playing);
    }
}
