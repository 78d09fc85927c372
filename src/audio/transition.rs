//! Gapless-transition scheduling: decides when to preload the next track
//! and when to fire the switchover.
//!
//! The scheduler is a finite-state machine driven by position updates from
//! the engine tick loop. It never touches sinks or the queue itself; it
//! returns actions for the engine to execute, which keeps every state
//! transition at one dispatch point and makes the FSM directly testable.

use crate::model::Track;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPhase {
    Idle,
    Preloading,
    Preloaded,
    Scheduled,
    Transitioning,
}

/// What the engine should do after feeding the scheduler an update.
#[derive(Debug)]
pub enum TransitionAction {
    None,
    /// Start fetching this track into the standby slot.
    BeginPreload(Track),
    /// Arm the switch timer to fire after this delay.
    Arm(Duration),
    /// The resolved next track changed; drop the stale standby preload.
    InvalidateStandby,
}

pub struct TransitionScheduler {
    phase: TransitionPhase,
    target_hash: Option<String>,
    /// Track whose preload failed; not retried until the window resets
    /// (seek, track change).
    failed_hash: Option<String>,
    /// Armed switch timer; aborted on cancel. Aborting a finished or absent
    /// timer is a no-op.
    timer: Option<tokio::task::JoinHandle<()>>,
}

impl Default for TransitionScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitionScheduler {
    pub fn new() -> Self {
        Self {
            phase: TransitionPhase::Idle,
            target_hash: None,
            failed_hash: None,
            timer: None,
        }
    }

    pub fn phase(&self) -> TransitionPhase {
        self.phase
    }

    pub fn target_hash(&self) -> Option<&str> {
        self.target_hash.as_deref()
    }

    /// Feed a position update. `next` is the queue's resolved next track
    /// under the current repeat/shuffle policy (None when no gapless
    /// transition applies), `remaining` the active track's remaining time,
    /// and `standby_ready` whether the standby slot holds the target.
    pub fn evaluate(
        &mut self,
        remaining: f64,
        next: Option<&Track>,
        standby_ready: bool,
        gapless_enabled: bool,
        lookahead_secs: f64,
        safety_margin: Duration,
    ) -> TransitionAction {
        // A changed next-track resolution invalidates any pending work.
        if matches!(
            self.phase,
            TransitionPhase::Preloading | TransitionPhase::Preloaded | TransitionPhase::Scheduled
        ) {
            let still_valid = match (next, self.target_hash.as_deref()) {
                (Some(track), Some(target)) => track.hash == target,
                _ => false,
            };
            if !still_valid {
                log::debug!("transition: resolved next changed, back to idle");
                self.cancel();
                return TransitionAction::InvalidateStandby;
            }
        }

        match self.phase {
            TransitionPhase::Idle => {
                if !gapless_enabled {
                    return TransitionAction::None;
                }
                let Some(track) = next else {
                    return TransitionAction::None;
                };
                if self.failed_hash.as_deref() == Some(track.hash.as_str()) {
                    return TransitionAction::None;
                }
                if remaining <= lookahead_secs {
                    self.phase = TransitionPhase::Preloading;
                    self.target_hash = Some(track.hash.clone());
                    log::info!(
                        "transition: preloading {} ({remaining:.1}s remaining)",
                        track.hash
                    );
                    TransitionAction::BeginPreload(track.clone())
                } else {
                    TransitionAction::None
                }
            }
            TransitionPhase::Preloaded => {
                if !standby_ready {
                    // Standby lost its preload (e.g. released elsewhere).
                    self.cancel();
                    return TransitionAction::None;
                }
                self.phase = TransitionPhase::Scheduled;
                let delay = Duration::from_secs_f64((remaining).max(0.0))
                    .saturating_sub(safety_margin);
                log::info!(
                    "transition: switch armed, firing in {:.3}s",
                    delay.as_secs_f64()
                );
                TransitionAction::Arm(delay)
            }
            _ => TransitionAction::None,
        }
    }

    /// The standby slot reported ready for `hash`.
    pub fn preload_ready(&mut self, hash: &str) {
        if self.phase == TransitionPhase::Preloading && self.target_hash.as_deref() == Some(hash) {
            self.phase = TransitionPhase::Preloaded;
        } else {
            log::debug!("transition: ignoring stale preload-ready for {hash}");
        }
    }

    /// Preload failed; degrade silently to the non-gapless path and do not
    /// retry this target until the window resets.
    pub fn preload_failed(&mut self, hash: &str) {
        if self.phase == TransitionPhase::Preloading && self.target_hash.as_deref() == Some(hash) {
            log::warn!("transition: preload of {hash} failed, falling back to natural end");
            self.cancel();
            self.failed_hash = Some(hash.to_string());
        }
    }

    /// Store the armed timer so a later cancel can abort it.
    pub fn set_timer(&mut self, handle: tokio::task::JoinHandle<()>) {
        self.timer = Some(handle);
    }

    /// The armed timer fired. Returns the target hash if the switch should
    /// proceed; a cancel that raced the timer yields None.
    pub fn begin_transition(&mut self) -> Option<String> {
        if self.phase == TransitionPhase::Scheduled {
            self.phase = TransitionPhase::Transitioning;
            self.target_hash.clone()
        } else {
            None
        }
    }

    /// Switchover finished; back to idle for the new track.
    pub fn complete(&mut self) {
        self.phase = TransitionPhase::Idle;
        self.target_hash = None;
        self.failed_hash = None;
        self.timer = None;
    }

    /// Tear down any pending work: seek, pause, manual track change, or a
    /// stale target. Safe to call in any phase, any number of times.
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if self.phase != TransitionPhase::Idle {
            log::debug!("transition: cancelled from {:?}", self.phase);
        }
        self.phase = TransitionPhase::Idle;
        self.target_hash = None;
        self.failed_hash = None;
    }

    /// Whether a cancel should also drop the standby preload.
    pub fn holds_preload(&self) -> bool {
        matches!(
            self.phase,
            TransitionPhase::Preloaded | TransitionPhase::Scheduled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::test_track;

    const MARGIN: Duration = Duration::from_millis(100);

    fn preload_action(scheduler: &mut TransitionScheduler, next: &Track, remaining: f64) {
        let action = scheduler.evaluate(remaining, Some(next), false, true, 30.0, MARGIN);
        assert!(matches!(action, TransitionAction::BeginPreload(_)));
    }

    #[test]
    fn walks_idle_to_scheduled() {
        let mut scheduler = TransitionScheduler::new();
        let next = test_track("b", 200.0);

        // Outside the lookahead window nothing happens.
        let action = scheduler.evaluate(45.0, Some(&next), false, true, 30.0, MARGIN);
        assert!(matches!(action, TransitionAction::None));
        assert_eq!(scheduler.phase(), TransitionPhase::Idle);

        preload_action(&mut scheduler, &next, 25.0);
        assert_eq!(scheduler.phase(), TransitionPhase::Preloading);

        scheduler.preload_ready("b");
        assert_eq!(scheduler.phase(), TransitionPhase::Preloaded);

        let action = scheduler.evaluate(20.0, Some(&next), true, true, 30.0, MARGIN);
        match action {
            TransitionAction::Arm(delay) => {
                assert!((delay.as_secs_f64() - 19.9).abs() < 0.01);
            }
            other => panic!("expected Arm, got {other:?}"),
        }
        assert_eq!(scheduler.phase(), TransitionPhase::Scheduled);

        assert_eq!(scheduler.begin_transition().as_deref(), Some("b"));
        assert_eq!(scheduler.phase(), TransitionPhase::Transitioning);

        scheduler.complete();
        assert_eq!(scheduler.phase(), TransitionPhase::Idle);
    }

    #[test]
    fn no_next_track_stays_idle() {
        let mut scheduler = TransitionScheduler::new();
        let action = scheduler.evaluate(5.0, None, false, true, 30.0, MARGIN);
        assert!(matches!(action, TransitionAction::None));
        assert_eq!(scheduler.phase(), TransitionPhase::Idle);
    }

    #[test]
    fn gapless_disabled_never_preloads() {
        let mut scheduler = TransitionScheduler::new();
        let next = test_track("b", 200.0);
        let action = scheduler.evaluate(5.0, Some(&next), false, false, 30.0, MARGIN);
        assert!(matches!(action, TransitionAction::None));
    }

    #[test]
    fn changed_next_invalidates_pending_preload() {
        let mut scheduler = TransitionScheduler::new();
        let next = test_track("b", 200.0);
        preload_action(&mut scheduler, &next, 25.0);
        scheduler.preload_ready("b");

        let replacement = test_track("c", 120.0);
        let action = scheduler.evaluate(20.0, Some(&replacement), true, true, 30.0, MARGIN);
        assert!(matches!(action, TransitionAction::InvalidateStandby));
        assert_eq!(scheduler.phase(), TransitionPhase::Idle);

        // Next evaluation starts preloading the replacement from scratch.
        preload_action(&mut scheduler, &replacement, 20.0);
        assert_eq!(scheduler.target_hash(), Some("c"));
    }

    #[test]
    fn stale_preload_ready_is_ignored() {
        let mut scheduler = TransitionScheduler::new();
        let next = test_track("b", 200.0);
        preload_action(&mut scheduler, &next, 25.0);
        scheduler.preload_ready("zzz");
        assert_eq!(scheduler.phase(), TransitionPhase::Preloading);
    }

    #[test]
    fn preload_failure_returns_to_idle() {
        let mut scheduler = TransitionScheduler::new();
        let next = test_track("b", 200.0);
        preload_action(&mut scheduler, &next, 25.0);
        scheduler.preload_failed("b");
        assert_eq!(scheduler.phase(), TransitionPhase::Idle);
        assert!(scheduler.target_hash().is_none());
    }

    #[test]
    fn failed_target_is_not_retried_until_reset() {
        let mut scheduler = TransitionScheduler::new();
        let next = test_track("b", 200.0);
        preload_action(&mut scheduler, &next, 25.0);
        scheduler.preload_failed("b");

        let action = scheduler.evaluate(20.0, Some(&next), false, true, 30.0, MARGIN);
        assert!(matches!(action, TransitionAction::None));

        // A window reset (seek, track change) clears the marker.
        scheduler.cancel();
        preload_action(&mut scheduler, &next, 15.0);
    }

    #[test]
    fn arm_with_no_remaining_time_fires_immediately() {
        let mut scheduler = TransitionScheduler::new();
        let next = test_track("b", 200.0);
        preload_action(&mut scheduler, &next, 0.05);
        scheduler.preload_ready("b");
        let action = scheduler.evaluate(0.0, Some(&next), true, true, 30.0, MARGIN);
        match action {
            TransitionAction::Arm(delay) => assert!(delay.is_zero()),
            other => panic!("expected Arm, got {other:?}"),
        }
    }

    #[test]
    fn cancel_is_idempotent_and_begin_after_cancel_is_none() {
        let mut scheduler = TransitionScheduler::new();
        let next = test_track("b", 200.0);
        preload_action(&mut scheduler, &next, 25.0);
        scheduler.preload_ready("b");
        scheduler.evaluate(20.0, Some(&next), true, true, 30.0, MARGIN);

        scheduler.cancel();
        scheduler.cancel();
        assert_eq!(scheduler.phase(), TransitionPhase::Idle);
        assert!(scheduler.begin_transition().is_none());
    }

    #[test]
    fn no_duplicate_preload_for_same_target() {
        let mut scheduler = TransitionScheduler::new();
        let next = test_track("b", 200.0);
        preload_action(&mut scheduler, &next, 25.0);
        // Still preloading: further evaluations do not re-trigger.
        let action = scheduler.evaluate(24.0, Some(&next), false, true, 30.0, MARGIN);
        assert!(matches!(action, TransitionAction::None));
    }
}
