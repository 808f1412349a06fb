//! Frame queue and weight interpolation.
//!
//! ## Timing
//!
//! ```text
//! drive tick (every 50 ms) ── idle + frame queued? ── pop frame
//!                                                       ├─ cancel stale timers
//!                                                       ├─ transition → targets_for(ch)
//!                                                       └─ FrameEnd at now + frame.duration
//! FrameEnd ── queue empty? ── transition → neutral (idle reset)
//! TransitionStep(i) ── rig gets start + (target - start) * i / steps
//! ```
//!
//! The animator is the only writer of morph weights. Every step updates the
//! authoritative state, so a transition cut short by the next frame or an
//! interruption starts the following one from what the rig actually shows.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{
    phoneme::{neutral_targets, targets_for},
    sanitize::sanitize,
    words::Word,
    CharacterRig, MorphWeight, MorphWeightState, ALL_MORPH_TARGETS,
};
use crate::error::{AylaError, Result};
use crate::timer::TimerSet;

/// Lip-sync timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnimatorConfig {
    /// Drive tick: how often an idle animator looks at the queue. Default: 50.
    pub tick_ms: u64,
    /// Per-frame weight transition window. Default: 50.
    pub transition_ms: u64,
    /// Sub-steps per transition. Default: 5.
    pub transition_steps: u32,
    /// Upper bound of a character's slot before smoothing. Default: 150.
    pub max_char_ms: u64,
    /// Lower bound of a character's slot after smoothing. Default: 20.
    pub min_char_ms: u64,
    /// Subtracted from each slot so frames finish slightly ahead of the audio.
    /// Default: 10.
    pub char_offset_ms: u64,
    /// Transition window used when returning to neutral on interruption.
    /// Default: 20.
    pub interrupt_transition_ms: u64,
}

impl Default for AnimatorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            transition_ms: 50,
            transition_steps: 5,
            max_char_ms: 150,
            min_char_ms: 20,
            char_offset_ms: 10,
            interrupt_transition_ms: 20,
        }
    }
}

impl AnimatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 || self.transition_steps == 0 {
            return Err(AylaError::InvalidConfig(
                "tick_ms and transition_steps must be non-zero".into(),
            ));
        }
        if self.min_char_ms > self.max_char_ms {
            return Err(AylaError::InvalidConfig(format!(
                "min_char_ms ({}) exceeds max_char_ms ({})",
                self.min_char_ms, self.max_char_ms
            )));
        }
        Ok(())
    }

    /// Slot length for each of `chars` characters sharing `duration_ms`.
    pub fn char_duration(&self, duration_ms: u64, chars: usize) -> Duration {
        if chars == 0 {
            return Duration::ZERO;
        }
        let even = (duration_ms as f64 / chars as f64).round() as u64;
        let per = even
            .min(self.max_char_ms)
            .saturating_sub(self.char_offset_ms)
            .max(self.min_char_ms);
        Duration::from_millis(per)
    }
}

/// One character held on the rig for `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationFrame {
    pub ch: char,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnimTimer {
    FrameEnd,
    TransitionStep(u32),
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    start: MorphWeightState,
    target: MorphWeightState,
    steps: u32,
}

impl Transition {
    fn at_step(&self, step: u32) -> Vec<MorphWeight> {
        let t = step as f32 / self.steps as f32;
        ALL_MORPH_TARGETS
            .iter()
            .map(|m| {
                let from = self.start.get(*m);
                let to = self.target.get(*m);
                let w = from + (to - from) * t;
                MorphWeight::new(*m, (w * 10_000.0).round() / 10_000.0)
            })
            .collect()
    }
}

/// Drives a `CharacterRig` from queued animation frames.
pub struct Animator<R: CharacterRig = Box<dyn CharacterRig>> {
    config: AnimatorConfig,
    rig: R,
    queue: VecDeque<AnimationFrame>,
    is_animating: bool,
    current: Option<char>,
    weights: MorphWeightState,
    transition: Option<Transition>,
    timers: TimerSet<AnimTimer>,
    next_drive: Option<Duration>,
}

impl<R: CharacterRig> Animator<R> {
    pub fn new(config: AnimatorConfig, rig: R) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rig,
            queue: VecDeque::new(),
            is_animating: false,
            current: None,
            weights: MorphWeightState::default(),
            transition: None,
            timers: TimerSet::new(),
            next_drive: None,
        })
    }

    /// Queue one frame per sanitized character of `text`, sharing
    /// `duration_ms` between them. Returns the number of frames queued.
    pub fn enqueue_word(&mut self, text: &str, duration_ms: u64) -> usize {
        let chars = sanitize(text);
        if chars.is_empty() {
            return 0;
        }
        let duration = self.config.char_duration(duration_ms, chars.len());
        self.queue.extend(
            chars
                .iter()
                .map(|&ch| AnimationFrame { ch, duration }),
        );
        debug!(
            text,
            frames = chars.len(),
            per_char_ms = duration.as_millis() as u64,
            queued = self.queue.len(),
            "word queued for lip-sync"
        );
        chars.len()
    }

    /// Fire due step and frame timers, then run the drive tick if it is due.
    pub fn tick(&mut self, now: Duration) {
        let mark = self.timers.mark();
        while let Some((_, timer)) = self.timers.pop_due(now, mark) {
            match timer {
                AnimTimer::TransitionStep(step) => self.apply_step(step),
                AnimTimer::FrameEnd => {
                    self.is_animating = false;
                    self.current = None;
                    if self.queue.is_empty() {
                        trace!("frame queue drained, returning to neutral");
                        let window = Duration::from_millis(self.config.transition_ms);
                        self.start_transition(&neutral_targets(), window, now);
                    }
                }
            }
        }

        if !self.drive_due(now) || self.is_animating {
            return;
        }
        let Some(frame) = self.queue.pop_front() else {
            return;
        };
        self.timers.clear();
        self.current = Some(frame.ch);
        let window = Duration::from_millis(self.config.transition_ms);
        self.start_transition(&targets_for(Some(frame.ch)), window, now);
        self.is_animating = true;
        self.timers.schedule(now + frame.duration, AnimTimer::FrameEnd);
        trace!(ch = %frame.ch, duration_ms = frame.duration.as_millis() as u64, "frame started");
    }

    /// Barge-in: drop every queued frame and pending step, fade to neutral.
    pub fn interrupt(&mut self, now: Duration) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.is_animating = false;
        self.current = None;
        self.timers.clear();
        let window = Duration::from_millis(self.config.interrupt_transition_ms);
        self.start_transition(&neutral_targets(), window, now);
        debug!(dropped_frames = dropped, "lip-sync interrupted");
    }

    /// Interrupt, then queue the word that was still being spoken.
    pub fn disconnect(&mut self, final_word: Option<Word>, now: Duration) {
        self.interrupt(now);
        if let Some(word) = final_word {
            self.enqueue_word(&word.text, word.duration_ms);
        }
    }

    pub fn is_idle(&self) -> bool {
        !self.is_animating && self.queue.is_empty()
    }

    pub fn is_animating(&self) -> bool {
        self.is_animating
    }

    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    /// Character currently on the rig, if a frame is playing.
    pub fn current_char(&self) -> Option<char> {
        self.current
    }

    pub fn weights(&self) -> &MorphWeightState {
        &self.weights
    }

    pub fn has_pending_timers(&self) -> bool {
        !self.timers.is_empty()
    }

    pub fn config(&self) -> &AnimatorConfig {
        &self.config
    }

    pub fn rig(&self) -> &R {
        &self.rig
    }

    pub fn rig_mut(&mut self) -> &mut R {
        &mut self.rig
    }

    fn drive_due(&mut self, now: Duration) -> bool {
        let tick = Duration::from_millis(self.config.tick_ms);
        match self.next_drive {
            Some(deadline) if now < deadline => false,
            Some(deadline) => {
                let next = deadline + tick;
                self.next_drive = Some(if now < next { next } else { now + tick });
                true
            }
            None => {
                self.next_drive = Some(now + tick);
                true
            }
        }
    }

    fn start_transition(&mut self, targets: &[MorphWeight], window: Duration, now: Duration) {
        self.timers
            .cancel_where(|t| matches!(t, AnimTimer::TransitionStep(_)));

        let mut target = MorphWeightState::default();
        target.apply(targets);
        let steps = self.config.transition_steps;
        self.transition = Some(Transition {
            start: self.weights,
            target,
            steps,
        });

        if window.is_zero() {
            self.apply_step(steps);
            return;
        }
        for step in 1..=steps {
            self.timers
                .schedule(now + window * step / steps, AnimTimer::TransitionStep(step));
        }
    }

    fn apply_step(&mut self, step: u32) {
        let Some(transition) = self.transition else {
            return;
        };
        let weights = transition.at_step(step);
        self.weights.apply(&weights);
        self.rig.update_morph_weights(&weights);
        if step >= transition.steps {
            self.weights = transition.target;
            self.transition = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lipsync::MorphTarget;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct RecordingRig {
        updates: Arc<Mutex<Vec<Vec<MorphWeight>>>>,
    }

    impl CharacterRig for RecordingRig {
        fn update_morph_weights(&mut self, weights: &[MorphWeight]) {
            self.updates.lock().push(weights.to_vec());
        }

        fn play_greeting_gesture(&mut self) {}
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn animator() -> (Animator<RecordingRig>, RecordingRig) {
        let rig = RecordingRig::default();
        let animator = Animator::new(AnimatorConfig::default(), rig.clone()).unwrap();
        (animator, rig)
    }

    fn run(animator: &mut Animator<RecordingRig>, from: u64, to: u64) {
        let mut t = from;
        while t <= to {
            animator.tick(ms(t));
            t += 5;
        }
    }

    #[test]
    fn per_char_duration_is_clamped() {
        let cfg = AnimatorConfig::default();
        assert_eq!(cfg.char_duration(1000, 2), ms(140));
        assert_eq!(cfg.char_duration(500, 5), ms(90));
        assert_eq!(cfg.char_duration(10, 5), ms(20));
        assert_eq!(cfg.char_duration(0, 3), ms(20));
        for (d, n) in [(1u64, 1usize), (29, 1), (151, 1), (100_000, 3), (333, 7)] {
            let per = cfg.char_duration(d, n);
            assert!(per >= ms(20) && per <= ms(150), "{d} ms / {n} -> {per:?}");
        }
    }

    #[test]
    fn enqueue_word_sanitizes_and_counts() {
        let (mut animator, _) = animator();
        assert_eq!(animator.enqueue_word("Salam!", 600), 6);
        assert_eq!(animator.queued_frames(), 6);
        assert_eq!(animator.enqueue_word("   ", 100), 0);
        assert!(!animator.is_idle());
    }

    #[test]
    fn frames_play_in_order_with_interpolated_steps() {
        let (mut animator, rig) = animator();
        animator.enqueue_word("am", 200);

        animator.tick(ms(0));
        assert_eq!(animator.current_char(), Some('a'));
        run(&mut animator, 5, 50);

        let updates = rig.updates.lock().clone();
        assert_eq!(updates.len(), 5, "five steps over the 50 ms window");
        assert!(updates.iter().all(|u| u.len() == 8), "full vocabulary every step");
        let open: Vec<f32> = updates
            .iter()
            .map(|u| u.iter().find(|w| w.target == MorphTarget::MergedOpenMouth).unwrap().weight)
            .collect();
        assert_eq!(open, vec![0.08, 0.16, 0.24, 0.32, 0.4]);
        assert_eq!(animator.weights().get(MorphTarget::MergedOpenMouth), 0.4);

        // 'a' lasts 90 ms; the next drive tick after that is at 100 ms.
        run(&mut animator, 55, 100);
        assert_eq!(animator.current_char(), Some('m'));
    }

    #[test]
    fn drained_queue_returns_to_neutral() {
        let (mut animator, _) = animator();
        animator.enqueue_word("a", 40);
        run(&mut animator, 0, 200);
        assert!(animator.is_idle());
        assert!(animator.weights().is_neutral());
        assert!(!animator.has_pending_timers());
    }

    #[test]
    fn interrupt_clears_queue_and_timers() {
        let (mut animator, rig) = animator();
        animator.enqueue_word("salamnecesen", 1200);
        run(&mut animator, 0, 30);
        assert!(animator.has_pending_timers());

        animator.interrupt(ms(30));
        assert_eq!(animator.queued_frames(), 0);
        assert!(!animator.is_animating());
        run(&mut animator, 35, 60);

        assert!(animator.weights().is_neutral());
        assert!(!animator.has_pending_timers());
        let last = rig.updates.lock().last().cloned().unwrap();
        assert!(last.iter().all(|w| w.weight == 0.0));
    }

    #[test]
    fn zero_window_applies_synchronously() {
        let rig = RecordingRig::default();
        let config = AnimatorConfig {
            interrupt_transition_ms: 0,
            ..AnimatorConfig::default()
        };
        let mut animator = Animator::new(config, rig.clone()).unwrap();
        animator.enqueue_word("o", 100);
        run(&mut animator, 0, 50);
        assert!(!animator.weights().is_neutral());

        animator.interrupt(ms(50));
        assert!(animator.weights().is_neutral());
        assert!(!animator.has_pending_timers());
    }

    #[test]
    fn abandoned_transition_starts_from_displayed_weights() {
        let (mut animator, rig) = animator();
        animator.enqueue_word("a", 40);
        run(&mut animator, 0, 20);
        // Two of five steps applied: open = 0.16.
        assert_eq!(animator.weights().get(MorphTarget::MergedOpenMouth), 0.16);

        animator.interrupt(ms(20));
        run(&mut animator, 25, 45);
        let first_neutral_step = &rig.updates.lock()[2];
        let open = first_neutral_step
            .iter()
            .find(|w| w.target == MorphTarget::MergedOpenMouth)
            .unwrap()
            .weight;
        assert!((open - 0.128).abs() < 1e-4, "got {open}");
    }

    #[test]
    fn clock_jump_past_frame_end_drops_stale_steps() {
        let (mut animator, rig) = animator();
        animator.enqueue_word("a", 20);
        animator.tick(ms(0));
        // One coarse jump covers steps 1-2, the 20 ms frame end and step 3.
        run(&mut animator, 35, 200);

        let open: Vec<f32> = rig
            .updates
            .lock()
            .iter()
            .map(|u| u.iter().find(|w| w.target == MorphTarget::MergedOpenMouth).unwrap().weight)
            .collect();
        assert_eq!(open, vec![0.08, 0.16, 0.128, 0.096, 0.064, 0.032, 0.0]);
        assert!(animator.weights().is_neutral());
        assert!(!animator.has_pending_timers());
    }

    #[test]
    fn disconnect_requeues_the_final_word() {
        let (mut animator, _) = animator();
        animator.enqueue_word("salam", 500);
        animator.disconnect(
            Some(Word {
                text: "sağ ol".into(),
                duration_ms: 300,
            }),
            ms(0),
        );
        assert_eq!(animator.queued_frames(), 5, "s a ğ o l");
        assert!(!animator.is_animating());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = AnimatorConfig {
            transition_steps: 0,
            ..AnimatorConfig::default()
        };
        assert!(Animator::new(config, RecordingRig::default()).is_err());
    }
}
