//! Headless stand-in for the avatar renderer.

use std::sync::Arc;

use ayla_core::lipsync::MorphWeightState;
use ayla_core::{CharacterRig, MorphWeight};
use parking_lot::Mutex;
use tracing::{info, trace};

#[derive(Debug, Default)]
pub struct RigStats {
    pub pose: MorphWeightState,
    pub updates: usize,
    pub greetings: usize,
}

/// Records the current pose and logs every update.
#[derive(Clone, Default)]
pub struct LoggingRig {
    stats: Arc<Mutex<RigStats>>,
}

impl LoggingRig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Arc<Mutex<RigStats>> {
        Arc::clone(&self.stats)
    }
}

impl CharacterRig for LoggingRig {
    fn update_morph_weights(&mut self, weights: &[MorphWeight]) {
        let mut stats = self.stats.lock();
        stats.pose.apply(weights);
        stats.updates += 1;
        trace!(
            open = stats.pose.get(ayla_core::MorphTarget::MergedOpenMouth),
            targets = weights.len(),
            "rig pose updated"
        );
    }

    fn play_greeting_gesture(&mut self) {
        self.stats.lock().greetings += 1;
        info!("rig: greeting gesture");
    }
}
