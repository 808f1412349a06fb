//! Text-driven lip-sync.
//!
//! ```text
//! Word{text, ms} ─► sanitize ─► one AnimationFrame per char ─► FIFO
//!                                                               │ 50 ms drive tick
//!                                              targets_for(ch) ─┤
//!                                                               ▼
//!                           5-step transition ─► CharacterRig::update_morph_weights
//! ```
//!
//! The rig is the only seam to the renderer. Weight names follow the avatar's
//! blend-shape names so a rig can forward them verbatim.

pub mod animator;
pub mod greeting;
pub mod phoneme;
pub mod sanitize;
pub mod words;

pub use animator::{AnimationFrame, Animator, AnimatorConfig};
pub use greeting::GreetingDetector;
pub use phoneme::{neutral_targets, targets_for};
pub use sanitize::{collapse_soft_consonants, sanitize};
pub use words::{Word, WordAccumulator};

use std::fmt;

use serde::{Deserialize, Serialize};

/// The avatar's mouth blend shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MorphTarget {
    #[serde(rename = "Merged_Open_Mouth")]
    MergedOpenMouth,
    #[serde(rename = "V_Lip_Open")]
    LipOpen,
    #[serde(rename = "V_Tight_O")]
    TightO,
    #[serde(rename = "V_Dental_Lip")]
    DentalLip,
    #[serde(rename = "V_Explosive")]
    Explosive,
    #[serde(rename = "V_Wide")]
    Wide,
    #[serde(rename = "V_Affricate")]
    Affricate,
    #[serde(rename = "V_Tight")]
    Tight,
}

/// Every target the animator drives, in rig order.
pub const ALL_MORPH_TARGETS: [MorphTarget; 8] = [
    MorphTarget::MergedOpenMouth,
    MorphTarget::LipOpen,
    MorphTarget::TightO,
    MorphTarget::DentalLip,
    MorphTarget::Explosive,
    MorphTarget::Wide,
    MorphTarget::Affricate,
    MorphTarget::Tight,
];

impl MorphTarget {
    /// Blend-shape name as exported on the avatar mesh.
    pub fn name(self) -> &'static str {
        match self {
            Self::MergedOpenMouth => "Merged_Open_Mouth",
            Self::LipOpen => "V_Lip_Open",
            Self::TightO => "V_Tight_O",
            Self::DentalLip => "V_Dental_Lip",
            Self::Explosive => "V_Explosive",
            Self::Wide => "V_Wide",
            Self::Affricate => "V_Affricate",
            Self::Tight => "V_Tight",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for MorphTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One named weight in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MorphWeight {
    pub target: MorphTarget,
    pub weight: f32,
}

impl MorphWeight {
    pub const fn new(target: MorphTarget, weight: f32) -> Self {
        Self { target, weight }
    }
}

/// Current weight of every target. Absent from an update means unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MorphWeightState {
    weights: [f32; ALL_MORPH_TARGETS.len()],
}

impl MorphWeightState {
    pub fn get(&self, target: MorphTarget) -> f32 {
        self.weights[target.index()]
    }

    pub fn set(&mut self, target: MorphTarget, weight: f32) {
        self.weights[target.index()] = weight.clamp(0.0, 1.0);
    }

    /// Overlay `updates` onto the current state.
    pub fn apply(&mut self, updates: &[MorphWeight]) {
        for w in updates {
            self.set(w.target, w.weight);
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.weights.iter().all(|w| *w == 0.0)
    }

    /// The full vocabulary as a weight list.
    pub fn to_weights(&self) -> Vec<MorphWeight> {
        ALL_MORPH_TARGETS
            .iter()
            .map(|t| MorphWeight::new(*t, self.get(*t)))
            .collect()
    }
}

/// Renderer-side character the animator drives.
pub trait CharacterRig: Send {
    /// Apply weights by name. Targets not listed keep their current weight.
    fn update_morph_weights(&mut self, weights: &[MorphWeight]);

    /// Play the one-shot greeting gesture.
    fn play_greeting_gesture(&mut self);
}

impl<R: CharacterRig + ?Sized> CharacterRig for Box<R> {
    fn update_morph_weights(&mut self, weights: &[MorphWeight]) {
        (**self).update_morph_weights(weights)
    }

    fn play_greeting_gesture(&mut self) {
        (**self).play_greeting_gesture()
    }
}
