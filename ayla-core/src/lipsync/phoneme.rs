//! Character → mouth shape table.
//!
//! One character maps to a fixed handful of weights; there is no phonetic
//! context. Letters follow the Azerbaijani alphabet used by the sanitizer.

use super::{MorphTarget, MorphWeight, ALL_MORPH_TARGETS};

use MorphTarget::*;

/// Character the sanitizer substitutes for anything outside the alphabet.
pub const NEUTRAL_CHAR: char = '_';

const OPEN_DEFAULT: f32 = 0.2;

/// Weights for `ch`. `None` closes the mouth; unknown characters open it
/// slightly.
pub fn targets_for(ch: Option<char>) -> Vec<MorphWeight> {
    let Some(ch) = ch else {
        return vec![MorphWeight::new(MergedOpenMouth, 0.0)];
    };
    let open = |w: f32| MorphWeight::new(MergedOpenMouth, w);

    match ch {
        NEUTRAL_CHAR => neutral_targets(),
        'a' => vec![open(0.4)],
        'ə' => vec![open(0.5)],
        'i' => vec![open(0.2), MorphWeight::new(Wide, 0.5)],
        'e' => vec![open(0.3), MorphWeight::new(Wide, 0.4)],
        'ı' => vec![open(0.2), MorphWeight::new(Wide, 0.6)],
        'm' | 'b' | 'p' => vec![MorphWeight::new(Explosive, 1.0)],
        'u' | 'ü' => vec![
            open(0.1),
            MorphWeight::new(Affricate, 1.0),
            MorphWeight::new(Tight, 1.0),
        ],
        'o' | 'ö' => vec![
            open(0.2),
            MorphWeight::new(Affricate, 1.0),
            MorphWeight::new(Tight, 1.0),
        ],
        'v' | 'f' => vec![MorphWeight::new(DentalLip, 1.0)],
        _ => vec![open(OPEN_DEFAULT)],
    }
}

/// All targets explicitly at zero.
pub fn neutral_targets() -> Vec<MorphWeight> {
    ALL_MORPH_TARGETS
        .iter()
        .map(|t| MorphWeight::new(*t, 0.0))
        .collect()
}
