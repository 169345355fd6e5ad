use serde::{Deserialize, Serialize};

/// MIDI note number, 0–127. Middle C is 60.
pub type Pitch = u8;

/// Pitch below which a held key counts as being in the bass range.
pub const BASS_BOUNDARY: Pitch = 60;

/// Display names for the twelve pitch classes.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
];

/// Returns the pitch class (0–11) of a pitch.
#[must_use]
pub fn pitch_class(pitch: Pitch) -> u8 {
    pitch % 12
}

/// Display name for a pitch class. Values ≥ 12 wrap.
#[must_use]
pub fn note_name(class: u8) -> &'static str {
    NOTE_NAMES[usize::from(class % 12)]
}

/// Lowest pitch of the given octave for a root class, using the
/// convention where octave 4 starts at middle C (60 = C4).
#[must_use]
pub fn base_pitch(root: u8, octave: i8) -> Pitch {
    let value = (i16::from(octave) + 1) * 12 + i16::from(root % 12);
    u8::try_from(value.clamp(0, 127)).unwrap_or(0)
}

//
// ─── HAND ─────────────────────────────────────────────────────────────────────
//

/// Which hand an exercise targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Hand {
    #[default]
    Right,
    Left,
    Both,
}

impl Hand {
    /// Clamps an octave into the playable range for this hand.
    ///
    /// Right-hand exercises live in octaves 4–5, left-hand in 2–3.
    /// `Both` keeps the right-hand range; the bass note is derived
    /// separately.
    #[must_use]
    pub fn clamp_octave(self, octave: i8) -> i8 {
        match self {
            Hand::Right | Hand::Both => octave.clamp(4, 5),
            Hand::Left => octave.clamp(2, 3),
        }
    }

    /// Parses the wire form used by generated steps.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "right" => Some(Hand::Right),
            "left" => Some(Hand::Left),
            "both" => Some(Hand::Both),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_pitch_middle_c() {
        assert_eq!(base_pitch(0, 4), 60);
        assert_eq!(base_pitch(9, 4), 69);
    }

    #[test]
    fn hand_octave_clamping() {
        assert_eq!(Hand::Right.clamp_octave(2), 4);
        assert_eq!(Hand::Right.clamp_octave(7), 5);
        assert_eq!(Hand::Left.clamp_octave(4), 3);
        assert_eq!(Hand::Both.clamp_octave(4), 4);
    }

    #[test]
    fn note_names_wrap() {
        assert_eq!(note_name(0), "C");
        assert_eq!(note_name(13), "C#");
        assert_eq!(pitch_class(61), 1);
    }
}
