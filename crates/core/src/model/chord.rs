use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::pitch::{Pitch, base_pitch, note_name};

//
// ─── CHORD QUALITY ────────────────────────────────────────────────────────────
//

/// Chord qualities the matcher understands, each defined by its interval
/// set from the root (mod 12).
///
/// Generated content refers to these by display name; unknown names fail
/// validation at the content boundary rather than defaulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
    Augmented,
    Dominant7,
    Major7,
    Minor7,
    Single,
}

impl ChordQuality {
    /// All qualities, in library order.
    pub const ALL: [ChordQuality; 8] = [
        ChordQuality::Major,
        ChordQuality::Minor,
        ChordQuality::Diminished,
        ChordQuality::Augmented,
        ChordQuality::Dominant7,
        ChordQuality::Major7,
        ChordQuality::Minor7,
        ChordQuality::Single,
    ];

    /// Qualities selectable for random free practice. `Single` is a
    /// content-authoring primitive, not a playable exercise.
    pub const PLAYABLE: [ChordQuality; 7] = [
        ChordQuality::Major,
        ChordQuality::Minor,
        ChordQuality::Diminished,
        ChordQuality::Augmented,
        ChordQuality::Dominant7,
        ChordQuality::Major7,
        ChordQuality::Minor7,
    ];

    /// Interval offsets from the root, mod 12.
    #[must_use]
    pub fn intervals(self) -> &'static [u8] {
        match self {
            ChordQuality::Major => &[0, 4, 7],
            ChordQuality::Minor => &[0, 3, 7],
            ChordQuality::Diminished => &[0, 3, 6],
            ChordQuality::Augmented => &[0, 4, 8],
            ChordQuality::Dominant7 => &[0, 4, 7, 10],
            ChordQuality::Major7 => &[0, 4, 7, 11],
            ChordQuality::Minor7 => &[0, 3, 7, 10],
            ChordQuality::Single => &[0],
        }
    }

    /// Display name, as used in generated content and attempt labels.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ChordQuality::Major => "Major",
            ChordQuality::Minor => "Minor",
            ChordQuality::Diminished => "Diminished",
            ChordQuality::Augmented => "Augmented",
            ChordQuality::Dominant7 => "Dominant 7th",
            ChordQuality::Major7 => "Major 7th",
            ChordQuality::Minor7 => "Minor 7th",
            ChordQuality::Single => "Single",
        }
    }

    /// Parses a display name from generated content.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|q| q.name() == name)
    }

    /// Pitch classes (0–11) this chord occupies for the given root.
    #[must_use]
    pub fn classes(self, root: u8) -> BTreeSet<u8> {
        self.intervals().iter().map(|i| (root + i) % 12).collect()
    }

    /// Absolute pitches for the staff/preview, root placed in `octave`.
    #[must_use]
    pub fn pitches(self, root: u8, octave: i8) -> Vec<Pitch> {
        let base = base_pitch(root, octave);
        self.intervals()
            .iter()
            .map(|i| base.saturating_add(*i))
            .collect()
    }

    /// Label like "C Major" used for display and attempt records.
    #[must_use]
    pub fn label(self, root: u8) -> String {
        format!("{} {}", note_name(root), self.name())
    }
}

//
// ─── PENTASCALES ──────────────────────────────────────────────────────────────
//

/// Five-note scale flavor for pentascale exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleKind {
    Major,
    Minor,
}

impl ScaleKind {
    /// Interval pattern from the root (W-W-H-W for major, W-H-W-W for minor).
    #[must_use]
    pub fn pattern(self) -> [u8; 5] {
        match self {
            ScaleKind::Major => [0, 2, 4, 5, 7],
            ScaleKind::Minor => [0, 2, 3, 5, 7],
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ScaleKind::Major => "Major",
            ScaleKind::Minor => "Minor",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Major" => Some(ScaleKind::Major),
            "Minor" => Some(ScaleKind::Minor),
            _ => None,
        }
    }
}

/// Playing direction for a pentascale run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

impl Direction {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ascending" => Some(Direction::Ascending),
            "descending" => Some(Direction::Descending),
            _ => None,
        }
    }
}

/// Builds the exact five-pitch sequence for a pentascale exercise.
#[must_use]
pub fn pentascale_pitches(
    root: u8,
    kind: ScaleKind,
    direction: Direction,
    octave: i8,
) -> [Pitch; 5] {
    let base = base_pitch(root, octave);
    let mut out = [0u8; 5];
    for (slot, interval) in out.iter_mut().zip(kind.pattern()) {
        *slot = base.saturating_add(interval);
    }
    if direction == Direction::Descending {
        out.reverse();
    }
    out
}
